//! Cron dispatch jobs: each external task endpoint enqueues one dispatch
//! job per trading day; the dispatch handler fans work out per user.
//!
//! The deprecated endpoints (`morning-brief`, `midday-scan`) are aliases
//! of their replacements (`suggestions/open`, `suggestions/close`): both
//! pairs share a dispatch job name, so hitting either (or both) in one
//! trading day yields exactly one dispatch JobRun.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use otx_config::{trading_day, Clock};
use otx_db::Gateway;
use otx_queue::{EnqueueRequest, JobError, JobHandler, JobQueue};
use otx_schemas::{JobRun, Window};
use otx_suggest::{GeneratorPayload, JOB_SUGGESTIONS_GENERATE};

pub const CRON_SUGGESTIONS_OPEN: &str = "cron.suggestions.open";
pub const CRON_SUGGESTIONS_CLOSE: &str = "cron.suggestions.close";
pub const CRON_UNIVERSE_SYNC: &str = "cron.universe.sync";
pub const CRON_LEARNING_INGEST: &str = "cron.learning.ingest";
pub const CRON_STRATEGY_AUTOTUNE: &str = "cron.strategy.autotune";
pub const CRON_WEEKLY_REPORT: &str = "cron.report.weekly";
pub const CRON_PLAID_BACKFILL: &str = "cron.plaid.backfill";

/// Scout cycles trail the morning dispatch so daily cron work preempts.
const SCOUT_DELAY_SECS: i64 = 1800;

/// What one dispatch job fans out.
#[derive(Clone, Copy, Debug)]
pub enum DispatchPlan {
    /// Generator windows, each with a run_after offset in seconds.
    Windows(&'static [(Window, i64)]),
    /// One per-user job of the given name.
    PerUser(&'static str),
}

pub struct CronDispatchHandler {
    name: &'static str,
    plan: DispatchPlan,
    gateway: Arc<dyn Gateway>,
    queue: JobQueue,
    clock: Arc<dyn Clock>,
}

impl CronDispatchHandler {
    pub fn new(
        name: &'static str,
        plan: DispatchPlan,
        gateway: Arc<dyn Gateway>,
        queue: JobQueue,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name,
            plan,
            gateway,
            queue,
            clock,
        }
    }

    async fn already_dispatched(&self, job_name: &str, key: &str) -> Result<bool, JobError> {
        Ok(self
            .gateway
            .find_job_any_status(job_name, key)
            .await
            .map_err(JobError::from)?
            .is_some())
    }

    /// The full dispatcher set, one handler per cron endpoint family.
    pub fn all(gateway: Arc<dyn Gateway>, queue: JobQueue, clock: Arc<dyn Clock>) -> Vec<Self> {
        vec![
            Self::new(
                CRON_SUGGESTIONS_OPEN,
                DispatchPlan::Windows(&[
                    (Window::MorningLimit, 0),
                    (Window::Scout, SCOUT_DELAY_SECS),
                ]),
                gateway.clone(),
                queue.clone(),
                clock.clone(),
            ),
            Self::new(
                CRON_SUGGESTIONS_CLOSE,
                DispatchPlan::Windows(&[(Window::MiddayEntry, 0), (Window::Rebalance, 0)]),
                gateway.clone(),
                queue.clone(),
                clock.clone(),
            ),
            Self::new(
                CRON_UNIVERSE_SYNC,
                DispatchPlan::PerUser(otx_suggest::JOB_UNIVERSE_SYNC),
                gateway.clone(),
                queue.clone(),
                clock.clone(),
            ),
            Self::new(
                CRON_LEARNING_INGEST,
                DispatchPlan::PerUser(otx_train::JOB_LEARNING_INGEST),
                gateway.clone(),
                queue.clone(),
                clock.clone(),
            ),
            Self::new(
                CRON_STRATEGY_AUTOTUNE,
                DispatchPlan::PerUser(otx_train::JOB_STRATEGY_AUTOTUNE),
                gateway.clone(),
                queue.clone(),
                clock.clone(),
            ),
            Self::new(
                CRON_WEEKLY_REPORT,
                DispatchPlan::PerUser(otx_audit::JOB_WEEKLY_REPORT),
                gateway.clone(),
                queue.clone(),
                clock.clone(),
            ),
            Self::new(
                CRON_PLAID_BACKFILL,
                DispatchPlan::PerUser(otx_audit::JOB_PLAID_BACKFILL),
                gateway,
                queue,
                clock,
            ),
        ]
    }
}

#[async_trait]
impl JobHandler for CronDispatchHandler {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn run(&self, _job: &JobRun) -> Result<Value, JobError> {
        let now = self.clock.now();
        let day = trading_day(now);
        let users = self.gateway.user_ids().await.map_err(JobError::from)?;

        let mut dispatched = 0_usize;
        for user_id in &users {
            match self.plan {
                DispatchPlan::Windows(windows) => {
                    for (window, offset_secs) in windows {
                        let key = format!(
                            "{JOB_SUGGESTIONS_GENERATE}:{user_id}:{}:{day}",
                            window.as_str()
                        );
                        // At most one cycle to completion per (user,
                        // window, day): a terminal run still blocks.
                        if self.already_dispatched(JOB_SUGGESTIONS_GENERATE, &key).await? {
                            continue;
                        }
                        let payload = serde_json::to_value(GeneratorPayload {
                            user_id: *user_id,
                            window: *window,
                        })
                        .map_err(|e| JobError::Terminal(e.to_string()))?;
                        let req = EnqueueRequest::new(JOB_SUGGESTIONS_GENERATE, payload)
                            .with_idempotency_key(key)
                            .with_run_after(now + chrono::Duration::seconds(*offset_secs));
                        self.queue.enqueue(req).await.map_err(JobError::from)?;
                        dispatched += 1;
                    }
                }
                DispatchPlan::PerUser(job_name) => {
                    let key = format!("{job_name}:{user_id}:{day}");
                    if self.already_dispatched(job_name, &key).await? {
                        continue;
                    }
                    let req =
                        EnqueueRequest::new(job_name, serde_json::json!({"user_id": user_id}))
                            .with_idempotency_key(key);
                    self.queue.enqueue(req).await.map_err(JobError::from)?;
                    dispatched += 1;
                }
            }
        }

        info!(
            dispatch = self.name,
            users = users.len(),
            dispatched,
            "cron dispatch fanned out"
        );
        Ok(serde_json::json!({"users": users.len(), "dispatched": dispatched}))
    }
}

//! Reporting and import-marker handlers.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use otx_config::Clock;
use otx_db::Gateway;
use otx_queue::{JobError, JobHandler};
use otx_schemas::{AnalyticsEvent, JobRun, SuggestionStatus, ValidationJournalEntry};

pub const JOB_WEEKLY_REPORT: &str = "report.weekly";
pub const JOB_PLAID_BACKFILL: &str = "plaid.backfill";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserScopedPayload {
    pub user_id: Uuid,
}

// ---------------------------------------------------------------------------
// Weekly report
// ---------------------------------------------------------------------------

/// Summarizes the week into a journal entry: suggestion outcomes and
/// readiness state.
pub struct WeeklyReportHandler {
    gateway: Arc<dyn Gateway>,
    clock: Arc<dyn Clock>,
}

impl WeeklyReportHandler {
    pub fn new(gateway: Arc<dyn Gateway>, clock: Arc<dyn Clock>) -> Self {
        Self { gateway, clock }
    }
}

#[async_trait]
impl JobHandler for WeeklyReportHandler {
    fn name(&self) -> &'static str {
        JOB_WEEKLY_REPORT
    }

    async fn run(&self, job: &JobRun) -> Result<Value, JobError> {
        let payload: UserScopedPayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| JobError::Terminal(format!("malformed report payload: {e}")))?;
        let now = self.clock.now();

        let terminal = self
            .gateway
            .terminal_suggestions_between(payload.user_id, now - Duration::days(7), now)
            .await
            .map_err(JobError::from)?;
        let completed = terminal
            .iter()
            .filter(|s| s.status == SuggestionStatus::Completed)
            .count();
        let dismissed = terminal.len() - completed;

        let state = self
            .gateway
            .validation_state(payload.user_id)
            .await
            .map_err(JobError::from)?;
        let ready = state.as_ref().map(|s| s.overall_ready).unwrap_or(false);
        let streak = state
            .as_ref()
            .map(|s| s.paper_consecutive_passes)
            .unwrap_or(0);

        self.gateway
            .append_journal(&ValidationJournalEntry {
                id: Uuid::new_v4(),
                user_id: payload.user_id,
                created_at: now,
                title: "Weekly Report".to_string(),
                summary: format!(
                    "{completed} completed, {dismissed} dismissed; paper streak {streak}; ready={ready}"
                ),
                details: serde_json::json!({
                    "completed": completed,
                    "dismissed": dismissed,
                    "paper_streak": streak,
                    "overall_ready": ready,
                }),
            })
            .await
            .map_err(JobError::from)?;

        Ok(serde_json::json!({
            "completed": completed,
            "dismissed": dismissed,
            "overall_ready": ready,
        }))
    }
}

// ---------------------------------------------------------------------------
// Broker history backfill marker
// ---------------------------------------------------------------------------

/// The broker-network import itself is an external collaborator; this
/// handler records the request so downstream consumers can observe the
/// backfill cadence.
pub struct BackfillHistoryHandler {
    gateway: Arc<dyn Gateway>,
    clock: Arc<dyn Clock>,
}

impl BackfillHistoryHandler {
    pub fn new(gateway: Arc<dyn Gateway>, clock: Arc<dyn Clock>) -> Self {
        Self { gateway, clock }
    }
}

#[async_trait]
impl JobHandler for BackfillHistoryHandler {
    fn name(&self) -> &'static str {
        JOB_PLAID_BACKFILL
    }

    async fn run(&self, job: &JobRun) -> Result<Value, JobError> {
        let payload: UserScopedPayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| JobError::Terminal(format!("malformed backfill payload: {e}")))?;

        let credentials = self
            .gateway
            .credentials_for_user(payload.user_id)
            .await
            .map_err(JobError::from)?;
        if credentials.is_empty() {
            // Nothing to backfill against; terminal, not retryable.
            return Err(JobError::Terminal(
                "no linked broker credentials for backfill".into(),
            ));
        }

        self.gateway
            .record_event(&AnalyticsEvent {
                event_name: "history.backfill_requested".to_string(),
                category: "import".to_string(),
                properties: serde_json::json!({
                    "user_id": payload.user_id,
                    "providers": credentials.iter().map(|c| c.provider.clone()).collect::<Vec<_>>(),
                }),
                created_at: self.clock.now(),
            })
            .await
            .map_err(JobError::from)?;

        Ok(serde_json::json!({"providers": credentials.len()}))
    }
}

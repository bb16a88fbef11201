//! Queue handlers: training loop, autotune, and learning ingest.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use otx_config::{trading_day_bounds_utc, Clock};
use otx_db::Gateway;
use otx_queue::{JobError, JobHandler};
use otx_schemas::{AnalyticsEvent, JobRun, SuggestionStatus};

use crate::machine::TrainerConfig;
use crate::runner::TrainError;
use crate::service::{TrainingResult, TrainingService};

pub const JOB_STRATEGY_TRAIN: &str = "strategy.train";
pub const JOB_STRATEGY_AUTOTUNE: &str = "strategy.autotune";
pub const JOB_LEARNING_INGEST: &str = "learning.ingest";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrainJobPayload {
    pub user_id: Uuid,
    /// Base evaluation request; the default training target when absent.
    #[serde(default)]
    pub request: Option<otx_histval::HistoricalRequest>,
    #[serde(default)]
    pub train_target_streak: Option<u32>,
    #[serde(default)]
    pub train_max_attempts: Option<u32>,
    #[serde(default)]
    pub seed: Option<u64>,
}

fn classify(err: TrainError) -> JobError {
    match err {
        TrainError::Histval(h) => match h {
            otx_histval::HistvalError::Data(msg) => JobError::ProviderTransient(msg),
            otx_histval::HistvalError::InvalidRequest(msg) => JobError::Terminal(msg),
            otx_histval::HistvalError::Db(db) => db.into(),
        },
        TrainError::BadSnapshot(msg) => JobError::Terminal(msg),
        TrainError::Db(db) => db.into(),
    }
}

fn result_json(result: &TrainingResult) -> Value {
    match result {
        TrainingResult::Accepted { snapshot, attempts } => serde_json::json!({
            "accepted": true,
            "attempts": attempts,
            "snapshot": snapshot,
        }),
        TrainingResult::Exhausted { attempts } => serde_json::json!({
            "accepted": false,
            "attempts": attempts,
        }),
    }
}

// ---------------------------------------------------------------------------
// Training loop
// ---------------------------------------------------------------------------

pub struct TrainJobHandler {
    service: Arc<TrainingService>,
    deadline_secs: u64,
}

impl TrainJobHandler {
    pub fn new(service: Arc<TrainingService>, deadline_secs: u64) -> Self {
        Self {
            service,
            deadline_secs,
        }
    }
}

#[async_trait]
impl JobHandler for TrainJobHandler {
    fn name(&self) -> &'static str {
        JOB_STRATEGY_TRAIN
    }

    fn deadline_secs(&self) -> u64 {
        self.deadline_secs
    }

    async fn run(&self, job: &JobRun) -> Result<Value, JobError> {
        let payload: TrainJobPayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| JobError::Terminal(format!("malformed train payload: {e}")))?;

        let defaults = TrainerConfig::default();
        let cfg = TrainerConfig {
            target_streak: payload.train_target_streak.unwrap_or(defaults.target_streak),
            max_attempts: payload.train_max_attempts.unwrap_or(defaults.max_attempts),
        };
        if cfg.target_streak == 0 || cfg.max_attempts == 0 {
            return Err(JobError::Terminal(
                "train_target_streak and train_max_attempts must be >= 1".into(),
            ));
        }

        let base = payload
            .request
            .unwrap_or_else(crate::runner::default_train_request);
        let result = self
            .service
            .train(payload.user_id, &base, cfg, payload.seed)
            .await
            .map_err(classify)?;
        Ok(result_json(&result))
    }
}

// ---------------------------------------------------------------------------
// Autotune
// ---------------------------------------------------------------------------

pub struct AutotuneJobHandler {
    service: Arc<TrainingService>,
    deadline_secs: u64,
}

impl AutotuneJobHandler {
    pub fn new(service: Arc<TrainingService>, deadline_secs: u64) -> Self {
        Self {
            service,
            deadline_secs,
        }
    }
}

#[async_trait]
impl JobHandler for AutotuneJobHandler {
    fn name(&self) -> &'static str {
        JOB_STRATEGY_AUTOTUNE
    }

    fn deadline_secs(&self) -> u64 {
        self.deadline_secs
    }

    async fn run(&self, job: &JobRun) -> Result<Value, JobError> {
        let payload: TrainJobPayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| JobError::Terminal(format!("malformed autotune payload: {e}")))?;
        let base = payload
            .request
            .unwrap_or_else(crate::runner::default_train_request);
        let result = self
            .service
            .autotune(payload.user_id, &base, payload.seed)
            .await
            .map_err(classify)?;
        Ok(result_json(&result))
    }
}

// ---------------------------------------------------------------------------
// Learning ingest
// ---------------------------------------------------------------------------

/// Folds the previous trading day's terminal suggestions into the
/// analytics stream so autotune proposals can condition on realized
/// outcomes.
pub struct LearningIngestHandler {
    gateway: Arc<dyn Gateway>,
    clock: Arc<dyn Clock>,
}

impl LearningIngestHandler {
    pub fn new(gateway: Arc<dyn Gateway>, clock: Arc<dyn Clock>) -> Self {
        Self { gateway, clock }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LearningIngestPayload {
    pub user_id: Uuid,
}

#[async_trait]
impl JobHandler for LearningIngestHandler {
    fn name(&self) -> &'static str {
        JOB_LEARNING_INGEST
    }

    async fn run(&self, job: &JobRun) -> Result<Value, JobError> {
        let payload: LearningIngestPayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| JobError::Terminal(format!("malformed ingest payload: {e}")))?;

        let now = self.clock.now();
        // The previous trading day's interval.
        let (today_start, _) = trading_day_bounds_utc(now);
        let (prev_start, prev_end) =
            trading_day_bounds_utc(today_start - chrono::Duration::seconds(1));

        let terminal = self
            .gateway
            .terminal_suggestions_between(payload.user_id, prev_start, prev_end)
            .await
            .map_err(JobError::from)?;

        let completed = terminal
            .iter()
            .filter(|s| s.status == SuggestionStatus::Completed)
            .count();
        let dismissed = terminal
            .iter()
            .filter(|s| s.status == SuggestionStatus::Dismissed)
            .count();
        let realized_ev: f64 = terminal
            .iter()
            .filter(|s| s.status == SuggestionStatus::Completed)
            .map(|s| s.metrics.ev)
            .sum();

        self.gateway
            .record_event(&AnalyticsEvent {
                event_name: "learning.ingested".to_string(),
                category: "learning".to_string(),
                properties: serde_json::json!({
                    "user_id": payload.user_id,
                    "completed": completed,
                    "dismissed": dismissed,
                    "realized_ev": realized_ev,
                }),
                created_at: now,
            })
            .await
            .map_err(JobError::from)?;

        Ok(serde_json::json!({
            "completed": completed,
            "dismissed": dismissed,
        }))
    }
}

//! Queue handler for historical validation jobs.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use otx_queue::{JobError, JobHandler};
use otx_schemas::JobRun;

use crate::service::ValidationService;
use crate::types::{HistoricalRequest, HistvalError};

pub const JOB_VALIDATION_HISTORICAL: &str = "validation.historical";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoricalJobPayload {
    pub user_id: Uuid,
    pub request: HistoricalRequest,
}

pub struct HistoricalJobHandler {
    service: Arc<ValidationService>,
    deadline_secs: u64,
}

impl HistoricalJobHandler {
    pub fn new(service: Arc<ValidationService>, deadline_secs: u64) -> Self {
        Self {
            service,
            deadline_secs,
        }
    }
}

#[async_trait]
impl JobHandler for HistoricalJobHandler {
    fn name(&self) -> &'static str {
        JOB_VALIDATION_HISTORICAL
    }

    fn deadline_secs(&self) -> u64 {
        self.deadline_secs
    }

    async fn run(&self, job: &JobRun) -> Result<Value, JobError> {
        let payload: HistoricalJobPayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| JobError::Terminal(format!("malformed historical payload: {e}")))?;

        let outcome = self
            .service
            .run_historical(payload.user_id, &payload.request)
            .await
            .map_err(classify)?;

        // A failed goal is a valid outcome, not a job failure.
        serde_json::to_value(&outcome)
            .map_err(|e| JobError::Terminal(format!("unserializable outcome: {e}")))
    }
}

fn classify(err: HistvalError) -> JobError {
    match err {
        HistvalError::InvalidRequest(msg) => JobError::Terminal(msg),
        HistvalError::Data(msg) => JobError::ProviderTransient(msg),
        HistvalError::Db(db) => db.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SyntheticHistory;
    use crate::engine::HistoricalEngine;
    use chrono::TimeZone;
    use otx_config::ManualClock;
    use otx_db::{Gateway, MemGateway};
    use otx_schemas::{InstrumentType, JobStatus};

    fn handler(gw: &MemGateway) -> HistoricalJobHandler {
        let clock = Arc::new(ManualClock::new(
            chrono::Utc.with_ymd_and_hms(2024, 3, 15, 16, 0, 0).unwrap(),
        ));
        let service = Arc::new(ValidationService::new(
            Arc::new(gw.clone()),
            HistoricalEngine::new(Arc::new(SyntheticHistory)),
            clock,
            14,
            3,
        ));
        HistoricalJobHandler::new(service, 1800)
    }

    fn job(payload: Value) -> JobRun {
        let now = chrono::Utc.with_ymd_and_hms(2024, 3, 15, 16, 0, 0).unwrap();
        JobRun {
            id: Uuid::new_v4(),
            job_name: JOB_VALIDATION_HISTORICAL.to_string(),
            idempotency_key: None,
            status: JobStatus::Processing,
            attempt_count: 0,
            max_attempts: 5,
            scheduled_for: now,
            run_after: now,
            started_at: Some(now),
            finished_at: None,
            duration_ms: None,
            payload,
            result: None,
            error: None,
            created_at: now,
        }
    }

    #[tokio::test]
    async fn runs_and_reports_outcome() {
        let gw = MemGateway::new();
        let h = handler(&gw);
        let user = Uuid::new_v4();

        let payload = serde_json::to_value(HistoricalJobPayload {
            user_id: user,
            request: HistoricalRequest {
                symbol: "SPY".into(),
                window_days: 90,
                instrument_type: InstrumentType::Equity,
                option_right: None,
                option_dte: None,
                option_moneyness: None,
                use_rolling_contracts: false,
                strict_option_mode: false,
                segment_tolerance_pct: 10.0,
                concurrent_runs: 3,
                goal_return_pct: -100.0,
                seed: Some(1),
            },
        })
        .unwrap();

        let out = h.run(&job(payload)).await.unwrap();
        assert_eq!(out["passed"], true);
        assert!(gw.validation_state(user).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn malformed_payload_is_terminal() {
        let gw = MemGateway::new();
        let h = handler(&gw);
        let err = h.run(&job(serde_json::json!({"bogus": true}))).await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn invalid_request_is_terminal() {
        let gw = MemGateway::new();
        let h = handler(&gw);
        let payload = serde_json::json!({
            "user_id": Uuid::new_v4(),
            "request": {
                "symbol": "",
                "window_days": 90,
                "instrument_type": "equity",
                "goal_return_pct": 1.0
            }
        });
        let err = h.run(&job(payload)).await.unwrap_err();
        assert!(!err.is_retryable());
    }
}

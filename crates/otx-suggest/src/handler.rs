//! Queue handler wrapping the generator cycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use otx_queue::{JobError, JobHandler};
use otx_schemas::{JobRun, Window};

use crate::generator::{SuggestError, SuggestionGenerator};

/// Job name consumed by the generator handler.
pub const JOB_SUGGESTIONS_GENERATE: &str = "suggestions.generate";

/// Payload carried by generator JobRuns. The idempotency key
/// (user, window, trading_day) lives on the JobRun itself.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GeneratorPayload {
    pub user_id: Uuid,
    pub window: Window,
}

pub struct GeneratorJobHandler {
    generator: Arc<SuggestionGenerator>,
    /// Process-wide pause flag: cycles become no-ops while set.
    paused: Arc<AtomicBool>,
    deadline_secs: u64,
}

impl GeneratorJobHandler {
    pub fn new(
        generator: Arc<SuggestionGenerator>,
        paused: Arc<AtomicBool>,
        deadline_secs: u64,
    ) -> Self {
        Self {
            generator,
            paused,
            deadline_secs,
        }
    }
}

#[async_trait]
impl JobHandler for GeneratorJobHandler {
    fn name(&self) -> &'static str {
        JOB_SUGGESTIONS_GENERATE
    }

    fn deadline_secs(&self) -> u64 {
        self.deadline_secs
    }

    async fn run(&self, job: &JobRun) -> Result<Value, JobError> {
        let payload: GeneratorPayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| JobError::Terminal(format!("malformed generator payload: {e}")))?;

        if self.paused.load(Ordering::SeqCst) {
            info!(user_id = %payload.user_id, "generator paused; skipping cycle");
            return Ok(serde_json::json!({"paused": true}));
        }

        let summary = self
            .generator
            .generate(payload.user_id, payload.window, job.id)
            .await
            .map_err(classify)?;

        Ok(serde_json::json!({
            "created": summary.created,
            "executable": summary.executable,
            "blocked": summary.blocked,
        }))
    }
}

fn classify(err: SuggestError) -> JobError {
    match err {
        SuggestError::Provider(p) if p.is_transient() => {
            JobError::ProviderTransient(p.to_string())
        }
        SuggestError::Provider(p) => JobError::Terminal(p.to_string()),
        SuggestError::Db(db) => db.into(),
        SuggestError::Candidates(msg) => JobError::Terminal(msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use otx_config::ManualClock;
    use otx_db::{Gateway, MemGateway};
    use otx_quality::{
        BreakerConfig, CircuitBreaker, ProviderError, QualityPolicy, QuoteService,
        StaticQuoteProvider,
    };
    use otx_schemas::JobStatus;

    use crate::candidate::StaticCandidateSource;
    use crate::sizing::SizingCaps;

    fn job(payload: Value) -> JobRun {
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 16, 0, 0).unwrap();
        JobRun {
            id: Uuid::new_v4(),
            job_name: JOB_SUGGESTIONS_GENERATE.to_string(),
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

    fn handler_with_provider(
        provider: StaticQuoteProvider,
        paused: bool,
    ) -> (GeneratorJobHandler, MemGateway) {
        let gw = MemGateway::new();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 15, 16, 0, 0).unwrap(),
        ));
        let quotes = Arc::new(QuoteService::new(
            Arc::new(provider),
            Arc::new(CircuitBreaker::new(BreakerConfig::default())),
            clock.clone(),
        ));
        let generator = Arc::new(SuggestionGenerator::new(
            Arc::new(gw.clone()),
            quotes,
            Arc::new(StaticCandidateSource::default()),
            clock,
            QualityPolicy::default(),
            SizingCaps::default(),
        ));
        (
            GeneratorJobHandler::new(generator, Arc::new(AtomicBool::new(paused)), 300),
            gw,
        )
    }

    #[tokio::test]
    async fn malformed_payload_is_terminal() {
        let (handler, _gw) = handler_with_provider(StaticQuoteProvider::default(), false);
        let err = handler
            .run(&job(serde_json::json!({"nope": 1})))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn paused_cycle_is_noop_success() {
        let (handler, gw) = handler_with_provider(StaticQuoteProvider::default(), true);
        let user = Uuid::new_v4();
        let out = handler
            .run(&job(
                serde_json::json!({"user_id": user, "window": "midday_entry"}),
            ))
            .await
            .unwrap();
        assert_eq!(out, serde_json::json!({"paused": true}));
        assert!(gw.active_suggestions(user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_candidate_cycle_succeeds() {
        let (handler, _gw) = handler_with_provider(StaticQuoteProvider::default(), false);
        let user = Uuid::new_v4();
        let out = handler
            .run(&job(
                serde_json::json!({"user_id": user, "window": "midday_entry"}),
            ))
            .await
            .unwrap();
        assert_eq!(out["created"], 0);
    }

    #[test]
    fn provider_transient_classifies_retryable() {
        let e = classify(SuggestError::Provider(ProviderError::Transport(
            "reset".into(),
        )));
        assert!(e.is_retryable());

        let e = classify(SuggestError::Provider(ProviderError::Malformed(
            "bad".into(),
        )));
        assert!(!e.is_retryable());
    }
}

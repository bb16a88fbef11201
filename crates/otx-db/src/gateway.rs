//! The storage trait and its error taxonomy.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use otx_schemas::{
    AnalyticsEvent, Credential, HistoricalRun, Holding, JobRun, JobStatus, MarketDataQuality,
    Suggestion, SuggestionStatus, ValidationJournalEntry, ValidationState,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Gateway failure taxonomy. Callers branch on the variant, never on
/// message text.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("row not found")]
    NotFound,
    /// Conditional update missed (status/attempt mismatch) or idempotent
    /// re-insert hit an existing row.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Connection-level or otherwise retryable failure.
    #[error("transient database failure: {0}")]
    TransientUnavailable(String),
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    /// Cross-user access rejected at the boundary.
    #[error("cross-user access rejected")]
    Unauthorized,
}

/// Classification of a sqlx error into the gateway taxonomy.
pub(crate) fn classify_sqlx(err: sqlx::Error) -> DbError {
    match &err {
        sqlx::Error::RowNotFound => DbError::NotFound,
        sqlx::Error::Database(db) => {
            // 23xxx = integrity constraint violation class.
            if db.code().as_deref().map(|c| c.starts_with("23")).unwrap_or(false) {
                DbError::ConstraintViolation(db.message().to_string())
            } else {
                DbError::TransientUnavailable(db.message().to_string())
            }
        }
        _ => DbError::TransientUnavailable(err.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Mutation payloads
// ---------------------------------------------------------------------------

/// Failure outcome for a processing job, applied with a conditional update
/// keyed by (id, status=processing, attempt_count) to prevent lost updates
/// under double delivery.
#[derive(Clone, Debug)]
pub struct JobFailure {
    pub new_status: JobStatus,
    pub error: String,
    /// For retryable failures: the next eligible claim time.
    pub retry_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Gateway trait
// ---------------------------------------------------------------------------

/// Typed storage operations. One logical operation per call; each call is
/// transactional at its own granularity.
#[async_trait]
pub trait Gateway: Send + Sync {
    // --- users ---

    /// Every user the scheduler must fan cron work out to: anyone with
    /// holdings or a validation state.
    async fn user_ids(&self) -> Result<Vec<Uuid>, DbError>;

    // --- holdings ---

    async fn holdings_for_user(&self, user_id: Uuid) -> Result<Vec<Holding>, DbError>;
    async fn upsert_holding(&self, holding: &Holding) -> Result<(), DbError>;

    // --- credentials ---

    async fn insert_credential(&self, cred: &Credential) -> Result<(), DbError>;
    async fn credentials_for_user(&self, user_id: Uuid) -> Result<Vec<Credential>, DbError>;
    async fn delete_credentials(&self, user_id: Uuid, provider: &str) -> Result<u64, DbError>;

    // --- suggestions ---

    async fn insert_suggestion(&self, s: &Suggestion) -> Result<(), DbError>;
    /// Fetch one suggestion. `Unauthorized` if the row exists but belongs
    /// to another user.
    async fn fetch_suggestion(&self, user_id: Uuid, id: Uuid) -> Result<Suggestion, DbError>;
    /// All suggestions still in an active status for this user.
    async fn active_suggestions(&self, user_id: Uuid) -> Result<Vec<Suggestion>, DbError>;
    /// Terminal suggestions created in the given window (the "completed
    /// today" bucket).
    async fn terminal_suggestions_between(
        &self,
        user_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Suggestion>, DbError>;
    /// Conditional status transition. Fails with `Conflict` if the stored
    /// status differs from `from`; `Unauthorized` on cross-user access.
    async fn transition_suggestion(
        &self,
        user_id: Uuid,
        id: Uuid,
        from: SuggestionStatus,
        to: SuggestionStatus,
        now: DateTime<Utc>,
    ) -> Result<(), DbError>;
    /// Refresh-quote update: new gate verdict, possibly flipping the
    /// EXECUTABLE ↔ NOT_EXECUTABLE pair, stamping `refreshed_at`.
    async fn update_suggestion_quality(
        &self,
        user_id: Uuid,
        id: Uuid,
        quality: &MarketDataQuality,
        status: SuggestionStatus,
        blocked_reason: Option<String>,
        blocked_detail: Option<String>,
        refreshed_at: DateTime<Utc>,
    ) -> Result<(), DbError>;

    // --- job runs ---

    /// The non-terminal run with this (job_name, idempotency_key), if any.
    async fn find_active_job(
        &self,
        job_name: &str,
        idempotency_key: &str,
    ) -> Result<Option<JobRun>, DbError>;
    /// The newest run with this (job_name, idempotency_key) in *any*
    /// status. Cron endpoints use this so a completed dispatch still
    /// blocks a same-day repeat.
    async fn find_job_any_status(
        &self,
        job_name: &str,
        idempotency_key: &str,
    ) -> Result<Option<JobRun>, DbError>;
    /// Insert a new run. `ConstraintViolation` when a non-terminal run with
    /// the same (job_name, idempotency_key) already exists.
    async fn insert_job_run(&self, run: &JobRun) -> Result<(), DbError>;
    async fn job_run(&self, id: Uuid) -> Result<JobRun, DbError>;
    /// Atomically claim up to `limit` due runs: (pending | failed_retryable)
    /// ∧ run_after <= now → processing with started_at = now, ordered by
    /// run_after ascending.
    async fn claim_due_jobs(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<JobRun>, DbError>;
    /// processing → completed, conditional on the row still processing.
    async fn complete_job(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        result: Value,
    ) -> Result<(), DbError>;
    /// processing → failure outcome, conditional on (status=processing,
    /// attempt_count=expect_attempts). Bumps attempt_count by one.
    async fn fail_job(
        &self,
        id: Uuid,
        expect_attempts: i32,
        failure: JobFailure,
        now: DateTime<Utc>,
    ) -> Result<(), DbError>;
    /// Reclaim processing rows whose lease expired: status → pending,
    /// run_after = now. Returns the number of reclaimed rows.
    async fn reclaim_expired_leases(
        &self,
        now: DateTime<Utc>,
        lease_timeout_secs: i64,
    ) -> Result<u64, DbError>;
    /// Latest finished_at among runs of this job name with this status.
    async fn latest_job_finished_at(
        &self,
        job_name: &str,
        status: JobStatus,
    ) -> Result<Option<DateTime<Utc>>, DbError>;

    // --- validation ---

    async fn validation_state(&self, user_id: Uuid) -> Result<Option<ValidationState>, DbError>;
    async fn upsert_validation_state(&self, state: &ValidationState) -> Result<(), DbError>;
    async fn append_journal(&self, entry: &ValidationJournalEntry) -> Result<(), DbError>;
    /// Most recent `limit` entries, newest first.
    async fn journal_entries(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ValidationJournalEntry>, DbError>;
    async fn insert_historical_run(&self, run: &HistoricalRun) -> Result<(), DbError>;

    // --- strategy config ---

    async fn active_strategy_config(&self, user_id: Uuid) -> Result<Option<Value>, DbError>;
    async fn set_active_strategy_config(
        &self,
        user_id: Uuid,
        snapshot: &Value,
    ) -> Result<(), DbError>;

    // --- analytics ---

    async fn record_event(&self, event: &AnalyticsEvent) -> Result<(), DbError>;
    async fn events_between(
        &self,
        category: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AnalyticsEvent>, DbError>;
}

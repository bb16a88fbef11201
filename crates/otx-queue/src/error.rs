//! Classified handler errors. The worker dispatches on the classification:
//! retryable failures reschedule with backoff, terminal failures park the
//! run (dead-lettering when the attempt budget is spent).

use otx_db::DbError;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// Provider network failure / 5xx. Retryable.
    #[error("provider transient: {0}")]
    ProviderTransient(String),
    /// Provider rate limit. Retryable.
    #[error("rate limited: {0}")]
    RateLimited(String),
    /// Transient store failure. Retryable.
    #[error("transient database failure: {0}")]
    DbTransient(String),
    /// Per-attempt deadline elapsed; cooperative cancellation rolled the
    /// attempt back. Retryable.
    #[error("deadline exceeded after {0} s")]
    DeadlineExceeded(u64),
    /// Anything that will not succeed on retry.
    #[error("terminal: {0}")]
    Terminal(String),
}

impl JobError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, JobError::Terminal(_))
    }

    /// Short machine tag recorded on the JobRun row.
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::ProviderTransient(_) => "provider_transient",
            JobError::RateLimited(_) => "rate_limited",
            JobError::DbTransient(_) => "db_transient",
            JobError::DeadlineExceeded(_) => "deadline_exceeded",
            JobError::Terminal(_) => "terminal",
        }
    }
}

impl From<DbError> for JobError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::TransientUnavailable(msg) => JobError::DbTransient(msg),
            other => JobError::Terminal(other.to_string()),
        }
    }
}

//! JobRun: the durable unit of work drained by the worker pool.
//!
//! # Invariants
//!
//! - `attempt_count <= max_attempts`.
//! - At most one JobRun per (job_name, idempotency_key) in a non-terminal
//!   status.
//! - `run_after >= scheduled_for`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Queue lifecycle of a job run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    FailedRetryable,
    DeadLettered,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::FailedRetryable => "failed_retryable",
            JobStatus::DeadLettered => "dead_lettered",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "failed_retryable" => Some(JobStatus::FailedRetryable),
            "dead_lettered" => Some(JobStatus::DeadLettered),
            _ => None,
        }
    }

    /// Terminal rows never run again; a new enqueue with the same
    /// idempotency key may create a fresh JobRun.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::DeadLettered
        )
    }
}

/// One durable work item.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobRun {
    pub id: Uuid,
    pub job_name: String,
    pub idempotency_key: Option<String>,
    pub status: JobStatus,
    pub attempt_count: i32,
    pub max_attempts: i32,
    pub scheduled_for: DateTime<Utc>,
    /// Not eligible for claim before this instant. Always >= scheduled_for.
    pub run_after: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub payload: Value,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl JobRun {
    /// Check the row-level invariants. The gateways call this before
    /// persisting a mutation.
    pub fn check_invariants(&self) -> bool {
        self.attempt_count <= self.max_attempts && self.run_after >= self.scheduled_for
    }
}

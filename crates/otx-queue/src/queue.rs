//! Enqueue path with idempotency-key dedup.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use otx_config::Clock;
use otx_db::{DbError, Gateway};
use otx_schemas::{JobRun, JobStatus};

/// One enqueue request. `run_after` defaults to now; `max_attempts` to the
/// queue default.
#[derive(Clone, Debug)]
pub struct EnqueueRequest {
    pub job_name: String,
    pub payload: Value,
    pub idempotency_key: Option<String>,
    pub max_attempts: Option<i32>,
    pub run_after: Option<DateTime<Utc>>,
}

impl EnqueueRequest {
    pub fn new(job_name: impl Into<String>, payload: Value) -> Self {
        Self {
            job_name: job_name.into(),
            payload,
            idempotency_key: None,
            max_attempts: None,
            run_after: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn with_run_after(mut self, at: DateTime<Utc>) -> Self {
        self.run_after = Some(at);
        self
    }
}

/// Result of an enqueue: created fresh, or deduplicated onto an existing
/// non-terminal run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Created(Uuid),
    Duplicate(Uuid),
}

impl EnqueueOutcome {
    pub fn job_id(&self) -> Uuid {
        match self {
            EnqueueOutcome::Created(id) | EnqueueOutcome::Duplicate(id) => *id,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, EnqueueOutcome::Created(_))
    }
}

/// Enqueue-side handle. Claiming and settlement live in `worker`.
#[derive(Clone)]
pub struct JobQueue {
    gateway: Arc<dyn Gateway>,
    clock: Arc<dyn Clock>,
    default_max_attempts: i32,
}

impl JobQueue {
    pub fn new(gateway: Arc<dyn Gateway>, clock: Arc<dyn Clock>, default_max_attempts: i32) -> Self {
        Self {
            gateway,
            clock,
            default_max_attempts,
        }
    }

    pub fn gateway(&self) -> &Arc<dyn Gateway> {
        &self.gateway
    }

    /// Enqueue a job.
    ///
    /// Idempotency: when the request carries a key and a non-terminal run
    /// with the same (job_name, key) exists, no new row is created and the
    /// existing id is returned. A terminal run under the same key does not
    /// block a fresh enqueue. The check-then-insert race is closed by the
    /// store's partial unique index: a concurrent insert surfaces as a
    /// constraint violation, which re-reads and returns the winner.
    pub async fn enqueue(&self, req: EnqueueRequest) -> Result<EnqueueOutcome, DbError> {
        let now = self.clock.now();

        if let Some(key) = &req.idempotency_key {
            if let Some(existing) = self.gateway.find_active_job(&req.job_name, key).await? {
                return Ok(EnqueueOutcome::Duplicate(existing.id));
            }
        }

        let scheduled_for = now;
        let run_after = req.run_after.unwrap_or(now).max(scheduled_for);
        let run = JobRun {
            id: Uuid::new_v4(),
            job_name: req.job_name.clone(),
            idempotency_key: req.idempotency_key.clone(),
            status: JobStatus::Pending,
            attempt_count: 0,
            max_attempts: req.max_attempts.unwrap_or(self.default_max_attempts),
            scheduled_for,
            run_after,
            started_at: None,
            finished_at: None,
            duration_ms: None,
            payload: req.payload,
            result: None,
            error: None,
            created_at: now,
        };

        match self.gateway.insert_job_run(&run).await {
            Ok(()) => {
                info!(job_name = %run.job_name, job_id = %run.id, "job enqueued");
                Ok(EnqueueOutcome::Created(run.id))
            }
            Err(DbError::ConstraintViolation(_)) if req.idempotency_key.is_some() => {
                // Lost the race; surface the winner.
                let key = req.idempotency_key.as_deref().unwrap_or_default();
                match self.gateway.find_active_job(&req.job_name, key).await? {
                    Some(existing) => Ok(EnqueueOutcome::Duplicate(existing.id)),
                    None => Err(DbError::Conflict(format!(
                        "idempotency race on ({}, {key}) resolved to no active row",
                        req.job_name
                    ))),
                }
            }
            Err(e) => Err(e),
        }
    }
}

//! Durable at-least-once job queue over the persistence gateway.
//!
//! The relational store is the canonical serialization point: every JobRun
//! mutation is a conditional update keyed by (id, status, attempt_count),
//! so double delivery can never produce a lost update. Handlers must be
//! idempotent.

pub mod backoff;
pub mod error;
pub mod queue;
pub mod registry;
pub mod worker;

pub use backoff::{backoff_delay, RetryPolicy};
pub use error::JobError;
pub use queue::{EnqueueOutcome, EnqueueRequest, JobQueue};
pub use registry::{HandlerRegistry, JobHandler};
pub use worker::{execute_claimed, ExecutionOutcome, WorkerPool, WorkerPoolConfig};

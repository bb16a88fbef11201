//! Go-live readiness state machine.
//!
//! A user accumulates consecutive paper-forward checkpoint passes. A
//! failing checkpoint resets the streak; a failure that breaches the
//! fail-fast predicate (drawdown or loss beyond threshold) additionally
//! restarts the paper window and latches `paper_fail_fast_triggered`.
//! Readiness requires the full streak, a passing historical result, and
//! no latched fail-fast.
//!
//! The transition function ([`machine::apply_checkpoint`]) is pure; the
//! service wraps it with persistence and journaling.

pub mod handler;
pub mod machine;
pub mod service;

pub use handler::{PaperJobHandler, PaperJobPayload, JOB_VALIDATION_PAPER};
pub use machine::{
    apply_checkpoint, phase_of, CheckpointEffect, CheckpointOutcome, FailFastThresholds,
    PaperPhase,
};
pub use service::{GoLiveService, PaperCheckpointRequest};

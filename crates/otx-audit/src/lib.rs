//! Observability & audit: cadence expectations, process counters, the
//! ops-health and system-health aggregates, and the reporting handlers.

pub mod cadence;
pub mod counters;
pub mod handlers;
pub mod health;

pub use cadence::{expected_tasks, Cadence, TaskHealth, TaskSpec};
pub use counters::ProcessCounters;
pub use handlers::{
    BackfillHistoryHandler, WeeklyReportHandler, JOB_PLAID_BACKFILL, JOB_WEEKLY_REPORT,
};
pub use health::{build_ops_health, build_system_health, OpsHealth, SystemHealth};

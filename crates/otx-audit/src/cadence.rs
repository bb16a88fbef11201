//! Expected cadence per scheduled task, and the late/never-run derivation.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    Daily,
    Weekly,
}

impl Cadence {
    /// Grace period: 1.5× the nominal interval before a task counts late.
    fn grace(&self) -> Duration {
        match self {
            Cadence::Daily => Duration::hours(36),
            Cadence::Weekly => Duration::days(10),
        }
    }
}

/// One scheduled task the dispatcher expects to fire.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct TaskSpec {
    pub job_name: &'static str,
    pub cadence: Cadence,
}

/// The dispatcher's full cadence registry.
pub fn expected_tasks() -> &'static [TaskSpec] {
    &[
        TaskSpec {
            job_name: "suggestions.generate",
            cadence: Cadence::Daily,
        },
        TaskSpec {
            job_name: "learning.ingest",
            cadence: Cadence::Daily,
        },
        TaskSpec {
            job_name: "universe.sync",
            cadence: Cadence::Daily,
        },
        TaskSpec {
            job_name: "strategy.autotune",
            cadence: Cadence::Weekly,
        },
        TaskSpec {
            job_name: "report.weekly",
            cadence: Cadence::Weekly,
        },
        TaskSpec {
            job_name: "plaid.backfill",
            cadence: Cadence::Weekly,
        },
    ]
}

/// Health of one expected task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskHealth {
    Ok,
    Late,
    NeverRun,
    Error,
}

/// Derive health from the last success/failure stamps.
///
/// A failure newer than the latest success reports `Error`; an old
/// success beyond the cadence grace reports `Late`.
pub fn task_health(
    cadence: Cadence,
    last_success_at: Option<DateTime<Utc>>,
    last_failure_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> TaskHealth {
    match (last_success_at, last_failure_at) {
        (None, None) => TaskHealth::NeverRun,
        (None, Some(_)) => TaskHealth::Error,
        (Some(success), failure) => {
            if failure.map(|f| f > success).unwrap_or(false) {
                TaskHealth::Error
            } else if now - success > cadence.grace() {
                TaskHealth::Late
            } else {
                TaskHealth::Ok
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn never_run_without_any_stamp() {
        assert_eq!(task_health(Cadence::Daily, None, None, t0()), TaskHealth::NeverRun);
    }

    #[test]
    fn fresh_success_is_ok() {
        let success = t0() - Duration::hours(20);
        assert_eq!(
            task_health(Cadence::Daily, Some(success), None, t0()),
            TaskHealth::Ok
        );
    }

    #[test]
    fn old_success_is_late() {
        let success = t0() - Duration::hours(37);
        assert_eq!(
            task_health(Cadence::Daily, Some(success), None, t0()),
            TaskHealth::Late
        );
        // Weekly grace is wider.
        assert_eq!(
            task_health(Cadence::Weekly, Some(success), None, t0()),
            TaskHealth::Ok
        );
    }

    #[test]
    fn newer_failure_reports_error() {
        let success = t0() - Duration::hours(10);
        let failure = t0() - Duration::hours(1);
        assert_eq!(
            task_health(Cadence::Daily, Some(success), Some(failure), t0()),
            TaskHealth::Error
        );
        // Older failure does not mask a fresh success.
        let stale_failure = t0() - Duration::hours(20);
        assert_eq!(
            task_health(Cadence::Daily, Some(success), Some(stale_failure), t0()),
            TaskHealth::Ok
        );
    }

    #[test]
    fn failure_only_reports_error() {
        let failure = t0() - Duration::hours(1);
        assert_eq!(
            task_health(Cadence::Daily, None, Some(failure), t0()),
            TaskHealth::Error
        );
    }

    #[test]
    fn registry_is_nonempty_and_unique() {
        let tasks = expected_tasks();
        assert!(tasks.len() >= 5);
        let mut names: Vec<_> = tasks.iter().map(|t| t.job_name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), tasks.len());
    }
}

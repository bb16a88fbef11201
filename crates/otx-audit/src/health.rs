//! Ops-health and system-health aggregates.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use otx_db::{DbError, Gateway};
use otx_schemas::{JobStatus, SuggestionStatus};

use crate::cadence::{expected_tasks, task_health, TaskHealth};
use crate::counters::ProcessCounters;

// ---------------------------------------------------------------------------
// Ops health (process-wide)
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize)]
pub struct ExpectedJobHealth {
    pub job_name: &'static str,
    pub cadence: crate::cadence::Cadence,
    pub last_success_at: Option<DateTime<Utc>>,
    pub status: TaskHealth,
}

#[derive(Clone, Debug, Serialize)]
pub struct OpsHealth {
    pub paused: bool,
    /// Timestamp of the last successful generator run.
    pub data_freshness: Option<DateTime<Utc>>,
    pub jobs: Vec<ExpectedJobHealth>,
    pub integrity: IntegritySnapshot,
    pub suggestions_count_last_cycle: i64,
}

#[derive(Clone, Debug, Serialize)]
pub struct IntegritySnapshot {
    pub cross_user_rejections: u64,
}

/// Aggregate the §ops view: pause state, freshness, per-task cadence
/// status, integrity counter, and the last generator cycle's output size.
pub async fn build_ops_health(
    gateway: &Arc<dyn Gateway>,
    counters: &Arc<ProcessCounters>,
    now: DateTime<Utc>,
) -> Result<OpsHealth, DbError> {
    let mut jobs = Vec::new();
    let mut data_freshness = None;

    for spec in expected_tasks() {
        let last_success = gateway
            .latest_job_finished_at(spec.job_name, JobStatus::Completed)
            .await?;
        let last_failed = gateway
            .latest_job_finished_at(spec.job_name, JobStatus::Failed)
            .await?;
        let last_dead = gateway
            .latest_job_finished_at(spec.job_name, JobStatus::DeadLettered)
            .await?;
        let last_failure = match (last_failed, last_dead) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };

        if spec.job_name == "suggestions.generate" {
            data_freshness = last_success;
        }

        jobs.push(ExpectedJobHealth {
            job_name: spec.job_name,
            cadence: spec.cadence,
            last_success_at: last_success,
            status: task_health(spec.cadence, last_success, last_failure, now),
        });
    }

    // Size of the most recent generator cycle, read off the analytics
    // stream.
    let cycle_events = gateway
        .events_between("generator", now - Duration::days(2), now)
        .await?;
    let suggestions_count_last_cycle = cycle_events
        .iter()
        .rev()
        .find(|e| e.event_name == "suggestions.generated")
        .and_then(|e| e.properties.get("created").and_then(|v| v.as_i64()))
        .unwrap_or(0);

    Ok(OpsHealth {
        paused: counters.is_paused(),
        data_freshness,
        jobs,
        integrity: IntegritySnapshot {
            cross_user_rejections: counters.cross_user_rejections.load(Ordering::Relaxed),
        },
        suggestions_count_last_cycle,
    })
}

// ---------------------------------------------------------------------------
// System health (per user)
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize)]
pub struct CacheStats {
    pub quote_requests: u64,
    pub quote_fast_fails: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct SystemHealth {
    pub status: &'static str,
    /// Provider circuit-breaker state string.
    pub provider_health: String,
    pub cache_stats: CacheStats,
    /// Fraction of the last 7 days' terminal suggestions that were
    /// dismissed.
    pub veto_rate_7d: f64,
    pub active_constraints: Vec<String>,
    /// Fraction of currently active suggestions blocked by the gate.
    pub not_executable_pct: f64,
    /// Fraction of staged-or-completed work still sitting in STAGED.
    pub partial_outcomes_pct: f64,
}

pub async fn build_system_health(
    gateway: &Arc<dyn Gateway>,
    counters: &Arc<ProcessCounters>,
    provider_state: &str,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<SystemHealth, DbError> {
    let active = gateway.active_suggestions(user_id).await?;
    let terminal_7d = gateway
        .terminal_suggestions_between(user_id, now - Duration::days(7), now)
        .await?;

    let dismissed = terminal_7d
        .iter()
        .filter(|s| s.status == SuggestionStatus::Dismissed)
        .count();
    let veto_rate_7d = fraction(dismissed, terminal_7d.len());

    let blocked = active
        .iter()
        .filter(|s| s.status == SuggestionStatus::NotExecutable)
        .count();
    let not_executable_pct = fraction(blocked, active.len());

    let staged = active
        .iter()
        .filter(|s| s.status == SuggestionStatus::Staged)
        .count();
    let completed_7d = terminal_7d
        .iter()
        .filter(|s| s.status == SuggestionStatus::Completed)
        .count();
    let partial_outcomes_pct = fraction(staged, staged + completed_7d);

    let mut active_constraints: Vec<String> = active
        .iter()
        .filter_map(|s| s.sizing.clamp_reason.clone())
        .collect();
    active_constraints.sort();
    active_constraints.dedup();

    let degraded = provider_state != "CLOSED" || counters.is_paused();
    Ok(SystemHealth {
        status: if degraded { "degraded" } else { "ok" },
        provider_health: provider_state.to_string(),
        cache_stats: CacheStats {
            quote_requests: counters.quote_requests.load(Ordering::Relaxed),
            quote_fast_fails: counters.quote_fast_fails.load(Ordering::Relaxed),
        },
        veto_rate_7d,
        active_constraints,
        not_executable_pct,
        partial_outcomes_pct,
    })
}

fn fraction(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

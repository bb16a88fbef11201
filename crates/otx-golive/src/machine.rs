//! Pure transition function over [`ValidationState`].
//!
//! All logic here is deterministic — no IO, no clock reads beyond the
//! `now` argument, no randomness.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use otx_schemas::ValidationState;

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// Observable phase, derived from the state row (never stored).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaperPhase {
    Init,
    PaperWarmup,
    PaperStreak,
    ReadyForLive,
}

/// Derive the phase from a state row (`None` = no row yet).
pub fn phase_of(state: Option<&ValidationState>) -> PaperPhase {
    match state {
        None => PaperPhase::Init,
        Some(st) => {
            if st.overall_ready {
                PaperPhase::ReadyForLive
            } else if st.paper_consecutive_passes > 0 {
                PaperPhase::PaperStreak
            } else {
                PaperPhase::PaperWarmup
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Checkpoint application
// ---------------------------------------------------------------------------

/// Measured result of one paper checkpoint.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CheckpointOutcome {
    pub passed: bool,
    pub drawdown_pct: f64,
    pub loss_pct: f64,
}

/// Fail-fast predicate thresholds (percentages).
#[derive(Clone, Copy, Debug)]
pub struct FailFastThresholds {
    pub max_drawdown_pct: f64,
    pub max_loss_pct: f64,
}

impl FailFastThresholds {
    /// True when a failing checkpoint must reset the whole window.
    pub fn breached(&self, outcome: &CheckpointOutcome) -> bool {
        outcome.drawdown_pct > self.max_drawdown_pct || outcome.loss_pct > self.max_loss_pct
    }
}

/// What a checkpoint did to the state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CheckpointEffect {
    /// Streak extended (and possibly completed).
    Pass { streak: i32, became_ready: bool },
    /// Ordinary failure: streak reset to zero, window keeps running.
    StreakReset,
    /// Fail-fast breach: window restarted, fail-fast latched.
    FailFastReset { reason: String },
}

/// Apply one checkpoint to the state. The caller persists the mutated
/// state afterwards; the fail-fast reset mutates every affected field in
/// this single call so persistence is atomic.
pub fn apply_checkpoint(
    state: &mut ValidationState,
    outcome: &CheckpointOutcome,
    thresholds: &FailFastThresholds,
    now: DateTime<Utc>,
    paper_window_days: i64,
) -> CheckpointEffect {
    if outcome.passed {
        state.paper_consecutive_passes += 1;
        let was_ready = state.overall_ready;
        state.recompute_ready();
        return CheckpointEffect::Pass {
            streak: state.paper_consecutive_passes,
            became_ready: state.overall_ready && !was_ready,
        };
    }

    if thresholds.breached(outcome) {
        let reason = format!(
            "performance threshold breached: drawdown {:.1}% (limit {:.1}%), loss {:.1}% (limit {:.1}%)",
            outcome.drawdown_pct,
            thresholds.max_drawdown_pct,
            outcome.loss_pct,
            thresholds.max_loss_pct,
        );
        state.paper_window_start = now;
        state.paper_window_end = now + chrono::Duration::days(paper_window_days);
        state.paper_consecutive_passes = 0;
        state.paper_fail_fast_triggered = true;
        state.paper_fail_fast_reason = Some(reason.clone());
        state.recompute_ready();
        return CheckpointEffect::FailFastReset { reason };
    }

    state.paper_consecutive_passes = 0;
    state.recompute_ready();
    CheckpointEffect::StreakReset
}

/// Manual reset: any state returns to a fresh warmup window. Clears the
/// fail-fast latch.
pub fn manual_reset(state: &mut ValidationState, now: DateTime<Utc>, paper_window_days: i64) {
    state.paper_window_start = now;
    state.paper_window_end = now + chrono::Duration::days(paper_window_days);
    state.paper_consecutive_passes = 0;
    state.paper_fail_fast_triggered = false;
    state.paper_fail_fast_reason = None;
    state.recompute_ready();
}

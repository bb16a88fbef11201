//! Validation-engine rows: per-user readiness state, historical runs and
//! the append-only journal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Instrument type
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentType {
    Equity,
    Option,
}

impl InstrumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentType::Equity => "equity",
            InstrumentType::Option => "option",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "equity" => Some(InstrumentType::Equity),
            "option" => Some(InstrumentType::Option),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Validation state
// ---------------------------------------------------------------------------

/// Result of the most recent historical run.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoricalResult {
    pub passed: bool,
    pub return_pct: f64,
}

/// Per-user go-live readiness state.
///
/// # Invariant
///
/// `overall_ready ⇔ paper_consecutive_passes >= paper_checkpoint_target
///                 ∧ historical_last_result.passed
///                 ∧ !paper_fail_fast_triggered`
///
/// Mutations go through `recompute_ready` so the flag can never drift from
/// its inputs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidationState {
    pub user_id: Uuid,
    pub paper_window_start: DateTime<Utc>,
    pub paper_window_end: DateTime<Utc>,
    pub paper_consecutive_passes: i32,
    pub paper_checkpoint_target: i32,
    pub paper_fail_fast_triggered: bool,
    pub paper_fail_fast_reason: Option<String>,
    pub historical_last_run_at: Option<DateTime<Utc>>,
    pub historical_last_result: Option<HistoricalResult>,
    pub overall_ready: bool,
}

impl ValidationState {
    /// Fresh state for a user entering the paper window.
    pub fn new(
        user_id: Uuid,
        now: DateTime<Utc>,
        paper_window_days: i64,
        paper_checkpoint_target: i32,
    ) -> Self {
        Self {
            user_id,
            paper_window_start: now,
            paper_window_end: now + chrono::Duration::days(paper_window_days),
            paper_consecutive_passes: 0,
            paper_checkpoint_target,
            paper_fail_fast_triggered: false,
            paper_fail_fast_reason: None,
            historical_last_run_at: None,
            historical_last_result: None,
            overall_ready: false,
        }
    }

    /// Re-derive `overall_ready` from its inputs. Must be called after every
    /// mutation of the streak, fail-fast flag or historical result.
    pub fn recompute_ready(&mut self) {
        self.overall_ready = self.paper_consecutive_passes >= self.paper_checkpoint_target
            && self.historical_last_result.map(|r| r.passed).unwrap_or(false)
            && !self.paper_fail_fast_triggered;
    }
}

// ---------------------------------------------------------------------------
// Historical run record
// ---------------------------------------------------------------------------

/// One completed historical-validation run (aggregate over concurrent
/// instances).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoricalRun {
    pub id: Uuid,
    pub user_id: Uuid,
    pub symbol: String,
    pub window_days: i64,
    pub instrument_type: InstrumentType,
    /// Parameter snapshot at run time, kept verbatim for reproducibility.
    pub parameters: Value,
    pub return_pct: f64,
    pub max_drawdown: f64,
    pub win_rate: f64,
    pub trades_count: i64,
    pub passed: bool,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Journal
// ---------------------------------------------------------------------------

/// Append-only journal entry. Rows are never updated.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidationJournalEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub title: String,
    pub summary: String,
    pub details: Value,
}

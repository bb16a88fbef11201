//! Suggestion domain types and the suggestion status machine.
//!
//! # Invariants
//!
//! - `legs` is non-empty.
//! - Option legs carry `strike > 0` and `expiry >= today`.
//! - `metrics.max_loss >= 0`.
//! - Status transitions are monotone except EXECUTABLE ↔ NOT_EXECUTABLE,
//!   which may re-evaluate on quote refresh.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::quality::MarketDataQuality;

// ---------------------------------------------------------------------------
// Window
// ---------------------------------------------------------------------------

/// A named cadence slot. Generators run at most once per (user, window,
/// trading day).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Window {
    MorningLimit,
    MiddayEntry,
    Rebalance,
    Scout,
}

impl Window {
    pub fn as_str(&self) -> &'static str {
        match self {
            Window::MorningLimit => "morning_limit",
            Window::MiddayEntry => "midday_entry",
            Window::Rebalance => "rebalance",
            Window::Scout => "scout",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "morning_limit" => Some(Window::MorningLimit),
            "midday_entry" => Some(Window::MiddayEntry),
            "rebalance" => Some(Window::Rebalance),
            "scout" => Some(Window::Scout),
            _ => None,
        }
    }

    pub fn all() -> [Window; 4] {
        [
            Window::MorningLimit,
            Window::MiddayEntry,
            Window::Rebalance,
            Window::Scout,
        ]
    }
}

// ---------------------------------------------------------------------------
// Legs
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegAction {
    Buy,
    Sell,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegType {
    Call,
    Put,
    Equity,
}

impl LegType {
    pub fn is_option(&self) -> bool {
        matches!(self, LegType::Call | LegType::Put)
    }
}

/// One leg of a proposed trade. Ordered within the suggestion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Leg {
    pub action: LegAction,
    #[serde(rename = "type")]
    pub leg_type: LegType,
    pub quantity: i64,
    pub strike: Option<f64>,
    pub expiry: Option<NaiveDate>,
    pub option_symbol: Option<String>,
}

// ---------------------------------------------------------------------------
// Metrics & sizing
// ---------------------------------------------------------------------------

/// Strategy-level edge metrics attached to a suggestion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SuggestionMetrics {
    pub ev: f64,
    pub win_rate: f64,
    pub kelly: f64,
    pub max_loss: f64,
    pub max_profit: f64,
}

/// Output of the sizing pass: what this trade costs and risks at the
/// proposed quantity, and whether caps clamped it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SizingMetadata {
    pub capital_required: f64,
    pub max_loss_total: f64,
    pub risk_multiplier: f64,
    pub clamp_reason: Option<String>,
}

// ---------------------------------------------------------------------------
// Status machine
// ---------------------------------------------------------------------------

/// Lifecycle of a suggestion.
///
/// created → (EXECUTABLE | NOT_EXECUTABLE) → (STAGED → COMPLETED) | DISMISSED
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SuggestionStatus {
    Executable,
    NotExecutable,
    Staged,
    Completed,
    Dismissed,
}

impl SuggestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuggestionStatus::Executable => "EXECUTABLE",
            SuggestionStatus::NotExecutable => "NOT_EXECUTABLE",
            SuggestionStatus::Staged => "STAGED",
            SuggestionStatus::Completed => "COMPLETED",
            SuggestionStatus::Dismissed => "DISMISSED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "EXECUTABLE" => Some(SuggestionStatus::Executable),
            "NOT_EXECUTABLE" => Some(SuggestionStatus::NotExecutable),
            "STAGED" => Some(SuggestionStatus::Staged),
            "COMPLETED" => Some(SuggestionStatus::Completed),
            "DISMISSED" => Some(SuggestionStatus::Dismissed),
            _ => None,
        }
    }

    /// Terminal statuses never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SuggestionStatus::Completed | SuggestionStatus::Dismissed)
    }

    /// True when the suggestion still belongs in the active inbox.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SuggestionStatus::Executable | SuggestionStatus::NotExecutable | SuggestionStatus::Staged
        )
    }

    /// Legal transition table. EXECUTABLE ↔ NOT_EXECUTABLE re-evaluates on
    /// refresh; everything else is monotone.
    pub fn can_transition(from: SuggestionStatus, to: SuggestionStatus) -> bool {
        use SuggestionStatus::*;
        matches!(
            (from, to),
            (Executable, NotExecutable)
                | (NotExecutable, Executable)
                | (Executable, Staged)
                | (Staged, Completed)
                | (Executable, Dismissed)
                | (NotExecutable, Dismissed)
        )
    }
}

/// Required tag on every dismissal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DismissReason {
    TooRisky,
    BadPrice,
    WrongTiming,
    Other,
}

impl DismissReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DismissReason::TooRisky => "too_risky",
            DismissReason::BadPrice => "bad_price",
            DismissReason::WrongTiming => "wrong_timing",
            DismissReason::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "too_risky" => Some(DismissReason::TooRisky),
            "bad_price" => Some(DismissReason::BadPrice),
            "wrong_timing" => Some(DismissReason::WrongTiming),
            "other" => Some(DismissReason::Other),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Suggestion
// ---------------------------------------------------------------------------

/// A proposed trade for a user in a cadence window.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: Uuid,
    pub user_id: Uuid,
    pub window: Window,
    pub strategy: String,
    pub symbol: String,
    pub display_symbol: String,
    pub legs: Vec<Leg>,
    pub limit_price: Option<f64>,
    pub metrics: SuggestionMetrics,
    pub iv_rank: Option<f64>,
    pub iv_regime: Option<String>,
    pub score: f64,
    pub status: SuggestionStatus,
    pub blocked_reason: Option<String>,
    pub blocked_detail: Option<String>,
    pub marketdata_quality: Option<MarketDataQuality>,
    pub sizing: SizingMetadata,
    /// Links back to the generator JobRun that produced this suggestion.
    pub trace_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

/// Structural validation failures for a suggestion.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SuggestionInvalid {
    #[error("suggestion has no legs")]
    EmptyLegs,
    #[error("option leg missing strike or strike <= 0")]
    BadStrike,
    #[error("option leg missing expiry or expiry before {today}")]
    ExpiredLeg { today: NaiveDate },
    #[error("metrics.max_loss is negative")]
    NegativeMaxLoss,
}

impl Suggestion {
    /// Check the structural invariants against the given trading day.
    pub fn validate(&self, today: NaiveDate) -> Result<(), SuggestionInvalid> {
        if self.legs.is_empty() {
            return Err(SuggestionInvalid::EmptyLegs);
        }
        for leg in &self.legs {
            if leg.leg_type.is_option() {
                match leg.strike {
                    Some(k) if k > 0.0 => {}
                    _ => return Err(SuggestionInvalid::BadStrike),
                }
                match leg.expiry {
                    Some(exp) if exp >= today => {}
                    _ => return Err(SuggestionInvalid::ExpiredLeg { today }),
                }
            }
        }
        if self.metrics.max_loss < 0.0 {
            return Err(SuggestionInvalid::NegativeMaxLoss);
        }
        Ok(())
    }

    /// Staleness contract: stale strictly *after* `stale_after_seconds` have
    /// elapsed since the most recent of (refreshed_at, created_at). Exactly
    /// at the threshold is still fresh.
    pub fn is_stale(&self, now: DateTime<Utc>, stale_after_seconds: i64) -> bool {
        let basis = self.refreshed_at.unwrap_or(self.created_at).max(self.created_at);
        (now - basis).num_seconds() > stale_after_seconds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn equity_leg() -> Leg {
        Leg {
            action: LegAction::Buy,
            leg_type: LegType::Equity,
            quantity: 100,
            strike: None,
            expiry: None,
            option_symbol: None,
        }
    }

    fn option_leg(strike: f64, expiry: NaiveDate) -> Leg {
        Leg {
            action: LegAction::Sell,
            leg_type: LegType::Put,
            quantity: 1,
            strike: Some(strike),
            expiry: Some(expiry),
            option_symbol: Some("SPY240419P00500000".to_string()),
        }
    }

    fn base_suggestion(legs: Vec<Leg>) -> Suggestion {
        Suggestion {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            window: Window::MiddayEntry,
            strategy: "cash_secured_put".to_string(),
            symbol: "SPY".to_string(),
            display_symbol: "SPY".to_string(),
            legs,
            limit_price: Some(1.25),
            metrics: SuggestionMetrics {
                ev: 12.0,
                win_rate: 0.7,
                kelly: 0.05,
                max_loss: 480.0,
                max_profit: 125.0,
            },
            iv_rank: Some(42.0),
            iv_regime: None,
            score: 61.5,
            status: SuggestionStatus::Executable,
            blocked_reason: None,
            blocked_detail: None,
            marketdata_quality: None,
            sizing: SizingMetadata::default(),
            trace_id: Uuid::new_v4(),
            created_at: Utc.with_ymd_and_hms(2024, 3, 15, 16, 0, 0).unwrap(),
            refreshed_at: None,
        }
    }

    #[test]
    fn window_round_trips() {
        for w in Window::all() {
            assert_eq!(Window::parse(w.as_str()), Some(w));
        }
        assert_eq!(Window::parse("evening"), None);
    }

    #[test]
    fn validate_rejects_empty_legs() {
        let s = base_suggestion(vec![]);
        let today = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert_eq!(s.validate(today), Err(SuggestionInvalid::EmptyLegs));
    }

    #[test]
    fn validate_rejects_zero_strike() {
        let expiry = NaiveDate::from_ymd_opt(2024, 4, 19).unwrap();
        let s = base_suggestion(vec![option_leg(0.0, expiry)]);
        let today = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert_eq!(s.validate(today), Err(SuggestionInvalid::BadStrike));
    }

    #[test]
    fn validate_rejects_expired_option() {
        let expiry = NaiveDate::from_ymd_opt(2024, 3, 14).unwrap();
        let s = base_suggestion(vec![option_leg(500.0, expiry)]);
        let today = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert!(matches!(
            s.validate(today),
            Err(SuggestionInvalid::ExpiredLeg { .. })
        ));
    }

    #[test]
    fn validate_accepts_expiry_today() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let s = base_suggestion(vec![option_leg(500.0, today)]);
        assert!(s.validate(today).is_ok());
    }

    #[test]
    fn validate_accepts_equity_without_strike() {
        let s = base_suggestion(vec![equity_leg()]);
        let today = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert!(s.validate(today).is_ok());
    }

    #[test]
    fn validate_rejects_negative_max_loss() {
        let mut s = base_suggestion(vec![equity_leg()]);
        s.metrics.max_loss = -1.0;
        let today = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert_eq!(s.validate(today), Err(SuggestionInvalid::NegativeMaxLoss));
    }

    #[test]
    fn status_transitions_monotone_except_refresh_pair() {
        use SuggestionStatus::*;
        assert!(SuggestionStatus::can_transition(Executable, NotExecutable));
        assert!(SuggestionStatus::can_transition(NotExecutable, Executable));
        assert!(SuggestionStatus::can_transition(Executable, Staged));
        assert!(SuggestionStatus::can_transition(Staged, Completed));
        assert!(SuggestionStatus::can_transition(Executable, Dismissed));

        assert!(!SuggestionStatus::can_transition(Staged, Executable));
        assert!(!SuggestionStatus::can_transition(Completed, Staged));
        assert!(!SuggestionStatus::can_transition(Dismissed, Executable));
        assert!(!SuggestionStatus::can_transition(NotExecutable, Staged));
        assert!(!SuggestionStatus::can_transition(Staged, Dismissed));
    }

    #[test]
    fn staleness_boundary_is_exclusive() {
        let s = base_suggestion(vec![equity_leg()]);
        let at_threshold = s.created_at + chrono::Duration::seconds(300);
        assert!(!s.is_stale(at_threshold, 300), "exactly met must be fresh");
        let one_past = at_threshold + chrono::Duration::seconds(1);
        assert!(s.is_stale(one_past, 300));
    }

    #[test]
    fn staleness_basis_prefers_refresh() {
        let mut s = base_suggestion(vec![equity_leg()]);
        s.refreshed_at = Some(s.created_at + chrono::Duration::seconds(600));
        let now = s.created_at + chrono::Duration::seconds(700);
        assert!(!s.is_stale(now, 300));
    }

    #[test]
    fn dismiss_reason_round_trips() {
        for r in [
            DismissReason::TooRisky,
            DismissReason::BadPrice,
            DismissReason::WrongTiming,
            DismissReason::Other,
        ] {
            assert_eq!(DismissReason::parse(r.as_str()), Some(r));
        }
        assert_eq!(DismissReason::parse("meh"), None);
    }
}

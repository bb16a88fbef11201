//! Request/outcome types for the historical engine.

use serde::{Deserialize, Serialize};

use otx_db::DbError;
use otx_schemas::InstrumentType;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionRight {
    Call,
    Put,
}

impl OptionRight {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptionRight::Call => "call",
            OptionRight::Put => "put",
        }
    }
}

/// One historical-validation request, as accepted by `/validation/run`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoricalRequest {
    pub symbol: String,
    pub window_days: i64,
    pub instrument_type: InstrumentType,
    #[serde(default)]
    pub option_right: Option<OptionRight>,
    /// Target days-to-expiry for rolling contract selection.
    #[serde(default)]
    pub option_dte: Option<i64>,
    /// Target strike/spot ratio (1.0 = at the money).
    #[serde(default)]
    pub option_moneyness: Option<f64>,
    #[serde(default)]
    pub use_rolling_contracts: bool,
    /// Strict mode: a selection gap disqualifies the run instead of
    /// dropping the segment.
    #[serde(default)]
    pub strict_option_mode: bool,
    #[serde(default = "default_segment_tolerance")]
    pub segment_tolerance_pct: f64,
    #[serde(default = "default_concurrent_runs")]
    pub concurrent_runs: u32,
    pub goal_return_pct: f64,
    /// Seed for the injected RNG; defaults to a stable hash of the request.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_segment_tolerance() -> f64 {
    10.0
}

fn default_concurrent_runs() -> u32 {
    3
}

impl HistoricalRequest {
    /// Structural validation of the request.
    pub fn validate(&self) -> Result<(), HistvalError> {
        if self.symbol.trim().is_empty() {
            return Err(HistvalError::InvalidRequest("symbol is empty".into()));
        }
        if self.window_days < 2 {
            return Err(HistvalError::InvalidRequest(format!(
                "window_days must be >= 2, got {}",
                self.window_days
            )));
        }
        if self.concurrent_runs == 0 {
            return Err(HistvalError::InvalidRequest(
                "concurrent_runs must be >= 1".into(),
            ));
        }
        if self.segment_tolerance_pct < 0.0 {
            return Err(HistvalError::InvalidRequest(
                "segment_tolerance_pct must be >= 0".into(),
            ));
        }
        if self.instrument_type == InstrumentType::Option && self.use_rolling_contracts {
            if self.option_dte.unwrap_or(0) <= 0 {
                return Err(HistvalError::InvalidRequest(
                    "rolling contracts require option_dte > 0".into(),
                ));
            }
            if self.option_moneyness.unwrap_or(0.0) <= 0.0 {
                return Err(HistvalError::InvalidRequest(
                    "rolling contracts require option_moneyness > 0".into(),
                ));
            }
            if self.option_right.is_none() {
                return Err(HistvalError::InvalidRequest(
                    "rolling contracts require option_right".into(),
                ));
            }
        }
        Ok(())
    }
}

/// One simulated run.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SingleRunOutcome {
    pub return_pct: f64,
    pub max_drawdown: f64,
    pub win_rate: f64,
    pub trades_count: i64,
    /// Strict-mode gap disqualification.
    pub disqualified: bool,
    /// Segments dropped (non-strict) or encountered (strict) due to no
    /// contract within tolerance.
    pub gap_segments: i64,
}

/// Aggregate over `concurrent_runs` instances.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AggregateOutcome {
    pub best_return_pct: f64,
    pub median_return_pct: f64,
    pub worst_return_pct: f64,
    /// The run whose return is the median; its drawdown/win-rate/trades
    /// are the headline numbers.
    pub median: SingleRunOutcome,
    pub runs: Vec<SingleRunOutcome>,
    /// Median return met the goal and no run was disqualified.
    pub passed: bool,
    pub goal_return_pct: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum HistvalError {
    #[error("invalid historical request: {0}")]
    InvalidRequest(String),
    #[error("history data unavailable: {0}")]
    Data(String),
    #[error(transparent)]
    Db(#[from] DbError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> HistoricalRequest {
        HistoricalRequest {
            symbol: "SPY".into(),
            window_days: 90,
            instrument_type: InstrumentType::Equity,
            option_right: None,
            option_dte: None,
            option_moneyness: None,
            use_rolling_contracts: false,
            strict_option_mode: false,
            segment_tolerance_pct: 10.0,
            concurrent_runs: 3,
            goal_return_pct: 10.0,
            seed: None,
        }
    }

    #[test]
    fn valid_equity_request_passes() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn rolling_options_require_targets() {
        let mut req = base();
        req.instrument_type = InstrumentType::Option;
        req.use_rolling_contracts = true;
        assert!(req.validate().is_err());

        req.option_dte = Some(30);
        req.option_moneyness = Some(0.95);
        req.option_right = Some(OptionRight::Put);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn tiny_window_rejected() {
        let mut req = base();
        req.window_days = 1;
        assert!(req.validate().is_err());
    }

    #[test]
    fn zero_runs_rejected() {
        let mut req = base();
        req.concurrent_runs = 0;
        assert!(req.validate().is_err());
    }

    #[test]
    fn request_deserializes_with_defaults() {
        let req: HistoricalRequest = serde_json::from_value(serde_json::json!({
            "symbol": "SPY",
            "window_days": 90,
            "instrument_type": "equity",
            "goal_return_pct": 10.0
        }))
        .unwrap();
        assert_eq!(req.concurrent_runs, 3);
        assert_eq!(req.segment_tolerance_pct, 10.0);
        assert!(!req.strict_option_mode);
    }
}

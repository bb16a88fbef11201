//! Market-data quality codes and the per-suggestion aggregation verdict.
//!
//! Scoring and aggregation logic lives in `otx-quality`; these types are
//! shared because the verdict is embedded in persisted suggestions.

use serde::{Deserialize, Serialize};

/// Per-symbol quality code, ordered roughly by severity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityCode {
    Ok,
    WarnStale,
    WarnWideSpread,
    FailCrossed,
    FailNoQuote,
    FailProviderOpen,
}

impl QualityCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityCode::Ok => "OK",
            QualityCode::WarnStale => "WARN_STALE",
            QualityCode::WarnWideSpread => "WARN_WIDE_SPREAD",
            QualityCode::FailCrossed => "FAIL_CROSSED",
            QualityCode::FailNoQuote => "FAIL_NO_QUOTE",
            QualityCode::FailProviderOpen => "FAIL_PROVIDER_OPEN",
        }
    }

    pub fn is_fail(&self) -> bool {
        matches!(
            self,
            QualityCode::FailCrossed | QualityCode::FailNoQuote | QualityCode::FailProviderOpen
        )
    }

    pub fn is_warn(&self) -> bool {
        matches!(self, QualityCode::WarnStale | QualityCode::WarnWideSpread)
    }
}

/// What the generator does with a suggestion after aggregation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityAction {
    Accept,
    Downrank,
    Defer,
    SkipFatal,
}

impl QualityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityAction::Accept => "accept",
            QualityAction::Downrank => "downrank",
            QualityAction::Defer => "defer",
            QualityAction::SkipFatal => "skip_fatal",
        }
    }

    /// Blocking actions persist the suggestion as NOT_EXECUTABLE.
    pub fn blocks_execution(&self) -> bool {
        matches!(self, QualityAction::Defer | QualityAction::SkipFatal)
    }
}

/// One symbol's verdict inside an aggregate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SymbolQuality {
    pub symbol: String,
    pub code: QualityCode,
    pub score: f64,
}

/// The aggregate embedded in `Suggestion.marketdata_quality`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarketDataQuality {
    pub action: QualityAction,
    /// Minimum symbol score across the suggestion's legs.
    pub score: f64,
    pub symbols: Vec<SymbolQuality>,
    /// Human-readable summary, e.g. "SPY:FAIL_CROSSED".
    pub detail: String,
}

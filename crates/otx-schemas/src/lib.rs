//! Shared domain types for the otx backend core.
//!
//! Everything here is a plain serde-serializable value type. No IO, no
//! clock, no database — those live in `otx-db` / `otx-config`. Status
//! enums carry their DB string form (`as_str` / `parse`) plus explicit
//! transition predicates so the persistence layer can enforce them with
//! conditional updates.

pub mod jobs;
pub mod quality;
pub mod suggestion;
pub mod validation;

pub use jobs::{JobRun, JobStatus};
pub use quality::{MarketDataQuality, QualityAction, QualityCode, SymbolQuality};
pub use suggestion::{
    DismissReason, Leg, LegAction, LegType, SizingMetadata, Suggestion, SuggestionInvalid,
    SuggestionMetrics, SuggestionStatus, Window,
};
pub use validation::{
    HistoricalResult, HistoricalRun, InstrumentType, ValidationJournalEntry, ValidationState,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Holdings
// ---------------------------------------------------------------------------

/// Asset class of a holding row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    Equity,
    Option,
    Cash,
}

impl AssetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Equity => "equity",
            AssetType::Option => "option",
            AssetType::Cash => "cash",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "equity" => Some(AssetType::Equity),
            "option" => Some(AssetType::Option),
            "cash" => Some(AssetType::Cash),
            _ => None,
        }
    }
}

/// First-order greeks attached to an option holding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Greeks {
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
}

/// A per-user position row. Source-of-truth for sizing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Holding {
    pub user_id: Uuid,
    pub symbol: String,
    pub asset_type: AssetType,
    pub quantity: f64,
    pub cost_basis: f64,
    pub current_price: f64,
    pub greeks: Option<Greeks>,
    pub sector: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Holding {
    /// Market value of the position at `current_price`.
    pub fn market_value(&self) -> f64 {
        match self.asset_type {
            AssetType::Cash => self.quantity,
            // Option contracts carry the standard 100x multiplier.
            AssetType::Option => self.quantity * self.current_price * 100.0,
            AssetType::Equity => self.quantity * self.current_price,
        }
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Encrypted third-party token. The plaintext never leaves `otx-secrets`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Credential {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider: String,
    /// AEAD ciphertext (nonce-prefixed); opaque to everything but the
    /// secret store.
    pub ciphertext: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Analytics
// ---------------------------------------------------------------------------

/// Append-only analytics event row. Never updated after insert.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    pub event_name: String,
    pub category: String,
    pub properties: Value,
    pub created_at: DateTime<Utc>,
}

//! Market-data quality gate.
//!
//! Scores each symbol's latest quote into a [`QualityCode`], aggregates the
//! per-symbol codes into one effective action per suggestion, and tracks a
//! process-wide provider circuit breaker.
//!
//! This crate never touches the database; it is pure policy plus the
//! provider HTTP client.

pub mod breaker;
pub mod gate;
pub mod provider;

pub use breaker::{BreakerConfig, BreakerState, CircuitBreaker};
pub use gate::{aggregate_quality, evaluate_symbol, QualityPolicy};
pub use provider::{
    HttpQuoteProvider, ProviderError, Quote, QuoteProvider, QuoteService, QuoteSnapshot,
    StaticQuoteProvider,
};

//! Historical validation engine.
//!
//! Deterministic replay over a daily price series, for equities and for
//! rolling option contracts. Concurrent runs share the dataset and differ
//! only in parameter perturbations drawn from per-run seeds; all
//! randomness flows from the single RNG injected into
//! [`engine::HistoricalEngine::run`], so identical inputs and seed produce
//! byte-identical numeric outputs.

pub mod data;
pub mod engine;
pub mod handler;
pub mod service;
pub mod types;

pub use data::{ContractQuote, HistoryProvider, SyntheticHistory};
pub use engine::HistoricalEngine;
pub use handler::{HistoricalJobHandler, HistoricalJobPayload, JOB_VALIDATION_HISTORICAL};
pub use service::ValidationService;
pub use types::{
    AggregateOutcome, HistoricalRequest, HistvalError, OptionRight, SingleRunOutcome,
};

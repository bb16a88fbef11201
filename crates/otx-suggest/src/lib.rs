//! Suggestion generator: candidate intake, quality gating, sizing under
//! capital/risk caps, deterministic ranking, persistence.
//!
//! The numerical optimizer is an external collaborator behind the
//! [`CandidateSource`] seam; this crate owns everything from candidate to
//! persisted, ranked, quality-gated suggestion.

pub mod candidate;
pub mod generator;
pub mod handler;
pub mod lifecycle;
pub mod rank;
pub mod sizing;
pub mod universe;

pub use candidate::{Candidate, CandidateSource, HoldingsScanSource, StaticCandidateSource};
pub use generator::{GenerationSummary, SuggestError, SuggestionGenerator};
pub use handler::{GeneratorJobHandler, GeneratorPayload, JOB_SUGGESTIONS_GENERATE};
pub use lifecycle::{dismiss_suggestion, refresh_suggestion_quote};
pub use rank::rank_suggestions;
pub use sizing::{size_candidate, SizingCaps};
pub use universe::{UniverseSyncHandler, UniverseSyncPayload, JOB_UNIVERSE_SYNC};

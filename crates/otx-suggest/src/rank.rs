//! Deterministic suggestion ranking.
//!
//! Key, descending: (¬blocked, score, ev, −max_loss_total). Ties break by
//! symbol lexicographic, then id, so the order is total and stable across
//! runs.

use std::cmp::Ordering;

use otx_schemas::{Suggestion, SuggestionStatus};

fn is_blocked(s: &Suggestion) -> bool {
    s.status == SuggestionStatus::NotExecutable
}

fn cmp_f64_desc(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

/// Total order over suggestions, best first.
pub fn compare(a: &Suggestion, b: &Suggestion) -> Ordering {
    // Unblocked before blocked.
    is_blocked(a)
        .cmp(&is_blocked(b))
        .then_with(|| cmp_f64_desc(a.score, b.score))
        .then_with(|| cmp_f64_desc(a.metrics.ev, b.metrics.ev))
        // Lower total risk wins.
        .then_with(|| {
            a.sizing
                .max_loss_total
                .partial_cmp(&b.sizing.max_loss_total)
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| a.symbol.cmp(&b.symbol))
        .then_with(|| a.id.cmp(&b.id))
}

/// Sort in place, best first.
pub fn rank_suggestions(suggestions: &mut [Suggestion]) {
    suggestions.sort_by(compare);
}

//! Inbox composition and batch staging.
//!
//! `hero` is the single top-ranked fresh EXECUTABLE; `queue` holds the
//! remaining active suggestions in rank order; `completed` is today's
//! terminal set. Staleness follows the suggestion contract: stale strictly
//! after `stale_after_seconds`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use otx_config::{trading_day_bounds_utc, Clock};
use otx_db::{DbError, Gateway};
use otx_schemas::{AnalyticsEvent, AssetType, Suggestion, SuggestionStatus};
use otx_suggest::rank_suggestions;

// ---------------------------------------------------------------------------
// Inbox view
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize)]
pub struct InboxMeta {
    /// Sum of EV over fresh EXECUTABLE suggestions.
    pub total_ev_available: f64,
    /// Cash on hand minus capital already committed to staged suggestions.
    pub deployable_capital: f64,
    pub stale_after_seconds: i64,
}

#[derive(Clone, Debug, Serialize)]
pub struct InboxView {
    pub hero: Option<Suggestion>,
    pub queue: Vec<Suggestion>,
    pub completed: Vec<Suggestion>,
    pub meta: InboxMeta,
}

/// Compose the inbox for one user from a consistent snapshot of their
/// suggestions.
pub async fn build_inbox(
    gateway: &Arc<dyn Gateway>,
    clock: &Arc<dyn Clock>,
    user_id: Uuid,
    stale_after_seconds: i64,
) -> Result<InboxView, DbError> {
    let now = clock.now();
    let (day_start, day_end) = trading_day_bounds_utc(now);

    let mut active = gateway.active_suggestions(user_id).await?;
    rank_suggestions(&mut active);
    let completed = gateway
        .terminal_suggestions_between(user_id, day_start, day_end)
        .await?;
    let holdings = gateway.holdings_for_user(user_id).await?;

    // Hero: best-ranked executable that is still fresh.
    let hero_idx = active.iter().position(|s| {
        s.status == SuggestionStatus::Executable && !s.is_stale(now, stale_after_seconds)
    });
    let hero = hero_idx.map(|i| active.remove(i));

    let total_ev_available = hero
        .iter()
        .chain(active.iter())
        .filter(|s| {
            s.status == SuggestionStatus::Executable && !s.is_stale(now, stale_after_seconds)
        })
        .map(|s| s.metrics.ev)
        .sum();

    let cash: f64 = holdings
        .iter()
        .filter(|h| h.asset_type == AssetType::Cash)
        .map(|h| h.market_value())
        .sum();
    let staged_capital: f64 = hero
        .iter()
        .chain(active.iter())
        .filter(|s| s.status == SuggestionStatus::Staged)
        .map(|s| s.sizing.capital_required)
        .sum();
    let deployable_capital = (cash - staged_capital).max(0.0);

    Ok(InboxView {
        hero,
        queue: active,
        completed,
        meta: InboxMeta {
            total_ev_available,
            deployable_capital,
            stale_after_seconds,
        },
    })
}

// ---------------------------------------------------------------------------
// Batch staging
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct StageFailure {
    pub id: Uuid,
    pub reason: String,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct StageBatchResult {
    pub staged: Vec<Uuid>,
    pub failed: Vec<StageFailure>,
}

/// Stage a batch of suggestions. Each id transitions EXECUTABLE → STAGED
/// atomically; failures are reported per id and never abort the rest of
/// the batch.
pub async fn stage_batch(
    gateway: &Arc<dyn Gateway>,
    clock: &Arc<dyn Clock>,
    user_id: Uuid,
    suggestion_ids: &[Uuid],
) -> Result<StageBatchResult, DbError> {
    let now = clock.now();
    let mut result = StageBatchResult::default();

    for &id in suggestion_ids {
        match stage_one(gateway, now, user_id, id).await {
            Ok(()) => result.staged.push(id),
            Err(reason) => result.failed.push(StageFailure { id, reason }),
        }
    }

    info!(
        %user_id,
        staged = result.staged.len(),
        failed = result.failed.len(),
        "stage batch settled"
    );
    Ok(result)
}

async fn stage_one(
    gateway: &Arc<dyn Gateway>,
    now: DateTime<Utc>,
    user_id: Uuid,
    id: Uuid,
) -> Result<(), String> {
    let current = match gateway.fetch_suggestion(user_id, id).await {
        Ok(s) => s,
        Err(DbError::NotFound) => return Err("not_found".to_string()),
        // Another user's row is indistinguishable from a missing one.
        Err(DbError::Unauthorized) => return Err("not_found".to_string()),
        Err(e) => return Err(format!("store_error:{e}")),
    };

    if current.status != SuggestionStatus::Executable {
        return Err(match current.status {
            SuggestionStatus::NotExecutable => "not_executable".to_string(),
            other => format!("invalid_status:{}", other.as_str()),
        });
    }

    match gateway
        .transition_suggestion(
            user_id,
            id,
            SuggestionStatus::Executable,
            SuggestionStatus::Staged,
            now,
        )
        .await
    {
        Ok(()) => {
            // Exactly one staging audit event per EXECUTABLE → STAGED.
            let event = AnalyticsEvent {
                event_name: "suggestion.staged".to_string(),
                category: "suggestions".to_string(),
                properties: serde_json::json!({
                    "suggestion_id": id,
                    "user_id": user_id,
                    "from": "EXECUTABLE",
                    "to": "STAGED",
                }),
                created_at: now,
            };
            if let Err(e) = gateway.record_event(&event).await {
                tracing::warn!(error = %e, "staging audit write failed");
            }
            Ok(())
        }
        Err(DbError::Conflict(_)) => Err("conflict".to_string()),
        Err(DbError::Unauthorized) => Err("not_found".to_string()),
        Err(e) => Err(format!("store_error:{e}")),
    }
}

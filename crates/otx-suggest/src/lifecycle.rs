//! Suggestion lifecycle operations shared by the HTTP handlers: dismissal
//! and quote refresh.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use otx_config::Clock;
use otx_db::{DbError, Gateway};
use otx_quality::{aggregate_quality, evaluate_symbol, QualityPolicy, QuoteService};
use otx_schemas::{AnalyticsEvent, DismissReason, Suggestion, SuggestionStatus};

use crate::generator::{SuggestError, BLOCKED_REASON_QUALITY_GATE};

/// Dismiss an active suggestion with a required reason tag. Emits an
/// analytics event carrying the tag.
pub async fn dismiss_suggestion(
    gateway: &Arc<dyn Gateway>,
    clock: &Arc<dyn Clock>,
    user_id: Uuid,
    suggestion_id: Uuid,
    reason: DismissReason,
) -> Result<(), DbError> {
    let now = clock.now();
    let current = gateway.fetch_suggestion(user_id, suggestion_id).await?;
    gateway
        .transition_suggestion(
            user_id,
            suggestion_id,
            current.status,
            SuggestionStatus::Dismissed,
            now,
        )
        .await?;
    record_transition(
        gateway,
        now,
        "suggestion.dismissed",
        &current,
        SuggestionStatus::Dismissed,
        Some(reason.as_str()),
    )
    .await;
    Ok(())
}

/// Re-evaluate the market-data gate for one suggestion, flipping the
/// EXECUTABLE ↔ NOT_EXECUTABLE pair as the fresh verdict dictates and
/// stamping `refreshed_at`.
pub async fn refresh_suggestion_quote(
    gateway: &Arc<dyn Gateway>,
    quotes: &Arc<QuoteService>,
    clock: &Arc<dyn Clock>,
    policy: &QualityPolicy,
    user_id: Uuid,
    suggestion_id: Uuid,
) -> Result<Suggestion, SuggestError> {
    let current = gateway.fetch_suggestion(user_id, suggestion_id).await?;
    let now = clock.now();

    let snapshot = quotes.snapshot(std::slice::from_ref(&current.symbol)).await?;
    let symbol_quality = vec![evaluate_symbol(&current.symbol, &snapshot, now, policy)];
    let quality = aggregate_quality(symbol_quality, policy);

    let (status, blocked_reason, blocked_detail) = if quality.action.blocks_execution() {
        (
            SuggestionStatus::NotExecutable,
            Some(BLOCKED_REASON_QUALITY_GATE.to_string()),
            Some(quality.detail.clone()),
        )
    } else {
        (SuggestionStatus::Executable, None, None)
    };

    gateway
        .update_suggestion_quality(
            user_id,
            suggestion_id,
            &quality,
            status,
            blocked_reason,
            blocked_detail,
            now,
        )
        .await?;

    if status != current.status {
        record_transition(gateway, now, "suggestion.requalified", &current, status, None).await;
    }

    gateway
        .fetch_suggestion(user_id, suggestion_id)
        .await
        .map_err(SuggestError::Db)
}

/// Best-effort transition audit: analytics failures never fail the
/// user-facing operation.
async fn record_transition(
    gateway: &Arc<dyn Gateway>,
    now: DateTime<Utc>,
    event_name: &str,
    before: &Suggestion,
    to: SuggestionStatus,
    reason: Option<&str>,
) {
    let event = AnalyticsEvent {
        event_name: event_name.to_string(),
        category: "suggestions".to_string(),
        properties: serde_json::json!({
            "suggestion_id": before.id,
            "user_id": before.user_id,
            "from": before.status.as_str(),
            "to": to.as_str(),
            "reason": reason,
        }),
        created_at: now,
    };
    if let Err(e) = gateway.record_event(&event).await {
        tracing::warn!(error = %e, "transition audit write failed");
    }
}

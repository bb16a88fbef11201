//! Axum router and all HTTP handlers.
//!
//! `build_router` is the single entry point; `main.rs` attaches
//! middleware layers. Handlers are `pub(crate)` so the scenario tests in
//! `tests/` can compose the router directly.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use otx_audit::{build_ops_health, build_system_health};
use otx_db::DbError;
use otx_golive::{phase_of, PaperCheckpointRequest};
use otx_golive::JOB_VALIDATION_PAPER;
use otx_histval::{HistoricalJobPayload, JOB_VALIDATION_HISTORICAL};
use otx_inbox::{build_inbox, stage_batch};
use otx_queue::{EnqueueOutcome, EnqueueRequest};
use otx_schemas::{DismissReason, QualityCode, ValidationState};
use otx_suggest::{dismiss_suggestion, refresh_suggestion_quote, SuggestError};
use otx_train::{TrainJobPayload, JOB_STRATEGY_AUTOTUNE, JOB_STRATEGY_TRAIN};

use crate::api_types::{
    map_db, ApiError, DismissRequest, JournalQuery, StageBatchRequest, TaskAccepted,
    ValidationRunRequest,
};
use crate::auth::{authenticate, require_cron_secret};
use crate::dispatch::{
    CRON_LEARNING_INGEST, CRON_PLAID_BACKFILL, CRON_STRATEGY_AUTOTUNE, CRON_SUGGESTIONS_CLOSE,
    CRON_SUGGESTIONS_OPEN, CRON_UNIVERSE_SYNC, CRON_WEEKLY_REPORT,
};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Cron task endpoints. morning-brief/midday-scan are the
        // deprecated names of suggestions/open and suggestions/close and
        // share their dispatch jobs.
        .route("/tasks/morning-brief", post(task_suggestions_open))
        .route("/tasks/suggestions/open", post(task_suggestions_open))
        .route("/tasks/midday-scan", post(task_suggestions_close))
        .route("/tasks/suggestions/close", post(task_suggestions_close))
        .route("/tasks/weekly-report", post(task_weekly_report))
        .route("/tasks/universe/sync", post(task_universe_sync))
        .route("/tasks/learning/ingest", post(task_learning_ingest))
        .route("/tasks/strategy/autotune", post(task_strategy_autotune))
        .route("/tasks/plaid/backfill-history", post(task_plaid_backfill))
        // Validation engine.
        .route("/validation/run", post(validation_run))
        .route("/validation/status", get(validation_status))
        .route("/validation/journal", get(validation_journal))
        // Inbox.
        .route("/inbox", get(inbox))
        .route("/inbox/stage-batch", post(inbox_stage_batch))
        .route("/suggestions/:id/dismiss", post(suggestion_dismiss))
        .route("/suggestions/:id/refresh-quote", post(suggestion_refresh))
        // Health.
        .route("/system/health", get(system_health))
        .route("/ops/health", get(ops_health))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Cron task endpoints
// ---------------------------------------------------------------------------

/// Shared cron path: verify the secret, then enqueue the dispatch job
/// keyed by (dispatch job, America/Chicago trading day). A same-day
/// repeat returns 409 carrying the existing job id.
async fn enqueue_cron(
    state: &AppState,
    headers: &HeaderMap,
    dispatch_job: &'static str,
) -> Result<Response, ApiError> {
    require_cron_secret(state, headers)?;

    let day = otx_config::trading_day(state.clock.now());
    let key = format!("{dispatch_job}:{day}");

    // Day-scoped dedup includes terminal rows: a dispatch that already ran
    // to completion still blocks a same-day repeat.
    if let Some(existing) = state
        .gateway
        .find_job_any_status(dispatch_job, &key)
        .await
        .map_err(map_db)?
    {
        return Err(ApiError::AlreadyEnqueued {
            job_id: existing.id,
        });
    }

    let req = EnqueueRequest::new(dispatch_job, serde_json::json!({})).with_idempotency_key(key);

    match state.queue.enqueue(req).await.map_err(map_db)? {
        EnqueueOutcome::Created(job_id) => {
            info!(dispatch_job, %job_id, "cron task accepted");
            Ok((StatusCode::ACCEPTED, Json(TaskAccepted { job_id })).into_response())
        }
        EnqueueOutcome::Duplicate(job_id) => Err(ApiError::AlreadyEnqueued { job_id }),
    }
}

macro_rules! cron_endpoint {
    ($fn_name:ident, $job:expr) => {
        pub(crate) async fn $fn_name(
            State(st): State<Arc<AppState>>,
            headers: HeaderMap,
        ) -> Result<Response, ApiError> {
            enqueue_cron(&st, &headers, $job).await
        }
    };
}

cron_endpoint!(task_suggestions_open, CRON_SUGGESTIONS_OPEN);
cron_endpoint!(task_suggestions_close, CRON_SUGGESTIONS_CLOSE);
cron_endpoint!(task_weekly_report, CRON_WEEKLY_REPORT);
cron_endpoint!(task_universe_sync, CRON_UNIVERSE_SYNC);
cron_endpoint!(task_learning_ingest, CRON_LEARNING_INGEST);
cron_endpoint!(task_strategy_autotune, CRON_STRATEGY_AUTOTUNE);
cron_endpoint!(task_plaid_backfill, CRON_PLAID_BACKFILL);

// ---------------------------------------------------------------------------
// POST /validation/run
// ---------------------------------------------------------------------------

pub(crate) async fn validation_run(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let user_id = authenticate(&st, &headers)?;
    let body: ValidationRunRequest = serde_json::from_value(body)
        .map_err(|e| ApiError::Validation(format!("invalid body: {e}")))?;

    let (job_name, payload) = match body.mode.as_str() {
        "historical" => {
            let options = body
                .historical
                .ok_or_else(|| ApiError::Validation("historical options required".into()))?;
            options
                .request
                .validate()
                .map_err(|e| ApiError::Validation(e.to_string()))?;

            if options.train {
                let payload = serde_json::to_value(TrainJobPayload {
                    user_id,
                    seed: options.request.seed,
                    request: Some(options.request),
                    train_target_streak: options.train_target_streak,
                    train_max_attempts: options.train_max_attempts,
                })
                .map_err(|e| ApiError::Internal(e.to_string()))?;
                (JOB_STRATEGY_TRAIN, payload)
            } else if options.autotune {
                let payload = serde_json::to_value(TrainJobPayload {
                    user_id,
                    seed: options.request.seed,
                    request: Some(options.request),
                    train_target_streak: None,
                    train_max_attempts: None,
                })
                .map_err(|e| ApiError::Internal(e.to_string()))?;
                (JOB_STRATEGY_AUTOTUNE, payload)
            } else {
                let payload = serde_json::to_value(HistoricalJobPayload {
                    user_id,
                    request: options.request,
                })
                .map_err(|e| ApiError::Internal(e.to_string()))?;
                (JOB_VALIDATION_HISTORICAL, payload)
            }
        }
        "paper" => {
            let checkpoint = body.paper.unwrap_or(PaperCheckpointRequest {
                return_pct: 0.0,
                drawdown_pct: 0.0,
                loss_pct: 0.0,
                passed: None,
            });
            let payload = serde_json::json!({
                "user_id": user_id,
                "checkpoint": checkpoint,
            });
            (JOB_VALIDATION_PAPER, payload)
        }
        other => {
            return Err(ApiError::Validation(format!(
                "mode must be 'paper' or 'historical', got '{other}'"
            )))
        }
    };

    let outcome = st
        .queue
        .enqueue(EnqueueRequest::new(job_name, payload))
        .await
        .map_err(map_db)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(TaskAccepted {
            job_id: outcome.job_id(),
        }),
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// GET /validation/status, /validation/journal
// ---------------------------------------------------------------------------

pub(crate) async fn validation_status(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let user_id = authenticate(&st, &headers)?;
    let state = st
        .gateway
        .validation_state(user_id)
        .await
        .map_err(map_db)?;

    let phase = phase_of(state.as_ref());
    // A user with no row yet still gets the full shape.
    let state = state.unwrap_or_else(|| ValidationState::new(user_id, st.clock.now(), 14, 3));

    let mut body = serde_json::to_value(&state).map_err(|e| ApiError::Internal(e.to_string()))?;
    if let Some(map) = body.as_object_mut() {
        map.insert(
            "phase".to_string(),
            serde_json::to_value(phase).map_err(|e| ApiError::Internal(e.to_string()))?,
        );
    }
    Ok((StatusCode::OK, Json(body)).into_response())
}

pub(crate) async fn validation_journal(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<JournalQuery>,
) -> Result<Response, ApiError> {
    let user_id = authenticate(&st, &headers)?;
    if query.limit <= 0 || query.limit > 500 {
        return Err(ApiError::Validation(format!(
            "limit must be 1..=500, got {}",
            query.limit
        )));
    }
    // Gateway returns newest-first; the wire contract is append order.
    let mut entries = st
        .gateway
        .journal_entries(user_id, query.limit)
        .await
        .map_err(map_db)?;
    entries.reverse();
    Ok((StatusCode::OK, Json(entries)).into_response())
}

// ---------------------------------------------------------------------------
// Inbox
// ---------------------------------------------------------------------------

pub(crate) async fn inbox(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let user_id = authenticate(&st, &headers)?;
    let view = build_inbox(&st.gateway, &st.clock, user_id, st.stale_after_seconds)
        .await
        .map_err(map_db)?;
    Ok((StatusCode::OK, Json(view)).into_response())
}

pub(crate) async fn inbox_stage_batch(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let user_id = authenticate(&st, &headers)?;
    let body: StageBatchRequest = serde_json::from_value(body)
        .map_err(|e| ApiError::Validation(format!("invalid body: {e}")))?;
    if body.suggestion_ids.is_empty() {
        return Err(ApiError::Validation("suggestion_ids must be non-empty".into()));
    }

    let result = stage_batch(&st.gateway, &st.clock, user_id, &body.suggestion_ids)
        .await
        .map_err(map_db)?;
    Ok((StatusCode::OK, Json(result)).into_response())
}

// ---------------------------------------------------------------------------
// Suggestion lifecycle
// ---------------------------------------------------------------------------

pub(crate) async fn suggestion_dismiss(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let user_id = authenticate(&st, &headers)?;
    let body: DismissRequest = serde_json::from_value(body)
        .map_err(|e| ApiError::Validation(format!("invalid body: {e}")))?;
    let reason = DismissReason::parse(&body.reason).ok_or_else(|| {
        ApiError::Validation(format!(
            "reason must be one of too_risky|bad_price|wrong_timing|other, got '{}'",
            body.reason
        ))
    })?;

    dismiss_suggestion(&st.gateway, &st.clock, user_id, id, reason)
        .await
        .map_err(|e| count_unauthorized(&st, e))?;
    Ok((StatusCode::OK, Json(serde_json::json!({"dismissed": id}))).into_response())
}

pub(crate) async fn suggestion_refresh(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let user_id = authenticate(&st, &headers)?;

    let refreshed = refresh_suggestion_quote(
        &st.gateway,
        &st.quotes,
        &st.clock,
        &st.quality_policy,
        user_id,
        id,
    )
    .await
    .map_err(|e| match e {
        SuggestError::Db(db) => count_unauthorized(&st, db),
        SuggestError::Provider(p) => ApiError::Unavailable(p.to_string()),
        SuggestError::Candidates(msg) => ApiError::Internal(msg),
    })?;

    let fast_failed = refreshed
        .marketdata_quality
        .as_ref()
        .map(|q| q.symbols.iter().any(|s| s.code == QualityCode::FailProviderOpen))
        .unwrap_or(false);
    st.counters.record_quote_request(fast_failed);

    Ok((StatusCode::OK, Json(refreshed)).into_response())
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

pub(crate) async fn system_health(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let user_id = authenticate(&st, &headers)?;
    let now = st.clock.now();
    let provider_state = st.breaker.state(now).as_str();
    let health = build_system_health(&st.gateway, &st.counters, provider_state, user_id, now)
        .await
        .map_err(map_db)?;
    Ok((StatusCode::OK, Json(health)).into_response())
}

pub(crate) async fn ops_health(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    // Operators arrive with either a user token or the cron secret.
    if authenticate(&st, &headers).is_err() {
        require_cron_secret(&st, &headers)?;
    }
    let health = build_ops_health(&st.gateway, &st.counters, st.clock.now())
        .await
        .map_err(map_db)?;
    Ok((StatusCode::OK, Json(health)).into_response())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Cross-user rejections feed the integrity counter before mapping.
fn count_unauthorized(state: &AppState, err: DbError) -> ApiError {
    if matches!(err, DbError::Unauthorized) {
        state.counters.record_cross_user_rejection();
    }
    map_db(err)
}

//! Wire DTOs and the HTTP error mapping.
//!
//! Wire shapes stay loose (serde_json); validation happens at ingress in
//! the handlers. Internal status enums never leak raw — everything going
//! out is an explicit DTO.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use otx_db::DbError;
use otx_golive::PaperCheckpointRequest;
use otx_histval::HistoricalRequest;

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// 202 body for every enqueue-style endpoint.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TaskAccepted {
    pub job_id: Uuid,
}

#[derive(Clone, Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Deserialize)]
pub struct ValidationRunRequest {
    /// "paper" | "historical"
    pub mode: String,
    #[serde(default)]
    pub historical: Option<HistoricalRunOptions>,
    #[serde(default)]
    pub paper: Option<PaperCheckpointRequest>,
}

/// The historical sub-object: the engine request plus training switches.
#[derive(Clone, Debug, Deserialize)]
pub struct HistoricalRunOptions {
    #[serde(flatten)]
    pub request: HistoricalRequest,
    #[serde(default)]
    pub autotune: bool,
    #[serde(default)]
    pub train: bool,
    #[serde(default)]
    pub train_target_streak: Option<u32>,
    #[serde(default)]
    pub train_max_attempts: Option<u32>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct StageBatchRequest {
    pub suggestion_ids: Vec<Uuid>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DismissRequest {
    pub reason: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct JournalQuery {
    #[serde(default = "default_journal_limit")]
    pub limit: i64,
}

fn default_journal_limit() -> i64 {
    50
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// HTTP-mapped failure taxonomy.
#[derive(Debug)]
pub enum ApiError {
    /// Cron secret or JWT invalid → 401.
    AuthFailed,
    /// Cross-user access → 403.
    NotAuthorized,
    /// Missing resource → 404.
    NotFound,
    /// Cron idempotency hit → 409 carrying the existing job id.
    AlreadyEnqueued { job_id: Uuid },
    /// Optimistic update miss → 409.
    Conflict(String),
    /// Malformed request body → 422.
    Validation(String),
    /// Store unreachable → 503.
    Unavailable(String),
    /// Everything else → 500.
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::AuthFailed => StatusCode::UNAUTHORIZED,
            ApiError::NotAuthorized => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::AlreadyEnqueued { .. } | ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            ApiError::AuthFailed => ErrorBody {
                error: "unauthorized".into(),
                detail: None,
                job_id: None,
            },
            ApiError::NotAuthorized => ErrorBody {
                error: "forbidden".into(),
                detail: None,
                job_id: None,
            },
            ApiError::NotFound => ErrorBody {
                error: "not_found".into(),
                detail: None,
                job_id: None,
            },
            ApiError::AlreadyEnqueued { job_id } => ErrorBody {
                error: "already_enqueued".into(),
                detail: Some("a run for this trading day already exists".into()),
                job_id: Some(job_id),
            },
            ApiError::Conflict(detail) => ErrorBody {
                error: "conflict".into(),
                detail: Some(detail),
                job_id: None,
            },
            ApiError::Validation(detail) => ErrorBody {
                error: "validation".into(),
                detail: Some(detail),
                job_id: None,
            },
            ApiError::Unavailable(detail) => ErrorBody {
                error: "unavailable".into(),
                detail: Some(detail),
                job_id: None,
            },
            ApiError::Internal(detail) => ErrorBody {
                error: "internal".into(),
                detail: Some(detail),
                job_id: None,
            },
        };
        (status, Json(body)).into_response()
    }
}

/// Standard gateway-error mapping. Callers that need to count integrity
/// incidents intercept `Unauthorized` before delegating here.
pub fn map_db(err: DbError) -> ApiError {
    match err {
        DbError::NotFound => ApiError::NotFound,
        DbError::Unauthorized => ApiError::NotAuthorized,
        DbError::Conflict(detail) => ApiError::Conflict(detail),
        DbError::ConstraintViolation(detail) => ApiError::Conflict(detail),
        DbError::TransientUnavailable(detail) => ApiError::Unavailable(detail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_match_taxonomy() {
        assert_eq!(ApiError::AuthFailed.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::NotAuthorized.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ApiError::AlreadyEnqueued {
                job_id: Uuid::new_v4()
            }
            .status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::Validation("x".into()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::Unavailable("x".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn historical_options_flatten() {
        let body: ValidationRunRequest = serde_json::from_value(serde_json::json!({
            "mode": "historical",
            "historical": {
                "symbol": "SPY",
                "window_days": 90,
                "instrument_type": "equity",
                "goal_return_pct": 10.0,
                "concurrent_runs": 3,
                "train": true,
                "train_target_streak": 4
            }
        }))
        .unwrap();
        let hist = body.historical.unwrap();
        assert_eq!(hist.request.symbol, "SPY");
        assert!(hist.train);
        assert_eq!(hist.train_target_streak, Some(4));
    }
}

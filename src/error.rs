use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::totals::TotalsError;

/// Errors surfaced to HTTP clients.
///
/// Every variant maps to a small JSON body `{"error": "<label>"}` except
/// [`ApiError::Used`], which answers `{"used": true}` so that a consumed
/// one-shot entry is indistinguishable from one that never existed.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(&'static str),

    #[error("not found")]
    NotFound,

    #[error("consumed or never existed")]
    Used,

    #[error("invite id already exists")]
    DuplicateInvite,

    #[error("invite already claimed")]
    AlreadyClaimed,

    #[error("rate limited")]
    RateLimited,

    #[error("metrics sink not configured")]
    MetricsDisabled,

    #[error("metrics read failed")]
    MetricsRead,
}

impl From<TotalsError> for ApiError {
    fn from(error: TotalsError) -> Self {
        match error {
            TotalsError::Disabled => ApiError::MetricsDisabled,
            TotalsError::Query(_) => ApiError::MetricsRead,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, label) = match self {
            ApiError::BadRequest(label) => (StatusCode::BAD_REQUEST, label),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::Used => {
                let body = serde_json::json!({ "used": true });
                return (StatusCode::NOT_FOUND, axum::Json(body)).into_response();
            }
            ApiError::DuplicateInvite => (StatusCode::CONFLICT, "duplicate_invite"),
            ApiError::AlreadyClaimed => (StatusCode::CONFLICT, "already_claimed"),
            ApiError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
            ApiError::MetricsDisabled => (StatusCode::SERVICE_UNAVAILABLE, "metrics_disabled"),
            ApiError::MetricsRead => (StatusCode::INTERNAL_SERVER_ERROR, "metrics_read_failed"),
        };

        let body = serde_json::json!({ "error": label });
        (status, axum::Json(body)).into_response()
    }
}

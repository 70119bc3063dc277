use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

use ward_engine::EngineError;
use ward_store::StoreError;

/// JSON error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

/// API error type that maps to HTTP status codes and JSON responses.
///
/// Authorization failures carry no detail, so a response never reveals
/// whether someone else's resource exists.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),
    /// No or unknown bearer token, or a conversation owned by someone else.
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("not found: {0}")]
    NotFound(&'static str),
    /// The detail is logged, never returned.
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", "Unauthorized".into()),
            Self::Forbidden => (StatusCode::FORBIDDEN, "forbidden", "Forbidden".into()),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.into()),
            Self::Internal(detail) => {
                error!(error = %detail, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An error occurred while processing your request!".into(),
                )
            }
        };
        (status, Json(ErrorBody { error: code, message })).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Validation(msg) => Self::BadRequest(msg),
            EngineError::Unauthorized => Self::Unauthorized,
            EngineError::NotFound(_) => Self::NotFound("Not Found"),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => Self::NotFound("Not Found"),
            other => Self::Internal(other.to_string()),
        }
    }
}

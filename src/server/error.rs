use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::{Error, ErrorKind};

/// A crate [`Error`] rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub Error);

/// Result type for handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    /// Status code and machine-readable type for the wrapped error.
    pub fn classify(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            Error::Blocked { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "content_blocked"),
            Error::InvalidFormat { .. } => (StatusCode::BAD_REQUEST, "invalid_format"),
            Error::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            Error::Cancelled { .. } => (StatusCode::CONFLICT, "cancelled"),
            Error::RateLimit { .. } => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
            err => match err.kind() {
                ErrorKind::Validation => (StatusCode::BAD_REQUEST, "validation_error"),
                ErrorKind::NotFound => (StatusCode::NOT_FOUND, "not_found"),
                ErrorKind::Expired => (StatusCode::GONE, "expired"),
                ErrorKind::Capacity => (StatusCode::CONFLICT, "capacity_exceeded"),
                ErrorKind::Collaborator => (StatusCode::BAD_GATEWAY, "upstream_error"),
                ErrorKind::Configuration | ErrorKind::Internal => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.classify();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self.0, "request failed");
        }
        let mut error = json!({
            "type": error_type,
            "message": self.0.user_message(),
        });
        if let Some(category) = self.0.blocked_category() {
            error["category"] = json!(category);
        }
        (status, Json(json!({ "error": error }))).into_response()
    }
}

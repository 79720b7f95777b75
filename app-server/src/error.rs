//! HTTP error mapping.

use std::fmt;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use sau_folder_watcher::WatcherError;
use tracing::error;

use crate::response::ApiResponse;

/// Result type for route handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Error returned by a route, rendered in the response envelope.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()>::failure(self.status, self.message);
        (self.status, Json(body)).into_response()
    }
}

impl From<WatcherError> for ApiError {
    fn from(err: WatcherError) -> Self {
        let status = match &err {
            WatcherError::InvalidPath(_) | WatcherError::InvalidName(_) => StatusCode::BAD_REQUEST,
            WatcherError::NotFound(_) => StatusCode::NOT_FOUND,
            WatcherError::Conflict(_) | WatcherError::NoActiveWatch => StatusCode::CONFLICT,
            WatcherError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            WatcherError::Scan(_)
            | WatcherError::Config(_)
            | WatcherError::Io(_)
            | WatcherError::Serialization(_)
            | WatcherError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("Request failed: {err}");
        }
        Self::new(status, err.to_string())
    }
}

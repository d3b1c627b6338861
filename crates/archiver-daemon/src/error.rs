//! Error type for the HTTP transport.

use archiver_core::TaskError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Errors returned by the task API handlers.
///
/// Each registry error kind maps to exactly one HTTP status. Server-side
/// failures (5xx) answer with a generic message; the full error is logged
/// instead of returned.
#[derive(Debug, Error)]
pub enum ApiError {
    /// A registry operation failed.
    #[error(transparent)]
    Task(#[from] TaskError),

    /// The request body or query string could not be decoded.
    #[error("malformed request: {0}")]
    BadRequest(String),

    /// The registry operation did not finish within the request deadline.
    #[error("request deadline exceeded")]
    DeadlineExceeded,

    /// The operation failed outside the registry (for example a panicked
    /// blocking task).
    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON body of every error response.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    /// Returns the HTTP status code for this error.
    ///
    /// - Admission: 503 Service Unavailable
    /// - Location, Validation, malformed request: 400 Bad Request
    /// - NotFound: 404 Not Found
    /// - Quota, Duplicate: 409 Conflict
    /// - Busy: 429 Too Many Requests
    /// - Fetch: 502 Bad Gateway
    /// - Write, Finalize, internal: 500 Internal Server Error
    /// - Deadline: 504 Gateway Timeout
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Task(err) => match err {
                TaskError::Admission { .. } => StatusCode::SERVICE_UNAVAILABLE,
                TaskError::Location { .. } | TaskError::Validation(_) => StatusCode::BAD_REQUEST,
                TaskError::NotFound(_) => StatusCode::NOT_FOUND,
                TaskError::Quota { .. } | TaskError::Duplicate { .. } => StatusCode::CONFLICT,
                TaskError::Busy { .. } => StatusCode::TOO_MANY_REQUESTS,
                TaskError::Fetch { .. } => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message returned to the client.
    fn public_message(&self) -> String {
        match self {
            Self::Task(TaskError::Fetch { url, .. }) => format!("failed to fetch {url}"),
            Self::Task(TaskError::Admission { .. }) => {
                "server is busy, try again later".to_string()
            },
            Self::Task(_) | Self::Internal(_) if self.status_code().is_server_error() => {
                "internal server error".to_string()
            },
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            error: self.public_message(),
        };
        (status, Json(body)).into_response()
    }
}

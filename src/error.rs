//! Error taxonomy for the ResQ API.
//!
//! Every fallible operation in the store and the handlers maps into one of
//! four categories, each with a fixed HTTP status. Validation is rejected at
//! the boundary before any persisted state is touched; storage failures are
//! surfaced, never masked or retried. A failed mutation leaves prior state
//! completely unchanged, since every write is a single-record update.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::warn;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed or out-of-range input. Surfaced as 400 with field detail.
    #[error("invalid input: {0}")]
    Validation(String),

    /// The operation targets an alert or user that does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// The operation is not legal in the alert's current lifecycle state,
    /// e.g. a second responder claiming an already-responded alert.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Underlying persistence failure. Surfaced as 500, not retried.
    #[error("storage failure")]
    Storage(#[from] sqlx::Error),
}

impl Error {
    fn status(&self) -> StatusCode {
        match self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();

        // Internal detail stays in the logs; the response body carries a
        // generic message for storage failures.
        let message = match &self {
            Error::Storage(e) => {
                warn!(error = %e, "Storage failure");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(json!({ "message": message }))).into_response()
    }
}

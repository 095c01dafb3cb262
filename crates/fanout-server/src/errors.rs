//! Server error types and their HTTP mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use fanout_store::StoreError;
use serde_json::json;
use thiserror::Error;
use tracing::warn;

/// Errors raised while starting or running a worker.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The shared store could not be reached or rejected an operation.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Serving failed after the listener was bound.
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error returned by HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The shared store failed; the request cannot be answered.
    #[error("shared store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!(error = %self, "request failed");
        let body = Json(json!({ "error": self.to_string() }));
        (StatusCode::SERVICE_UNAVAILABLE, body).into_response()
    }
}

//! The HTTP-facing error surface.
//!
//! `playground-dispatcher` and `playground-runtime` report failures as the
//! closed [`JobError`] enum; this module translates that (plus a couple of
//! front-end-only failures) into a single `thiserror` enum with an
//! `IntoResponse` impl.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use playground_common::JobError;
use serde_json::json;

/// Everything that can go wrong while serving an HTTP request, translated
/// from a [`JobError`] or raised directly by the front-end.
#[derive(Debug, thiserror::Error)]
pub enum PlaygroundError {
    /// The submitted job failed; see [`JobError`] for the closed set of
    /// reasons.
    #[error(transparent)]
    Job(#[from] JobError),

    /// The dispatcher did not finish the job within the front-end's own
    /// wall-clock timeout. The dispatcher keeps running the job to
    /// completion in the background; runtime state stays consistent.
    #[error("request timed out waiting for the dispatcher")]
    Timeout,

    /// The request body could not be read (e.g. a connection error).
    #[error("failed to read request body: {0}")]
    BadBody(String),
}

impl IntoResponse for PlaygroundError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            PlaygroundError::Job(JobError::NotFound { path, .. }) => (
                StatusCode::NOT_FOUND,
                json!({ "error": "not found", "path": path }),
            ),
            PlaygroundError::Job(JobError::QueueFull) => {
                (StatusCode::SERVICE_UNAVAILABLE, json!({ "error": "queue full" }))
            }
            PlaygroundError::Job(JobError::ShuttingDown) => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({ "error": "server is shutting down" }),
            ),
            PlaygroundError::Job(JobError::Cancelled) => {
                (StatusCode::SERVICE_UNAVAILABLE, json!({ "error": "request was cancelled" }))
            }
            PlaygroundError::Job(err @ JobError::Script { .. }) => {
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": err.to_string() }))
            }
            PlaygroundError::Job(err @ JobError::Binding(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": err.to_string() }))
            }
            PlaygroundError::Job(err @ JobError::Timeout) => {
                (StatusCode::GATEWAY_TIMEOUT, json!({ "error": err.to_string() }))
            }
            PlaygroundError::Timeout => (StatusCode::GATEWAY_TIMEOUT, json!({ "error": "timeout" })),
            PlaygroundError::BadBody(message) => (StatusCode::BAD_REQUEST, json!({ "error": message })),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request did not succeed");
        }

        (status, Json(body)).into_response()
    }
}

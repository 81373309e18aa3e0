//! The `/v1/execute`, `/health`, and dynamic-router request handlers.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use playground_common::{HttpRequestData, HttpResponseOutcome, JobError};
use playground_dispatcher::DEFAULT_JOB_BUDGET;
use serde_json::json;
use tracing::instrument;

use crate::app::AppState;
use crate::error::PlaygroundError;

/// Carried on the response's extensions by [`dynamic`] so the request
/// logger can record which handler (if any) served the request without
/// re-deriving it from the registry itself.
#[derive(Clone)]
pub struct MatchedRoute(pub Option<String>);

/// `POST /v1/execute` — evaluate the request body as script source.
#[instrument(skip(state, body), level = "debug")]
pub async fn execute(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let source = String::from_utf8_lossy(&body).into_owned();

    match tokio::time::timeout(state.submit_timeout, state.dispatcher.eval_source(source, DEFAULT_JOB_BUDGET)).await {
        Ok(Ok(result)) => Json(json!({ "ok": true, "result": result })).into_response(),
        Ok(Err(JobError::Script { message, .. })) => {
            Json(json!({ "ok": false, "error": message })).into_response()
        }
        Ok(Err(err)) => PlaygroundError::Job(err).into_response(),
        Err(_) => PlaygroundError::Timeout.into_response(),
    }
}

/// `GET /health` — a liveness payload that never touches the dispatcher.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "uptimeSeconds": state.started_at.elapsed().as_secs_f64(),
    }))
}

/// The dynamic router's fallback: route and invoke whatever handler (or
/// legacy file registry entry) matches this request, via a single `Route`
/// job the dispatcher resolves and runs end to end.
#[instrument(skip(state, req_data), fields(method = %req_data.method, path = %req_data.path), level = "debug")]
pub async fn dynamic(State(state): State<Arc<AppState>>, Extension(req_data): Extension<HttpRequestData>) -> Response {
    match tokio::time::timeout(state.submit_timeout, state.dispatcher.route(req_data, DEFAULT_JOB_BUDGET)).await {
        Ok(Ok(outcome)) => outcome_to_response(outcome),
        Ok(Err(JobError::NotFound { path, .. })) => {
            let mut response = (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "not found", "path": path })),
            )
                .into_response();
            response.extensions_mut().insert(MatchedRoute(None));
            response
        }
        Ok(Err(err)) => {
            let mut response = PlaygroundError::Job(err).into_response();
            response.extensions_mut().insert(MatchedRoute(None));
            response
        }
        Err(_) => {
            let mut response = PlaygroundError::Timeout.into_response();
            response.extensions_mut().insert(MatchedRoute(None));
            response
        }
    }
}

fn outcome_to_response(outcome: HttpResponseOutcome) -> Response {
    let matched_route = outcome.matched_route;
    let mut builder = Response::builder().status(outcome.status);
    for (name, value) in &outcome.headers {
        builder = builder.header(name, value);
    }
    let mut response = builder
        .body(axum::body::Body::from(outcome.body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
    response.extensions_mut().insert(MatchedRoute(matched_route));
    response
}

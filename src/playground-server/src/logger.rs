//! Request-logging middleware for the dynamic router.
//!
//! Wraps every dynamic-route request: buffers and reinstalls the body so
//! downstream code sees exactly the bytes the client sent regardless of
//! whether the logger itself captured them, then records a
//! [`RequestRecord`] to the in-memory ring once the response is written.

use std::sync::Arc;
use std::time::{Instant, SystemTime};

use axum::body::Body;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use playground_common::RequestRecord;

use crate::app::AppState;
use crate::error::PlaygroundError;
use crate::handlers::MatchedRoute;
use crate::request_data;

/// Hard ceiling on how much of a request/response body this middleware
/// will hold in memory while buffering — independent of, and much larger
/// than, the logger's own capture ceiling (`AppState::body_ceiling`), which
/// only decides whether a body is *recorded*, not how much of it is read.
const MAX_BUFFERED_BYTES: usize = 64 * 1024 * 1024;

pub async fn request_logger(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    let start = Instant::now();
    let started_at = SystemTime::now();

    let (mut parts, body) = req.into_parts();
    let body_bytes = match axum::body::to_bytes(body, MAX_BUFFERED_BYTES).await {
        Ok(bytes) => bytes,
        Err(err) => return PlaygroundError::BadBody(err.to_string()).into_response(),
    };

    let req_data = request_data::build(&parts, body_bytes.clone());
    let captured_body = (body_bytes.len() <= state.body_ceiling).then(|| body_bytes.to_vec());

    parts.extensions.insert(req_data.clone());
    let reinstated = Request::from_parts(parts, Body::from(body_bytes));

    let response = next.run(reinstated).await;
    let (mut resp_parts, resp_body) = response.into_parts();
    let matched_route = resp_parts.extensions.remove::<MatchedRoute>().and_then(|m| m.0);

    let resp_bytes = axum::body::to_bytes(resp_body, MAX_BUFFERED_BYTES)
        .await
        .unwrap_or_default();

    state.ring.push(RequestRecord {
        method: req_data.method,
        path: req_data.path,
        query: req_data.query,
        headers: req_data.headers,
        cookies: req_data.cookies,
        client_ip: req_data.remote_addr,
        body: captured_body,
        started_at,
        duration: start.elapsed(),
        status: resp_parts.status.as_u16(),
        bytes_written: resp_bytes.len() as u64,
        handler_name: matched_route,
    });

    Response::from_parts(resp_parts, Body::from(resp_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::build_router;
    use axum::body::to_bytes;
    use axum::http::{Request as HttpRequest, StatusCode};
    use playground_dispatcher::Dispatcher;
    use playground_runtime::ScriptRuntime;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn test_state() -> (tempfile::TempDir, Arc<AppState>) {
        let dir = tempfile::tempdir().unwrap();
        let runtime = ScriptRuntime::new(&dir.path().join("test.sqlite")).unwrap();
        let dispatcher = Dispatcher::spawn(runtime, 16);
        let state = Arc::new(AppState {
            dispatcher,
            ring: Arc::new(playground_common::RequestRecordRing::new(64)),
            body_ceiling: 10 * 1024,
            submit_timeout: Duration::from_secs(5),
            started_at: Instant::now(),
        });
        (dir, state)
    }

    #[tokio::test]
    async fn body_is_reinstated_identically_for_downstream_handlers() {
        let (_dir, state) = test_state().await;
        state
            .dispatcher
            .eval_source(
                "app.post('/echo', (req, res) => res.json(req.body));".to_string(),
                Duration::from_secs(5),
            )
            .await
            .unwrap();

        let app = build_router(state);
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/echo")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"a":1,"b":"x"}"#))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value, serde_json::json!({"a": 1, "b": "x"}));
    }

    #[tokio::test]
    async fn oversized_body_is_not_captured_but_still_delivered() {
        let (_dir, state) = test_state().await;
        state
            .dispatcher
            .eval_source(
                "app.post('/len', (req, res) => res.json({len: req.body.length}));".to_string(),
                Duration::from_secs(5),
            )
            .await
            .unwrap();

        let app = build_router(state.clone());
        let big_body = "x".repeat(20 * 1024);
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/len")
            .body(Body::from(big_body.clone()))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["len"], serde_json::json!(big_body.len()));

        let snapshot = state.ring.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[0].body.is_none(), "oversized body should not be captured by the logger");
    }
}

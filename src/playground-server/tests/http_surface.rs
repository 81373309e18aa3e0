//! End-to-end exercises of the HTTP surface against an in-process router:
//! registration and invocation, path parameters, body fidelity under the
//! request logger, parameterised SQL, response idempotence, cross-evaluation
//! global state, handler replacement, and script-error isolation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use playground_common::RequestRecordRing;
use playground_dispatcher::Dispatcher;
use playground_runtime::ScriptRuntime;
use serde_json::{json, Value};
use tower::ServiceExt;

use playground_server::app;

async fn test_app() -> (tempfile::TempDir, Arc<app::AppState>) {
    let dir = tempfile::tempdir().unwrap();
    let runtime = ScriptRuntime::new(&dir.path().join("test.sqlite")).unwrap();
    let dispatcher = Dispatcher::spawn(runtime, 32);
    let state = Arc::new(app::AppState {
        dispatcher,
        ring: Arc::new(RequestRecordRing::new(64)),
        body_ceiling: 10 * 1024,
        submit_timeout: Duration::from_secs(5),
        started_at: Instant::now(),
    });
    (dir, state)
}

async fn eval(state: &app::AppState, source: &str) {
    state
        .dispatcher
        .eval_source(source.to_string(), Duration::from_secs(5))
        .await
        .unwrap();
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// register a handler, invoke it.
#[tokio::test]
async fn register_and_invoke_handler() {
    let (_dir, state) = test_app().await;
    eval(&state, "app.get('/hello', (req, res) => res.json({ greeting: 'hi' }));").await;

    let router = app::build_router(state);
    let response = router
        .oneshot(Request::builder().method("GET").uri("/hello").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({ "greeting": "hi" }));
}

/// path parameters are extracted verbatim; mismatched segment counts 404.
#[tokio::test]
async fn path_parameters_and_mismatched_segments_404() {
    let (_dir, state) = test_app().await;
    eval(&state, "app.get('/users/:id', (req, res) => res.json({ id: req.params.id }));").await;

    let router = app::build_router(state);
    let response = router
        .clone()
        .oneshot(Request::builder().method("GET").uri("/users/42").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({ "id": "42" }));

    let response = router
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/users/42/extra")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

/// JSON body round-trips through the request logger unchanged.
#[tokio::test]
async fn json_body_round_trip_under_logging() {
    let (_dir, state) = test_app().await;
    eval(&state, "app.post('/echo', (req, res) => res.json(JSON.parse(req.body)));").await;

    let router = app::build_router(state.clone());
    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/echo")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"n":7,"s":"hi"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({ "n": 7, "s": "hi" }));

    let snapshot = state.ring.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].body.as_deref(), Some(r#"{"n":7,"s":"hi"}"#.as_bytes()));
    assert_eq!(snapshot[0].handler_name.as_deref(), Some("POST /echo"));
}

/// parameterised SQL is safe against injection-shaped string values.
#[tokio::test]
async fn parameterised_sql_is_injection_safe() {
    let (_dir, state) = test_app().await;
    eval(&state, "db.exec('CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT)');").await;
    eval(
        &state,
        r#"app.post('/notes', (req, res) => {
            const body = JSON.parse(req.body).body;
            db.exec('INSERT INTO notes (body) VALUES (?)', body);
            res.json({ ok: true });
        });
        app.get('/notes/count', (req, res) => {
            const rows = db.query('SELECT COUNT(*) as n FROM notes');
            res.json({ n: rows[0].n });
        });"#,
    )
    .await;

    let payload = json!({ "body": "'; DROP TABLE notes; --" }).to_string();
    let router = app::build_router(state.clone());
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/notes")
                .header("content-type", "application/json")
                .body(Body::from(payload))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .oneshot(Request::builder().method("GET").uri("/notes/count").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(json_body(response).await, json!({ "n": 1 }), "row inserted as data, table survives");
}

/// the first terminal write wins; later writes produce no extra bytes.
#[tokio::test]
async fn response_end_idempotence() {
    let (_dir, state) = test_app().await;
    eval(
        &state,
        "app.get('/double', (req, res) => { res.json({ first: true }); res.json({ second: true }); });",
    )
    .await;

    let router = app::build_router(state);
    let response = router
        .oneshot(Request::builder().method("GET").uri("/double").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({ "first": true }));
}

/// `globalState` assignments persist across independent evaluations.
#[tokio::test]
async fn global_state_persists_across_evaluations() {
    let (_dir, state) = test_app().await;
    eval(&state, "globalState.counter = 1;").await;
    eval(&state, "globalState.counter += 1;").await;

    let result = state
        .dispatcher
        .eval_source("globalState.counter".to_string(), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(result, Some(json!(2)));
}

/// registering the same `(method, path)` again replaces the handler.
#[tokio::test]
async fn handler_replacement_on_reregistration() {
    let (_dir, state) = test_app().await;
    eval(&state, "app.get('/version', (req, res) => res.json({ v: 1 }));").await;
    eval(&state, "app.get('/version', (req, res) => res.json({ v: 2 }));").await;

    let router = app::build_router(state);
    let response = router
        .oneshot(Request::builder().method("GET").uri("/version").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(json_body(response).await, json!({ "v": 2 }));
}

/// a throwing handler is isolated; the dispatcher keeps serving other routes.
#[tokio::test]
async fn script_error_is_isolated() {
    let (_dir, state) = test_app().await;
    eval(&state, "app.get('/boom', (req, res) => { throw new Error('kaboom'); });").await;
    eval(&state, "app.get('/ok', (req, res) => res.json({ ok: true }));").await;

    let router = app::build_router(state);
    let response = router
        .clone()
        .oneshot(Request::builder().method("GET").uri("/boom").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let response = router
        .oneshot(Request::builder().method("GET").uri("/ok").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({ "ok": true }));
}

/// `/health` and `/v1/execute` bypass the request logger and dispatcher
/// route resolution entirely.
#[tokio::test]
async fn health_and_execute_bypass_the_dynamic_router() {
    let (_dir, state) = test_app().await;
    let router = app::build_router(state.clone());

    let response = router
        .clone()
        .oneshot(Request::builder().method("GET").uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], json!("ok"));

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/execute")
                .body(Body::from("1 + 1"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({ "ok": true, "result": 2 }));

    assert!(state.ring.is_empty(), "request logger should not see /health or /v1/execute");
}

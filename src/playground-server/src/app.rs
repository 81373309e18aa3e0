//! Assembles the Axum application: state shared across handlers, and the
//! router that keeps `/v1/execute` and `/health` outside the request
//! logger's scope while routing everything else through it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::routing::{get, post};
use axum::Router;
use playground_common::RequestRecordRing;
use playground_dispatcher::Dispatcher;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::logger::request_logger;

/// Default ceiling (in bytes) on how much of a request body the request
/// logger will retain in a published [`playground_common::RequestRecord`].
pub const DEFAULT_BODY_CEILING: usize = 10 * 1024;

/// Default wall-clock timeout the HTTP front-end itself applies on top of
/// a job's own execution budget, before giving up and returning 504 while
/// the dispatcher keeps running the job in the background.
pub const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default capacity of the request-record ring buffer.
pub const DEFAULT_RING_CAPACITY: usize = 1024;

/// State shared by every handler: the dispatcher handle, the request-record
/// ring, and the knobs the request logger and front-end timeouts read.
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub ring: Arc<RequestRecordRing>,
    pub body_ceiling: usize,
    pub submit_timeout: Duration,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher) -> Self {
        AppState {
            dispatcher,
            ring: Arc::new(RequestRecordRing::new(DEFAULT_RING_CAPACITY)),
            body_ceiling: DEFAULT_BODY_CEILING,
            submit_timeout: DEFAULT_SUBMIT_TIMEOUT,
            started_at: Instant::now(),
        }
    }
}

/// Build the full application router: `/v1/execute` and `/health` are
/// handled directly; every other `(method, path)` falls through to the
/// dynamic router, which alone is wrapped by the request-logging
/// middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    let dynamic_router = Router::new()
        .fallback(handlers::dynamic)
        .layer(axum::middleware::from_fn_with_state(state.clone(), request_logger))
        .with_state(state.clone());

    Router::new()
        .route("/v1/execute", post(handlers::execute))
        .route("/health", get(handlers::health))
        .fallback_service(dynamic_router)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

//! The single-consumer dispatcher that serialises all access to the
//! playground's JavaScript runtime.
//!
//! Many HTTP tasks submit [`Job`]s through a bounded queue; exactly one
//! dedicated OS thread ever touches the [`playground_runtime::ScriptRuntime`]
//! the dispatcher owns — the runtime is not `Send`-safe across arbitrary
//! threads, so it is moved onto this thread once at construction and never
//! leaves it: one script interaction at a time, queued.

mod job;
mod monitor;

pub use job::{CancellationToken, Job, JobResult, DEFAULT_JOB_BUDGET};

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use playground_common::{HttpRequestData, HttpResponseOutcome, JobError};
use playground_runtime::ScriptRuntime;
use tokio::sync::{mpsc, oneshot};
use tracing::instrument;

/// Handle to the dispatcher's job queue and dedicated runtime thread.
///
/// Cheaply `Clone`-able: every clone shares the same underlying queue, so
/// `playground-server` can hand a clone to every Axum handler without
/// wrapping it in an `Arc` itself.
#[derive(Clone)]
pub struct Dispatcher {
    sender: mpsc::Sender<Job>,
    closed: Arc<AtomicBool>,
}

impl Dispatcher {
    /// Spawn the dispatcher's dedicated OS thread, moving `runtime` onto it
    /// for the lifetime of the process.
    ///
    /// `queue_capacity` bounds the job queue; submissions past that bound
    /// fail immediately with [`JobError::QueueFull`] rather than blocking —
    /// this is what lets the HTTP front-end turn back-pressure into a 503
    /// instead of piling up blocked tasks.
    #[instrument(skip(runtime), level = "info")]
    pub fn spawn(runtime: ScriptRuntime, queue_capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        let closed = Arc::new(AtomicBool::new(false));

        std::thread::Builder::new()
            .name("playground-dispatcher".to_string())
            .spawn(move || run(runtime, receiver))
            .expect("spawning dispatcher thread");

        Dispatcher { sender, closed }
    }

    /// Submit a source evaluation (the `/v1/execute` request body) and await
    /// its result.
    #[instrument(skip(self, source), level = "debug")]
    pub async fn eval_source(&self, source: String, budget: Duration) -> JobResult<Option<serde_json::Value>> {
        let (completion, rx) = oneshot::channel();
        self.enqueue(Job::EvalSource {
            source,
            budget,
            token: CancellationToken::new(),
            completion,
        })?;
        rx.await.unwrap_or(Err(JobError::ShuttingDown))
    }

    /// Submit a routing job — resolve the matching handler (or file
    /// registry entry) and invoke it — and await its result.
    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path), level = "debug")]
    pub async fn route(&self, request: HttpRequestData, budget: Duration) -> JobResult<HttpResponseOutcome> {
        let (completion, rx) = oneshot::channel();
        self.enqueue(Job::Route {
            request,
            budget,
            token: CancellationToken::new(),
            completion,
        })?;
        rx.await.unwrap_or(Err(JobError::ShuttingDown))
    }

    /// Stop accepting new submissions. Jobs already queued still run to
    /// completion; the dispatcher thread exits once every sender (including
    /// this handle's clones) is dropped and the queue drains.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn enqueue(&self, job: Job) -> Result<(), JobError> {
        if self.closed.load(Ordering::SeqCst) {
            job.fail(JobError::ShuttingDown);
            return Err(JobError::ShuttingDown);
        }

        match self.sender.try_send(job) {
            Ok(()) => {
                let depth = self.sender.max_capacity() - self.sender.capacity();
                monitor::record_queue_depth(depth);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(job)) => {
                monitor::record_queue_rejected();
                job.fail(JobError::QueueFull);
                Err(JobError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                job.fail(JobError::ShuttingDown);
                Err(JobError::ShuttingDown)
            }
        }
    }
}

/// The dispatcher's job loop: blocking-receive a job, run it to completion
/// under a wall-clock deadline and panic guard, fire its completion, repeat.
/// Exits once every [`Dispatcher`] handle has been dropped and the queue
/// drains, which is the clean-shutdown path.
fn run(mut runtime: ScriptRuntime, mut receiver: mpsc::Receiver<Job>) {
    while let Some(job) = receiver.blocking_recv() {
        if job.token().is_cancelled() {
            job.fail(JobError::Cancelled);
            continue;
        }

        run_one(&mut runtime, job);
    }

    tracing::info!("dispatcher job loop exiting, queue drained");
}

/// Run a single job against `runtime`, firing its completion channel
/// exactly once. A `catch_unwind` boundary around the script call protects
/// the loop from a binding bug panicking: the panic is reported to the
/// submitter as a `Script` error and the loop continues with the next job;
/// runtime state beyond the failed job is left untouched.
fn run_one(runtime: &mut ScriptRuntime, job: Job) {
    let label = job.label();
    let budget = job.budget();
    let mut metrics_guard = monitor::JobMetricsGuard::start(&job);

    let started = Instant::now();
    runtime.set_deadline(Some(started + budget));

    match job {
        Job::EvalSource { source, completion, .. } => {
            let result = catch_unwind(AssertUnwindSafe(|| runtime.eval_source(&source)))
                .unwrap_or_else(|panic| Err(panic_error(&label, panic)));
            finish(runtime, started, budget, result.is_err(), &mut metrics_guard);
            let _ = completion.send(result);
        }
        Job::Route { request, completion, .. } => {
            let result = catch_unwind(AssertUnwindSafe(|| runtime.route(request)))
                .unwrap_or_else(|panic| Err(panic_error(&label, panic)));
            finish(runtime, started, budget, result.is_err(), &mut metrics_guard);
            let _ = completion.send(result);
        }
    }
}

fn finish(
    runtime: &mut ScriptRuntime,
    started: Instant,
    budget: Duration,
    failed: bool,
    metrics_guard: &mut monitor::JobMetricsGuard,
) {
    runtime.set_deadline(None);
    if failed {
        metrics_guard.mark_failed();
    }
    if started.elapsed() >= budget {
        monitor::record_wall_clock_termination();
    }
}

fn panic_error(label: &str, panic: Box<dyn Any + Send>) -> JobError {
    let message = panic_message(&panic);
    tracing::error!(job = %label, error = %message, "dispatcher job panicked");
    JobError::Script { message, stack: None }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "dispatcher job panicked with a non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher() -> (tempfile::TempDir, Dispatcher) {
        let dir = tempfile::tempdir().unwrap();
        let runtime = ScriptRuntime::new(&dir.path().join("test.sqlite")).unwrap();
        (dir, Dispatcher::spawn(runtime, 8))
    }

    #[tokio::test]
    async fn eval_source_round_trips_through_the_queue() {
        let (_dir, dispatcher) = dispatcher();
        let result = dispatcher
            .eval_source("1 + 41".to_string(), DEFAULT_JOB_BUDGET)
            .await
            .unwrap();
        assert_eq!(result, Some(serde_json::json!(42)));
    }

    #[tokio::test]
    async fn jobs_complete_in_submission_order() {
        let (_dir, dispatcher) = dispatcher();
        dispatcher
            .eval_source("globalState.order = []".to_string(), DEFAULT_JOB_BUDGET)
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..10 {
            let dispatcher = dispatcher.clone();
            handles.push(tokio::spawn(async move {
                dispatcher
                    .eval_source(format!("globalState.order.push({i})"), DEFAULT_JOB_BUDGET)
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let result = dispatcher
            .eval_source("globalState.order".to_string(), DEFAULT_JOB_BUDGET)
            .await
            .unwrap();
        assert_eq!(result, Some(serde_json::json!((0..10).collect::<Vec<_>>())));
    }

    #[tokio::test]
    async fn script_error_does_not_stop_the_dispatcher() {
        let (_dir, dispatcher) = dispatcher();
        let err = dispatcher
            .eval_source("throw new Error('boom')".to_string(), DEFAULT_JOB_BUDGET)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Script { .. }));

        let result = dispatcher.eval_source("1 + 1".to_string(), DEFAULT_JOB_BUDGET).await.unwrap();
        assert_eq!(result, Some(serde_json::json!(2)));
    }

    #[tokio::test]
    async fn queue_full_is_reported_without_blocking() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = ScriptRuntime::new(&dir.path().join("test.sqlite")).unwrap();
        let dispatcher = Dispatcher::spawn(runtime, 1);

        // Fire off enough concurrent submissions that at least one lands
        // while the queue is still at capacity.
        let mut handles = Vec::new();
        for _ in 0..32 {
            let dispatcher = dispatcher.clone();
            handles.push(tokio::spawn(async move {
                dispatcher.eval_source("1".to_string(), DEFAULT_JOB_BUDGET).await
            }));
        }

        let mut saw_queue_full = false;
        for handle in handles {
            if let Err(JobError::QueueFull) = handle.await.unwrap() {
                saw_queue_full = true;
            }
        }
        assert!(saw_queue_full, "expected at least one QueueFull rejection under load");
    }

    #[tokio::test]
    async fn shutdown_rejects_new_submissions() {
        let (_dir, dispatcher) = dispatcher();
        dispatcher.shutdown();
        let err = dispatcher
            .eval_source("1".to_string(), DEFAULT_JOB_BUDGET)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::ShuttingDown));
    }
}

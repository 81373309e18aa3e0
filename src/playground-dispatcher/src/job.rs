use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use playground_common::{HttpRequestData, HttpResponseOutcome, JobError};
use tokio::sync::oneshot;

/// Default wall-clock budget for a single `EvalSource` or `Route` job.
pub const DEFAULT_JOB_BUDGET: Duration = Duration::from_secs(10);

/// A single-use cancellation flag shared between a job's submitter and the
/// dispatcher. Submitters may cancel before the dispatcher dequeues a job;
/// once execution has begun, the token instead arms the wall-clock
/// interrupt budget (see [`crate::monitor`]).
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Create a fresh, not-yet-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the associated job as cancelled.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether the associated job has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What the submitter gets back once the dispatcher finishes the job.
pub type JobResult<T> = Result<T, JobError>;

/// A unit of work submitted to the dispatcher.
///
/// Each variant carries a completion channel; the dispatcher fires it
/// exactly once, whether the job ran, was skipped as cancelled, or panicked.
pub enum Job {
    /// Evaluate a source submission (the `/v1/execute` request body).
    EvalSource {
        /// Script source to evaluate.
        source: String,
        /// Wall-clock budget for this evaluation.
        budget: Duration,
        /// Cancellation token the submitter may trip before the dispatcher
        /// dequeues this job.
        token: CancellationToken,
        /// Fired with the wrapped expression's JSON value, if any.
        completion: oneshot::Sender<JobResult<Option<serde_json::Value>>>,
    },
    /// Resolve and invoke a handler (or the legacy file registry) for an
    /// incoming HTTP request.
    Route {
        /// The request to route.
        request: HttpRequestData,
        /// Wall-clock budget for handler execution.
        budget: Duration,
        /// Cancellation token the submitter may trip before the dispatcher
        /// dequeues this job.
        token: CancellationToken,
        /// Fired with the resulting HTTP outcome.
        completion: oneshot::Sender<JobResult<HttpResponseOutcome>>,
    },
}

impl Job {
    /// The wall-clock budget configured for this job.
    pub fn budget(&self) -> Duration {
        match self {
            Job::EvalSource { budget, .. } => *budget,
            Job::Route { budget, .. } => *budget,
        }
    }

    /// The job's cancellation token.
    pub fn token(&self) -> &CancellationToken {
        match self {
            Job::EvalSource { token, .. } => token,
            Job::Route { token, .. } => token,
        }
    }

    /// A short label for logging (`"eval"` or `"route GET /path"`).
    pub fn label(&self) -> String {
        match self {
            Job::EvalSource { .. } => "eval".to_string(),
            Job::Route { request, .. } => format!("route {} {}", request.method, request.path),
        }
    }

    /// Fire the job's completion channel with a terminal error, used when a
    /// job is skipped (cancelled) or the dispatcher panics while running it.
    pub fn fail(self, error: JobError) {
        match self {
            Job::EvalSource { completion, .. } => {
                let _ = completion.send(Err(error));
            }
            Job::Route { completion, .. } => {
                let _ = completion.send(Err(error));
            }
        }
    }
}

//! Dispatcher-side metrics: job throughput and latency are tracked with an
//! RAII guard, queue back-pressure and wall-clock terminations with plain
//! counters.

use std::time::Instant;

use crate::job::Job;

static METRIC_JOBS_TOTAL: &str = "dispatcher_jobs_total";
static METRIC_JOBS_FAILED_TOTAL: &str = "dispatcher_jobs_failed_total";
static METRIC_QUEUE_REJECTED_TOTAL: &str = "dispatcher_queue_rejected_total";
static METRIC_QUEUE_DEPTH: &str = "dispatcher_queue_depth";
static METRIC_JOB_DURATION: &str = "dispatcher_job_duration_microseconds";
static METRIC_JOB_KIND_LABEL: &str = "job_kind";
static METRIC_WALL_CLOCK_TERMINATIONS_TOTAL: &str = "dispatcher_wall_clock_terminations_total";

/// A submission rejected because the bounded queue was full.
pub(crate) fn record_queue_rejected() {
    metrics::counter!(METRIC_QUEUE_REJECTED_TOTAL).increment(1);
}

/// Current occupied depth of the job queue, sampled on every submission.
pub(crate) fn record_queue_depth(depth: usize) {
    metrics::gauge!(METRIC_QUEUE_DEPTH).set(depth as f64);
}

/// A job whose execution ran past its configured wall-clock budget, whether
/// or not the interrupt actually produced a script-visible error.
pub(crate) fn record_wall_clock_termination() {
    metrics::counter!(METRIC_WALL_CLOCK_TERMINATIONS_TOTAL).increment(1);
}

fn job_kind(job: &Job) -> &'static str {
    match job {
        Job::EvalSource { .. } => "eval",
        Job::Route { .. } => "route",
    }
}

/// RAII guard spanning one job's execution on the dispatcher thread,
/// recording throughput and latency when it finishes.
pub(crate) struct JobMetricsGuard {
    kind: &'static str,
    start: Instant,
    failed: bool,
}

impl JobMetricsGuard {
    pub(crate) fn start(job: &Job) -> Self {
        JobMetricsGuard {
            kind: job_kind(job),
            start: Instant::now(),
            failed: false,
        }
    }

    /// Mark this job's outcome as a failure (script error or caught panic).
    pub(crate) fn mark_failed(&mut self) {
        self.failed = true;
    }
}

impl Drop for JobMetricsGuard {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        metrics::histogram!(METRIC_JOB_DURATION, METRIC_JOB_KIND_LABEL => self.kind)
            .record(duration.as_micros() as f64);
        metrics::counter!(METRIC_JOBS_TOTAL, METRIC_JOB_KIND_LABEL => self.kind).increment(1);
        if self.failed {
            metrics::counter!(METRIC_JOBS_FAILED_TOTAL, METRIC_JOB_KIND_LABEL => self.kind).increment(1);
        }
    }
}

use crate::http::status;

/// The closed set of ways a submitted job can fail to produce a normal
/// response, mirrored 1:1 onto HTTP status codes at the front-end.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobError {
    /// A script threw, or the dispatcher caught a panic while running it.
    #[error("script error: {message}")]
    Script {
        /// The exception message, or the panic payload if the dispatcher
        /// recovered from a panic.
        message: String,
        /// Stack trace, if the engine provided one.
        stack: Option<String>,
    },

    /// A sandbox binding (e.g. the SQL binding) failed.
    #[error("binding error: {0}")]
    Binding(String),

    /// The dispatcher's bounded queue was full at submission time.
    #[error("dispatcher queue is full")]
    QueueFull,

    /// The submitter's wall-clock budget elapsed before the dispatcher
    /// produced a result. The job itself may still complete later.
    #[error("job timed out")]
    Timeout,

    /// The job was cancelled before the dispatcher began it.
    #[error("job was cancelled")]
    Cancelled,

    /// No registered handler or file matched the request.
    #[error("no route matched {method} {path}")]
    NotFound {
        /// Upper-case HTTP method of the unmatched request.
        method: String,
        /// Path of the unmatched request.
        path: String,
    },

    /// The dispatcher is shutting down and no longer accepts jobs.
    #[error("dispatcher is shutting down")]
    ShuttingDown,
}

impl JobError {
    /// The HTTP status this error kind maps to at the front-end.
    pub fn status_code(&self) -> u16 {
        match self {
            JobError::Script { .. } => status::INTERNAL_SERVER_ERROR,
            JobError::Binding(_) => status::INTERNAL_SERVER_ERROR,
            JobError::QueueFull => status::SERVICE_UNAVAILABLE,
            JobError::Timeout => status::GATEWAY_TIMEOUT,
            JobError::Cancelled => status::SERVICE_UNAVAILABLE,
            JobError::NotFound { .. } => status::NOT_FOUND,
            JobError::ShuttingDown => status::SERVICE_UNAVAILABLE,
        }
    }
}

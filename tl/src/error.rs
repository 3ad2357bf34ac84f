//! Error types for limiter admission, execution and scheduling

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced to callers through a job handle or a constructor
#[derive(Debug, Error)]
pub enum LimiterError {
    #[error("Invalid configuration: {0}")]
    Validation(String),

    #[error("Queue is full, job {job_id} was dropped")]
    Overflow { job_id: String },

    #[error("Limiter is blocked, retry after {retry_after:?}")]
    Blocked { retry_after: Duration },

    #[error("Limiter is stopped")]
    Stopped,

    #[error("Job {job_id} was cancelled")]
    Cancelled { job_id: String },

    #[error("Attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("Gave up after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<LimiterError>,
    },

    #[error("Group finished with {} failed member(s), {succeeded} succeeded", failures.len())]
    PartialFailure { succeeded: usize, failures: Vec<String> },

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error("Unknown resource: {0}")]
    UnknownResource(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LimiterError {
    /// Check if this error was raised at admission time (before any attempt ran)
    pub fn is_admission(&self) -> bool {
        matches!(
            self,
            LimiterError::Validation(_)
                | LimiterError::Overflow { .. }
                | LimiterError::Blocked { .. }
                | LimiterError::Stopped
                | LimiterError::UnknownResource(_)
        )
    }

    /// Check if an attempt that ended with this error may be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            LimiterError::Timeout(_) => true,
            LimiterError::Task(err) => err.is_retryable(),
            _ => false,
        }
    }

    /// Shorthand for building a validation error
    pub fn invalid(message: impl Into<String>) -> Self {
        LimiterError::Validation(message.into())
    }
}

/// Errors returned by a task step
///
/// Steps usually work in `eyre::Result` and let `?` convert the report into
/// a transient error. Wrap it in [`TaskError::Fatal`] to skip the remaining
/// retries.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("{0}")]
    Transient(eyre::Report),

    #[error("{0}")]
    Fatal(eyre::Report),
}

impl TaskError {
    /// Build a fatal error from anything displayable
    pub fn fatal(message: impl std::fmt::Display) -> Self {
        TaskError::Fatal(eyre::eyre!("{}", message))
    }

    /// Build a transient error from anything displayable
    pub fn transient(message: impl std::fmt::Display) -> Self {
        TaskError::Transient(eyre::eyre!("{}", message))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskError::Transient(_))
    }
}

impl From<eyre::Report> for TaskError {
    fn from(report: eyre::Report) -> Self {
        TaskError::Transient(report)
    }
}

//! JobHandle - caller side of a submitted job

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::LimiterError;
use crate::task::TaskOutput;

/// Resolves to the job's output once it settles
///
/// Dropping the handle detaches the job; it keeps its place in the queue and
/// runs to completion. Call [`JobHandle::cancel`] to withdraw it.
pub struct JobHandle<T> {
    job_id: String,
    cancel: CancellationToken,
    join: JoinHandle<Result<TaskOutput<T>, LimiterError>>,
}

impl<T> JobHandle<T> {
    pub(crate) fn new(
        job_id: String,
        cancel: CancellationToken,
        join: JoinHandle<Result<TaskOutput<T>, LimiterError>>,
    ) -> Self {
        Self { job_id, cancel, join }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Withdraw the job
    ///
    /// A queued job leaves the queue; a running attempt is dropped and its
    /// slot released. Either way the handle resolves to `Cancelled`.
    pub fn cancel(&self) {
        debug!(job_id = %self.job_id, "JobHandle::cancel: called");
        self.cancel.cancel();
    }

    /// Token that cancels this job when triggered
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

impl<T> std::fmt::Debug for JobHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("job_id", &self.job_id)
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl<T> Future for JobHandle<T> {
    type Output = Result<TaskOutput<T>, LimiterError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.join).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(e)) if e.is_cancelled() => Poll::Ready(Err(LimiterError::Cancelled {
                job_id: this.job_id.clone(),
            })),
            Poll::Ready(Err(e)) => Poll::Ready(Err(LimiterError::Internal(format!(
                "job {} panicked: {}",
                this.job_id, e
            )))),
            Poll::Pending => Poll::Pending,
        }
    }
}

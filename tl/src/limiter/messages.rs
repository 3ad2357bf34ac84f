//! Messages between limiter handles, job drivers and the dispatch loop

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::LimiterError;

/// Reply to a queued ticket: a slot, or the reason it will never get one
pub(crate) type Grant = Result<SlotPermit, LimiterError>;

/// A job attempt waiting in the queue
#[derive(Debug)]
pub(crate) struct Ticket {
    pub id: u64,
    pub job_id: String,
    pub weight: u32,
    /// Attempt this ticket will run, starting at 1
    pub attempt: u32,
    pub grant: oneshot::Sender<Grant>,
}

impl Ticket {
    /// Re-queued after a failed attempt
    pub fn is_retry(&self) -> bool {
        self.attempt > 1
    }
}

/// Requests handled by the dispatch loop
#[derive(Debug)]
pub(crate) enum Command {
    Enqueue { priority: i32, ticket: Ticket },
    Cancel { ticket_id: u64 },
    Release,
    Start,
    Stop { drop_waiting_jobs: bool },
}

/// A dispatched slot; dropping it frees the slot
///
/// Every path out of an attempt (success, failure, cancellation, panic)
/// drops the permit, so the running count is decremented exactly once.
#[derive(Debug)]
pub(crate) struct SlotPermit {
    tx: Option<mpsc::UnboundedSender<Command>>,
}

impl SlotPermit {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Command>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Give the slot back without sending a release (the dispatch loop
    /// reclaims it directly)
    pub(crate) fn disarm(mut self) {
        self.tx = None;
    }
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            debug!("SlotPermit::drop: releasing slot");
            // Limiter already gone is fine
            let _ = tx.send(Command::Release);
        }
    }
}

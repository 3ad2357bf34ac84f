//! Dispatch loop
//!
//! One task per limiter owns the queue, the token bucket, the running count
//! and the delay gate. It handles one command at a time and runs the
//! dispatch cycle after each command, refill tick or delay expiry, so the
//! cycle never re-enters itself and no lock guards this state.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::messages::{Command, SlotPermit, Ticket};
use super::state::{LimiterCounts, LimiterState, StatsCounters};
use crate::config::{LimiterOptions, OverflowStrategy};
use crate::error::LimiterError;
use crate::events::{EventBus, LimiterEvent};
use crate::queue::{PriorityQueue, TokenBucket};

/// Whether and how the limiter was stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shutdown {
    /// Keep dispatching what is queued, refuse new jobs
    Drain,
    /// Queued jobs were rejected, refuse everything
    Drop,
}

pub(crate) struct Dispatcher {
    options: LimiterOptions,
    queue: PriorityQueue<Ticket>,
    bucket: TokenBucket,
    running: usize,
    started: bool,
    shutdown: Option<Shutdown>,
    /// No dispatch before this instant
    next_dispatch_at: Option<Instant>,
    /// `Block` penalty end
    blocked_until: Option<Instant>,
    state: LimiterState,
    bus: EventBus,
    stats: Arc<StatsCounters>,
    counts_tx: watch::Sender<LimiterCounts>,
    /// Weak so the loop ends once every handle, driver and permit is gone
    self_tx: mpsc::WeakUnboundedSender<Command>,
}

impl Dispatcher {
    pub fn new(
        options: LimiterOptions,
        bus: EventBus,
        stats: Arc<StatsCounters>,
        counts_tx: watch::Sender<LimiterCounts>,
        self_tx: mpsc::WeakUnboundedSender<Command>,
    ) -> Self {
        let bucket = TokenBucket::new(options.bucket_size, options.tokens_per_interval);
        Self {
            options,
            queue: PriorityQueue::new(),
            bucket,
            running: 0,
            started: false,
            shutdown: None,
            next_dispatch_at: None,
            blocked_until: None,
            state: LimiterState::Stopped,
            bus,
            stats,
            counts_tx,
            self_tx,
        }
    }

    /// Run until every sender is dropped
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        let period = self.options.interval().max(std::time::Duration::from_millis(1));
        let mut refill = tokio::time::interval_at(Instant::now() + period, period);
        refill.set_missed_tick_behavior(MissedTickBehavior::Delay);

        if self.options.auto_start {
            self.start();
        }
        self.publish();
        info!(concurrency = self.options.concurrency, "Limiter dispatch loop started");

        loop {
            let wake = self.next_wakeup();
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(cmd) => self.handle(cmd),
                    None => break,
                },
                _ = refill.tick(), if self.bucket.is_enabled() => {
                    self.bucket.refill();
                    debug!(tokens = self.bucket.tokens(), "Dispatcher::run: bucket refilled");
                }
                _ = tokio::time::sleep_until(wake.unwrap_or_else(Instant::now)), if wake.is_some() => {
                    debug!("Dispatcher::run: delay elapsed");
                }
            }
            self.dispatch();
        }

        info!("Limiter dispatch loop stopped");
    }

    /// When the loop must wake up to dispatch, if nothing else wakes it
    fn next_wakeup(&self) -> Option<Instant> {
        if self.queue.is_empty() || self.running >= self.options.concurrency {
            return None;
        }
        self.next_dispatch_at.filter(|at| *at > Instant::now())
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Enqueue { priority, ticket } => self.enqueue(priority, ticket),
            Command::Cancel { ticket_id } => self.cancel(ticket_id),
            Command::Release => self.release(),
            Command::Start => self.start(),
            Command::Stop { drop_waiting_jobs } => self.stop(drop_waiting_jobs),
        }
    }

    fn enqueue(&mut self, priority: i32, ticket: Ticket) {
        debug!(job_id = %ticket.job_id, priority, attempt = ticket.attempt, "Dispatcher::enqueue: called");

        // Draining still admits retries of jobs that were already accepted
        let shutdown = self.shutdown;
        match shutdown {
            Some(Shutdown::Drop) => return self.reject(ticket, LimiterError::Stopped),
            Some(Shutdown::Drain) if !ticket.is_retry() => return self.reject(ticket, LimiterError::Stopped),
            _ => {}
        }

        // A retry was admitted with its first attempt; it skips the block window and the high-water mark
        if ticket.is_retry() {
            self.queue.insert(priority, ticket);
            self.stats.record_requeued(self.queue.len());
            return;
        }

        let now = Instant::now();
        if let Some(until) = self.blocked_until {
            if now < until {
                return self.reject(ticket, LimiterError::Blocked { retry_after: until - now });
            }
            self.blocked_until = None;
        }

        let full = self.options.high_water.is_some_and(|hw| self.queue.len() >= hw);
        if full {
            let strategy = self.options.strategy;
            match strategy {
                OverflowStrategy::Leak => {
                    // Queued retries are never evicted
                    let oldest = self.queue.iter().find(|e| !e.item.is_retry()).map(|e| e.seq);
                    match oldest.and_then(|seq| self.queue.remove(seq)) {
                        Some(front) => {
                            let job_id = front.item.job_id.clone();
                            self.drop_queued(front.item, LimiterError::Overflow { job_id });
                        }
                        None => {
                            let job_id = ticket.job_id.clone();
                            return self.reject(ticket, LimiterError::Overflow { job_id });
                        }
                    }
                }
                OverflowStrategy::OverflowPriority => {
                    let least_urgent = self
                        .queue
                        .iter()
                        .filter(|e| !e.item.is_retry())
                        .last()
                        .map(|e| (e.seq, e.priority));
                    match least_urgent {
                        Some((seq, back)) if priority < back => {
                            if let Some(back) = self.queue.remove(seq) {
                                let job_id = back.item.job_id.clone();
                                self.drop_queued(back.item, LimiterError::Overflow { job_id });
                            }
                        }
                        _ => {
                            let job_id = ticket.job_id.clone();
                            return self.reject(ticket, LimiterError::Overflow { job_id });
                        }
                    }
                }
                OverflowStrategy::Overflow => {
                    let job_id = ticket.job_id.clone();
                    return self.reject(ticket, LimiterError::Overflow { job_id });
                }
                OverflowStrategy::Block => {
                    let penalty = self.options.penalty();
                    self.blocked_until = Some(now + penalty);
                    warn!(?penalty, "Limiter queue full, blocking submissions");
                    return self.reject(ticket, LimiterError::Blocked { retry_after: penalty });
                }
            }
        }

        let job_id = ticket.job_id.clone();
        self.queue.insert(priority, ticket);
        let queued = self.queue.len();
        self.stats.record_submitted(queued);
        self.bus.emit(LimiterEvent::Submitted {
            job_id,
            priority,
            queued,
        });
    }

    /// Refuse a ticket that never entered the queue
    fn reject(&mut self, ticket: Ticket, error: LimiterError) {
        debug!(job_id = %ticket.job_id, %error, "Dispatcher::reject: called");
        self.stats.record_rejected();
        self.emit_dropped(&ticket, error.to_string());
        let _ = ticket.grant.send(Err(error));
    }

    /// Remove a ticket that was already queued
    fn drop_queued(&mut self, ticket: Ticket, error: LimiterError) {
        debug!(job_id = %ticket.job_id, %error, "Dispatcher::drop_queued: called");
        self.stats.record_dropped();
        self.emit_dropped(&ticket, error.to_string());
        let _ = ticket.grant.send(Err(error));
    }

    /// Report a ticket that left without a slot
    ///
    /// A retry's job already ran, so its driver reports the end with `Error`.
    fn emit_dropped(&self, ticket: &Ticket, reason: String) {
        if !ticket.is_retry() {
            self.bus.emit(LimiterEvent::Dropped {
                job_id: ticket.job_id.clone(),
                reason,
            });
        }
    }

    fn cancel(&mut self, ticket_id: u64) {
        let seq = self.queue.iter().find(|e| e.item.id == ticket_id).map(|e| e.seq);
        match seq.and_then(|seq| self.queue.remove(seq)) {
            Some(entry) => {
                debug!(job_id = %entry.item.job_id, "Dispatcher::cancel: removed from queue");
                self.stats.record_dropped();
                self.emit_dropped(&entry.item, "cancelled".to_string());
            }
            None => debug!(ticket_id, "Dispatcher::cancel: not queued"),
        }
    }

    fn release(&mut self) {
        let was_saturated = self.running >= self.options.concurrency;
        self.running = self.running.saturating_sub(1);
        debug!(running = self.running, was_saturated, "Dispatcher::release: called");

        // Gap after a completion when the limiter was full (always true with concurrency 1)
        if was_saturated {
            self.open_gate_after_delay();
        }
    }

    fn start(&mut self) {
        if self.started && self.shutdown.is_none() {
            debug!("Dispatcher::start: already running");
            return;
        }
        self.set_state(LimiterState::Starting);
        self.started = true;
        self.shutdown = None;
        self.set_state(self.compute_state());
    }

    fn stop(&mut self, drop_waiting_jobs: bool) {
        info!(drop_waiting_jobs, queued = self.queue.len(), "Limiter stopping");
        if drop_waiting_jobs {
            self.shutdown = Some(Shutdown::Drop);
            let dropped: Vec<_> = self.queue.drain().collect();
            for entry in dropped {
                self.drop_queued(entry.item, LimiterError::Stopped);
            }
        } else {
            self.shutdown = Some(Shutdown::Drain);
        }
        self.set_state(LimiterState::Stopped);
    }

    fn open_gate_after_delay(&mut self) {
        let delay = self.options.delay();
        if !delay.is_zero() {
            let at = Instant::now() + delay;
            self.next_dispatch_at = Some(self.next_dispatch_at.map_or(at, |current| current.max(at)));
        }
    }

    /// Hand out slots while every constraint allows it
    fn dispatch(&mut self) {
        if self.started && self.shutdown != Some(Shutdown::Drop) {
            while self.running < self.options.concurrency {
                if self.next_dispatch_at.is_some_and(|at| Instant::now() < at) {
                    break;
                }
                let weight = match self.queue.peek() {
                    Some(head) => head.item.weight,
                    None => break,
                };
                if !self.bucket.try_consume(weight) {
                    break;
                }
                let Some(tx) = self.self_tx.upgrade() else {
                    break;
                };
                let Some(entry) = self.queue.pop() else {
                    break;
                };
                let ticket = entry.item;

                self.running += 1;
                if self.options.concurrency > 1 {
                    self.open_gate_after_delay();
                }

                debug!(job_id = %ticket.job_id, running = self.running, "Dispatcher::dispatch: granting slot");
                match ticket.grant.send(Ok(SlotPermit::new(tx))) {
                    Ok(()) => {
                        self.stats.record_dispatched(self.running);
                        self.bus.emit(LimiterEvent::Dispatched {
                            job_id: ticket.job_id,
                            attempt: ticket.attempt,
                            running: self.running,
                        });
                    }
                    Err(grant) => {
                        // Driver was cancelled between queueing and dispatch
                        debug!(job_id = %ticket.job_id, "Dispatcher::dispatch: grant not received, reclaiming");
                        if let Ok(permit) = grant {
                            permit.disarm();
                        }
                        self.running -= 1;
                        self.bucket.refund(weight);
                        self.stats.record_dropped();
                        // `ticket.grant` was moved by `send`; mirror `emit_dropped` on the remaining fields
                        if ticket.attempt <= 1 {
                            self.bus.emit(LimiterEvent::Dropped {
                                job_id: ticket.job_id,
                                reason: "cancelled".to_string(),
                            });
                        }
                    }
                }
            }
        }

        let state = self.compute_state();
        self.set_state(state);
        self.publish();
    }

    fn compute_state(&self) -> LimiterState {
        if !self.started || self.shutdown.is_some() {
            LimiterState::Stopped
        } else if !self.queue.is_empty() {
            LimiterState::Running
        } else if self.running > 0 {
            LimiterState::Empty
        } else {
            LimiterState::Idle
        }
    }

    fn set_state(&mut self, state: LimiterState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "Dispatcher::set_state");
            self.state = state;
            self.bus.emit(LimiterEvent::Status { state });
        }
    }

    fn publish(&self) {
        let counts = LimiterCounts {
            state: self.state,
            queued: self.queue.len(),
            running: self.running,
            tokens: self.bucket.tokens(),
        };
        self.counts_tx.send_if_modified(|current| {
            if *current == counts {
                false
            } else {
                *current = counts;
                true
            }
        });
    }
}

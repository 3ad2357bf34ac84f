//! Limiter handle and per-job driver

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::dispatch::Dispatcher;
use super::handle::JobHandle;
use super::messages::{Command, Grant, Ticket};
use super::state::{LimiterCounts, LimiterState, LimiterStats, StatsCounters};
use crate::config::LimiterOptions;
use crate::error::LimiterError;
use crate::events::{EventBus, LimiterEvent};
use crate::task::{AttemptError, Job, MetaData, RetryDecision, RetryPolicy, Task, TaskOutput, TaskState};

struct Shared {
    options: LimiterOptions,
    tx: mpsc::UnboundedSender<Command>,
    bus: EventBus,
    stats: Arc<StatsCounters>,
    counts: watch::Receiver<LimiterCounts>,
    next_ticket: AtomicU64,
    /// Cleared by `stop`, set again by `start`
    accepting: AtomicBool,
}

/// A queued attempt waiting for its slot
struct Waiting {
    ticket_id: u64,
    grant: oneshot::Receiver<Grant>,
}

/// Concurrency, delay and token-bucket limiter over a priority queue
///
/// Cloning is cheap and every clone drives the same dispatch loop. The loop
/// keeps running while any clone, submitted job or running attempt exists.
#[derive(Clone)]
pub struct Limiter {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Limiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Limiter")
            .field("options", &self.shared.options)
            .field("counts", &self.counts())
            .finish()
    }
}

impl Limiter {
    /// Validate `options` and spawn the dispatch loop
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(options: LimiterOptions) -> Result<Self, LimiterError> {
        debug!(?options, "Limiter::new: called");
        options.validate()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let bus = EventBus::default();
        let stats = Arc::new(StatsCounters::default());
        let initial = LimiterCounts {
            state: if options.auto_start {
                LimiterState::Idle
            } else {
                LimiterState::Stopped
            },
            tokens: options.bucket_size,
            ..Default::default()
        };
        let (counts_tx, counts_rx) = watch::channel(initial);

        let dispatcher = Dispatcher::new(options.clone(), bus.clone(), Arc::clone(&stats), counts_tx, tx.downgrade());
        tokio::spawn(dispatcher.run(rx));

        Ok(Self {
            shared: Arc::new(Shared {
                options,
                tx,
                bus,
                stats,
                counts: counts_rx,
                next_ticket: AtomicU64::new(0),
                accepting: AtomicBool::new(true),
            }),
        })
    }

    pub fn options(&self) -> &LimiterOptions {
        &self.shared.options
    }

    /// Queue a task and return a handle resolving to its output
    ///
    /// Queue position is fixed by the order of `submit` calls, so jobs of
    /// equal priority run first-in first-out.
    pub fn submit<T>(&self, job: Job, task: Task<T>) -> JobHandle<T>
    where
        T: Clone + Send + 'static,
    {
        debug!(job_id = %job.id, priority = job.priority, weight = job.weight, task_id = %task.id(), "Limiter::submit: called");
        let cancel = CancellationToken::new();
        let job_id = job.id.clone();

        if let Err(error) = job.validate(&self.shared.options) {
            warn!(%job_id, %error, "Rejecting invalid job");
            self.shared.stats.record_rejected();
            self.shared.bus.emit(LimiterEvent::Dropped {
                job_id: job_id.clone(),
                reason: error.to_string(),
            });
            let join = tokio::spawn(async move { Err(error) });
            return JobHandle::new(job_id, cancel, join);
        }

        let waiting = self.enqueue(&job, 1);
        let join = tokio::spawn(drive(self.clone(), job, task, cancel.clone(), waiting));
        JobHandle::new(job_id, cancel, join)
    }

    /// Start dispatching (no-op when already running)
    pub fn start(&self) {
        debug!("Limiter::start: called");
        self.shared.accepting.store(true, Ordering::Release);
        self.send(Command::Start);
    }

    /// Stop accepting submissions
    ///
    /// With `drop_waiting_jobs` every queued job resolves to `Stopped`;
    /// otherwise queued jobs still run. Running attempts are not interrupted.
    pub fn stop(&self, drop_waiting_jobs: bool) {
        debug!(drop_waiting_jobs, "Limiter::stop: called");
        self.shared.accepting.store(false, Ordering::Release);
        self.send(Command::Stop { drop_waiting_jobs });
    }

    /// Whether new submissions are admitted
    ///
    /// A limiter built with `auto_start: false` accepts (and holds) jobs
    /// before its first `start`.
    pub fn is_accepting(&self) -> bool {
        self.shared.accepting.load(Ordering::Acquire)
    }

    /// Last state published by the dispatch loop
    pub fn status(&self) -> LimiterState {
        self.shared.counts.borrow().state
    }

    /// Last queue/running/token counts published by the dispatch loop
    pub fn counts(&self) -> LimiterCounts {
        *self.shared.counts.borrow()
    }

    /// Receiver that is notified whenever the counts change
    pub fn watch_counts(&self) -> watch::Receiver<LimiterCounts> {
        self.shared.counts.clone()
    }

    pub fn stats(&self) -> LimiterStats {
        self.shared.stats.snapshot()
    }

    /// Subscribe to lifecycle events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<LimiterEvent> {
        self.shared.bus.subscribe()
    }

    fn send(&self, cmd: Command) {
        if self.shared.tx.send(cmd).is_err() {
            warn!("Limiter dispatch loop is gone");
        }
    }

    fn enqueue(&self, job: &Job, attempt: u32) -> Waiting {
        let (grant_tx, grant_rx) = oneshot::channel();
        let ticket_id = self.shared.next_ticket.fetch_add(1, Ordering::Relaxed);
        debug!(job_id = %job.id, ticket_id, attempt, "Limiter::enqueue: called");
        self.send(Command::Enqueue {
            priority: job.priority,
            ticket: Ticket {
                id: ticket_id,
                job_id: job.id.clone(),
                weight: job.weight,
                attempt,
                grant: grant_tx,
            },
        });
        Waiting {
            ticket_id,
            grant: grant_rx,
        }
    }

    /// Record a terminal failure and build the error returned to the caller
    fn fail<T>(&self, task: &mut Task<T>, mut meta: MetaData, error: LimiterError) -> LimiterError
    where
        T: Clone + Send + 'static,
    {
        if let Err(e) = task.transition(TaskState::Failed) {
            warn!(%e, "Task state out of sync");
        }
        // Admission refusals of a job that never ran are reported by the dispatch loop
        if meta.attempts > 0 {
            meta.finish();
            warn!(job_id = %meta.job_id, attempts = meta.attempts, %error, "Job failed");
            self.shared.stats.record_failed();
            self.shared.bus.emit(LimiterEvent::Error {
                message: error.to_string(),
                meta,
            });
        }
        error
    }
}

async fn run_attempt<T>(task: &mut Task<T>, timeout: Option<std::time::Duration>) -> Result<(), AttemptError>
where
    T: Clone + Send + 'static,
{
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, task.run_attempt()).await {
            Ok(result) => result,
            Err(_) => Err(AttemptError::new(LimiterError::Timeout(limit))),
        },
        None => task.run_attempt().await,
    }
}

/// Drive one job through slot acquisition, attempts and retries
async fn drive<T>(
    limiter: Limiter,
    job: Job,
    mut task: Task<T>,
    cancel: CancellationToken,
    mut waiting: Waiting,
) -> Result<TaskOutput<T>, LimiterError>
where
    T: Clone + Send + 'static,
{
    let policy = RetryPolicy::resolve(job.retry.as_ref(), limiter.options().retry.as_ref());
    let mut meta = MetaData::new(task.id(), &job.id);
    let cancelled = || LimiterError::Cancelled { job_id: job.id.clone() };

    loop {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(job_id = %job.id, "drive: cancelled while queued");
                limiter.send(Command::Cancel { ticket_id: waiting.ticket_id });
                // A slot granted before the close is handed back here, later grants are reclaimed by the dispatcher
                waiting.grant.close();
                if let Ok(Ok(permit)) = waiting.grant.try_recv() {
                    drop(permit);
                    limiter.shared.stats.record_dropped();
                    if meta.attempts == 0 {
                        limiter.shared.bus.emit(LimiterEvent::Dropped {
                            job_id: job.id.clone(),
                            reason: "cancelled".to_string(),
                        });
                    }
                }
                return Err(limiter.fail(&mut task, meta, cancelled()));
            }
            grant = &mut waiting.grant => match grant {
                Ok(Ok(permit)) => permit,
                Ok(Err(error)) => return Err(limiter.fail(&mut task, meta, error)),
                Err(_) => {
                    let error = LimiterError::Internal("limiter dispatch loop is gone".to_string());
                    return Err(limiter.fail(&mut task, meta, error));
                }
            },
        };

        task.transition(TaskState::Processing)?;
        meta.attempt_started();
        let started = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = run_attempt(&mut task, policy.timeout()) => Some(result),
        };
        meta.attempt_finished(started.elapsed());
        drop(permit);

        let Some(result) = outcome else {
            debug!(job_id = %job.id, "drive: cancelled while running");
            return Err(limiter.fail(&mut task, meta, cancelled()));
        };

        let AttemptError { error, retryable } = match result {
            Ok(()) => {
                task.transition(TaskState::Completed)?;
                meta.finish();
                let output = task
                    .output()
                    .ok_or_else(|| LimiterError::Internal(format!("task {} completed without output", task.id())))?;
                debug!(job_id = %job.id, attempts = meta.attempts, "drive: job done");
                limiter.shared.stats.record_done();
                limiter.shared.bus.emit(LimiterEvent::Done { meta });
                return Ok(output);
            }
            Err(e) => e,
        };

        match policy.decide(task.attempts(), retryable) {
            RetryDecision::Retry { backoff } => {
                task.transition(TaskState::Pending)?;
                warn!(job_id = %job.id, attempt = task.attempts(), ?backoff, %error, "Attempt failed, retrying");
                limiter.shared.stats.record_retried();
                limiter.shared.bus.emit(LimiterEvent::Retry {
                    job_id: job.id.clone(),
                    attempt: task.attempts(),
                    backoff_ms: backoff.as_millis() as u64,
                    message: error.to_string(),
                });

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(limiter.fail(&mut task, meta, cancelled())),
                    _ = tokio::time::sleep(backoff) => {}
                }
                // Back in at the original priority, behind queued equals
                waiting = limiter.enqueue(&job, task.attempts() + 1);
            }
            RetryDecision::Exhausted => {
                let error = match error {
                    partial @ LimiterError::PartialFailure { .. } => partial,
                    other => LimiterError::RetryExhausted {
                        attempts: task.attempts(),
                        source: Box::new(other),
                    },
                };
                return Err(limiter.fail(&mut task, meta, error));
            }
            RetryDecision::Fatal => return Err(limiter.fail(&mut task, meta, error)),
        }
    }
}

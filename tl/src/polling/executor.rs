//! Timer-driven executor for one polling group

use std::sync::{Arc, RwLock};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::group::PollingGroup;
use super::stats::PollingStats;
use crate::error::LimiterError;
use crate::events::LimiterEvent;
use crate::limiter::Limiter;
use crate::task::{Job, Task};

/// Timer state of an executor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollingStatus {
    Running,
    Paused,
    Stopped,
}

impl std::fmt::Display for PollingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Resubmits a polling group's task on every tick
///
/// `pause`, `resume` and `stop` only affect the timer. Runs already handed
/// to the limiter finish on their own.
pub struct PollingExecutor {
    name: String,
    limiter: Limiter,
    control: watch::Sender<PollingStatus>,
    stats: Arc<RwLock<PollingStats>>,
    timer: JoinHandle<()>,
}

impl std::fmt::Debug for PollingExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingExecutor")
            .field("name", &self.name)
            .field("status", &self.status())
            .finish()
    }
}

impl PollingExecutor {
    /// Validate `group`, build its limiter and start ticking
    ///
    /// The first run is submitted immediately. Must be called from within a
    /// tokio runtime.
    pub fn start<T>(group: PollingGroup<T>) -> Result<Self, LimiterError>
    where
        T: Clone + Send + 'static,
    {
        debug!(name = %group.name, interval_ms = group.interval_ms, "PollingExecutor::start: called");
        group.validate()?;

        let limiter = Limiter::new(group.limiter.clone())?;
        let stats = Arc::new(RwLock::new(PollingStats::default()));
        let (control, control_rx) = watch::channel(PollingStatus::Running);

        // Subscribe before the first submission so no outcome is missed
        tokio::spawn(collect_outcomes(group.name.clone(), limiter.subscribe(), Arc::clone(&stats)));
        let name = group.name.clone();
        let timer = tokio::spawn(run_timer(group, limiter.clone(), control_rx, Arc::clone(&stats)));

        info!(%name, "Polling started");
        Ok(Self {
            name,
            limiter,
            control,
            stats,
            timer,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> PollingStatus {
        *self.control.borrow()
    }

    /// The private limiter runs are submitted to
    pub fn limiter(&self) -> &Limiter {
        &self.limiter
    }

    /// Suspend the timer
    pub fn pause(&self) {
        self.set_status(PollingStatus::Paused);
    }

    /// Resume a paused timer
    ///
    /// A run is due right away when at least one interval passed while paused.
    pub fn resume(&self) {
        self.set_status(PollingStatus::Running);
    }

    /// Stop the timer for good
    pub fn stop(&self) {
        self.set_status(PollingStatus::Stopped);
    }

    pub fn is_stopped(&self) -> bool {
        self.status() == PollingStatus::Stopped || self.timer.is_finished()
    }

    pub fn stats(&self) -> PollingStats {
        match self.stats.read() {
            Ok(stats) => stats.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_status(&self, next: PollingStatus) {
        let changed = self.control.send_if_modified(|current| {
            // Stopped is final
            if *current == next || *current == PollingStatus::Stopped {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            info!(name = %self.name, status = %next, "Polling status changed");
        } else {
            debug!(name = %self.name, status = %next, "PollingExecutor::set_status: unchanged");
        }
    }
}

impl Drop for PollingExecutor {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

async fn run_timer<T>(
    group: PollingGroup<T>,
    limiter: Limiter,
    mut control: watch::Receiver<PollingStatus>,
    stats: Arc<RwLock<PollingStats>>,
) where
    T: Clone + Send + 'static,
{
    let mut ticker = tokio::time::interval(group.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut runs: u64 = 0;

    loop {
        let status = *control.borrow_and_update();
        match status {
            PollingStatus::Stopped => break,
            PollingStatus::Paused => {
                if control.changed().await.is_err() {
                    break;
                }
                continue;
            }
            PollingStatus::Running => {}
        }

        tokio::select! {
            changed = control.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = ticker.tick() => {
                runs += 1;
                submit_run(&group, &limiter, runs, &stats);
            }
        }
    }

    info!(name = %group.name, runs, "Polling stopped");
}

fn submit_run<T>(group: &PollingGroup<T>, limiter: &Limiter, run: u64, stats: &RwLock<PollingStats>)
where
    T: Clone + Send + 'static,
{
    let job = Job::new()
        .with_id(format!("{}-{}", group.name, run))
        .with_priority(group.priority)
        .with_weight(group.weight);
    debug!(name = %group.name, job_id = %job.id, "submit_run: called");

    let task: Task<T> = group.task.fresh_copy();
    // Outcomes arrive through the limiter's events
    let _detached = limiter.submit(job, task);

    if let Ok(mut stats) = stats.write() {
        stats.submitted += 1;
    }
}

/// Fold limiter events into the group's statistics until the limiter is gone
async fn collect_outcomes(name: String, mut events: broadcast::Receiver<LimiterEvent>, stats: Arc<RwLock<PollingStats>>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(%name, skipped, "Polling stats missed events");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let Ok(mut stats) = stats.write() else {
            continue;
        };
        match event {
            LimiterEvent::Done { meta } => {
                stats.successes += 1;
                stats.last_duration = Some(meta.duration);
                stats.last_run_at = meta.finished_at;
            }
            LimiterEvent::Error { message, meta } => {
                warn!(%name, job_id = %meta.job_id, %message, "Polling run failed");
                stats.errors += 1;
                stats.last_duration = Some(meta.duration);
                stats.last_run_at = meta.finished_at;
                stats.last_error = Some(message);
            }
            LimiterEvent::Dropped { job_id, reason } => {
                debug!(%name, %job_id, %reason, "collect_outcomes: run dropped");
                stats.rejected += 1;
            }
            _ => {}
        }
    }
    debug!(%name, "collect_outcomes: limiter closed");
}

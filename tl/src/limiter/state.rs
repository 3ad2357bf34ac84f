//! Limiter state, counts and statistics

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

/// Limiter lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LimiterState {
    /// Not dispatching new submissions
    #[default]
    Stopped,
    /// Transitioning out of Stopped
    Starting,
    /// Jobs are queued
    Running,
    /// Queue drained, jobs still executing
    Empty,
    /// Queue drained and nothing executing
    Idle,
}

impl std::fmt::Display for LimiterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Empty => write!(f, "empty"),
            Self::Idle => write!(f, "idle"),
        }
    }
}

/// Point-in-time view published by the dispatch loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LimiterCounts {
    pub state: LimiterState,
    pub queued: usize,
    pub running: usize,
    /// Current reservoir, 0 when the bucket is disabled
    pub tokens: u32,
}

/// Cumulative limiter statistics
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterStats {
    /// Jobs admitted to the queue; retries are not counted again
    pub total_submitted: u64,
    pub total_dispatched: u64,
    pub total_done: u64,
    pub total_failed: u64,
    pub total_retried: u64,
    pub total_dropped: u64,
    pub total_rejected: u64,
    pub peak_queue_depth: usize,
    pub peak_running: usize,
}

/// Shared counters behind [`LimiterStats`]
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    submitted: AtomicU64,
    dispatched: AtomicU64,
    done: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    dropped: AtomicU64,
    rejected: AtomicU64,
    peak_queue_depth: AtomicUsize,
    peak_running: AtomicUsize,
}

impl StatsCounters {
    pub fn record_submitted(&self, queued: usize) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        self.peak_queue_depth.fetch_max(queued, Ordering::Relaxed);
    }

    /// A retry re-entered the queue; the job was already counted as submitted
    pub fn record_requeued(&self, queued: usize) {
        self.peak_queue_depth.fetch_max(queued, Ordering::Relaxed);
    }

    pub fn record_dispatched(&self, running: usize) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        self.peak_running.fetch_max(running, Ordering::Relaxed);
    }

    pub fn record_done(&self) {
        self.done.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retried(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LimiterStats {
        LimiterStats {
            total_submitted: self.submitted.load(Ordering::Relaxed),
            total_dispatched: self.dispatched.load(Ordering::Relaxed),
            total_done: self.done.load(Ordering::Relaxed),
            total_failed: self.failed.load(Ordering::Relaxed),
            total_retried: self.retried.load(Ordering::Relaxed),
            total_dropped: self.dropped.load(Ordering::Relaxed),
            total_rejected: self.rejected.load(Ordering::Relaxed),
            peak_queue_depth: self.peak_queue_depth.load(Ordering::Relaxed),
            peak_running: self.peak_running.load(Ordering::Relaxed),
        }
    }
}

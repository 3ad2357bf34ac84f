//! Task state machine and execution metadata

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `self -> next` is a legal transition
    ///
    /// `Pending -> Failed` covers jobs rejected or cancelled before they ran.
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Pending, Self::Failed)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
                | (Self::Processing, Self::Pending)
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Per-execution record reported with every completion or failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaData {
    pub task_id: String,
    pub job_id: String,
    /// Attempts made, 1 + retries
    pub attempts: u32,
    /// Time spent executing, summed over attempts
    pub duration: Duration,
    /// First dispatch
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl MetaData {
    pub fn new(task_id: impl Into<String>, job_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            job_id: job_id.into(),
            attempts: 0,
            duration: Duration::ZERO,
            started_at: None,
            finished_at: None,
        }
    }

    /// Record the start of an attempt
    pub fn attempt_started(&mut self) {
        self.attempts += 1;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
    }

    /// Record how long an attempt ran
    pub fn attempt_finished(&mut self, elapsed: Duration) {
        self.duration += elapsed;
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }
}

//! Event types emitted by a limiter
//!
//! - Admission (submitted, dropped)
//! - Execution (dispatched, retry, done, error)
//! - Limiter status changes

use serde::{Deserialize, Serialize};

use crate::limiter::LimiterState;
use crate::task::MetaData;

/// Observable limiter activity
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LimiterEvent {
    // === Admission ===
    /// A job entered the queue; retries re-enter silently
    Submitted { job_id: String, priority: i32, queued: usize },
    /// A job that never ran was refused or removed (overflow, stop, cancel)
    Dropped { job_id: String, reason: String },

    // === Execution ===
    /// A job received a slot and is about to run an attempt
    Dispatched { job_id: String, attempt: u32, running: usize },
    /// An attempt failed and the job will be queued again after `backoff_ms`
    Retry {
        job_id: String,
        attempt: u32,
        backoff_ms: u64,
        message: String,
    },
    /// A job completed successfully
    Done { meta: MetaData },
    /// A job failed for good
    Error { message: String, meta: MetaData },

    // === Limiter ===
    /// The limiter changed state
    Status { state: LimiterState },
}

impl LimiterEvent {
    /// Name of the event variant
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Submitted { .. } => "Submitted",
            Self::Dropped { .. } => "Dropped",
            Self::Dispatched { .. } => "Dispatched",
            Self::Retry { .. } => "Retry",
            Self::Done { .. } => "Done",
            Self::Error { .. } => "Error",
            Self::Status { .. } => "Status",
        }
    }

    /// Job this event belongs to, if any
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Self::Submitted { job_id, .. }
            | Self::Dropped { job_id, .. }
            | Self::Dispatched { job_id, .. }
            | Self::Retry { job_id, .. } => Some(job_id),
            Self::Done { meta } | Self::Error { meta, .. } => Some(&meta.job_id),
            Self::Status { .. } => None,
        }
    }

    /// Whether this event settles a job
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. } | Self::Dropped { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_and_job_id() {
        let event = LimiterEvent::Submitted {
            job_id: "job-1".to_string(),
            priority: 0,
            queued: 1,
        };
        assert_eq!(event.event_type(), "Submitted");
        assert_eq!(event.job_id(), Some("job-1"));
        assert!(!event.is_terminal());

        let status = LimiterEvent::Status {
            state: LimiterState::Idle,
        };
        assert_eq!(status.job_id(), None);
    }

    #[test]
    fn test_done_carries_meta_job_id() {
        let meta = MetaData::new("task-1", "job-9");
        let event = LimiterEvent::Done { meta };
        assert_eq!(event.job_id(), Some("job-9"));
        assert!(event.is_terminal());
    }

    #[test]
    fn test_event_serde() {
        let event = LimiterEvent::Retry {
            job_id: "job-2".to_string(),
            attempt: 1,
            backoff_ms: 200,
            message: "connection reset".to_string(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"Retry\""));

        let parsed: LimiterEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.event_type(), "Retry");
        assert_eq!(parsed.job_id(), Some("job-2"));
    }
}

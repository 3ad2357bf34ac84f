//! Polling run statistics

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome counters for one polling group
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PollingStats {
    /// Runs handed to the limiter
    pub submitted: u64,
    pub successes: u64,
    /// Runs that failed after their retries
    pub errors: u64,
    /// Runs refused or dropped by the limiter before executing
    pub rejected: u64,
    /// Execution time of the most recent finished run
    pub last_duration: Option<Duration>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl PollingStats {
    /// Runs that reached a final outcome
    pub fn settled(&self) -> u64 {
        self.successes + self.errors + self.rejected
    }
}

//! Job descriptor

use uuid::Uuid;

use crate::config::{LimiterOptions, RetryOptions};
use crate::error::LimiterError;

/// How a task is queued under a limiter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: String,
    /// Lower values dispatch first
    pub priority: i32,
    /// Tokens consumed from the bucket on dispatch
    pub weight: u32,
    /// Overrides the limiter's retry options
    pub retry: Option<RetryOptions>,
}

impl Default for Job {
    fn default() -> Self {
        Self::new()
    }
}

impl Job {
    /// Create a job with a fresh id, priority 0 and weight 1
    pub fn new() -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            priority: 0,
            weight: 1,
            retry: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_retry(mut self, retry: RetryOptions) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Check the job can ever be dispatched by a limiter with `options`
    pub fn validate(&self, options: &LimiterOptions) -> Result<(), LimiterError> {
        if self.id.is_empty() {
            return Err(LimiterError::invalid("job id must not be empty"));
        }
        if options.bucket_enabled() && self.weight > options.bucket_size {
            return Err(LimiterError::invalid(format!(
                "job {} weight {} exceeds bucket size {}",
                self.id, self.weight, options.bucket_size
            )));
        }
        if let Some(retry) = &self.retry {
            retry.validate()?;
        }
        Ok(())
    }
}

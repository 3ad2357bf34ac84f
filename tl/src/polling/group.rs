//! Polling group definition

use std::time::Duration;

use crate::config::{LimiterOptions, OverflowStrategy};
use crate::error::LimiterError;
use crate::task::Task;

/// A task template run every `interval_ms` under its own limiter
#[derive(Debug, Clone)]
pub struct PollingGroup<T> {
    pub name: String,
    /// Template; every tick runs a fresh copy
    pub task: Task<T>,
    pub interval_ms: u64,
    /// Options of the private limiter
    pub limiter: LimiterOptions,
    pub priority: i32,
    pub weight: u32,
}

impl<T> PollingGroup<T>
where
    T: Clone + Send + 'static,
{
    /// Group with a one-deep backlog that keeps only the newest pending run
    pub fn new(name: impl Into<String>, task: Task<T>, interval_ms: u64) -> Self {
        Self {
            name: name.into(),
            task,
            interval_ms,
            limiter: LimiterOptions {
                high_water: Some(1),
                strategy: OverflowStrategy::Leak,
                ..Default::default()
            },
            priority: 0,
            weight: 1,
        }
    }

    pub fn with_limiter(mut self, limiter: LimiterOptions) -> Self {
        self.limiter = limiter;
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

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn validate(&self) -> Result<(), LimiterError> {
        if self.name.is_empty() {
            return Err(LimiterError::invalid("polling group name must not be empty"));
        }
        if self.interval_ms == 0 {
            return Err(LimiterError::invalid(format!(
                "polling group '{}': interval must be positive",
                self.name
            )));
        }
        self.limiter
            .validate()
            .map_err(|e| LimiterError::invalid(format!("polling group '{}': {}", self.name, e)))?;
        if self.limiter.bucket_enabled() && self.weight > self.limiter.bucket_size {
            return Err(LimiterError::invalid(format!(
                "polling group '{}': weight {} exceeds bucket size {}",
                self.name, self.weight, self.limiter.bucket_size
            )));
        }
        Ok(())
    }
}

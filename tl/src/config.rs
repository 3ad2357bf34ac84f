//! Limiter, retry and scheduler configuration
//!
//! These are plain serde types. Loading them from files or the environment is
//! left to the embedding application; this crate only validates them.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::LimiterError;

/// What to do when a submission arrives at a full queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowStrategy {
    /// Drop the job at the front of the queue and admit the new one
    #[default]
    Leak,
    /// Drop the least urgent queued job if the new one is more urgent
    OverflowPriority,
    /// Reject the new job
    Overflow,
    /// Reject the new job and refuse all submissions for `penalty_ms`
    Block,
}

impl std::fmt::Display for OverflowStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Leak => write!(f, "leak"),
            Self::OverflowPriority => write!(f, "overflow-priority"),
            Self::Overflow => write!(f, "overflow"),
            Self::Block => write!(f, "block"),
        }
    }
}

impl std::str::FromStr for OverflowStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "leak" => Ok(Self::Leak),
            "overflow-priority" | "overflow_priority" => Ok(Self::OverflowPriority),
            "overflow" => Ok(Self::Overflow),
            "block" => Ok(Self::Block),
            _ => Err(format!("Unknown overflow strategy: {}", s)),
        }
    }
}

/// Retry behaviour for failed attempts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RetryOptions {
    /// Total number of attempts, including the first one
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    /// Per-attempt timeout in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Backoff before the first retry in milliseconds
    #[serde(default = "default_wait_time_ms")]
    pub wait_time_ms: u64,

    /// Backoff cap in milliseconds
    #[serde(default = "default_max_wait_time_ms")]
    pub max_wait_time_ms: u64,

    /// Replace the computed backoff with a uniform random delay up to it
    #[serde(default)]
    pub jitter: bool,
}

fn default_attempts() -> u32 {
    3
}

fn default_wait_time_ms() -> u64 {
    100
}

fn default_max_wait_time_ms() -> u64 {
    30_000
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            timeout_ms: None,
            wait_time_ms: default_wait_time_ms(),
            max_wait_time_ms: default_max_wait_time_ms(),
            jitter: false,
        }
    }
}

impl RetryOptions {
    /// Options that make exactly one attempt
    pub fn once() -> Self {
        Self {
            attempts: 1,
            ..Default::default()
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn wait_time(&self) -> Duration {
        Duration::from_millis(self.wait_time_ms)
    }

    pub fn max_wait_time(&self) -> Duration {
        Duration::from_millis(self.max_wait_time_ms)
    }

    pub fn validate(&self) -> Result<(), LimiterError> {
        if self.attempts == 0 {
            return Err(LimiterError::invalid("retry attempts must be at least 1"));
        }
        if self.timeout_ms == Some(0) {
            return Err(LimiterError::invalid("retry timeout must be positive"));
        }
        if self.wait_time_ms > self.max_wait_time_ms {
            return Err(LimiterError::invalid(format!(
                "retry wait time {}ms exceeds max wait time {}ms",
                self.wait_time_ms, self.max_wait_time_ms
            )));
        }
        Ok(())
    }
}

/// Limiter configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LimiterOptions {
    /// Max jobs executing at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Minimum gap between dispatches in milliseconds
    #[serde(default)]
    pub delay_ms: u64,

    /// Max queued jobs before the overflow strategy applies
    #[serde(default)]
    pub high_water: Option<usize>,

    /// Overflow strategy
    #[serde(default)]
    pub strategy: OverflowStrategy,

    /// How long `Block` refuses submissions, in milliseconds
    #[serde(default)]
    pub penalty_ms: u64,

    /// Token bucket capacity, 0 disables the bucket
    #[serde(default)]
    pub bucket_size: u32,

    /// Tokens added on every refill
    #[serde(default = "default_tokens_per_interval")]
    pub tokens_per_interval: u32,

    /// Refill interval in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Retry options for jobs that carry none of their own
    #[serde(default)]
    pub retry: Option<RetryOptions>,

    /// Start dispatching on construction
    #[serde(default = "default_auto_start")]
    pub auto_start: bool,
}

fn default_concurrency() -> usize {
    1
}

fn default_tokens_per_interval() -> u32 {
    1
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_auto_start() -> bool {
    true
}

impl Default for LimiterOptions {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            delay_ms: 0,
            high_water: None,
            strategy: OverflowStrategy::default(),
            penalty_ms: 0,
            bucket_size: 0,
            tokens_per_interval: default_tokens_per_interval(),
            interval_ms: default_interval_ms(),
            retry: None,
            auto_start: default_auto_start(),
        }
    }
}

impl LimiterOptions {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn penalty(&self) -> Duration {
        Duration::from_millis(self.penalty_ms)
    }

    /// Get the refill interval as a Duration
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn bucket_enabled(&self) -> bool {
        self.bucket_size > 0
    }

    /// Reject values that cannot describe a working limiter
    pub fn validate(&self) -> Result<(), LimiterError> {
        debug!(options = ?self, "LimiterOptions::validate: called");
        if self.concurrency == 0 {
            return Err(LimiterError::invalid("concurrency must be at least 1"));
        }
        if self.high_water == Some(0) {
            return Err(LimiterError::invalid("high-water must be at least 1"));
        }
        if self.bucket_enabled() {
            if self.interval_ms == 0 {
                return Err(LimiterError::invalid("refill interval must be positive"));
            }
            if self.tokens_per_interval == 0 {
                return Err(LimiterError::invalid("tokens per interval must be at least 1"));
            }
        }
        if let Some(retry) = &self.retry {
            retry.validate()?;
        }
        Ok(())
    }
}

/// Resource table handed to a [`Scheduler`](crate::scheduler::Scheduler)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Limiter options per resource name
    pub resources: BTreeMap<String, LimiterOptions>,
}

impl SchedulerConfig {
    /// Parse an already-loaded YAML document
    pub fn from_yaml(content: &str) -> Result<Self, LimiterError> {
        let config: Self = serde_yaml::from_str(content)
            .map_err(|e| LimiterError::invalid(format!("failed to parse scheduler config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), LimiterError> {
        for (name, options) in &self.resources {
            if name.is_empty() {
                return Err(LimiterError::invalid("resource name must not be empty"));
            }
            options
                .validate()
                .map_err(|e| LimiterError::invalid(format!("resource '{}': {}", name, e)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = LimiterOptions::default();
        assert_eq!(options.concurrency, 1);
        assert_eq!(options.delay_ms, 0);
        assert_eq!(options.high_water, None);
        assert_eq!(options.strategy, OverflowStrategy::Leak);
        assert_eq!(options.bucket_size, 0);
        assert_eq!(options.tokens_per_interval, 1);
        assert_eq!(options.interval(), Duration::from_secs(1));
        assert!(options.auto_start);
        assert!(!options.bucket_enabled());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_default_retry() {
        let retry = RetryOptions::default();
        assert_eq!(retry.attempts, 3);
        assert_eq!(retry.timeout(), None);
        assert_eq!(retry.wait_time(), Duration::from_millis(100));
        assert_eq!(retry.max_wait_time(), Duration::from_secs(30));
    }

    #[test]
    fn test_validation_failures() {
        let zero_concurrency = LimiterOptions {
            concurrency: 0,
            ..Default::default()
        };
        assert!(matches!(zero_concurrency.validate(), Err(LimiterError::Validation(_))));

        let zero_interval = LimiterOptions {
            bucket_size: 5,
            interval_ms: 0,
            ..Default::default()
        };
        assert!(zero_interval.validate().is_err());

        let zero_refill = LimiterOptions {
            bucket_size: 5,
            tokens_per_interval: 0,
            ..Default::default()
        };
        assert!(zero_refill.validate().is_err());

        let zero_high_water = LimiterOptions {
            high_water: Some(0),
            ..Default::default()
        };
        assert!(zero_high_water.validate().is_err());

        let bad_retry = LimiterOptions {
            retry: Some(RetryOptions {
                attempts: 0,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(bad_retry.validate().is_err());
    }

    #[test]
    fn test_interval_ignored_without_bucket() {
        // A zero interval only matters when the bucket is enabled
        let options = LimiterOptions {
            interval_ms: 0,
            ..Default::default()
        };
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_retry_wait_above_cap() {
        let retry = RetryOptions {
            wait_time_ms: 5_000,
            max_wait_time_ms: 1_000,
            ..Default::default()
        };
        assert!(retry.validate().is_err());
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!("leak".parse::<OverflowStrategy>().unwrap(), OverflowStrategy::Leak);
        assert_eq!("BLOCK".parse::<OverflowStrategy>().unwrap(), OverflowStrategy::Block);
        assert_eq!(
            "overflow_priority".parse::<OverflowStrategy>().unwrap(),
            OverflowStrategy::OverflowPriority
        );
        assert!("drop-all".parse::<OverflowStrategy>().is_err());
        assert_eq!(OverflowStrategy::OverflowPriority.to_string(), "overflow-priority");
    }

    #[test]
    fn test_scheduler_config_from_yaml() {
        let yaml = r#"
resources:
  db:
    concurrency: 1
    delay-ms: 50
  api:
    concurrency: 5
    bucket-size: 10
    tokens-per-interval: 10
    interval-ms: 1000
    strategy: block
    penalty-ms: 250
    retry:
      attempts: 4
      timeout-ms: 2000
"#;
        let config = SchedulerConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.resources.len(), 2);

        let db = &config.resources["db"];
        assert_eq!(db.concurrency, 1);
        assert_eq!(db.delay(), Duration::from_millis(50));
        assert!(db.auto_start);

        let api = &config.resources["api"];
        assert_eq!(api.strategy, OverflowStrategy::Block);
        assert_eq!(api.penalty(), Duration::from_millis(250));
        let retry = api.retry.as_ref().unwrap();
        assert_eq!(retry.attempts, 4);
        assert_eq!(retry.timeout(), Some(Duration::from_secs(2)));
        assert_eq!(retry.wait_time_ms, 100);
    }

    #[test]
    fn test_scheduler_config_rejects_invalid_resource() {
        let yaml = r#"
resources:
  broken:
    concurrency: 0
"#;
        let err = SchedulerConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("broken"));
    }
}

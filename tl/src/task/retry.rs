//! Retry policy
//!
//! Backoff for retry `r` (0-indexed) is `wait_time * 2^r`, capped at
//! `max_wait_time`. With jitter enabled the delay is drawn uniformly from
//! `[0, backoff]` instead.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryOptions;

/// Outcome of a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Queue the job again after the delay
    Retry { backoff: Duration },
    /// Attempts are used up
    Exhausted,
    /// The error is not retryable
    Fatal,
}

/// Retry rules resolved for one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    options: RetryOptions,
}

impl RetryPolicy {
    pub fn new(options: RetryOptions) -> Self {
        Self { options }
    }

    /// Job options win over limiter options; with neither, one attempt is made
    pub fn resolve(job: Option<&RetryOptions>, limiter: Option<&RetryOptions>) -> Self {
        let options = job.or(limiter).cloned().unwrap_or_else(RetryOptions::once);
        Self::new(options)
    }

    pub fn attempts(&self) -> u32 {
        self.options.attempts
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.options.timeout()
    }

    /// Capped exponential backoff before retry number `retry`
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = if retry >= 63 { u64::MAX } else { 1u64 << retry };
        let wait_ms = self.options.wait_time_ms.saturating_mul(factor);
        Duration::from_millis(wait_ms.min(self.options.max_wait_time_ms))
    }

    /// Backoff with jitter applied when enabled
    pub fn delay(&self, retry: u32) -> Duration {
        let backoff = self.backoff(retry);
        if !self.options.jitter || backoff.is_zero() {
            return backoff;
        }
        let ms = backoff.as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(0..=ms))
    }

    /// Decide what happens after attempt number `attempts_used` failed
    pub fn decide(&self, attempts_used: u32, retryable: bool) -> RetryDecision {
        if !retryable {
            return RetryDecision::Fatal;
        }
        if attempts_used >= self.options.attempts {
            return RetryDecision::Exhausted;
        }
        RetryDecision::Retry {
            backoff: self.delay(attempts_used.saturating_sub(1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(attempts: u32, wait_ms: u64, max_ms: u64) -> RetryPolicy {
        RetryPolicy::new(RetryOptions {
            attempts,
            timeout_ms: None,
            wait_time_ms: wait_ms,
            max_wait_time_ms: max_ms,
            jitter: false,
        })
    }

    #[test]
    fn test_exponential_backoff() {
        let policy = policy(10, 100, 30_000);
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = policy(10, 100, 1_000);
        assert_eq!(policy.backoff(4), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(63), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_millis(1_000));
    }

    #[test]
    fn test_decide() {
        let policy = policy(3, 100, 1_000);
        assert_eq!(
            policy.decide(1, true),
            RetryDecision::Retry {
                backoff: Duration::from_millis(100)
            }
        );
        assert_eq!(
            policy.decide(2, true),
            RetryDecision::Retry {
                backoff: Duration::from_millis(200)
            }
        );
        assert_eq!(policy.decide(3, true), RetryDecision::Exhausted);
        // Fatal errors short-circuit regardless of remaining attempts
        assert_eq!(policy.decide(1, false), RetryDecision::Fatal);
    }

    #[test]
    fn test_resolve_precedence() {
        let job = RetryOptions {
            attempts: 5,
            ..Default::default()
        };
        let limiter = RetryOptions {
            attempts: 2,
            ..Default::default()
        };

        assert_eq!(RetryPolicy::resolve(Some(&job), Some(&limiter)).attempts(), 5);
        assert_eq!(RetryPolicy::resolve(None, Some(&limiter)).attempts(), 2);
        assert_eq!(RetryPolicy::resolve(None, None).attempts(), 1);
    }

    #[test]
    fn test_jitter_stays_within_backoff() {
        let policy = RetryPolicy::new(RetryOptions {
            attempts: 5,
            wait_time_ms: 100,
            max_wait_time_ms: 10_000,
            jitter: true,
            ..Default::default()
        });
        for retry in 0..5 {
            for _ in 0..50 {
                assert!(policy.delay(retry) <= policy.backoff(retry));
            }
        }
    }
}

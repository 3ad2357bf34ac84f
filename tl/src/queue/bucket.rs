//! Token bucket throttle
//!
//! The bucket holds at most `bucket_size` tokens and starts full. The owner
//! calls [`TokenBucket::refill`] on its own timer; the bucket itself has no
//! notion of time.

use tracing::debug;

/// Weight-based token bucket, disabled when `bucket_size` is zero
#[derive(Debug, Clone)]
pub struct TokenBucket {
    bucket_size: u32,
    tokens_per_interval: u32,
    tokens: u32,
}

impl TokenBucket {
    pub fn new(bucket_size: u32, tokens_per_interval: u32) -> Self {
        debug!(bucket_size, tokens_per_interval, "TokenBucket::new: called");
        Self {
            bucket_size,
            tokens_per_interval,
            tokens: bucket_size,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.bucket_size > 0
    }

    /// Current reservoir
    pub fn tokens(&self) -> u32 {
        self.tokens
    }

    pub fn capacity(&self) -> u32 {
        self.bucket_size
    }

    /// Take `weight` tokens if they are all available
    pub fn try_consume(&mut self, weight: u32) -> bool {
        if !self.is_enabled() {
            return true;
        }
        if self.tokens < weight {
            debug!(tokens = self.tokens, weight, "TokenBucket::try_consume: not enough tokens");
            return false;
        }
        self.tokens -= weight;
        true
    }

    /// Add one interval's worth of tokens, capped at the bucket size
    pub fn refill(&mut self) {
        if !self.is_enabled() {
            return;
        }
        self.tokens = self.tokens.saturating_add(self.tokens_per_interval).min(self.bucket_size);
    }

    /// Return tokens from a dispatch that never ran
    pub fn refund(&mut self, weight: u32) {
        if !self.is_enabled() {
            return;
        }
        self.tokens = self.tokens.saturating_add(weight).min(self.bucket_size);
    }
}

//! Rate limiter
//!
//! A [`Limiter`] queues jobs by priority and dispatches them while its
//! concurrency, delay and token-bucket constraints allow. State lives in a
//! single dispatch task; each submitted job is driven by its own task that
//! waits for a slot, runs the attempt and handles retries.

mod core;
mod dispatch;
mod handle;
mod messages;
mod state;

pub use core::Limiter;
pub use handle::JobHandle;
pub use state::{LimiterCounts, LimiterState, LimiterStats};

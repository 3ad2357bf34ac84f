//! Queueing primitives used by the limiter
//!
//! - [`PriorityQueue`] keeps pending entries ordered by `(priority, arrival)`
//! - [`TokenBucket`] is the optional weight-based throttle

mod bucket;
mod priority;

pub use bucket::TokenBucket;
pub use priority::{PriorityQueue, QueueEntry};

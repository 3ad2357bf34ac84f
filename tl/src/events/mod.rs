//! Limiter lifecycle events
//!
//! Each limiter owns an [`EventBus`]. Metrics and logging collaborators
//! subscribe to it and receive every [`LimiterEvent`] emitted after they
//! subscribed.

mod bus;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus};
pub use types::LimiterEvent;

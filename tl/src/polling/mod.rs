//! Periodic polling
//!
//! A [`PollingExecutor`] resubmits a template task on a timer through its own
//! private limiter, so a slow backend accumulates at most the limiter's
//! high-water mark of pending runs. [`PollingManager`] owns a set of named
//! executors.

mod executor;
mod group;
mod manager;
mod stats;

pub use executor::{PollingExecutor, PollingStatus};
pub use group::PollingGroup;
pub use manager::PollingManager;
pub use stats::PollingStats;

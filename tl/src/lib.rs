//! TaskLimiter - priority-aware rate limiting and retrying task execution
//!
//! TaskLimiter throttles work against external backends (brokers, APIs,
//! queues) under concurrency, delay and token-bucket constraints, dispatches
//! it in priority order and retries failing attempts with capped exponential
//! backoff.
//!
//! # Core Concepts
//!
//! - **One dispatch task per limiter**: queue, bucket and slot accounting are
//!   owned by a single tokio task, so no lock guards them
//! - **Slots release on drop**: every exit path of an attempt frees its slot
//! - **Isolated resources**: each named resource gets its own limiter
//! - **Bounded polling**: periodic work goes through a private limiter whose
//!   high-water mark caps the backlog
//!
//! # Modules
//!
//! - [`queue`] - Priority queue and token bucket
//! - [`task`] - Jobs, tasks, retry policy
//! - [`limiter`] - The limiter and job handles
//! - [`events`] - Lifecycle events and the event bus
//! - [`scheduler`] - Resource name to limiter mapping
//! - [`polling`] - Timer-driven resubmission
//! - [`config`] - Configuration types

pub mod config;
pub mod error;
pub mod events;
pub mod limiter;
pub mod polling;
pub mod queue;
pub mod scheduler;
pub mod task;

// Re-export commonly used types
pub use config::{LimiterOptions, OverflowStrategy, RetryOptions, SchedulerConfig};
pub use error::{LimiterError, TaskError};
pub use events::{EventBus, LimiterEvent};
pub use limiter::{JobHandle, Limiter, LimiterCounts, LimiterState, LimiterStats};
pub use polling::{PollingExecutor, PollingGroup, PollingManager, PollingStats, PollingStatus};
pub use queue::{PriorityQueue, TokenBucket};
pub use scheduler::Scheduler;
pub use task::{Chain, Job, MetaData, RetryDecision, RetryPolicy, Task, TaskKind, TaskOutput, TaskState};

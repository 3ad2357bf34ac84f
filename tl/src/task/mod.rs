//! Units of work and their retry behaviour
//!
//! A [`Job`] describes how a piece of work is queued (id, priority, weight,
//! retry options). A [`Task`] is the work itself: a single step, a sequence of
//! steps feeding each other, or a group of those run under one slot.

mod core;
mod job;
mod retry;
mod state;

pub use core::{Chain, StepFn, StepFuture, Task, TaskKind, TaskOutput};
pub(crate) use core::AttemptError;
pub use job::Job;
pub use retry::{RetryDecision, RetryPolicy};
pub use state::{MetaData, TaskState};

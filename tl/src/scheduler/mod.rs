//! Resource scheduler
//!
//! Maps named resources to independently configured [`Limiter`](crate::limiter::Limiter)
//! instances so that saturating one resource never delays another.

mod core;

pub use core::Scheduler;

//! Rate limiting and queue admission.
//!
//! Three independent controls, all driven from a single task:
//! - [`RequestRateLimiter`] paces individual API requests
//! - [`UsageWindow`] decides whether a unit of work may start today and how
//!   long to pause after it
//! - [`QueueGate`] holds batch submissions until the provider queue has room

mod bucket;
mod config;
mod queue;
mod window;

use std::time::Duration;

use thiserror::Error;

pub use bucket::RequestRateLimiter;
pub use config::LimiterConfig;
pub use queue::{CancelFlag, QueueEstimate, QueueGate};
pub use window::{Admission, UsageWindow};


/// Errors raised by the limiter.
#[derive(Error, Debug)]
pub enum LimiterError {
    #[error("invalid limiter configuration: {0}")]
    InvalidConfig(String),

    #[error("queue still full after {polls} polls ({waited:?}): {queued} tokens queued, {required} required")]
    QueueWaitTimedOut {
        polls: u32,
        waited: Duration,
        queued: u64,
        required: u64,
    },

    #[error("queue wait cancelled")]
    Cancelled,
}

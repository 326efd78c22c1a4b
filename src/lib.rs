//! batchpilot plans, estimates, and submits chat-completion work for profile
//! records under token, request, and queue limits.
//!
//! - [`budget`]: token counting, pricing and usage totals
//! - [`partition`]: splitting records into token-bounded batches and sessions
//! - [`limiter`]: request pacing, daily admission and queue gating
//! - [`submit`]: uploading batch files and creating batch jobs
//! - [`execute`]: direct per-profile generation

pub mod analyze;
pub mod budget;
pub mod chat;
pub mod config;
pub mod execute;
pub mod limiter;
pub mod partition;
pub mod records;
pub mod sink;
pub mod submit;
pub mod telemetry;

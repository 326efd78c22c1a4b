//! Batch submission.
//!
//! [`SubmissionOrchestrator`] pushes prepared batches through a
//! [`SubmissionBackend`], gated by the limiter. [`OpenAiBatchClient`] is the
//! production backend.

mod backend;
mod openai;
mod orchestrator;
mod result;

pub use backend::{is_in_flight, BackendError, InFlightBatch, SubmissionBackend, IN_FLIGHT_STATUSES};
pub use openai::{OpenAiBatchClient, OpenAiConfig};
pub use orchestrator::SubmissionOrchestrator;
pub use result::{SubmissionOutcome, SubmissionReport, SubmissionResult};

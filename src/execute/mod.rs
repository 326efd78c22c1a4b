//! Direct, per-profile description generation.
//!
//! Unlike batch submission, every profile is one chat-completion request,
//! admitted against the daily token budget and paced against the per-minute
//! budget.

mod runner;
mod simulated;

use async_trait::async_trait;
use thiserror::Error;

pub use runner::{
    select_documents, DocumentWriteFailure, ExecuteOptions, ExecutionSummary, ProfileExecutor, ProfileOutcome,
};
pub use simulated::SimulatedBackend;

use crate::budget::ParsedUsage;
use crate::chat::ChatMessage;
use crate::records::SourceError;
use crate::sink::SinkError;
use crate::submit::BackendError;

/// Errors raised while executing profiles.
#[derive(Error, Debug)]
pub enum ExecuteError {
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// The provider answered without reporting token usage.
    #[error("usage data missing for profile `{username}`")]
    MissingUsage { username: String },

    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("sink error: {0}")]
    Sink(#[from] SinkError),
}

/// A single chat-completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
}

/// Generated text and the usage the provider reported for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub usage: Option<ParsedUsage>,
}

/// Chat-completion operations.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, BackendError>;
}

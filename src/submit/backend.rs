//! The provider seam for batch submission.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::partition::PreparedBatch;

/// Statuses of batches that still occupy the provider queue.
pub const IN_FLIGHT_STATUSES: &[&str] = &["validating", "in_progress", "finalizing", "pending"];

/// Errors raised by a submission or completion backend.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("unexpected response: {0}")]
    InvalidResponse(String),

    #[error("no API key configured")]
    MissingApiKey,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A batch the provider reports as still queued or running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InFlightBatch {
    pub id: String,
    pub status: String,
}

impl InFlightBatch {
    pub fn new(id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: status.into(),
        }
    }
}

pub fn is_in_flight(status: &str) -> bool {
    IN_FLIGHT_STATUSES.contains(&status)
}

/// Batch submission operations.
#[async_trait]
pub trait SubmissionBackend: Send + Sync {
    /// Upload a batch payload, returning the provider's file id.
    async fn upload(&self, batch: &PreparedBatch) -> Result<String, BackendError>;

    /// Start a batch over an uploaded file, returning the batch id.
    async fn create_batch(&self, file_id: &str) -> Result<String, BackendError>;

    /// Batches currently occupying the queue.
    async fn list_in_flight(&self) -> Result<Vec<InFlightBatch>, BackendError>;
}

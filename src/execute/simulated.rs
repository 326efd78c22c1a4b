use async_trait::async_trait;

use super::{Completion, CompletionBackend, CompletionRequest};
use crate::budget::ParsedUsage;
use crate::submit::BackendError;

/// Answers every request locally with a placeholder description and fixed
/// usage, so a run can be rehearsed without an API key.
#[derive(Debug, Clone)]
pub struct SimulatedBackend {
    usage: ParsedUsage,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new(ParsedUsage::new(50, 20))
    }
}

impl SimulatedBackend {
    pub fn new(usage: ParsedUsage) -> Self {
        Self { usage }
    }
}

#[async_trait]
impl CompletionBackend for SimulatedBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, BackendError> {
        let subject = request
            .messages
            .last()
            .and_then(|m| m.content.split("\"username\": \"").nth(1))
            .and_then(|rest| rest.split('"').next())
            .unwrap_or("profile");
        tracing::debug!(subject, "simulating completion");
        Ok(Completion {
            text: format!("This is a test description for {subject}"),
            usage: Some(self.usage),
        })
    }
}

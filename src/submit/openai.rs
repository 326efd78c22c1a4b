//! OpenAI files, batches and chat-completions client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{is_in_flight, BackendError, InFlightBatch, SubmissionBackend};
use crate::budget::parse_usage;
use crate::execute::{Completion, CompletionBackend, CompletionRequest};
use crate::partition::PreparedBatch;

/// Page size when listing batches.
const LIST_PAGE_SIZE: u32 = 100;

/// Connection settings for the OpenAI API.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    /// Endpoint every batch runs against
    pub endpoint: String,
    pub completion_window: String,
    pub timeout: Duration,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            api_key: None,
            endpoint: crate::records::prompt::CHAT_COMPLETIONS_PATH.to_string(),
            completion_window: "24h".to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ObjectId {
    id: String,
}

#[derive(Debug, Deserialize)]
struct BatchPage {
    data: Vec<InFlightBatch>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    last_id: Option<String>,
}

/// HTTP client for the OpenAI batch and chat-completions endpoints.
pub struct OpenAiBatchClient {
    client: Client,
    base_url: String,
    api_key: String,
    endpoint: String,
    completion_window: String,
}

impl std::fmt::Debug for OpenAiBatchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiBatchClient")
            .field("base_url", &self.base_url)
            .field("endpoint", &self.endpoint)
            .field("completion_window", &self.completion_window)
            .finish()
    }
}

impl OpenAiBatchClient {
    pub fn new(config: OpenAiConfig) -> Result<Self, BackendError> {
        let api_key = config
            .api_key
            .filter(|key| !key.trim().is_empty())
            .ok_or(BackendError::MissingApiKey)?;

        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(format!("batchpilot/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        tracing::debug!(base_url = %config.base_url, "created OpenAI client");
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            endpoint: config.endpoint,
            completion_window: config.completion_window,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Turn a non-success response into [`BackendError::Api`].
    async fn check(response: Response) -> Result<Response, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
            .unwrap_or(body);
        Err(BackendError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl SubmissionBackend for OpenAiBatchClient {
    async fn upload(&self, batch: &PreparedBatch) -> Result<String, BackendError> {
        let content = match &batch.path {
            Some(path) => tokio::fs::read(path).await?,
            None => batch.content.clone().into_bytes(),
        };
        let part = Part::bytes(content)
            .file_name(batch.file_name.clone())
            .mime_str("application/jsonl")?;
        let form = Form::new().text("purpose", "batch").part("file", part);

        let response = self
            .client
            .post(self.url("/v1/files"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;
        let file: ObjectId = Self::check(response).await?.json().await?;
        Ok(file.id)
    }

    async fn create_batch(&self, file_id: &str) -> Result<String, BackendError> {
        let body = json!({
            "input_file_id": file_id,
            "endpoint": self.endpoint,
            "completion_window": self.completion_window,
        });
        let response = self
            .client
            .post(self.url("/v1/batches"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let batch: ObjectId = Self::check(response).await?.json().await?;
        Ok(batch.id)
    }

    async fn list_in_flight(&self) -> Result<Vec<InFlightBatch>, BackendError> {
        let mut in_flight = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let mut request = self
                .client
                .get(self.url("/v1/batches"))
                .bearer_auth(&self.api_key)
                .query(&[("limit", LIST_PAGE_SIZE.to_string())]);
            if let Some(cursor) = &after {
                request = request.query(&[("after", cursor)]);
            }

            let page: BatchPage = Self::check(request.send().await?).await?.json().await?;
            in_flight.extend(page.data.into_iter().filter(|b| is_in_flight(&b.status)));

            match (page.has_more, page.last_id) {
                (true, Some(last_id)) => after = Some(last_id),
                _ => break,
            }
        }
        Ok(in_flight)
    }
}

#[async_trait]
impl CompletionBackend for OpenAiBatchClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, BackendError> {
        let body = json!({
            "model": request.model,
            "messages": request.messages,
            "max_tokens": request.max_tokens,
        });
        let response = self
            .client
            .post(self.url(crate::records::prompt::CHAT_COMPLETIONS_PATH))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let value: Value = Self::check(response).await?.json().await?;

        let text = value["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| BackendError::InvalidResponse("completion has no message content".into()))?
            .trim()
            .to_string();
        Ok(Completion {
            text,
            usage: parse_usage(&value),
        })
    }
}

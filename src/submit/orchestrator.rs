//! Sequential, rate-limited batch submission.

use std::time::Duration;

use super::{BackendError, SubmissionBackend, SubmissionReport, SubmissionResult};
use crate::limiter::{CancelFlag, LimiterConfig, LimiterError, QueueEstimate, QueueGate, RequestRateLimiter};
use crate::partition::PreparedBatch;

/// Submits prepared batches one at a time, respecting the request rate and
/// the provider queue limit.
#[derive(Debug)]
pub struct SubmissionOrchestrator<B: SubmissionBackend> {
    backend: B,
    rate: RequestRateLimiter,
    gate: QueueGate,
    courtesy_delay: Duration,
}

impl<B: SubmissionBackend> SubmissionOrchestrator<B> {
    pub fn new(backend: B, config: &LimiterConfig) -> Result<Self, LimiterError> {
        Ok(Self {
            backend,
            rate: RequestRateLimiter::new(config.requests_per_minute)?,
            gate: QueueGate::new(config),
            courtesy_delay: config.courtesy_delay,
        })
    }

    pub fn with_cancel_flag(mut self, flag: CancelFlag) -> Self {
        self.gate = self.gate.with_cancel_flag(flag);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn queue_estimate(&self) -> QueueEstimate {
        self.gate.estimate()
    }

    /// Submit `batches` in order.
    ///
    /// A failed upload or batch creation is recorded and the run moves on. A
    /// queue wait that times out or is cancelled ends the run; the report
    /// then carries the reason and every result so far.
    pub async fn submit_all(&mut self, batches: &[PreparedBatch]) -> SubmissionReport {
        let mut report = SubmissionReport::default();

        for (index, batch) in batches.iter().enumerate() {
            if let Err(err) = self.gate.wait_for_space(&self.backend, batch.token_count).await {
                tracing::warn!(
                    file = %batch.file_name,
                    remaining = batches.len() - index,
                    error = %err,
                    "stopping submission"
                );
                report.stopped_early = Some(err.to_string());
                break;
            }

            match self.submit_one(batch).await {
                Ok(batch_id) => {
                    tracing::info!(
                        file = %batch.file_name,
                        batch_id = %batch_id,
                        tokens = batch.token_count,
                        "batch submitted"
                    );
                    self.gate.record_submitted(&batch_id, batch.token_count);
                    report.results.push(SubmissionResult::submitted(batch, batch_id));
                }
                Err(err) => {
                    tracing::warn!(file = %batch.file_name, error = %err, "batch submission failed");
                    report.results.push(SubmissionResult::failed(batch, err.to_string()));
                }
            }

            tokio::time::sleep(self.courtesy_delay).await;
        }

        report
    }

    async fn submit_one(&mut self, batch: &PreparedBatch) -> Result<String, BackendError> {
        self.rate.acquire().await;
        tracing::debug!(file = %batch.file_name, "uploading batch file");
        let file_id = self.backend.upload(batch).await?;

        self.rate.acquire().await;
        tracing::debug!(file = %batch.file_name, file_id = %file_id, "creating batch");
        self.backend.create_batch(&file_id).await
    }
}

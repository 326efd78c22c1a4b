//! Provider batch-queue admission.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use super::{LimiterConfig, LimiterError};
use crate::submit::{InFlightBatch, SubmissionBackend};

/// Shared flag that stops a queue wait at its next check.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Estimated tokens sitting in the provider queue.
///
/// The provider does not report token counts, so batches submitted by this
/// process count with their known size and any other in-flight batch counts
/// as `assumed_tokens_per_batch`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueEstimate {
    pub exact_tokens: u64,
    pub unknown_batches: u64,
    pub assumed_tokens_per_batch: u64,
}

impl QueueEstimate {
    pub fn from_listing(
        listing: &[InFlightBatch],
        submitted: &HashMap<String, u64>,
        assumed_tokens_per_batch: u64,
    ) -> Self {
        let mut estimate = Self {
            assumed_tokens_per_batch,
            ..Self::default()
        };
        for batch in listing {
            match submitted.get(&batch.id) {
                Some(tokens) => estimate.exact_tokens += tokens,
                None => estimate.unknown_batches += 1,
            }
        }
        estimate
    }

    pub fn total(&self) -> u64 {
        self.exact_tokens
            .saturating_add(self.unknown_batches.saturating_mul(self.assumed_tokens_per_batch))
    }

    /// How far `total` may be from the real queue depth.
    pub fn error_bound(&self) -> u64 {
        self.unknown_batches.saturating_mul(self.assumed_tokens_per_batch)
    }
}

/// Holds submissions until the queue estimate leaves room for them.
#[derive(Debug)]
pub struct QueueGate {
    limit: u64,
    assumed_tokens_per_batch: u64,
    poll_interval: Duration,
    max_polls: u32,
    submitted: HashMap<String, u64>,
    estimate: QueueEstimate,
    cancel: CancelFlag,
}

impl QueueGate {
    pub fn new(config: &LimiterConfig) -> Self {
        Self {
            limit: config.queue_token_limit,
            assumed_tokens_per_batch: config.assumed_tokens_per_batch,
            poll_interval: config.queue_poll_interval,
            max_polls: config.queue_max_polls,
            submitted: HashMap::new(),
            estimate: QueueEstimate {
                assumed_tokens_per_batch: config.assumed_tokens_per_batch,
                ..QueueEstimate::default()
            },
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_cancel_flag(mut self, flag: CancelFlag) -> Self {
        self.cancel = flag;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn estimate(&self) -> QueueEstimate {
        self.estimate
    }

    /// Whether `required` tokens fit beside the current estimate. A batch
    /// larger than the whole queue fits only into an empty queue.
    pub fn fits(&self, required: u64) -> bool {
        let queued = self.estimate.total();
        if required > self.limit {
            return queued == 0;
        }
        queued + required <= self.limit
    }

    /// Wait until `required` tokens fit, re-listing in-flight batches every
    /// poll interval. A listing that fails counts as a poll and is retried.
    /// Gives up after the configured number of listings, or when the cancel
    /// flag is set.
    pub async fn wait_for_space<B>(&mut self, backend: &B, required: u64) -> Result<QueueEstimate, LimiterError>
    where
        B: SubmissionBackend + ?Sized,
    {
        if required > self.limit {
            tracing::warn!(required, limit = self.limit, "batch is larger than the queue limit; waiting for an empty queue");
        }

        let started = Instant::now();
        let mut polls = 0u32;
        loop {
            if self.cancel.is_cancelled() {
                return Err(LimiterError::Cancelled);
            }
            if self.fits(required) {
                return Ok(self.estimate);
            }
            if polls >= self.max_polls {
                return Err(LimiterError::QueueWaitTimedOut {
                    polls,
                    waited: started.elapsed(),
                    queued: self.estimate.total(),
                    required,
                });
            }
            if polls > 0 {
                tracing::info!(
                    queued = self.estimate.total(),
                    error_bound = self.estimate.error_bound(),
                    required,
                    wait_secs = self.poll_interval.as_secs(),
                    "waiting for queue space"
                );
                tokio::time::sleep(self.poll_interval).await;
                if self.cancel.is_cancelled() {
                    return Err(LimiterError::Cancelled);
                }
            }

            polls += 1;
            match backend.list_in_flight().await {
                Ok(listing) => {
                    self.estimate =
                        QueueEstimate::from_listing(&listing, &self.submitted, self.assumed_tokens_per_batch);
                    tracing::debug!(
                        in_flight = listing.len(),
                        queued = self.estimate.total(),
                        polls,
                        "polled batch queue"
                    );
                }
                Err(err) => {
                    // keep the previous estimate; the failed listing still uses up a poll
                    tracing::warn!(polls, max_polls = self.max_polls, error = %err, "failed to list in-flight batches");
                }
            }
        }
    }

    /// Count a newly submitted batch toward the estimate.
    pub fn record_submitted(&mut self, batch_id: &str, tokens: u64) {
        self.submitted.insert(batch_id.to_string(), tokens);
        self.estimate.exact_tokens += tokens;
    }
}

//! Requests-per-minute token bucket.

use std::time::Duration;

use tokio::time::Instant;

use super::LimiterError;

/// Token bucket holding up to `requests_per_minute` tokens, refilled
/// continuously at `requests_per_minute / 60` per second.
#[derive(Debug)]
pub struct RequestRateLimiter {
    capacity: f64,
    tokens: f64,
    last_refill: Instant,
}

impl RequestRateLimiter {
    /// A full bucket.
    pub fn new(requests_per_minute: u32) -> Result<Self, LimiterError> {
        if requests_per_minute == 0 {
            return Err(LimiterError::InvalidConfig(
                "requests per minute must be positive".into(),
            ));
        }
        let capacity = f64::from(requests_per_minute);
        Ok(Self {
            capacity,
            tokens: capacity,
            last_refill: Instant::now(),
        })
    }

    fn refill_per_ms(&self) -> f64 {
        self.capacity / 60_000.0
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed_ms = now.duration_since(self.last_refill).as_secs_f64() * 1_000.0;
        self.tokens = (self.tokens + elapsed_ms * self.refill_per_ms()).min(self.capacity);
        self.last_refill = now;
    }

    /// Tokens currently available, after refilling.
    pub fn available(&mut self) -> f64 {
        self.refill();
        self.tokens
    }

    /// Take one token, sleeping until one is available. Returns the time
    /// spent waiting.
    pub async fn acquire(&mut self) -> Duration {
        let started = Instant::now();
        self.refill();
        while self.tokens < 1.0 {
            let wait_ms = (1.0 - self.tokens) / self.refill_per_ms();
            let wait = Duration::from_secs_f64(wait_ms / 1_000.0);
            tracing::debug!(wait_ms = wait.as_millis() as u64, "rate limit reached, waiting");
            tokio::time::sleep(wait).await;
            self.refill();
        }
        self.tokens -= 1.0;
        started.elapsed()
    }
}

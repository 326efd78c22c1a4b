//! Limiter configuration.

use std::time::Duration;

/// Limits the provider enforces, and how to pace around them.
#[derive(Debug, Clone, PartialEq)]
pub struct LimiterConfig {
    /// Requests allowed per minute.
    /// Default: 500
    pub requests_per_minute: u32,

    /// Tokens allowed per minute.
    /// Default: 30,000
    pub tokens_per_minute: u64,

    /// Tokens allowed per calendar day (UTC).
    /// Default: 90,000
    pub tokens_per_day: u64,

    /// Share of the daily limit at which work stops.
    /// Default: 0.95
    pub daily_stop_fraction: f64,

    /// Lower bound on the pacing delay between units.
    /// Default: 1 second
    pub min_delay: Duration,

    /// Upper bound on the pacing delay between units.
    /// Default: 60 seconds
    pub max_delay: Duration,

    /// Tokens the provider allows to sit in its batch queue.
    /// Default: 2,000,000
    pub queue_token_limit: u64,

    /// Tokens assumed for an in-flight batch this process did not submit.
    /// Default: half the queue limit
    pub assumed_tokens_per_batch: u64,

    /// Wait between queue listings while the queue is full.
    /// Default: 60 seconds
    pub queue_poll_interval: Duration,

    /// Listings to try before giving up on queue space.
    /// Default: 120
    pub queue_max_polls: u32,

    /// Pause after every submission attempt.
    /// Default: 1 second
    pub courtesy_delay: Duration,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 500,
            tokens_per_minute: 30_000,
            tokens_per_day: 90_000,
            daily_stop_fraction: 0.95,
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            queue_token_limit: 2_000_000,
            assumed_tokens_per_batch: 1_000_000,
            queue_poll_interval: Duration::from_secs(60),
            queue_max_polls: 120,
            courtesy_delay: Duration::from_secs(1),
        }
    }
}

impl LimiterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_requests_per_minute(mut self, requests: u32) -> Self {
        self.requests_per_minute = requests;
        self
    }

    pub fn with_tokens_per_minute(mut self, tokens: u64) -> Self {
        self.tokens_per_minute = tokens;
        self
    }

    pub fn with_tokens_per_day(mut self, tokens: u64) -> Self {
        self.tokens_per_day = tokens;
        self
    }

    pub fn with_daily_stop_fraction(mut self, fraction: f64) -> Self {
        self.daily_stop_fraction = fraction;
        self
    }

    /// Sets both pacing bounds.
    pub fn with_delays(mut self, min_delay: Duration, max_delay: Duration) -> Self {
        self.min_delay = min_delay;
        self.max_delay = max_delay;
        self
    }

    /// Sets the queue limit; the assumed size of unknown batches follows it.
    pub fn with_queue_token_limit(mut self, tokens: u64) -> Self {
        self.queue_token_limit = tokens;
        self.assumed_tokens_per_batch = tokens / 2;
        self
    }

    pub fn with_assumed_tokens_per_batch(mut self, tokens: u64) -> Self {
        self.assumed_tokens_per_batch = tokens;
        self
    }

    pub fn with_queue_polling(mut self, interval: Duration, max_polls: u32) -> Self {
        self.queue_poll_interval = interval;
        self.queue_max_polls = max_polls;
        self
    }

    pub fn with_courtesy_delay(mut self, delay: Duration) -> Self {
        self.courtesy_delay = delay;
        self
    }

    /// Tokens that may be used in a day before work stops.
    pub fn daily_ceiling(&self) -> f64 {
        self.daily_stop_fraction * self.tokens_per_day as f64
    }
}

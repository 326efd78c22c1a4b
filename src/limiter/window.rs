//! Per-minute and per-day token accounting.

use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use super::LimiterConfig;

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Admission {
    Proceed,
    /// The unit would push today's usage past the daily ceiling.
    Stop {
        tokens_today: u64,
        estimated: u64,
        ceiling: f64,
    },
}

impl Admission {
    pub fn is_proceed(&self) -> bool {
        matches!(self, Admission::Proceed)
    }
}

/// Token usage in the current minute and the current UTC day.
///
/// Windows roll lazily whenever the counters are consulted, so the struct
/// needs no background task.
#[derive(Debug, Clone)]
pub struct UsageWindow {
    tokens_per_minute: u64,
    daily_ceiling: f64,
    min_delay: Duration,
    max_delay: Duration,
    minute_start: DateTime<Utc>,
    day: NaiveDate,
    tokens_this_minute: u64,
    tokens_today: u64,
}

impl UsageWindow {
    pub fn new(config: &LimiterConfig) -> Self {
        Self::starting_at(config, Utc::now())
    }

    pub fn starting_at(config: &LimiterConfig, now: DateTime<Utc>) -> Self {
        Self {
            tokens_per_minute: config.tokens_per_minute,
            daily_ceiling: config.daily_ceiling(),
            min_delay: config.min_delay,
            max_delay: config.max_delay,
            minute_start: now,
            day: now.date_naive(),
            tokens_this_minute: 0,
            tokens_today: 0,
        }
    }

    fn roll(&mut self, now: DateTime<Utc>) {
        if now.signed_duration_since(self.minute_start) >= chrono::Duration::seconds(60) {
            self.minute_start = now;
            self.tokens_this_minute = 0;
        }
        if now.date_naive() != self.day {
            tracing::info!(previous = %self.day, tokens = self.tokens_today, "new day, resetting daily usage");
            self.day = now.date_naive();
            self.tokens_today = 0;
        }
    }

    pub fn admit(&mut self, estimated: u64) -> Admission {
        self.admit_at(estimated, Utc::now())
    }

    /// Decide whether a unit of `estimated` tokens may run. Never blocks.
    pub fn admit_at(&mut self, estimated: u64, now: DateTime<Utc>) -> Admission {
        self.roll(now);
        if (self.tokens_today + estimated) as f64 > self.daily_ceiling {
            return Admission::Stop {
                tokens_today: self.tokens_today,
                estimated,
                ceiling: self.daily_ceiling,
            };
        }
        Admission::Proceed
    }

    pub fn record(&mut self, tokens: u64) {
        self.record_at(tokens, Utc::now());
    }

    /// Add the actual usage of one request to both windows.
    pub fn record_at(&mut self, tokens: u64, now: DateTime<Utc>) {
        self.roll(now);
        self.tokens_this_minute += tokens;
        self.tokens_today += tokens;
    }

    pub fn pacing_delay(&mut self, tokens: u64) -> Duration {
        self.pacing_delay_at(tokens, Utc::now())
    }

    /// Delay to spread `tokens` over what is left of the minute budget.
    pub fn pacing_delay_at(&mut self, tokens: u64, now: DateTime<Utc>) -> Duration {
        self.roll(now);
        if self.tokens_this_minute >= self.tokens_per_minute {
            return self.max_delay;
        }
        if tokens == 0 {
            return self.min_delay;
        }
        let remaining = (self.tokens_per_minute - self.tokens_this_minute) as f64;
        let delay = Duration::from_secs_f64(60.0 * tokens as f64 / remaining);
        delay.max(self.min_delay).min(self.max_delay)
    }

    pub fn tokens_today(&self) -> u64 {
        self.tokens_today
    }

    pub fn tokens_this_minute(&self) -> u64 {
        self.tokens_this_minute
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_daily_stop_after_85_units() {
        let config = LimiterConfig::default();
        let now = noon();
        let mut window = UsageWindow::starting_at(&config, now);

        let mut admitted = 0;
        while window.admit_at(1_000, now).is_proceed() {
            window.record_at(1_000, now);
            admitted += 1;
            assert!(admitted <= 90, "never stopped");
        }
        assert_eq!(admitted, 85);
        assert_eq!(
            window.admit_at(1_000, now),
            Admission::Stop {
                tokens_today: 85_000,
                estimated: 1_000,
                ceiling: 85_500.0,
            }
        );
    }

    #[test]
    fn test_day_rolls_at_utc_midnight() {
        let config = LimiterConfig::default();
        let late = Utc.with_ymd_and_hms(2024, 5, 1, 23, 59, 0).unwrap();
        let mut window = UsageWindow::starting_at(&config, late);
        window.record_at(85_000, late);
        assert!(!window.admit_at(1_000, late).is_proceed());

        let next_day = Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 1).unwrap();
        assert!(window.admit_at(1_000, next_day).is_proceed());
        assert_eq!(window.tokens_today(), 0);
    }

    #[test]
    fn test_minute_rolls_after_sixty_seconds() {
        let config = LimiterConfig::default();
        let now = noon();
        let mut window = UsageWindow::starting_at(&config, now);
        window.record_at(500, now);
        window.record_at(500, now + chrono::Duration::seconds(59));
        assert_eq!(window.tokens_this_minute(), 1_000);

        window.record_at(200, now + chrono::Duration::seconds(60));
        assert_eq!(window.tokens_this_minute(), 200);
        assert_eq!(window.tokens_today(), 1_200);
    }

    #[test]
    fn test_pacing_delay_guards() {
        let config = LimiterConfig::default();
        let now = noon();
        let mut window = UsageWindow::starting_at(&config, now);

        assert_eq!(window.pacing_delay_at(0, now), Duration::from_secs(1));

        // 60s * 3,000 / 30,000 = 6s
        assert_eq!(window.pacing_delay_at(3_000, now), Duration::from_secs(6));

        // tiny units are held to the minimum
        assert_eq!(window.pacing_delay_at(1, now), Duration::from_secs(1));

        window.record_at(30_000, now);
        assert_eq!(window.pacing_delay_at(1_000, now), Duration::from_secs(60));
    }

    #[test]
    fn test_pacing_delay_clamped_to_max() {
        let config = LimiterConfig::default();
        let now = noon();
        let mut window = UsageWindow::starting_at(&config, now);
        window.record_at(29_000, now);
        // 60s * 2,000 / 1,000 = 120s
        assert_eq!(window.pacing_delay_at(2_000, now), Duration::from_secs(60));
    }
}

//! Application configuration.
//!
//! Loaded in order, later sources overriding earlier ones:
//! 1. built-in defaults
//! 2. `batchpilot.toml` in the working directory, or the file given explicitly
//! 3. environment variables prefixed `BATCHPILOT__`, nested with `__`
//!    (for example `BATCHPILOT__LIMITS__TOKENS_PER_DAY=120000`)
//!
//! The API key falls back to `OPENAI_API_KEY`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::budget::{CostRates, PricingError, TokenPrices};
use crate::limiter::LimiterConfig;
use crate::partition::{OversizePolicy, PartitionConfig};
use crate::submit::OpenAiConfig;

pub const DEFAULT_CONFIG_FILE: &str = "batchpilot.toml";
pub const ENV_PREFIX: &str = "BATCHPILOT";
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Errors raised while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("invalid pricing: {0}")]
    Pricing(#[from] PricingError),

    #[error("failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root of the profile documents
    pub profiles_dir: PathBuf,
    /// Batch files and result files
    pub results_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            profiles_dir: PathBuf::from("./profiles"),
            results_dir: PathBuf::from("./results"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Model for direct execution
    pub name: String,
    /// Model written into batch files
    pub batch_model: String,
    /// Completion allowance per profile in direct execution
    pub max_completion_tokens: u32,
    /// Completion allowance per batch line
    pub batch_max_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "gpt-4o".to_string(),
            batch_model: "gpt-4o-mini".to_string(),
            max_completion_tokens: 300,
            batch_max_tokens: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionSettings {
    pub session_budget: u64,
    pub batch_budget: Option<u64>,
    /// Tokens charged per profile while partitioning; 0 counts each
    /// rendered request with the model's counter instead.
    pub tokens_per_record: u64,
    pub oversize: OversizePolicy,
}

impl Default for PartitionSettings {
    fn default() -> Self {
        Self {
            session_budget: 2_000_000,
            batch_budget: None,
            tokens_per_record: 300,
            oversize: OversizePolicy::Admit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub requests_per_minute: u32,
    pub tokens_per_minute: u64,
    pub tokens_per_day: u64,
    pub daily_stop_fraction: f64,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub queue_token_limit: u64,
    /// Defaults to half the queue limit
    pub assumed_tokens_per_batch: Option<u64>,
    pub queue_poll_interval_secs: u64,
    pub queue_max_polls: u32,
    pub courtesy_delay_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 500,
            tokens_per_minute: 30_000,
            tokens_per_day: 90_000,
            daily_stop_fraction: 0.95,
            min_delay_ms: 1_000,
            max_delay_ms: 60_000,
            queue_token_limit: 2_000_000,
            assumed_tokens_per_batch: None,
            queue_poll_interval_secs: 60,
            queue_max_polls: 120,
            courtesy_delay_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub completion_window: String,
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        let openai = OpenAiConfig::default();
        Self {
            base_url: openai.base_url,
            api_key: None,
            completion_window: openai.completion_window,
            endpoint: openai.endpoint,
            timeout_secs: openai.timeout.as_secs(),
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub paths: PathsConfig,
    pub model: ModelConfig,
    /// Rates for direct execution and analysis
    pub pricing: CostRates,
    pub partition: PartitionSettings,
    pub limits: LimitsConfig,
    pub api: ApiConfig,
    /// Log what would be written or submitted instead of doing it
    pub dry_run: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            model: ModelConfig::default(),
            pricing: CostRates::gpt_4o(),
            partition: PartitionSettings::default(),
            limits: LimitsConfig::default(),
            api: ApiConfig::default(),
            dry_run: false,
        }
    }
}

impl AppConfig {
    /// Load and validate configuration. An explicit `path` must exist; the
    /// default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let builder = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            );

        let mut config: AppConfig = builder.build()?.try_deserialize()?;
        if config.api.api_key.is_none() {
            config.api.api_key = std::env::var(API_KEY_ENV).ok().filter(|key| !key.is_empty());
        }
        config.validate()?;
        tracing::debug!(path = ?path, dry_run = config.dry_run, "loaded configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| Err(ConfigError::Invalid(message.to_string()));

        self.partition_config()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.pricing.normalize()?;

        let limits = &self.limits;
        if limits.requests_per_minute == 0 {
            return invalid("limits.requests_per_minute must be greater than 0");
        }
        if limits.tokens_per_minute == 0 || limits.tokens_per_day == 0 {
            return invalid("token limits must be greater than 0");
        }
        if !(limits.daily_stop_fraction > 0.0 && limits.daily_stop_fraction <= 1.0) {
            return invalid("limits.daily_stop_fraction must be in (0, 1]");
        }
        if limits.min_delay_ms > limits.max_delay_ms {
            return invalid("limits.min_delay_ms must not exceed limits.max_delay_ms");
        }
        if limits.queue_token_limit == 0 {
            return invalid("limits.queue_token_limit must be greater than 0");
        }
        if self.model.max_completion_tokens == 0 || self.model.batch_max_tokens == 0 {
            return invalid("completion token allowances must be greater than 0");
        }
        Ok(())
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_profiles_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.paths.profiles_dir = dir.into();
        self
    }

    pub fn with_results_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.paths.results_dir = dir.into();
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api.api_key = Some(key.into());
        self
    }

    pub fn partition_config(&self) -> PartitionConfig {
        let mut config = PartitionConfig::new(self.partition.session_budget).with_oversize(self.partition.oversize);
        if let Some(batch_budget) = self.partition.batch_budget {
            config = config.with_batch_budget(batch_budget);
        }
        config
    }

    pub fn limiter_config(&self) -> LimiterConfig {
        let limits = &self.limits;
        let mut config = LimiterConfig::new()
            .with_requests_per_minute(limits.requests_per_minute)
            .with_tokens_per_minute(limits.tokens_per_minute)
            .with_tokens_per_day(limits.tokens_per_day)
            .with_daily_stop_fraction(limits.daily_stop_fraction)
            .with_delays(
                Duration::from_millis(limits.min_delay_ms),
                Duration::from_millis(limits.max_delay_ms),
            )
            .with_queue_token_limit(limits.queue_token_limit)
            .with_queue_polling(
                Duration::from_secs(limits.queue_poll_interval_secs),
                limits.queue_max_polls,
            )
            .with_courtesy_delay(Duration::from_millis(limits.courtesy_delay_ms));
        if let Some(assumed) = limits.assumed_tokens_per_batch {
            config = config.with_assumed_tokens_per_batch(assumed);
        }
        config
    }

    pub fn openai_config(&self) -> OpenAiConfig {
        OpenAiConfig {
            base_url: self.api.base_url.clone(),
            api_key: self.api.api_key.clone(),
            endpoint: self.api.endpoint.clone(),
            completion_window: self.api.completion_window.clone(),
            timeout: Duration::from_secs(self.api.timeout_secs),
        }
    }

    /// Prices for direct execution and analysis.
    pub fn token_prices(&self) -> Result<TokenPrices, ConfigError> {
        Ok(self.pricing.normalize()?)
    }

    /// Prices for the batch model, falling back to the configured rates.
    pub fn batch_prices(&self) -> Result<TokenPrices, ConfigError> {
        let rates = CostRates::for_model(&self.model.batch_model).unwrap_or_else(|| self.pricing.clone());
        Ok(rates.normalize()?)
    }

    /// The effective configuration as TOML, with the API key redacted.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        let mut redacted = self.clone();
        if redacted.api.api_key.is_some() {
            redacted.api.api_key = Some("<redacted>".to_string());
        }
        Ok(toml::to_string_pretty(&redacted)?)
    }
}

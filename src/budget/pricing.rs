//! Token pricing.
//!
//! Provider price sheets quote rates per token, per thousand or per million
//! tokens. Configured rates are normalised to a price per single token at
//! load time and every cost is computed from the normalised form.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading a rate table.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PricingError {
    #[error("{field} rate must be a finite, non-negative number (got {value})")]
    InvalidRate { field: &'static str, value: f64 },
}

/// Magnitude a configured rate is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateUnit {
    PerToken,
    PerThousand,
    #[default]
    PerMillion,
}

impl RateUnit {
    /// Number of tokens one quoted rate covers.
    pub fn tokens(&self) -> f64 {
        match self {
            RateUnit::PerToken => 1.0,
            RateUnit::PerThousand => 1_000.0,
            RateUnit::PerMillion => 1_000_000.0,
        }
    }
}

/// Rates as they appear in configuration (USD).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostRates {
    /// Model name for reference
    pub model_name: String,
    pub input_rate: f64,
    pub output_rate: f64,
    #[serde(default)]
    pub unit: RateUnit,
}

impl Default for CostRates {
    fn default() -> Self {
        Self::gpt_4o()
    }
}

impl CostRates {
    pub fn new(model_name: impl Into<String>, input_rate: f64, output_rate: f64, unit: RateUnit) -> Self {
        Self {
            model_name: model_name.into(),
            input_rate,
            output_rate,
            unit,
        }
    }

    /// gpt-4o list pricing.
    pub fn gpt_4o() -> Self {
        Self::new("gpt-4o", 5.0, 15.0, RateUnit::PerMillion)
    }

    /// gpt-4o-mini list pricing.
    pub fn gpt_4o_mini() -> Self {
        Self::new("gpt-4o-mini", 0.15, 0.60, RateUnit::PerMillion)
    }

    /// Preset for a model name, if one is known.
    pub fn for_model(model: &str) -> Option<Self> {
        match model {
            "gpt-4o" => Some(Self::gpt_4o()),
            "gpt-4o-mini" => Some(Self::gpt_4o_mini()),
            _ => None,
        }
    }

    /// Convert to per-token prices, rejecting nonsensical rates.
    pub fn normalize(&self) -> Result<TokenPrices, PricingError> {
        let check = |field: &'static str, value: f64| {
            if value.is_finite() && value >= 0.0 {
                Ok(value)
            } else {
                Err(PricingError::InvalidRate { field, value })
            }
        };
        let input = check("input", self.input_rate)?;
        let output = check("output", self.output_rate)?;
        let per = self.unit.tokens();
        Ok(TokenPrices {
            input_per_token: input / per,
            output_per_token: output / per,
        })
    }
}

/// Normalised USD price of a single token.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TokenPrices {
    pub input_per_token: f64,
    pub output_per_token: f64,
}

impl TokenPrices {
    /// Cost of a request with the given token counts.
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        cost(input_tokens, output_tokens, self)
    }
}

/// Cost in USD of `input_tokens` prompt and `output_tokens` completion tokens.
pub fn cost(input_tokens: u64, output_tokens: u64, prices: &TokenPrices) -> f64 {
    input_tokens as f64 * prices.input_per_token + output_tokens as f64 * prices.output_per_token
}

/// Format a USD amount for display.
pub fn format_usd(amount: f64) -> String {
    if amount != 0.0 && amount.abs() < 0.01 {
        format!("${:.6}", amount)
    } else {
        format!("${:.2}", amount)
    }
}

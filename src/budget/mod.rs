//! Token estimation, pricing and usage accounting.
//!
//! # Overview
//!
//! - **TokenCounter**: pluggable token counting, keyed by model name
//! - **CostRates / TokenPrices**: rate tables normalised to a per-token price
//! - **parse_usage**: provider-reported usage from response bodies
//! - **UsageTracker**: running totals and the aggregate run summary
//!
//! # Example
//!
//! ```
//! use batchpilot::budget::{CostRates, TokenCount, UsageTracker};
//!
//! let prices = CostRates::gpt_4o_mini().normalize().unwrap();
//! let mut tracker = UsageTracker::new(prices);
//! tracker.record(TokenCount::new(1_200, 40));
//!
//! assert_eq!(tracker.summary().total_tokens, 1_240);
//! ```

mod estimator;
mod parser;
mod pricing;
mod tracker;

#[cfg(feature = "tiktoken")]
pub use estimator::BpeCounter;
pub use estimator::{
    counter_for_model, EstimationMethod, FixedCounter, TokenCount, TokenCounter, TokenEstimator,
    REPLY_PRIMING_TOKENS, TOKENS_PER_MESSAGE, TOKENS_PER_NAME,
};
pub use parser::{parse_usage, ParsedUsage};
pub use pricing::{cost, format_usd, CostRates, PricingError, RateUnit, TokenPrices};
pub use tracker::{UsageSummary, UsageTracker};

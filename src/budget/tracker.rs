//! Token and cost accounting across a run.

use serde::{Deserialize, Serialize};

use super::estimator::TokenCount;
use super::pricing::{format_usd, TokenPrices};

/// Accumulates token usage and cost for every processed record.
#[derive(Debug, Clone)]
pub struct UsageTracker {
    prices: TokenPrices,
    records: u64,
    totals: TokenCount,
    total_cost: f64,
}

impl UsageTracker {
    pub fn new(prices: TokenPrices) -> Self {
        Self {
            prices,
            records: 0,
            totals: TokenCount::default(),
            total_cost: 0.0,
        }
    }

    /// Record one processed record and return its cost.
    pub fn record(&mut self, usage: TokenCount) -> f64 {
        let cost = self.prices.cost(usage.input_tokens, usage.output_tokens);
        self.records += 1;
        self.totals += usage;
        self.total_cost += cost;
        cost
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn totals(&self) -> TokenCount {
        self.totals
    }

    /// Total cost (USD).
    pub fn total_cost(&self) -> f64 {
        self.total_cost
    }

    /// Average tokens per record, rounded; 0 when nothing was recorded.
    pub fn average_tokens_per_record(&self) -> u64 {
        if self.records == 0 {
            0
        } else {
            (self.totals.total() as f64 / self.records as f64).round() as u64
        }
    }

    pub fn summary(&self) -> UsageSummary {
        UsageSummary {
            total_records: self.records,
            total_input_tokens: self.totals.input_tokens,
            total_output_tokens: self.totals.output_tokens,
            total_tokens: self.totals.total(),
            total_cost: self.total_cost,
            average_tokens_per_record: self.average_tokens_per_record(),
        }
    }
}

/// Aggregate usage handed to the result sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub total_records: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub average_tokens_per_record: u64,
}

impl UsageSummary {
    /// Format as a human-readable string.
    pub fn format(&self) -> String {
        let mut output = String::from("## Token Usage Summary\n\n");
        output.push_str(&format!("**Records**: {}\n", self.total_records));
        output.push_str(&format!(
            "**Tokens**: {} ({} input, {} output)\n",
            self.total_tokens, self.total_input_tokens, self.total_output_tokens
        ));
        output.push_str(&format!(
            "**Average per record**: {} tokens\n",
            self.average_tokens_per_record
        ));
        output.push_str(&format!("**Cost**: {}\n", format_usd(self.total_cost)));
        output
    }
}

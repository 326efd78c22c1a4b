//! Pre-flight estimates: per-profile token and cost analysis, and token
//! counts of prepared batch files against the queue limit.

use serde::{Deserialize, Serialize};

use crate::budget::{format_usd, TokenCount, TokenCounter, TokenPrices, UsageTracker};
use crate::partition::PreparedBatch;
use crate::records::prompt::{description_messages, sample_description};
use crate::records::ProfileRecord;

/// Estimated usage of one profile.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileEstimate {
    pub username: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
}

/// Estimate a profile: the chat-formatted prompt as input, and a
/// synthesised description as output.
pub fn estimate_profile(profile: &ProfileRecord, counter: &dyn TokenCounter, prices: &TokenPrices) -> ProfileEstimate {
    let input_tokens = counter.count_chat(&description_messages(profile));
    let output_tokens = counter.count(&sample_description(profile));
    ProfileEstimate {
        username: profile.username.clone(),
        input_tokens,
        output_tokens,
        cost: prices.cost(input_tokens, output_tokens),
    }
}

/// Totals written to `analysis.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisSummary {
    pub total_profiles: u64,
    pub total_estimated_input_tokens: u64,
    pub total_estimated_output_tokens: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub average_estimated_tokens_per_profile: u64,
}

impl AnalysisSummary {
    pub fn format(&self) -> String {
        let mut output = String::from("## Profile Analysis\n\n");
        output.push_str(&format!("**Profiles**: {}\n", self.total_profiles));
        output.push_str(&format!(
            "**Estimated tokens**: {} ({} input, {} output)\n",
            self.total_tokens, self.total_estimated_input_tokens, self.total_estimated_output_tokens
        ));
        output.push_str(&format!(
            "**Average per profile**: {} tokens\n",
            self.average_estimated_tokens_per_profile
        ));
        output.push_str(&format!("**Estimated cost**: {}\n", format_usd(self.total_cost)));
        output
    }
}

/// Estimate every profile and total the results.
pub fn analyze_profiles<'a>(
    profiles: impl IntoIterator<Item = &'a ProfileRecord>,
    counter: &dyn TokenCounter,
    prices: &TokenPrices,
) -> AnalysisSummary {
    let mut tracker = UsageTracker::new(*prices);
    for profile in profiles {
        let estimate = estimate_profile(profile, counter, prices);
        tracing::debug!(
            username = %estimate.username,
            input_tokens = estimate.input_tokens,
            output_tokens = estimate.output_tokens,
            cost = estimate.cost,
            "estimated profile"
        );
        tracker.record(TokenCount::new(estimate.input_tokens, estimate.output_tokens));
    }

    let usage = tracker.summary();
    AnalysisSummary {
        total_profiles: usage.total_records,
        total_estimated_input_tokens: usage.total_input_tokens,
        total_estimated_output_tokens: usage.total_output_tokens,
        total_tokens: usage.total_tokens,
        total_cost: usage.total_cost,
        average_estimated_tokens_per_profile: usage.average_tokens_per_record,
    }
}

/// Token count of one batch file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFileInfo {
    pub file_name: String,
    pub record_count: usize,
    pub token_count: u64,
}

/// Batch files compared against the provider queue limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFileAnalysis {
    pub files: Vec<BatchFileInfo>,
    pub total_tokens: u64,
    pub queue_token_limit: u64,
}

impl BatchFileAnalysis {
    pub fn exceeds_limit(&self) -> bool {
        self.total_tokens > self.queue_token_limit
    }

    pub fn format(&self) -> String {
        let mut output = String::from("## Batch File Analysis\n\n");
        for file in &self.files {
            output.push_str(&format!(
                "- {}: {} records, {} tokens\n",
                file.file_name, file.record_count, file.token_count
            ));
        }
        output.push_str(&format!(
            "\n**Total**: {} tokens across {} files\n**Queue limit**: {} tokens\n",
            self.total_tokens,
            self.files.len(),
            self.queue_token_limit
        ));
        if self.exceeds_limit() {
            output.push_str("\nThe total exceeds the queue limit; batches will be submitted across several queue windows.\n");
        } else {
            output.push_str("\nThe total is within the queue limit.\n");
        }
        output
    }
}

/// Compare prepared batches with the queue limit.
pub fn inspect_batches(batches: &[PreparedBatch], queue_token_limit: u64) -> BatchFileAnalysis {
    let files: Vec<BatchFileInfo> = batches
        .iter()
        .map(|b| BatchFileInfo {
            file_name: b.file_name.clone(),
            record_count: b.record_count,
            token_count: b.token_count,
        })
        .collect();
    let total_tokens = files.iter().map(|f| f.token_count).sum();

    let analysis = BatchFileAnalysis {
        files,
        total_tokens,
        queue_token_limit,
    };
    if analysis.exceeds_limit() {
        tracing::warn!(total_tokens, queue_token_limit, "batch files exceed the queue limit");
    }
    analysis
}

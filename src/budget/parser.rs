//! Token usage parsing from API responses.
//!
//! Chat-completion responses report usage as
//! `{"usage": {"prompt_tokens": N, "completion_tokens": N, "total_tokens": N}}`.

use serde::Deserialize;
use serde_json::Value;

use super::estimator::TokenCount;

/// Usage reported by the provider for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Total as reported, which may include tokens not split out above
    pub total_tokens: u64,
}

impl ParsedUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }

    pub fn to_token_count(&self) -> TokenCount {
        TokenCount::new(self.input_tokens, self.output_tokens)
    }
}

/// OpenAI usage format.
#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: Option<u64>,
}

/// Anthropic-style usage format, accepted for compatible gateways.
#[derive(Debug, Deserialize)]
struct InputOutputUsage {
    input_tokens: u64,
    output_tokens: u64,
}

/// Extract usage from a response body.
///
/// Returns `None` when the body has no recognisable `usage` object.
pub fn parse_usage(body: &Value) -> Option<ParsedUsage> {
    let usage = body.get("usage")?;

    if let Ok(openai) = OpenAIUsage::deserialize(usage) {
        let mut parsed = ParsedUsage::new(openai.prompt_tokens, openai.completion_tokens);
        if let Some(total) = openai.total_tokens {
            parsed.total_tokens = total;
        }
        return Some(parsed);
    }

    if let Ok(io) = InputOutputUsage::deserialize(usage) {
        return Some(ParsedUsage::new(io.input_tokens, io.output_tokens));
    }

    None
}

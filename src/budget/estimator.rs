//! Token estimation utilities.
//!
//! Counting is a pluggable strategy keyed by model name. The default
//! [`TokenEstimator`] is a character/word heuristic; with the `tiktoken`
//! feature enabled, known OpenAI models get exact BPE counts instead.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::chat::ChatMessage;

/// Fixed tokens the OpenAI chat format adds around every message.
pub const TOKENS_PER_MESSAGE: u64 = 3;
/// Extra token charged when a message carries a `name`.
pub const TOKENS_PER_NAME: u64 = 1;
/// Tokens priming the assistant reply at the end of every exchange.
pub const REPLY_PRIMING_TOKENS: u64 = 3;

/// Counts tokens for plain text and chat exchanges.
///
/// Implementations must be pure: the same input always yields the same count.
pub trait TokenCounter: Send + Sync {
    /// Count the tokens of a raw string.
    fn count(&self, text: &str) -> u64;

    /// Count the tokens of a chat exchange, including per-message overhead.
    fn count_chat(&self, messages: &[ChatMessage]) -> u64 {
        let mut total = REPLY_PRIMING_TOKENS;
        for message in messages {
            total += TOKENS_PER_MESSAGE;
            total += self.count(message.role.as_str());
            total += self.count(&message.content);
            if let Some(name) = &message.name {
                total += self.count(name) + TOKENS_PER_NAME;
            }
        }
        total
    }

    /// Name of the strategy, for logging.
    fn name(&self) -> &str;
}

/// Token estimation strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimationMethod {
    /// Simple character-based estimation (4 chars ≈ 1 token for English)
    CharacterBased,
    /// Word-based estimation (1 word ≈ 1.3 tokens)
    WordBased,
    /// Higher of the two, times a safety margin
    #[default]
    Conservative,
}

/// Heuristic token estimator.
#[derive(Debug, Clone)]
pub struct TokenEstimator {
    method: EstimationMethod,
    /// Multiplier for conservative estimation
    safety_margin: f64,
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new(EstimationMethod::Conservative)
    }
}

impl TokenEstimator {
    /// Create a new token estimator with the specified method.
    pub fn new(method: EstimationMethod) -> Self {
        let safety_margin = match method {
            EstimationMethod::CharacterBased | EstimationMethod::WordBased => 1.0,
            EstimationMethod::Conservative => 1.1,
        };
        Self {
            method,
            safety_margin,
        }
    }

    /// Create a conservative estimator with custom safety margin.
    pub fn conservative(safety_margin: f64) -> Self {
        Self {
            method: EstimationMethod::Conservative,
            safety_margin: safety_margin.max(1.0),
        }
    }

    pub fn method(&self) -> EstimationMethod {
        self.method
    }

    fn estimate_by_chars(text: &str) -> u64 {
        let chars = text.chars().count() as u64;
        chars.div_ceil(4)
    }

    fn estimate_by_words(text: &str) -> u64 {
        let words = text.split_whitespace().count();
        (words as f64 * 1.3).ceil() as u64
    }
}

impl TokenCounter for TokenEstimator {
    fn count(&self, text: &str) -> u64 {
        let base = match self.method {
            EstimationMethod::CharacterBased => Self::estimate_by_chars(text),
            EstimationMethod::WordBased => Self::estimate_by_words(text),
            EstimationMethod::Conservative => {
                Self::estimate_by_chars(text).max(Self::estimate_by_words(text))
            }
        };
        (base as f64 * self.safety_margin).ceil() as u64
    }

    fn name(&self) -> &str {
        match self.method {
            EstimationMethod::CharacterBased => "heuristic-chars",
            EstimationMethod::WordBased => "heuristic-words",
            EstimationMethod::Conservative => "heuristic-conservative",
        }
    }
}

/// Charges the same number of tokens for every payload.
///
/// Used for capacity planning when every record is assumed to cost the same.
#[derive(Debug, Clone, Copy)]
pub struct FixedCounter {
    tokens: u64,
}

impl FixedCounter {
    pub fn new(tokens: u64) -> Self {
        Self { tokens }
    }
}

impl TokenCounter for FixedCounter {
    fn count(&self, _text: &str) -> u64 {
        self.tokens
    }

    fn count_chat(&self, _messages: &[ChatMessage]) -> u64 {
        self.tokens
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

#[cfg(feature = "tiktoken")]
mod bpe {
    use super::TokenCounter;

    /// Exact BPE counts for OpenAI models.
    pub struct BpeCounter {
        model: String,
        bpe: tiktoken_rs::CoreBPE,
    }

    impl BpeCounter {
        /// Load the encoding for `model`, or `None` if the model is unknown.
        pub fn for_model(model: &str) -> Option<Self> {
            let bpe = tiktoken_rs::get_bpe_from_model(model).ok()?;
            Some(Self {
                model: model.to_string(),
                bpe,
            })
        }
    }

    impl TokenCounter for BpeCounter {
        fn count(&self, text: &str) -> u64 {
            self.bpe.encode_with_special_tokens(text).len() as u64
        }

        fn name(&self) -> &str {
            &self.model
        }
    }
}

#[cfg(feature = "tiktoken")]
pub use bpe::BpeCounter;

/// Select the counting strategy for a model.
pub fn counter_for_model(model: &str) -> Arc<dyn TokenCounter> {
    #[cfg(feature = "tiktoken")]
    {
        if let Some(counter) = BpeCounter::for_model(model) {
            return Arc::new(counter);
        }
    }
    tracing::debug!(model, "using heuristic token estimator");
    Arc::new(TokenEstimator::default())
}

/// Token count for an interaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCount {
    /// Input/prompt tokens
    pub input_tokens: u64,
    /// Output/completion tokens
    pub output_tokens: u64,
}

impl TokenCount {
    pub fn new(input: u64, output: u64) -> Self {
        Self {
            input_tokens: input,
            output_tokens: output,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

impl std::ops::Add for TokenCount {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            input_tokens: self.input_tokens + other.input_tokens,
            output_tokens: self.output_tokens + other.output_tokens,
        }
    }
}

impl std::ops::AddAssign for TokenCount {
    fn add_assign(&mut self, other: Self) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_char_estimation() {
        let estimator = TokenEstimator::new(EstimationMethod::CharacterBased);
        // 13 chars -> 4 tokens
        assert_eq!(estimator.count("Hello, World!"), 4);
    }

    #[test]
    fn test_word_estimation() {
        let estimator = TokenEstimator::new(EstimationMethod::WordBased);
        assert_eq!(estimator.count("Hello World"), 3);
    }

    #[test]
    fn test_conservative_not_below_char_estimate() {
        let text = "This is a test sentence for token estimation.";
        let char_est = TokenEstimator::new(EstimationMethod::CharacterBased).count(text);
        assert!(TokenEstimator::default().count(text) >= char_est);
    }

    #[test]
    fn test_empty_string() {
        assert_eq!(TokenEstimator::default().count(""), 0);
    }

    #[test]
    fn test_estimation_is_deterministic() {
        let estimator = TokenEstimator::default();
        let text = "Travel photographer based in Lisbon";
        assert_eq!(estimator.count(text), estimator.count(text));
    }

    #[test]
    fn test_chat_overhead() {
        let estimator = TokenEstimator::new(EstimationMethod::CharacterBased);
        let messages = vec![ChatMessage::system("abcd"), ChatMessage::user("abcdefgh")];
        // reply priming 3 + (3 + role + content) per message
        let expected = 3 + (3 + 2 + 1) + (3 + 1 + 2);
        assert_eq!(estimator.count_chat(&messages), expected);
    }

    #[test]
    fn test_chat_name_costs_extra() {
        let estimator = TokenEstimator::new(EstimationMethod::CharacterBased);
        let plain = vec![ChatMessage::user("hi")];
        let mut named = plain.clone();
        named[0].name = Some("bob".to_string());
        assert_eq!(estimator.count_chat(&named), estimator.count_chat(&plain) + 2);
    }

    #[test]
    fn test_fixed_counter() {
        let counter = FixedCounter::new(300);
        assert_eq!(counter.count("anything"), 300);
        assert_eq!(counter.count_chat(&[ChatMessage::user("x")]), 300);
    }

    #[test]
    fn test_token_count_operations() {
        let mut sum = TokenCount::new(100, 200) + TokenCount::new(50, 100);
        assert_eq!(sum.total(), 450);
        sum += TokenCount::new(1, 1);
        assert_eq!(sum.input_tokens, 151);
    }
}

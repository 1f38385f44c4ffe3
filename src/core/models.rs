//! Core data models for translation

use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

/// Translation model information and published pricing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Model identifier sent to the API
    pub id: String,
    /// USD per one million input tokens
    pub input_price_per_million: f64,
    /// USD per one million output tokens
    pub output_price_per_million: f64,
    /// Hard ceiling on output tokens for a single response
    pub max_output_tokens: u32,
}

impl ModelSpec {
    /// Create a model entry
    pub fn new(
        id: impl Into<String>,
        input_price_per_million: f64,
        output_price_per_million: f64,
        max_output_tokens: u32,
    ) -> Self {
        Self {
            id: id.into(),
            input_price_per_million,
            output_price_per_million,
            max_output_tokens,
        }
    }

    /// Cost of a call from the actual usage reported by the remote
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 / 1_000_000.0) * self.input_price_per_million
            + (output_tokens as f64 / 1_000_000.0) * self.output_price_per_million
    }
}

/// Wire-level translation request for one chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationRequest {
    /// Model identifier
    pub model: String,
    /// Rendered system prompt
    pub system_prompt: String,
    /// Chunk text to translate
    pub user_text: String,
    /// Sampling temperature
    pub temperature: f32,
    /// Response token budget
    pub max_output_tokens: u32,
}

/// Translation result for one remote call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationResult {
    /// Trimmed translation
    pub translated_text: String,
    /// Prompt tokens reported by the remote
    pub input_tokens: u64,
    /// Completion tokens reported by the remote
    pub output_tokens: u64,
    /// Cost in USD
    pub cost: f64,
}

impl TranslationResult {
    /// Usage carried by this result
    pub fn usage(&self) -> TokenUsage {
        TokenUsage {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            cost: self.cost,
        }
    }
}

/// Accumulated token usage and spend
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Total prompt tokens
    pub input_tokens: u64,
    /// Total completion tokens
    pub output_tokens: u64,
    /// Total cost in USD
    pub cost: f64,
}

impl TokenUsage {
    /// Input plus output tokens
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// True before any usage was recorded
    pub fn is_zero(&self) -> bool {
        self.input_tokens == 0 && self.output_tokens == 0 && self.cost == 0.0
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, other: Self) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        // Negative costs never come from the client; clamp so the total stays monotonic.
        self.cost += other.cost.max(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cost_from_actual_usage() {
        let model = ModelSpec::new("m", 2.0, 8.0, 4096);
        let cost = model.cost(500_000, 250_000);
        assert!((cost - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_usage_accumulates() {
        let mut usage = TokenUsage::default();
        usage += TokenUsage { input_tokens: 10, output_tokens: 20, cost: 0.5 };
        usage += TokenUsage { input_tokens: 1, output_tokens: 2, cost: 0.25 };

        assert_eq!(usage.input_tokens, 11);
        assert_eq!(usage.output_tokens, 22);
        assert_eq!(usage.total_tokens(), 33);
        assert!((usage.cost - 0.75).abs() < 1e-9);
    }
}

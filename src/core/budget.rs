//! Token estimation and response budgeting

use serde::{Deserialize, Serialize};

use crate::core::models::ModelSpec;

/// Translated text is typically 0.8-1.5x the source length
pub const OUTPUT_EXPANSION: f64 = 1.5;

/// Headroom for formatting the model adds around the translation
pub const OUTPUT_OVERHEAD_TOKENS: u32 = 256;

/// Smallest response budget ever requested
pub const MIN_OUTPUT_TOKENS: u32 = 1024;

/// Character-count based token estimator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeEstimator {
    chars_per_token: usize,
}

impl Default for SizeEstimator {
    fn default() -> Self {
        Self { chars_per_token: 4 }
    }
}

impl SizeEstimator {
    /// Create an estimator; a zero divisor is treated as one
    pub fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }

    /// Estimated tokens for `text`, rounded up
    pub fn estimate(&self, text: &str) -> usize {
        text.chars().count().div_ceil(self.chars_per_token)
    }
}

/// Response token budget for a chunk of `input_tokens` estimated tokens
///
/// Never below [`MIN_OUTPUT_TOKENS`] and never above the model's ceiling.
/// When the ceiling itself is below the floor, the ceiling wins.
pub fn max_output_tokens(input_tokens: usize, model: &ModelSpec) -> u32 {
    let expanded = (input_tokens as f64 * OUTPUT_EXPANSION).ceil() as u32;
    let wanted = expanded
        .saturating_add(OUTPUT_OVERHEAD_TOKENS)
        .max(MIN_OUTPUT_TOKENS);
    wanted.min(model.max_output_tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_rounds_up() {
        let estimator = SizeEstimator::new(4);
        assert_eq!(estimator.estimate(""), 0);
        assert_eq!(estimator.estimate("abc"), 1);
        assert_eq!(estimator.estimate("abcd"), 1);
        assert_eq!(estimator.estimate("abcde"), 2);
    }

    #[test]
    fn test_estimate_counts_chars_not_bytes() {
        let estimator = SizeEstimator::new(2);
        assert_eq!(estimator.estimate("ção!"), 2);
    }

    #[test]
    fn test_output_budget_bounds() {
        let model = ModelSpec::new("m", 0.0, 0.0, 8192);

        assert_eq!(max_output_tokens(10, &model), MIN_OUTPUT_TOKENS);
        assert_eq!(max_output_tokens(2000, &model), 3000 + OUTPUT_OVERHEAD_TOKENS);
        assert_eq!(max_output_tokens(100_000, &model), 8192);
    }

    #[test]
    fn test_small_ceiling_wins_over_floor() {
        let model = ModelSpec::new("tiny", 0.0, 0.0, 512);
        assert_eq!(max_output_tokens(10, &model), 512);
    }
}

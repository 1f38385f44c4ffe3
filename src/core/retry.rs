//! Bounded retry with per-class backoff

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::core::config::TranslatorConfig;
use crate::core::errors::{ErrorClass, Result, TranslationError};

/// Why a chunk ended up untranslated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Chunk does not fit the model at the current budget; never retried
    ChunkTooLarge,
    /// Every attempt failed
    RetriesExhausted,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::ChunkTooLarge => write!(f, "chunk too large"),
            FailureKind::RetriesExhausted => write!(f, "retries exhausted"),
        }
    }
}

/// Terminal outcome of a retried operation that never succeeded
#[derive(Debug, Clone, PartialEq)]
pub struct FinalFailure {
    /// Why the chunk gave up
    pub kind: FailureKind,
    /// Last error message
    pub reason: String,
    /// Source text of the chunk
    pub original_text: String,
    /// Calls made
    pub attempts: u32,
}

/// Retry policy constants
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Calls allowed per operation, at least 1
    pub max_attempts: u32,
    /// Step of the linear curve for transient errors
    pub transient_delay: Duration,
    /// Base of the exponential curve for rate limits
    pub rate_limit_delay: Duration,
    /// Cap of the exponential curve
    pub rate_limit_max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&TranslatorConfig::default())
    }
}

impl RetryPolicy {
    /// Policy from the service configuration
    pub fn from_config(config: &TranslatorConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            transient_delay: Duration::from_millis(config.retry_delay_ms),
            rate_limit_delay: Duration::from_millis(config.rate_limit_delay_ms),
            rate_limit_max_delay: Duration::from_millis(config.rate_limit_max_delay_ms),
        }
    }

    /// Policy with no waiting, for tests and dry runs
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            transient_delay: Duration::ZERO,
            rate_limit_delay: Duration::ZERO,
            rate_limit_max_delay: Duration::ZERO,
        }
    }

    /// Delay before the retry following failed attempt number `attempt` (1-based)
    pub fn delay_for(&self, class: ErrorClass, attempt: u32, retry_after: Option<u64>) -> Duration {
        match class {
            ErrorClass::RateLimited => {
                let exponent = attempt.saturating_sub(1).min(16);
                let curve = self.rate_limit_delay.saturating_mul(1 << exponent);
                let hinted = retry_after.map(Duration::from_secs).unwrap_or(Duration::ZERO);
                curve.max(hinted).min(self.rate_limit_max_delay)
            }
            ErrorClass::Transient => self.transient_delay.saturating_mul(attempt),
            ErrorClass::ChunkTooLarge => Duration::ZERO,
        }
    }
}

/// Run `operation` until it succeeds, hits a non-retryable error, or the
/// attempt budget runs out
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    original_text: &str,
    mut operation: F,
) -> std::result::Result<T, FinalFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error: Option<TranslationError> = None;

    for attempt in 1..=policy.max_attempts {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    info!("Succeeded after {} attempts", attempt);
                }
                return Ok(value);
            }
            Err(e) => {
                let class = e.class();
                if class == ErrorClass::ChunkTooLarge {
                    warn!("Chunk too large, not retrying: {}", e);
                    return Err(FinalFailure {
                        kind: FailureKind::ChunkTooLarge,
                        reason: e.to_string(),
                        original_text: original_text.to_string(),
                        attempts: attempt,
                    });
                }

                if attempt < policy.max_attempts {
                    let delay = policy.delay_for(class, attempt, e.retry_after());
                    debug!(
                        "Attempt {}/{} failed ({:?}): {}; retrying in {:?}",
                        attempt, policy.max_attempts, class, e, delay
                    );
                    if !delay.is_zero() {
                        sleep(delay).await;
                    }
                } else {
                    warn!("Attempt {}/{} failed: {}", attempt, policy.max_attempts, e);
                }
                last_error = Some(e);
            }
        }
    }

    Err(FinalFailure {
        kind: FailureKind::RetriesExhausted,
        reason: last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempts made".to_string()),
        original_text: original_text.to_string(),
        attempts: policy.max_attempts,
    })
}

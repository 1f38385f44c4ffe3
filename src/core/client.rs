//! Async translation client for OpenAI-compatible chat endpoints

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::core::budget::{max_output_tokens, SizeEstimator};
use crate::core::config::TranslatorConfig;
use crate::core::errors::{Result, TranslationError};
use crate::core::models::{ModelSpec, TranslationRequest, TranslationResult};
use crate::core::prompt::PromptConfig;

/// One remote translation call: chunk + prompt -> translated text + usage
#[async_trait]
pub trait Translate: Send + Sync + std::fmt::Debug {
    /// Translate `chunk_text` with `prompt` on `model`
    async fn translate(
        &self,
        chunk_text: &str,
        prompt: &PromptConfig,
        model: &ModelSpec,
    ) -> Result<TranslationResult>;
}

/// Markers in an error body that mean the remote is throttling us
const RATE_LIMIT_MARKERS: &[&str] = &[
    "rate limit",
    "rate_limit",
    "quota",
    "resource_exhausted",
    "too many requests",
];

/// Markers in an error body that mean the chunk is too large for the model
const TOO_LARGE_MARKERS: &[&str] = &[
    "context_length_exceeded",
    "maximum context length",
    "too large",
    "token limit",
    "too many tokens",
];

/// HTTP translation client
#[derive(Debug, Clone)]
pub struct AsyncTranslator {
    client: reqwest::Client,
    config: Arc<TranslatorConfig>,
    estimator: SizeEstimator,
}

impl AsyncTranslator {
    /// Create a new async translator; fails without credentials
    pub fn new(config: TranslatorConfig) -> Result<Self> {
        config.validate()?;

        let timeout = Duration::from_millis(config.timeout_ms);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Some(Duration::from_secs(30)))
            .pool_max_idle_per_host(4)
            .build()?;

        let estimator = SizeEstimator::new(config.chars_per_token);

        Ok(Self {
            client,
            config: Arc::new(config),
            estimator,
        })
    }

    /// Create from environment
    pub fn from_env() -> Result<Self> {
        let config = TranslatorConfig::load()?;
        Self::new(config)
    }

    /// Build the wire request for a chunk
    pub fn build_request(
        &self,
        chunk_text: &str,
        prompt: &PromptConfig,
        model: &ModelSpec,
    ) -> TranslationRequest {
        let input_tokens = self.estimator.estimate(chunk_text)
            + self.estimator.estimate(&prompt.system_prompt);

        TranslationRequest {
            model: model.id.clone(),
            system_prompt: prompt.system_prompt.clone(),
            user_text: chunk_text.to_string(),
            temperature: prompt.temperature,
            max_output_tokens: max_output_tokens(input_tokens, model),
        }
    }

    /// Send actual HTTP request
    async fn send_request(
        &self,
        request: &TranslationRequest,
        model: &ModelSpec,
    ) -> Result<TranslationResult> {
        let body = serde_json::json!({
            "model": request.model,
            "messages": [
                { "role": "system", "content": request.system_prompt },
                { "role": "user", "content": request.user_text }
            ],
            "temperature": request.temperature,
            "max_tokens": request.max_output_tokens
        });

        let response = self
            .client
            .post(&self.config.api_endpoint)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TranslationError::TimeoutError
                } else {
                    TranslationError::NetworkError {
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();

        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let error_text = response.text().await.unwrap_or_default();
            return Err(classify_failure(status.as_u16(), &error_text, retry_after));
        }

        let json: serde_json::Value =
            response
                .json()
                .await
                .map_err(|e| TranslationError::InvalidResponseError {
                    message: e.to_string(),
                })?;

        parse_response(&json, model)
    }
}

#[async_trait]
impl Translate for AsyncTranslator {
    async fn translate(
        &self,
        chunk_text: &str,
        prompt: &PromptConfig,
        model: &ModelSpec,
    ) -> Result<TranslationResult> {
        let request = self.build_request(chunk_text, prompt, model);
        debug!(
            "Sending {} chars to {} (max_tokens={})",
            chunk_text.len(),
            model.id,
            request.max_output_tokens
        );
        self.send_request(&request, model).await
    }
}

/// Map a non-success response onto the error taxonomy
pub fn classify_failure(status: u16, body: &str, retry_after: Option<u64>) -> TranslationError {
    let lowered = body.to_lowercase();

    if status == 429 || RATE_LIMIT_MARKERS.iter().any(|m| lowered.contains(m)) {
        return TranslationError::RateLimitError { retry_after };
    }

    if status == 413 || TOO_LARGE_MARKERS.iter().any(|m| lowered.contains(m)) {
        return TranslationError::ContentTooLarge {
            message: body.to_string(),
        };
    }

    TranslationError::ApiError {
        status,
        message: body.to_string(),
    }
}

/// Extract text and usage from a chat completion body
pub fn parse_response(json: &serde_json::Value, model: &ModelSpec) -> Result<TranslationResult> {
    let choice = json["choices"]
        .get(0)
        .ok_or_else(|| TranslationError::InvalidResponseError {
            message: "No choices in response".to_string(),
        })?;

    if choice["finish_reason"].as_str() == Some("length") {
        return Err(TranslationError::ContentTooLarge {
            message: "Response truncated at the output token ceiling".to_string(),
        });
    }

    let translated_text = choice["message"]["content"]
        .as_str()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| TranslationError::InvalidResponseError {
            message: "No translation in response".to_string(),
        })?
        .trim()
        .to_string();

    let input_tokens = json["usage"]["prompt_tokens"].as_u64().unwrap_or(0);
    let output_tokens = json["usage"]["completion_tokens"].as_u64().unwrap_or(0);

    Ok(TranslationResult {
        translated_text,
        input_tokens,
        output_tokens,
        cost: model.cost(input_tokens, output_tokens),
    })
}

//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::core::errors::{Result, TranslationError};
use crate::core::models::ModelSpec;
use crate::core::prompt::DEFAULT_PROMPT_TEMPLATE;

/// Service-level configuration for the translator and pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslatorConfig {
    /// Bearer token for the chat-completions endpoint
    pub api_key: String,
    /// Full chat-completions URL
    pub api_endpoint: String,
    /// Models a job may select
    pub models: Vec<ModelSpec>,
    /// Calls per chunk before it is tagged as failed
    pub max_attempts: u32,
    /// Linear backoff step for transient errors
    pub retry_delay_ms: u64,
    /// Base of the rate-limit backoff curve
    pub rate_limit_delay_ms: u64,
    /// Cap of the rate-limit backoff curve
    pub rate_limit_max_delay_ms: u64,
    /// Per-request timeout
    pub timeout_ms: u64,
    /// Chunks processed between checkpoints
    pub checkpoint_every: usize,
    /// Size estimator ratio
    pub chars_per_token: usize,
    /// Directory of the file checkpoint store
    pub checkpoint_dir: PathBuf,
    /// Tolerance of the language guard
    pub quality_margin: usize,
}

/// Default OpenAI-compatible endpoint
const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

/// Default models configuration: (id, input $/M, output $/M, max output tokens)
const DEFAULT_MODELS: &[(&str, f64, f64, u32)] = &[
    ("gpt-4o-mini", 0.15, 0.60, 16384),
    ("gpt-4o", 2.50, 10.00, 16384),
    ("deepseek-chat", 0.27, 1.10, 8192),
    ("gemini-2.0-flash", 0.10, 0.40, 8192),
];

fn default_models() -> Vec<ModelSpec> {
    DEFAULT_MODELS
        .iter()
        .map(|(id, input, output, ceiling)| ModelSpec::new(*id, *input, *output, *ceiling))
        .collect()
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_endpoint: DEFAULT_ENDPOINT.to_string(),
            models: default_models(),
            max_attempts: 3,
            retry_delay_ms: 1000,
            rate_limit_delay_ms: 5000,
            rate_limit_max_delay_ms: 60000,
            timeout_ms: 120000,
            checkpoint_every: 3,
            chars_per_token: 4,
            checkpoint_dir: PathBuf::from(".checkpoints"),
            quality_margin: 2,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: {}", key, e)),
        Err(_) => Ok(default),
    }
}

impl TranslatorConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = std::env::var("TRANSLATOR_API_KEY")
            .map_err(|_| anyhow::anyhow!("TRANSLATOR_API_KEY environment variable is required"))?;

        Self::from_env_with_key(api_key)
    }

    /// Load configuration for commands that never call the API.
    ///
    /// The API key is optional here and only the retry and checkpoint
    /// settings are validated.
    pub fn load_local() -> anyhow::Result<Self> {
        let api_key = std::env::var("TRANSLATOR_API_KEY").unwrap_or_default();
        let config = Self::from_env_with_key(api_key)?;
        config.validate_policy()?;
        Ok(config)
    }

    fn from_env_with_key(api_key: String) -> anyhow::Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            api_key,
            api_endpoint: std::env::var("API_ENDPOINT").unwrap_or(defaults.api_endpoint),
            models: defaults.models,
            max_attempts: env_or("MAX_RETRIES", defaults.max_attempts)?,
            retry_delay_ms: env_or("RETRY_DELAY_MS", defaults.retry_delay_ms)?,
            rate_limit_delay_ms: env_or("RATE_LIMIT_DELAY_MS", defaults.rate_limit_delay_ms)?,
            rate_limit_max_delay_ms: env_or(
                "RATE_LIMIT_MAX_DELAY_MS",
                defaults.rate_limit_max_delay_ms,
            )?,
            timeout_ms: env_or("REQUEST_TIMEOUT_MS", defaults.timeout_ms)?,
            checkpoint_every: env_or("CHECKPOINT_EVERY", defaults.checkpoint_every)?,
            chars_per_token: env_or("CHARS_PER_TOKEN", defaults.chars_per_token)?,
            checkpoint_dir: std::env::var("CHECKPOINT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.checkpoint_dir),
            quality_margin: defaults.quality_margin,
        })
    }

    /// Load configuration, falling back to the default model table
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::from_env()?;

        if config.models.is_empty() {
            config.models = default_models();
            info!("Loaded {} default models", config.models.len());
        }

        Ok(config)
    }

    /// Load from a JSON or YAML file, chosen by extension
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            _ => serde_json::from_str(&content)?,
        };
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.api_key.is_empty() {
            return Err(TranslationError::MissingField {
                field: "api_key".to_string(),
            });
        }

        if self.api_endpoint.is_empty() {
            return Err(TranslationError::MissingField {
                field: "api_endpoint".to_string(),
            });
        }

        self.validate_policy()
    }

    /// Validate the pipeline policy constants, independent of credentials
    pub fn validate_policy(&self) -> Result<()> {
        if self.models.is_empty() {
            warn!("No models configured");
        }

        if self.max_attempts == 0 {
            return Err(config_error("max_attempts must be greater than 0"));
        }

        if self.checkpoint_every == 0 {
            return Err(config_error("checkpoint_every must be greater than 0"));
        }

        if self.chars_per_token == 0 {
            return Err(config_error("chars_per_token must be greater than 0"));
        }

        Ok(())
    }

    /// Find model by ID
    pub fn find_model(&self, id: &str) -> Option<&ModelSpec> {
        self.models.iter().find(|m| m.id == id)
    }

    /// Get all available model IDs
    pub fn get_model_ids(&self) -> Vec<String> {
        self.models.iter().map(|m| m.id.clone()).collect()
    }
}

fn config_error(message: &str) -> TranslationError {
    TranslationError::ConfigError {
        message: message.to_string(),
    }
}

/// Per-job configuration, frozen once translation starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Model id from the configured table
    pub model: String,
    /// System prompt with `{source_lang}` and `{target_lang}` placeholders
    pub prompt_template: String,
    /// Estimated tokens allowed per chunk
    pub chunk_size_budget: usize,
    /// Source language; `None` lets the model detect it
    pub source_lang: Option<String>,
    /// Language to translate into
    pub target_lang: String,
    /// Sampling temperature for normal requests
    pub temperature: f32,
}

impl JobConfig {
    /// Job with the default prompt and a 1500 token budget
    pub fn new(model: impl Into<String>, target_lang: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt_template: DEFAULT_PROMPT_TEMPLATE.to_string(),
            chunk_size_budget: 1500,
            source_lang: None,
            target_lang: target_lang.into(),
            temperature: 0.3,
        }
    }

    /// Set the source language
    pub fn with_source_lang(mut self, source_lang: impl Into<String>) -> Self {
        self.source_lang = Some(source_lang.into());
        self
    }

    /// Set the per-chunk token budget
    pub fn with_budget(mut self, chunk_size_budget: usize) -> Self {
        self.chunk_size_budget = chunk_size_budget;
        self
    }

    /// Replace the prompt template
    pub fn with_prompt_template(mut self, template: impl Into<String>) -> Self {
        self.prompt_template = template.into();
        self
    }

    /// Validate against the service configuration
    pub fn validate(&self, config: &TranslatorConfig) -> Result<()> {
        if self.chunk_size_budget == 0 {
            return Err(config_error("chunk_size_budget must be greater than 0"));
        }

        if self.prompt_template.trim().is_empty() {
            return Err(TranslationError::MissingField {
                field: "prompt_template".to_string(),
            });
        }

        if self.target_lang.trim().is_empty() {
            return Err(TranslationError::MissingField {
                field: "target_lang".to_string(),
            });
        }

        if config.find_model(&self.model).is_none() {
            return Err(TranslationError::ConfigError {
                message: format!("Unknown model: {}", self.model),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        let config = TranslatorConfig {
            api_key: "test_key".to_string(),
            api_endpoint: "https://test.com".to_string(),
            ..Default::default()
        };

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_missing_key() {
        let config = TranslatorConfig {
            api_key: "".to_string(),
            ..Default::default()
        };

        assert!(matches!(
            config.validate(),
            Err(TranslationError::MissingField { .. })
        ));
    }

    #[test]
    fn test_zero_checkpoint_interval_rejected() {
        let config = TranslatorConfig {
            api_key: "k".to_string(),
            checkpoint_every: 0,
            ..Default::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_local_load_needs_no_api_key() {
        std::env::remove_var("TRANSLATOR_API_KEY");

        let config = TranslatorConfig::load_local().unwrap();
        assert!(config.api_key.is_empty());
        assert!(TranslatorConfig::from_env().is_err());
    }

    #[test]
    fn test_yaml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let config = TranslatorConfig {
            api_key: "yaml_key".to_string(),
            checkpoint_every: 5,
            ..Default::default()
        };
        std::fs::write(&path, serde_yaml::to_string(&config).unwrap()).unwrap();

        let loaded = TranslatorConfig::from_file(&path).unwrap();
        assert_eq!(loaded.api_key, "yaml_key");
        assert_eq!(loaded.checkpoint_every, 5);
        assert_eq!(loaded.models, config.models);
    }

    #[test]
    fn test_job_config_validation() {
        let config = TranslatorConfig::default();

        assert!(JobConfig::new("gpt-4o-mini", "en").validate(&config).is_ok());
        assert!(JobConfig::new("no-such-model", "en").validate(&config).is_err());
        assert!(JobConfig::new("gpt-4o-mini", "en")
            .with_budget(0)
            .validate(&config)
            .is_err());
        assert!(JobConfig::new("gpt-4o-mini", "en")
            .with_prompt_template("  ")
            .validate(&config)
            .is_err());
    }
}

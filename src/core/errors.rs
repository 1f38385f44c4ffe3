//! Custom error types for translation operations

use thiserror::Error;

/// Translation-related errors
#[derive(Error, Debug)]
pub enum TranslationError {
    /// API request failed
    #[error("API error: {status} - {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error detail
        message: String,
    },

    /// Rate limit or quota exceeded
    #[error("Rate limit exceeded. Retry after {retry_after:?} seconds")]
    RateLimitError {
        /// Seconds from the Retry-After header
        retry_after: Option<u64>,
    },

    /// The chunk (or its translation) does not fit the model's token limits
    #[error("Content too large: {message}")]
    ContentTooLarge {
        /// Error detail
        message: String,
    },

    /// Network error
    #[error("Network error: {message}")]
    NetworkError {
        /// Error detail
        message: String,
    },

    /// Invalid response from API
    #[error("Invalid response: {message}")]
    InvalidResponseError {
        /// Error detail
        message: String,
    },

    /// Request timeout
    #[error("Request timeout")]
    TimeoutError,

    /// Configuration error
    #[error("Configuration error: {message}")]
    ConfigError {
        /// Error detail
        message: String,
    },

    /// Missing required field
    #[error("Missing required field: {field}")]
    MissingField {
        /// Name of the missing field
        field: String,
    },

    /// Job has no chunks to translate
    #[error("Document produced no chunks to translate")]
    EmptyDocument,

    /// Lifecycle operation not allowed in the current run state
    #[error("Cannot {action} a job that is {from}")]
    InvalidState {
        /// Current run state
        from: String,
        /// Rejected operation
        action: String,
    },

    /// A processing loop is already active for this job
    #[error("Job {job_id} is already running")]
    AlreadyRunning {
        /// Affected job
        job_id: String,
    },

    /// Checkpoint store failure
    #[error("Checkpoint error: {message}")]
    CheckpointError {
        /// Error detail
        message: String,
    },

    /// Source text handed to a resume does not match the checkpoint
    #[error("Source mismatch for job {job_id}: {message}")]
    SourceMismatch {
        /// Affected job
        job_id: String,
        /// Error detail
        message: String,
    },

    /// Wrapper for anyhow errors
    #[error("Internal error: {0}")]
    InternalError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Reqwest error
    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

/// How the retry controller treats an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry with the exponential rate-limit curve
    RateLimited,
    /// Never retry; the chunk cannot be processed at its current size
    ChunkTooLarge,
    /// Retry with a short linear delay
    Transient,
}

impl TranslationError {
    /// Classify this error for retry purposes
    pub fn class(&self) -> ErrorClass {
        match self {
            TranslationError::RateLimitError { .. } => ErrorClass::RateLimited,
            TranslationError::ContentTooLarge { .. } => ErrorClass::ChunkTooLarge,
            _ => ErrorClass::Transient,
        }
    }

    /// Server-provided retry hint, if any
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            TranslationError::RateLimitError { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<anyhow::Error> for TranslationError {
    fn from(err: anyhow::Error) -> Self {
        TranslationError::InternalError(err.to_string())
    }
}

/// Result type for translation operations
pub type Result<T> = std::result::Result<T, TranslationError>;

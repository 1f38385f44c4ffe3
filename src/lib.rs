//! Long-document translator - resumable chunked translation over chat-completion APIs
//!
//! Documents are split into paragraph-aware chunks, each chunk is translated
//! with rate-limit aware retries and a language quality guard, and progress is
//! checkpointed so a paused or interrupted job can continue where it left off.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod core;
pub mod pipeline;
pub mod processors;
pub mod server;

// Re-export key types for convenience
pub use core::{
    client::{AsyncTranslator, Translate},
    config::{JobConfig, TranslatorConfig},
    errors::TranslationError,
    models::{ModelSpec, TokenUsage, TranslationRequest, TranslationResult},
};

pub use pipeline::{
    checkpoint::{CheckpointStore, FileCheckpointStore, JobSnapshot, MemoryCheckpointStore},
    job::{ChunkOutcome, JobSummary, ProgressEvent, RunState, TranslationJob},
    orchestrator::Orchestrator,
};

pub use processors::chunker::{Chunk, Chunker};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

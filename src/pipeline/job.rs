//! Translation job state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

use crate::core::budget::SizeEstimator;
use crate::core::config::JobConfig;
use crate::core::models::TokenUsage;
use crate::core::retry::{FailureKind, FinalFailure};
use crate::processors::chunker::{Chunk, Chunker};

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Created, not started
    Idle,
    /// A chunk loop is active
    Running,
    /// Halted at a chunk boundary; resumable
    Paused,
    /// Abandoned by the user
    Stopped,
    /// Every chunk has an outcome
    Completed,
}

impl RunState {
    /// Stopped and Completed end a job instance
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Stopped | RunState::Completed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Paused => "paused",
            RunState::Stopped => "stopped",
            RunState::Completed => "completed",
        };
        write!(f, "{}", name)
    }
}

/// Quality annotation on a successful chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityNote {
    /// Passed the guard on the first answer
    Accepted,
    /// Passed after the corrective re-request
    Corrected,
    /// Still looked like the source language; accepted as-is
    Suspect,
}

/// Result slot for one chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChunkOutcome {
    /// Not processed yet
    Pending,
    /// Translated text with its quality note
    Success {
        /// Translated text
        text: String,
        /// Guard verdict
        quality: QualityNote,
    },
    /// Tagged failure keeping the source text
    Failed {
        /// Why the chunk gave up
        kind: FailureKind,
        /// Last error message
        reason: String,
        /// Source text, kept for export
        original_text: String,
    },
}

impl ChunkOutcome {
    /// No attempt recorded yet
    pub fn is_pending(&self) -> bool {
        matches!(self, ChunkOutcome::Pending)
    }

    /// Tagged as failed
    pub fn is_failed(&self) -> bool {
        matches!(self, ChunkOutcome::Failed { .. })
    }

    /// Compact status for progress events
    pub fn status(&self) -> ChunkStatus {
        match self {
            ChunkOutcome::Pending => ChunkStatus::Pending,
            ChunkOutcome::Success {
                quality: QualityNote::Suspect,
                ..
            } => ChunkStatus::Suspect,
            ChunkOutcome::Success { .. } => ChunkStatus::Success,
            ChunkOutcome::Failed { .. } => ChunkStatus::Failed,
        }
    }
}

impl From<FinalFailure> for ChunkOutcome {
    fn from(failure: FinalFailure) -> Self {
        ChunkOutcome::Failed {
            kind: failure.kind,
            reason: failure.reason,
            original_text: failure.original_text,
        }
    }
}

/// Compact outcome for progress reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    /// Not processed
    Pending,
    /// Translated
    Success,
    /// Translated but flagged by the guard
    Suspect,
    /// Gave up
    Failed,
}

/// Identifies the document a job was created from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// File name or label
    pub name: String,
    /// Length in characters
    pub char_count: usize,
    /// SHA-256 of the source text, hex encoded
    pub fingerprint: String,
}

impl SourceDescriptor {
    /// Describe and fingerprint `text`
    pub fn describe(name: impl Into<String>, text: &str) -> Self {
        Self {
            name: name.into(),
            char_count: text.chars().count(),
            fingerprint: fingerprint(text),
        }
    }
}

/// SHA-256 fingerprint of a source text
pub fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Emitted after each chunk attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Job the event belongs to
    pub job_id: String,
    /// Next chunk index
    pub cursor: usize,
    /// Chunks in the job
    pub total_chunks: usize,
    /// Chunk just attempted
    pub chunk_index: usize,
    /// Tokens spent so far
    pub tokens_used: u64,
    /// USD spent so far
    pub cost_so_far: f64,
    /// Outcome of the attempted chunk
    pub last_chunk_outcome: ChunkStatus,
}

/// Success/failure breakdown of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    /// Job id
    pub job_id: String,
    /// Current run state
    pub state: RunState,
    /// Next chunk index
    pub cursor: usize,
    /// Chunks in the job
    pub total_chunks: usize,
    /// Translated chunks, suspect ones included
    pub succeeded: usize,
    /// Translated chunks flagged by the guard
    pub suspect: usize,
    /// Tagged failures
    pub failed: usize,
    /// Chunks without an outcome
    pub pending: usize,
    /// Indices of the tagged failures
    pub failed_indices: Vec<usize>,
    /// Accumulated usage
    pub usage: TokenUsage,
}

/// One document's end-to-end translation run
#[derive(Debug, Clone)]
pub struct TranslationJob {
    pub(crate) id: String,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) source: SourceDescriptor,
    pub(crate) config: JobConfig,
    pub(crate) chunks: Vec<Chunk>,
    pub(crate) cursor: usize,
    pub(crate) results: Vec<ChunkOutcome>,
    /// Failed chunk indices still queued by a retry pass
    pub(crate) pending_retry: Vec<usize>,
    pub(crate) usage: TokenUsage,
    pub(crate) run_state: RunState,
}

impl TranslationJob {
    /// Chunk `text` and create an idle job over it
    pub fn create(
        source_name: impl Into<String>,
        text: &str,
        config: JobConfig,
        estimator: SizeEstimator,
    ) -> Self {
        let chunks = Chunker::new(config.chunk_size_budget, estimator).chunk(text);
        let results = vec![ChunkOutcome::Pending; chunks.len()];

        Self {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            source: SourceDescriptor::describe(source_name, text),
            config,
            chunks,
            cursor: 0,
            results,
            pending_retry: Vec::new(),
            usage: TokenUsage::default(),
            run_state: RunState::Idle,
        }
    }

    /// Job id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Creation time
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Source identity
    pub fn source(&self) -> &SourceDescriptor {
        &self.source
    }

    /// Frozen job configuration
    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    /// Chunks in document order
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Next chunk to translate; never decreases
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// One outcome slot per chunk
    pub fn results(&self) -> &[ChunkOutcome] {
        &self.results
    }

    /// Failed chunks a paused retry pass has yet to re-run, in order
    pub fn pending_retry(&self) -> &[usize] {
        &self.pending_retry
    }

    /// Accumulated usage
    pub fn usage(&self) -> TokenUsage {
        self.usage
    }

    /// Current run state
    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    /// Number of chunks
    pub fn total_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// Indices of chunks recorded as tagged failures
    pub fn failed_indices(&self) -> Vec<usize> {
        self.results
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_failed())
            .map(|(i, _)| i)
            .collect()
    }

    /// Success and failure breakdown
    pub fn summary(&self) -> JobSummary {
        let mut summary = JobSummary {
            job_id: self.id.clone(),
            state: self.run_state,
            cursor: self.cursor,
            total_chunks: self.chunks.len(),
            succeeded: 0,
            suspect: 0,
            failed: 0,
            pending: 0,
            failed_indices: self.failed_indices(),
            usage: self.usage,
        };

        for result in &self.results {
            match result.status() {
                ChunkStatus::Success => summary.succeeded += 1,
                ChunkStatus::Suspect => {
                    summary.succeeded += 1;
                    summary.suspect += 1;
                }
                ChunkStatus::Failed => summary.failed += 1,
                ChunkStatus::Pending => summary.pending += 1,
            }
        }

        summary
    }

    pub(crate) fn progress_event(&self, chunk_index: usize) -> ProgressEvent {
        ProgressEvent {
            job_id: self.id.clone(),
            cursor: self.cursor,
            total_chunks: self.chunks.len(),
            chunk_index,
            tokens_used: self.usage.total_tokens(),
            cost_so_far: self.usage.cost,
            last_chunk_outcome: self
                .results
                .get(chunk_index)
                .map(ChunkOutcome::status)
                .unwrap_or(ChunkStatus::Pending),
        }
    }

    /// Ordered translation with failed chunks marked inline
    ///
    /// Pending slots are left out.
    pub fn export(&self) -> String {
        let parts: Vec<String> = self
            .results
            .iter()
            .enumerate()
            .filter_map(|(i, result)| match result {
                ChunkOutcome::Pending => None,
                ChunkOutcome::Success { text, .. } => Some(text.trim().to_string()),
                ChunkOutcome::Failed {
                    reason,
                    original_text,
                    ..
                } => Some(format!(
                    "[UNTRANSLATED CHUNK {}: {}]\n\n{}",
                    i + 1,
                    reason,
                    original_text.trim()
                )),
            })
            .collect();

        parts.join("\n\n")
    }
}

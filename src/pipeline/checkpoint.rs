//! Durable job snapshots and the stores that keep them

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::core::budget::SizeEstimator;
use crate::core::config::JobConfig;
use crate::core::errors::{Result, TranslationError};
use crate::core::models::TokenUsage;
use crate::pipeline::job::{fingerprint, ChunkOutcome, RunState, SourceDescriptor, TranslationJob};
use crate::processors::chunker::Chunker;

/// Serialized job state, with no live reference back to the job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    /// Store key
    pub job_id: String,
    /// When the snapshot was taken
    pub timestamp: DateTime<Utc>,
    /// When the job was created
    pub created_at: DateTime<Utc>,
    /// Source identity for the resume check
    pub source: SourceDescriptor,
    /// Frozen job configuration
    pub config: JobConfig,
    /// State at snapshot time
    pub run_state: RunState,
    /// Chunk count the source must reproduce
    pub total_chunks: usize,
    /// Next chunk to translate
    pub cursor: usize,
    /// Outcome slot per chunk
    pub results: Vec<ChunkOutcome>,
    /// Failed chunks a halted retry pass has not re-run yet
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_retry: Vec<usize>,
    /// Accumulated tokens and cost
    pub usage: TokenUsage,
}

impl TranslationJob {
    /// Capture the current state
    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_id: self.id.clone(),
            timestamp: Utc::now(),
            created_at: self.created_at,
            source: self.source.clone(),
            config: self.config.clone(),
            run_state: self.run_state,
            total_chunks: self.chunks.len(),
            cursor: self.cursor,
            results: self.results.clone(),
            pending_retry: self.pending_retry.clone(),
            usage: self.usage,
        }
    }

    /// Rebuild a job from a snapshot and the original source text
    ///
    /// The text is re-chunked with the stored configuration and must match the
    /// snapshot's fingerprint and chunk count. A job that was `Running` when
    /// the snapshot was taken comes back `Paused` at its stored cursor; every
    /// other state is kept, so a stopped job stays stopped.
    pub fn restore(snapshot: JobSnapshot, text: &str, estimator: SizeEstimator) -> Result<Self> {
        let mismatch = |message: String| TranslationError::SourceMismatch {
            job_id: snapshot.job_id.clone(),
            message,
        };

        if fingerprint(text) != snapshot.source.fingerprint {
            return Err(mismatch("source text fingerprint differs".to_string()));
        }

        let chunks = Chunker::new(snapshot.config.chunk_size_budget, estimator).chunk(text);
        if chunks.len() != snapshot.total_chunks || snapshot.results.len() != chunks.len() {
            return Err(mismatch(format!(
                "expected {} chunks, re-chunking produced {}",
                snapshot.total_chunks,
                chunks.len()
            )));
        }

        if snapshot.cursor > chunks.len() {
            return Err(mismatch(format!(
                "cursor {} beyond {} chunks",
                snapshot.cursor,
                chunks.len()
            )));
        }

        if let Some(index) = snapshot.pending_retry.iter().find(|i| **i >= chunks.len()) {
            return Err(mismatch(format!(
                "queued retry {} beyond {} chunks",
                index,
                chunks.len()
            )));
        }

        // A snapshot taken while running means the process died mid-job.
        let run_state = match snapshot.run_state {
            RunState::Running => RunState::Paused,
            other => other,
        };

        Ok(Self {
            id: snapshot.job_id,
            created_at: snapshot.created_at,
            source: snapshot.source,
            config: snapshot.config,
            chunks,
            cursor: snapshot.cursor,
            results: snapshot.results,
            pending_retry: snapshot.pending_retry,
            usage: snapshot.usage,
            run_state,
        })
    }
}

/// Keyed durable store of job snapshots
#[async_trait]
pub trait CheckpointStore: Send + Sync + std::fmt::Debug {
    /// Insert or replace the snapshot for `snapshot.job_id`
    async fn put(&self, snapshot: &JobSnapshot) -> Result<()>;

    /// Snapshot for `job_id`, if any
    async fn get(&self, job_id: &str) -> Result<Option<JobSnapshot>>;

    /// All snapshots, oldest first
    async fn get_all(&self) -> Result<Vec<JobSnapshot>>;

    /// Delete one snapshot; missing ids are ignored
    async fn remove(&self, job_id: &str) -> Result<()>;

    /// Delete every snapshot
    async fn clear(&self) -> Result<()>;
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    snapshots: RwLock<HashMap<String, JobSnapshot>>,
}

impl MemoryCheckpointStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn put(&self, snapshot: &JobSnapshot) -> Result<()> {
        let mut snapshots = self.snapshots.write().await;
        snapshots.insert(snapshot.job_id.clone(), snapshot.clone());
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<JobSnapshot>> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots.get(job_id).cloned())
    }

    async fn get_all(&self) -> Result<Vec<JobSnapshot>> {
        let snapshots = self.snapshots.read().await;
        let mut all: Vec<JobSnapshot> = snapshots.values().cloned().collect();
        all.sort_by_key(|s| s.timestamp);
        Ok(all)
    }

    async fn remove(&self, job_id: &str) -> Result<()> {
        self.snapshots.write().await.remove(job_id);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.snapshots.write().await.clear();
        Ok(())
    }
}

/// Directory store: one pretty-printed JSON file per job id
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Store rooted at `dir`, created on first write
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Root directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, job_id: &str) -> Result<PathBuf> {
        let valid = !job_id.is_empty()
            && job_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(TranslationError::CheckpointError {
                message: format!("Invalid job id: {:?}", job_id),
            });
        }
        Ok(self.dir.join(format!("{}.json", job_id)))
    }

    async fn read_snapshot(path: &Path) -> Result<JobSnapshot> {
        let content = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    async fn snapshot_paths(&self) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(paths),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                paths.push(path);
            }
        }

        Ok(paths)
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn put(&self, snapshot: &JobSnapshot) -> Result<()> {
        let path = self.path_for(&snapshot.job_id)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let json = serde_json::to_string_pretty(snapshot)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!("Checkpoint written: {}", path.display());
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<JobSnapshot>> {
        let path = self.path_for(job_id)?;
        match tokio::fs::metadata(&path).await {
            Ok(_) => Ok(Some(Self::read_snapshot(&path).await?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_all(&self) -> Result<Vec<JobSnapshot>> {
        let mut all = Vec::new();
        for path in self.snapshot_paths().await? {
            match Self::read_snapshot(&path).await {
                Ok(snapshot) => all.push(snapshot),
                Err(e) => warn!("Skipping unreadable checkpoint {}: {}", path.display(), e),
            }
        }
        all.sort_by_key(|s| s.timestamp);
        Ok(all)
    }

    async fn remove(&self, job_id: &str) -> Result<()> {
        let path = self.path_for(job_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear(&self) -> Result<()> {
        for path in self.snapshot_paths().await? {
            tokio::fs::remove_file(&path).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::retry::FailureKind;
    use crate::pipeline::job::QualityNote;
    use assert_json_diff::assert_json_include;
    use serde_json::json;

    const TEXT: &str = "Um.\n\nDois.\n\nTrês.";

    fn job() -> TranslationJob {
        let config = JobConfig::new("gpt-4o-mini", "en").with_budget(5);
        let mut job = TranslationJob::create("doc.txt", TEXT, config, SizeEstimator::new(1));
        job.run_state = RunState::Running;
        job.cursor = 2;
        job.results[0] = ChunkOutcome::Success {
            text: "One.".into(),
            quality: QualityNote::Accepted,
        };
        job.results[1] = ChunkOutcome::Failed {
            kind: FailureKind::ChunkTooLarge,
            reason: "too large".into(),
            original_text: "Dois.".into(),
        };
        job.usage = TokenUsage { input_tokens: 7, output_tokens: 9, cost: 0.01 };
        job
    }

    #[test]
    fn test_snapshot_shape() {
        let snapshot = job().snapshot();
        let value = serde_json::to_value(&snapshot).unwrap();

        assert_json_include!(
            actual: value,
            expected: json!({
                "run_state": "running",
                "total_chunks": 3,
                "cursor": 2,
                "results": [
                    { "status": "success", "text": "One.", "quality": "accepted" },
                    { "status": "failed", "kind": "chunk_too_large", "original_text": "Dois." },
                    { "status": "pending" }
                ],
                "usage": { "input_tokens": 7, "output_tokens": 9 }
            })
        );
    }

    #[test]
    fn test_restore_round_trip() {
        let original = job();
        let restored =
            TranslationJob::restore(original.snapshot(), TEXT, SizeEstimator::new(1)).unwrap();

        assert_eq!(restored.id(), original.id());
        assert_eq!(restored.cursor(), original.cursor());
        assert_eq!(restored.results(), original.results());
        assert_eq!(restored.usage(), original.usage());
        assert_eq!(restored.chunks(), original.chunks());
        assert_eq!(restored.run_state(), RunState::Paused);
    }

    #[test]
    fn test_restore_keeps_stopped_and_paused() {
        let mut stopped = job();
        stopped.run_state = RunState::Stopped;
        let restored =
            TranslationJob::restore(stopped.snapshot(), TEXT, SizeEstimator::new(1)).unwrap();
        assert_eq!(restored.run_state(), RunState::Stopped);

        let mut paused = job();
        paused.run_state = RunState::Paused;
        paused.pending_retry = vec![1];
        let restored =
            TranslationJob::restore(paused.snapshot(), TEXT, SizeEstimator::new(1)).unwrap();
        assert_eq!(restored.run_state(), RunState::Paused);
        assert_eq!(restored.pending_retry(), &[1]);
    }

    #[test]
    fn test_restore_rejects_queued_retry_out_of_range() {
        let mut snapshot = job().snapshot();
        snapshot.pending_retry = vec![7];
        let result = TranslationJob::restore(snapshot, TEXT, SizeEstimator::new(1));
        assert!(matches!(result, Err(TranslationError::SourceMismatch { .. })));
    }

    #[test]
    fn test_restore_rejects_other_text() {
        let snapshot = job().snapshot();
        let result = TranslationJob::restore(snapshot, "Outro texto.", SizeEstimator::new(1));
        assert!(matches!(result, Err(TranslationError::SourceMismatch { .. })));
    }

    #[test]
    fn test_restore_rejects_different_estimator() {
        let snapshot = job().snapshot();
        let result = TranslationJob::restore(snapshot, TEXT, SizeEstimator::new(4));
        assert!(matches!(result, Err(TranslationError::SourceMismatch { .. })));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryCheckpointStore::new();
        let snapshot = job().snapshot();

        store.put(&snapshot).await.unwrap();
        store.put(&snapshot).await.unwrap();
        assert_eq!(store.get_all().await.unwrap().len(), 1);
        assert_eq!(store.get(&snapshot.job_id).await.unwrap(), Some(snapshot.clone()));

        store.clear().await.unwrap();
        assert!(store.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("checkpoints"));

        assert!(store.get_all().await.unwrap().is_empty());

        let first = job().snapshot();
        let second = job().snapshot();
        store.put(&first).await.unwrap();
        store.put(&second).await.unwrap();

        let loaded = store.get(&first.job_id).await.unwrap().unwrap();
        assert_eq!(loaded, first);
        assert_eq!(store.get_all().await.unwrap().len(), 2);

        store.remove(&first.job_id).await.unwrap();
        assert!(store.get(&first.job_id).await.unwrap().is_none());

        store.clear().await.unwrap();
        assert!(store.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_store_rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        assert!(store.get("../etc/passwd").await.is_err());
    }
}

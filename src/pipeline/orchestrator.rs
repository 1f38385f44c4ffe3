//! Sequential, resumable chunk pipeline
//!
//! One orchestrator owns one job. Chunks are translated strictly in order with
//! a single call in flight. `pause` and `stop` only change the run state; the
//! loop honors them at the next chunk boundary, so an in-flight call always
//! finishes and is recorded first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex, RwLock, RwLockWriteGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::client::Translate;
use crate::core::config::{JobConfig, TranslatorConfig};
use crate::core::errors::{Result, TranslationError};
use crate::core::models::{ModelSpec, TokenUsage};
use crate::core::prompt::PromptConfig;
use crate::core::quality::QualityGuard;
use crate::core::retry::{with_retry, RetryPolicy};
use crate::pipeline::checkpoint::{CheckpointStore, JobSnapshot};
use crate::pipeline::job::{
    ChunkOutcome, JobSummary, ProgressEvent, QualityNote, RunState, TranslationJob,
};

/// Capacity of the progress channel; slow subscribers skip old events
const PROGRESS_CAPACITY: usize = 256;

/// Policy constants for the pipeline
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Write a checkpoint every this many processed chunks
    pub checkpoint_every: usize,
    /// Backoff policy for every call
    pub retry: RetryPolicy,
    /// Language guard for each answer
    pub quality: QualityGuard,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&TranslatorConfig::default())
    }
}

impl PipelineSettings {
    /// Settings from the service configuration
    pub fn from_config(config: &TranslatorConfig) -> Self {
        Self {
            checkpoint_every: config.checkpoint_every.max(1),
            retry: RetryPolicy::from_config(config),
            quality: QualityGuard::new(config.quality_margin),
        }
    }
}

/// Marks the processing loop as active; cleared on drop
struct ActiveGuard {
    flag: Arc<AtomicBool>,
}

impl ActiveGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag: flag.clone() })
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// How a lifecycle call enters the chunk loop
enum Entry {
    /// This call owns the loop
    Drive(ActiveGuard),
    /// Nothing to run; report the current summary
    Done(JobSummary),
}

/// Owner of a translation job and driver of its chunk loop
#[derive(Debug, Clone)]
pub struct Orchestrator {
    job_id: String,
    client: Arc<dyn Translate>,
    store: Arc<dyn CheckpointStore>,
    model: ModelSpec,
    settings: Arc<PipelineSettings>,
    job: Arc<RwLock<TranslationJob>>,
    active: Arc<AtomicBool>,
    state: Arc<watch::Sender<RunState>>,
    progress: broadcast::Sender<ProgressEvent>,
    checkpoint_lock: Arc<Mutex<()>>,
}

impl Orchestrator {
    /// Create an orchestrator over `job`
    pub fn new(
        job: TranslationJob,
        client: Arc<dyn Translate>,
        store: Arc<dyn CheckpointStore>,
        model: ModelSpec,
        settings: PipelineSettings,
    ) -> Self {
        let (state, _) = watch::channel(job.run_state());
        let (progress, _) = broadcast::channel(PROGRESS_CAPACITY);

        Self {
            job_id: job.id().to_string(),
            client,
            store,
            model,
            settings: Arc::new(settings),
            job: Arc::new(RwLock::new(job)),
            active: Arc::new(AtomicBool::new(false)),
            state: Arc::new(state),
            progress,
            checkpoint_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Create an orchestrator, validating the job against the service config
    pub fn from_config(
        job: TranslationJob,
        client: Arc<dyn Translate>,
        store: Arc<dyn CheckpointStore>,
        config: &TranslatorConfig,
    ) -> Result<Self> {
        config.validate_policy()?;
        job.config().validate(config)?;

        let model = config
            .find_model(&job.config().model)
            .cloned()
            .ok_or_else(|| TranslationError::ConfigError {
                message: format!("Unknown model: {}", job.config().model),
            })?;

        Ok(Self::new(
            job,
            client,
            store,
            model,
            PipelineSettings::from_config(config),
        ))
    }

    /// Id of the driven job
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Receive a progress event after every chunk attempt
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.progress.subscribe()
    }

    /// Observe run state transitions
    pub fn watch_state(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    /// Current run state
    pub async fn run_state(&self) -> RunState {
        self.job.read().await.run_state()
    }

    /// Current summary
    pub async fn summary(&self) -> JobSummary {
        self.job.read().await.summary()
    }

    /// Snapshot of the current state
    pub async fn snapshot(&self) -> JobSnapshot {
        self.job.read().await.snapshot()
    }

    /// Copy of the current job state
    pub async fn job(&self) -> TranslationJob {
        self.job.read().await.clone()
    }

    /// Ordered joined results for the export collaborator
    pub async fn export(&self) -> String {
        self.job.read().await.export()
    }

    /// Start translating from the first chunk
    ///
    /// Returns once the loop halts: `Completed`, `Paused` or `Stopped`.
    pub async fn start(&self) -> Result<JobSummary> {
        let entry = self.enter_start().await?;
        self.run(entry).await
    }

    /// Like [`start`](Self::start), but runs the loop on a background task
    ///
    /// The job is already `Running` when this returns; lifecycle errors are
    /// reported here rather than through the handle.
    pub async fn spawn_start(&self) -> Result<JoinHandle<Result<JobSummary>>> {
        let entry = self.enter_start().await?;
        Ok(self.spawn(entry))
    }

    /// Request a pause at the next chunk boundary
    pub async fn pause(&self) -> Result<()> {
        {
            let mut job = self.job.write().await;
            if job.run_state != RunState::Running {
                return Err(invalid_state(job.run_state, "pause"));
            }
            self.set_state(&mut job, RunState::Paused);
        }

        self.checkpoint().await;
        Ok(())
    }

    /// Continue a paused job from where it halted
    ///
    /// A paused retry pass continues with its remaining failed chunks. If the
    /// loop has not yet reached the boundary where it would honor the pause,
    /// it simply keeps going and this returns immediately.
    pub async fn resume(&self) -> Result<JobSummary> {
        let entry = self.enter_resume().await?;
        self.run(entry).await
    }

    /// Like [`resume`](Self::resume), but runs the loop on a background task
    pub async fn spawn_resume(&self) -> Result<JoinHandle<Result<JobSummary>>> {
        let entry = self.enter_resume().await?;
        Ok(self.spawn(entry))
    }

    /// Stop the job for good
    pub async fn stop(&self) -> Result<()> {
        {
            let mut job = self.job.write().await;
            match job.run_state {
                RunState::Running | RunState::Paused => {}
                other => return Err(invalid_state(other, "stop")),
            }
            self.set_state(&mut job, RunState::Stopped);
        }

        self.checkpoint().await;
        Ok(())
    }

    /// Re-run only the chunks recorded as tagged failures
    ///
    /// With no failures this is a no-op: no state change, no remote calls.
    pub async fn retry_failed(&self) -> Result<JobSummary> {
        let entry = self.enter_retry_failed().await?;
        self.run(entry).await
    }

    /// Like [`retry_failed`](Self::retry_failed), but runs the pass on a background task
    pub async fn spawn_retry_failed(&self) -> Result<JoinHandle<Result<JobSummary>>> {
        let entry = self.enter_retry_failed().await?;
        Ok(self.spawn(entry))
    }

    async fn enter_start(&self) -> Result<Entry> {
        let guard = {
            let mut job = self.job.write().await;
            match job.run_state {
                RunState::Idle => {}
                RunState::Running => return Err(self.already_running()),
                other => return Err(invalid_state(other, "start")),
            }

            if job.chunks.is_empty() {
                return Err(TranslationError::EmptyDocument);
            }
            self.validate_job(&job)?;

            let guard =
                ActiveGuard::acquire(&self.active).ok_or_else(|| self.already_running())?;

            job.cursor = 0;
            job.results = vec![ChunkOutcome::Pending; job.chunks.len()];
            job.pending_retry.clear();
            job.usage = TokenUsage::default();
            self.set_state(&mut job, RunState::Running);

            info!(
                "Starting job {} ({} chunks, model {})",
                job.id,
                job.chunks.len(),
                self.model.id
            );
            guard
        };

        self.checkpoint().await;
        Ok(Entry::Drive(guard))
    }

    async fn enter_resume(&self) -> Result<Entry> {
        let mut job = self.job.write().await;
        match job.run_state {
            RunState::Paused => {}
            RunState::Running => return Err(self.already_running()),
            other => return Err(invalid_state(other, "resume")),
        }
        self.set_state(&mut job, RunState::Running);

        match ActiveGuard::acquire(&self.active) {
            Some(guard) => {
                info!("Resuming job {}", job.id);
                Ok(Entry::Drive(guard))
            }
            None => {
                debug!("Job {} loop still active; pause withdrawn", job.id);
                Ok(Entry::Done(job.summary()))
            }
        }
    }

    async fn enter_retry_failed(&self) -> Result<Entry> {
        let mut job = self.job.write().await;
        if job.run_state != RunState::Completed {
            return Err(invalid_state(job.run_state, "retry failed chunks of"));
        }

        let failed = job.failed_indices();
        if failed.is_empty() {
            return Ok(Entry::Done(job.summary()));
        }

        let guard = ActiveGuard::acquire(&self.active).ok_or_else(|| self.already_running())?;
        info!("Retrying {} failed chunks of job {}", failed.len(), job.id);
        job.pending_retry = failed;
        self.set_state(&mut job, RunState::Running);
        Ok(Entry::Drive(guard))
    }

    async fn run(&self, entry: Entry) -> Result<JobSummary> {
        match entry {
            Entry::Drive(guard) => self.drive(guard).await,
            Entry::Done(summary) => Ok(summary),
        }
    }

    fn spawn(&self, entry: Entry) -> JoinHandle<Result<JobSummary>> {
        let this = self.clone();
        tokio::spawn(async move { this.run(entry).await })
    }

    /// Main loop: queued retries first, then forward from the cursor
    async fn drive(&self, guard: ActiveGuard) -> Result<JobSummary> {
        let config = self.job.read().await.config.clone();
        let mut processed = 0;

        loop {
            let (index, text) = {
                let mut job = self.job.write().await;
                if job.run_state != RunState::Running {
                    return Ok(self.halt(job, guard).await);
                }

                let next = job
                    .pending_retry
                    .first()
                    .copied()
                    .or_else(|| (job.cursor < job.chunks.len()).then_some(job.cursor));
                let Some(index) = next else {
                    self.set_state(&mut job, RunState::Completed);
                    return Ok(self.halt(job, guard).await);
                };

                (index, job.chunks[index].text.clone())
            };

            let (outcome, usage) = self.process_chunk(index, &text, &config).await;
            processed += 1;
            self.record(index, outcome, usage, processed).await;
        }
    }

    /// Leave the loop: release the guard under the job lock, then checkpoint
    async fn halt(
        &self,
        job: RwLockWriteGuard<'_, TranslationJob>,
        guard: ActiveGuard,
    ) -> JobSummary {
        let summary = job.summary();
        drop(guard);
        drop(job);

        match summary.state {
            RunState::Completed => info!(
                "Job {} completed: {} succeeded ({} suspect), {} failed, {} tokens, ${:.4}",
                summary.job_id,
                summary.succeeded,
                summary.suspect,
                summary.failed,
                summary.usage.total_tokens(),
                summary.usage.cost
            ),
            state => info!(
                "Job {} {} at chunk {}/{}",
                summary.job_id, state, summary.cursor, summary.total_chunks
            ),
        }

        self.checkpoint().await;
        summary
    }

    /// Store a chunk result, emit progress, checkpoint when due
    async fn record(&self, index: usize, outcome: ChunkOutcome, usage: TokenUsage, processed: usize) {
        let event = {
            let mut job = self.job.write().await;
            job.results[index] = outcome;
            job.usage += usage;
            if job.pending_retry.first() == Some(&index) {
                job.pending_retry.remove(0);
            }
            // Retries of earlier chunks never move the cursor back.
            job.cursor = job.cursor.max(index + 1);
            job.progress_event(index)
        };

        debug!(
            "Chunk {}/{} -> {:?}",
            event.chunk_index + 1,
            event.total_chunks,
            event.last_chunk_outcome
        );
        // No subscribers is fine.
        let _ = self.progress.send(event);

        if processed % self.settings.checkpoint_every == 0 {
            self.checkpoint().await;
        }
    }

    /// Retry-wrapped translation plus the single corrective pass
    async fn process_chunk(
        &self,
        index: usize,
        text: &str,
        config: &JobConfig,
    ) -> (ChunkOutcome, TokenUsage) {
        let prompt = PromptConfig::for_job(config);
        let client = &self.client;
        let model = &self.model;
        let prompt_ref = &prompt;

        let first = match with_retry(&self.settings.retry, text, move || {
            client.translate(text, prompt_ref, model)
        })
        .await
        {
            Ok(result) => result,
            Err(failure) => {
                warn!(
                    "Chunk {} failed after {} attempts ({}): {}",
                    index + 1,
                    failure.attempts,
                    failure.kind,
                    failure.reason
                );
                return (failure.into(), TokenUsage::default());
            }
        };

        let mut usage = first.usage();
        let source_lang = config.source_lang.as_deref();
        let verdict = self
            .settings
            .quality
            .assess(&first.translated_text, source_lang, &config.target_lang);

        if !verdict.is_suspect() {
            return (
                ChunkOutcome::Success {
                    text: first.translated_text,
                    quality: QualityNote::Accepted,
                },
                usage,
            );
        }

        info!(
            "Chunk {} still looks untranslated ({:?}); sending corrective request",
            index + 1,
            verdict
        );
        let corrective = PromptConfig::corrective(config);

        match self.client.translate(text, &corrective, &self.model).await {
            Ok(second) => {
                usage += second.usage();
                let quality = if self
                    .settings
                    .quality
                    .assess(&second.translated_text, source_lang, &config.target_lang)
                    .is_suspect()
                {
                    warn!("Chunk {} accepted as suspect after correction", index + 1);
                    QualityNote::Suspect
                } else {
                    QualityNote::Corrected
                };
                (
                    ChunkOutcome::Success {
                        text: second.translated_text,
                        quality,
                    },
                    usage,
                )
            }
            Err(e) => {
                warn!("Corrective request for chunk {} failed: {}", index + 1, e);
                (
                    ChunkOutcome::Success {
                        text: first.translated_text,
                        quality: QualityNote::Suspect,
                    },
                    usage,
                )
            }
        }
    }

    fn validate_job(&self, job: &TranslationJob) -> Result<()> {
        if job.config.model != self.model.id {
            return Err(TranslationError::ConfigError {
                message: format!(
                    "Job model {} does not match orchestrator model {}",
                    job.config.model, self.model.id
                ),
            });
        }
        if job.config.prompt_template.trim().is_empty() {
            return Err(TranslationError::MissingField {
                field: "prompt_template".to_string(),
            });
        }
        if job.config.chunk_size_budget == 0 {
            return Err(TranslationError::ConfigError {
                message: "chunk_size_budget must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    fn set_state(&self, job: &mut TranslationJob, state: RunState) {
        if job.run_state != state {
            debug!("Job {}: {} -> {}", job.id, job.run_state, state);
        }
        job.run_state = state;
        self.state.send_replace(state);
    }

    /// Write the latest state; failures are logged and never abort the job
    ///
    /// Writes are serialized and snapshot the state current at write time.
    async fn checkpoint(&self) {
        let _writing = self.checkpoint_lock.lock().await;
        let snapshot = self.job.read().await.snapshot();
        if let Err(e) = self.store.put(&snapshot).await {
            warn!("Checkpoint for job {} failed: {}", snapshot.job_id, e);
        }
    }

    fn already_running(&self) -> TranslationError {
        TranslationError::AlreadyRunning {
            job_id: self.job_id.clone(),
        }
    }
}

fn invalid_state(from: RunState, action: &str) -> TranslationError {
    TranslationError::InvalidState {
        from: from.to_string(),
        action: action.to_string(),
    }
}

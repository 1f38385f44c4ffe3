//! CLI command definitions and handlers

use clap::Subcommand;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::core::budget::SizeEstimator;
use crate::core::client::{AsyncTranslator, Translate};
use crate::core::config::{JobConfig, TranslatorConfig};
use crate::pipeline::checkpoint::{CheckpointStore, FileCheckpointStore};
use crate::pipeline::job::{JobSummary, RunState, TranslationJob};
use crate::pipeline::orchestrator::Orchestrator;

/// Commands for the long-document translator
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Translate a text document
    Translate {
        /// Input file (required)
        #[arg(short, long)]
        file: PathBuf,

        /// Output file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Model id (default: first configured model)
        #[arg(short, long)]
        model: Option<String>,

        /// Source language (auto-detect if not specified)
        #[arg(long)]
        source_lang: Option<String>,

        /// Target language (default: en)
        #[arg(short, long, default_value = "en")]
        target_lang: String,

        /// Chunk size budget in estimated tokens
        #[arg(short, long)]
        budget: Option<usize>,

        /// File holding a custom prompt template
        #[arg(long)]
        prompt_file: Option<PathBuf>,
    },

    /// Resume a paused or interrupted job from its checkpoint
    Resume {
        /// Job id printed when the job was created
        #[arg(short, long)]
        job_id: String,

        /// The same source file the job was created from
        #[arg(short, long)]
        file: PathBuf,

        /// Output file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Re-attempt the failed chunks of a completed job
    RetryFailed {
        /// Job id
        #[arg(short, long)]
        job_id: String,

        /// The same source file the job was created from
        #[arg(short, long)]
        file: PathBuf,

        /// Output file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List saved checkpoints
    Checkpoints {
        /// Delete all checkpoints instead of listing them
        #[arg(long)]
        clear: bool,
    },

    /// Start HTTP API server
    Server {
        /// Bind address (default: 0.0.0.0)
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Listen port (default: 8000)
        #[arg(short, long, default_value_t = 8000)]
        port: u16,
    },
}

/// Lifecycle entry point driven by the CLI
#[derive(Debug, Clone, Copy)]
enum Action {
    Start,
    Resume,
    RetryFailed,
}

/// Handle the translate command
#[allow(clippy::too_many_arguments)]
pub async fn handle_translate(
    config: TranslatorConfig,
    file: PathBuf,
    output: Option<PathBuf>,
    model: Option<String>,
    source_lang: Option<String>,
    target_lang: String,
    budget: Option<usize>,
    prompt_file: Option<PathBuf>,
) -> anyhow::Result<()> {
    let start_time = Instant::now();
    let output = match output {
        Some(path) => path,
        None => default_output(&file)?,
    };

    let model = model
        .or_else(|| config.models.first().map(|m| m.id.clone()))
        .ok_or_else(|| anyhow::anyhow!("No models configured"))?;

    let mut job_config = JobConfig::new(model, target_lang);
    job_config.source_lang = source_lang;
    if let Some(budget) = budget {
        job_config.chunk_size_budget = budget;
    }
    if let Some(path) = prompt_file {
        job_config.prompt_template = tokio::fs::read_to_string(&path).await?;
    }

    let text = tokio::fs::read_to_string(&file).await?;
    let job = TranslationJob::create(
        file.display().to_string(),
        &text,
        job_config,
        SizeEstimator::new(config.chars_per_token),
    );

    info!("Starting translation");
    info!("Input: {}", file.display());
    info!("Output: {}", output.display());
    info!("Target language: {}", job.config().target_lang);
    println!("Job id: {} ({} chunks)", job.id(), job.total_chunks());

    let orchestrator = build_orchestrator(&config, job)?;
    let summary = run_with_progress(&orchestrator, Action::Start).await?;
    finish(&orchestrator, &summary, &file, &output, start_time).await
}

/// Handle the resume command
pub async fn handle_resume(
    config: TranslatorConfig,
    job_id: String,
    file: PathBuf,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let start_time = Instant::now();
    let output = match output {
        Some(path) => path,
        None => default_output(&file)?,
    };

    let job = restore_job(&config, &job_id, &file).await?;
    let orchestrator = build_orchestrator(&config, job)?;

    let summary = match orchestrator.run_state().await {
        RunState::Completed => {
            println!("Job {} is already completed", job_id);
            orchestrator.summary().await
        }
        RunState::Stopped => {
            anyhow::bail!("Job {} was stopped; start a new job to translate it again", job_id)
        }
        RunState::Idle => run_with_progress(&orchestrator, Action::Start).await?,
        _ => run_with_progress(&orchestrator, Action::Resume).await?,
    };
    finish(&orchestrator, &summary, &file, &output, start_time).await
}

/// Handle the retry-failed command
pub async fn handle_retry_failed(
    config: TranslatorConfig,
    job_id: String,
    file: PathBuf,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let start_time = Instant::now();
    let output = match output {
        Some(path) => path,
        None => default_output(&file)?,
    };

    let job = restore_job(&config, &job_id, &file).await?;
    if job.run_state() != RunState::Completed {
        anyhow::bail!(
            "Job {} is {}; resume it before retrying failed chunks",
            job_id,
            job.run_state()
        );
    }

    let orchestrator = build_orchestrator(&config, job)?;
    let summary = run_with_progress(&orchestrator, Action::RetryFailed).await?;
    finish(&orchestrator, &summary, &file, &output, start_time).await
}

/// Handle the checkpoints command
pub async fn handle_checkpoints(config: TranslatorConfig, clear: bool) -> anyhow::Result<()> {
    let store = FileCheckpointStore::new(config.checkpoint_dir.clone());

    if clear {
        store.clear().await?;
        println!("Checkpoints cleared from {}", store.dir().display());
        return Ok(());
    }

    let snapshots = store.get_all().await?;
    if snapshots.is_empty() {
        println!("No checkpoints in {}", store.dir().display());
        return Ok(());
    }

    for snapshot in snapshots {
        let failed = snapshot.results.iter().filter(|r| r.is_failed()).count();
        println!(
            "{}  {:<9}  {}/{} chunks  {} failed  {}  {}",
            snapshot.job_id,
            snapshot.run_state.to_string(),
            snapshot.cursor,
            snapshot.total_chunks,
            failed,
            snapshot.timestamp.format("%Y-%m-%d %H:%M:%S"),
            snapshot.source.name
        );
    }

    Ok(())
}

/// Handle server command
pub async fn handle_server(config: TranslatorConfig, host: String, port: u16) -> anyhow::Result<()> {
    use crate::server::api::run_server;

    info!("Starting HTTP server on {}:{}", host, port);
    println!("🚀 Server starting on http://{}:{}", host, port);

    run_server(host, port, config).await?;

    Ok(())
}

fn build_orchestrator(config: &TranslatorConfig, job: TranslationJob) -> anyhow::Result<Orchestrator> {
    let client: Arc<dyn Translate> = Arc::new(AsyncTranslator::new(config.clone())?);
    let store: Arc<dyn CheckpointStore> =
        Arc::new(FileCheckpointStore::new(config.checkpoint_dir.clone()));
    Ok(Orchestrator::from_config(job, client, store, config)?)
}

async fn restore_job(
    config: &TranslatorConfig,
    job_id: &str,
    file: &Path,
) -> anyhow::Result<TranslationJob> {
    let store = FileCheckpointStore::new(config.checkpoint_dir.clone());
    let snapshot = store
        .get(job_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("No checkpoint found for job {}", job_id))?;

    let text = tokio::fs::read_to_string(file).await?;
    let job = TranslationJob::restore(snapshot, &text, SizeEstimator::new(config.chars_per_token))?;
    info!(
        "Restored job {} at chunk {}/{} ({})",
        job.id(),
        job.cursor(),
        job.total_chunks(),
        job.run_state()
    );
    Ok(job)
}

/// Drive one lifecycle call with a progress bar; Ctrl-C pauses the job
async fn run_with_progress(orchestrator: &Orchestrator, action: Action) -> anyhow::Result<JobSummary> {
    let initial = orchestrator.summary().await;

    let pb = ProgressBar::new(initial.total_chunks as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")?
            .progress_chars("=>-"),
    );
    pb.set_position(initial.cursor as u64);

    let mut events = orchestrator.subscribe();
    let bar = pb.clone();
    let reporter = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    bar.set_position(event.cursor as u64);
                    bar.set_message(format!(
                        "chunk {} {:?} | {} tokens | ${:.4}",
                        event.chunk_index + 1,
                        event.last_chunk_outcome,
                        event.tokens_used,
                        event.cost_so_far
                    ));
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    let pauser = orchestrator.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, pausing at the next chunk boundary");
            if let Err(e) = pauser.pause().await {
                warn!("Pause failed: {}", e);
            }
        }
    });

    let result = match action {
        Action::Start => orchestrator.start().await,
        Action::Resume => orchestrator.resume().await,
        Action::RetryFailed => orchestrator.retry_failed().await,
    };

    interrupt.abort();
    reporter.abort();

    match &result {
        Ok(summary) => pb.finish_with_message(summary.state.to_string()),
        Err(e) => pb.abandon_with_message(format!("Failed: {}", e)),
    }

    Ok(result?)
}

async fn finish(
    orchestrator: &Orchestrator,
    summary: &JobSummary,
    file: &Path,
    output: &Path,
    start_time: Instant,
) -> anyhow::Result<()> {
    tokio::fs::write(output, orchestrator.export().await).await?;

    let duration = start_time.elapsed();
    info!(
        "Job {} halted as {} in {:?}",
        summary.job_id, summary.state, duration
    );

    match summary.state {
        RunState::Completed => println!("\n✅ Translation completed!"),
        RunState::Paused => println!("\n⏸️  Translation paused"),
        _ => println!("\n⏹️  Translation stopped"),
    }
    println!("   Chunks: {}/{}", summary.cursor, summary.total_chunks);
    println!("   Succeeded: {} ({} suspect)", summary.succeeded, summary.suspect);
    println!("   Failed: {}", summary.failed);
    println!(
        "   Tokens: {} | Cost: ${:.4}",
        summary.usage.total_tokens(),
        summary.usage.cost
    );
    println!("   Output: {}", output.display());
    println!("   Time: {:?}", duration);

    if summary.state == RunState::Paused {
        println!(
            "\nResume with: {} resume --job-id {} --file {}",
            env!("CARGO_PKG_NAME"),
            summary.job_id,
            file.display()
        );
    } else if summary.state == RunState::Completed && summary.failed > 0 {
        println!(
            "\nRetry failed chunks with: {} retry-failed --job-id {} --file {}",
            env!("CARGO_PKG_NAME"),
            summary.job_id,
            file.display()
        );
    }

    Ok(())
}

/// `doc.txt` becomes `doc_translated.txt` next to the input
fn default_output(file: &Path) -> anyhow::Result<PathBuf> {
    let stem = file
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid input file name: {}", file.display()))?;

    let name = match file.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}_translated.{}", stem, ext),
        None => format!("{}_translated", stem),
    };

    Ok(file.with_file_name(name))
}

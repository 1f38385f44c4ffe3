//! HTTP control surface for a UI collaborator

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::core::budget::SizeEstimator;
use crate::core::client::{AsyncTranslator, Translate};
use crate::core::config::{JobConfig, TranslatorConfig};
use crate::core::errors::TranslationError;
use crate::pipeline::checkpoint::{CheckpointStore, FileCheckpointStore};
use crate::pipeline::job::{JobSummary, RunState, TranslationJob};
use crate::pipeline::orchestrator::Orchestrator;

/// Application state
#[derive(Debug)]
pub struct AppState {
    config: Arc<TranslatorConfig>,
    client: Arc<dyn Translate>,
    store: Arc<dyn CheckpointStore>,
    current: RwLock<Option<Orchestrator>>,
}

impl AppState {
    /// Shared state with no current job
    pub fn new(
        config: TranslatorConfig,
        client: Arc<dyn Translate>,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            client,
            store,
            current: RwLock::new(None),
        }
    }

    fn estimator(&self) -> SizeEstimator {
        SizeEstimator::new(self.config.chars_per_token)
    }

    async fn current(&self) -> Result<Orchestrator, ApiError> {
        self.current
            .read()
            .await
            .clone()
            .ok_or_else(|| ApiError::not_found("No job has been submitted"))
    }

    /// Make `orchestrator` the current job and launch it
    ///
    /// The current-job lock is held until the launch has moved the new job to
    /// `Running`, so concurrent submissions cannot both get through.
    async fn install(&self, orchestrator: Orchestrator, launch: Launch) -> Result<(), ApiError> {
        let mut current = self.current.write().await;
        if let Some(existing) = current.as_ref() {
            if matches!(existing.run_state().await, RunState::Idle | RunState::Running) {
                return Err(ApiError::from(TranslationError::AlreadyRunning {
                    job_id: existing.job_id().to_string(),
                }));
            }
        }

        let run = match launch {
            Launch::Start => Some(orchestrator.spawn_start().await?),
            Launch::Resume => Some(orchestrator.spawn_resume().await?),
            Launch::Idle => None,
        };
        if let Some(handle) = run {
            watch_run(orchestrator.job_id().to_string(), handle);
        }

        *current = Some(orchestrator);
        Ok(())
    }
}

/// What to do with a job once it is installed
#[derive(Debug, Clone, Copy)]
enum Launch {
    Start,
    Resume,
    Idle,
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    service: String,
    version: String,
}

/// Models list response
#[derive(Serialize)]
struct ModelsResponse {
    object: String,
    data: Vec<ModelInfo>,
}

#[derive(Serialize)]
struct ModelInfo {
    id: String,
    object: String,
    input_price_per_million: f64,
    output_price_per_million: f64,
    max_output_tokens: u32,
}

/// Job submission
#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    /// Document text
    pub text: String,
    /// Label used in checkpoints
    pub source_name: Option<String>,
    /// Model id; defaults to the first configured model
    pub model: Option<String>,
    /// Source language, if known
    pub source_lang: Option<String>,
    /// Target language
    pub target_lang: String,
    /// Token budget per chunk
    pub chunk_size_budget: Option<usize>,
    /// Prompt template override
    pub prompt_template: Option<String>,
    /// Sampling temperature override
    pub temperature: Option<f32>,
}

/// Accepted job
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    /// New job id
    pub job_id: String,
    /// Chunks the document produced
    pub total_chunks: usize,
}

/// Resume a checkpointed job; the source text is not stored in checkpoints
#[derive(Debug, Deserialize)]
pub struct ResumeCheckpointRequest {
    /// Source text the job was created from
    pub text: String,
}

/// Checkpoint listing entry
#[derive(Debug, Serialize, Deserialize)]
pub struct CheckpointInfo {
    /// Job id
    pub job_id: String,
    /// Snapshot time, RFC 3339
    pub timestamp: String,
    /// Source label
    pub source_name: String,
    /// State at snapshot time
    pub run_state: RunState,
    /// Next chunk index
    pub cursor: usize,
    /// Chunks in the job
    pub total_chunks: usize,
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    /// Error body
    pub error: ErrorDetail,
}

/// Error details
#[derive(Serialize)]
pub struct ErrorDetail {
    /// Human readable message
    pub message: String,
    /// Machine readable code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Error category
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
}

/// Handler error carrying an HTTP status
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn not_found(message: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "not_found",
            message: message.to_string(),
        }
    }
}

impl From<TranslationError> for ApiError {
    fn from(err: TranslationError) -> Self {
        let (status, code) = match &err {
            TranslationError::InvalidState { .. } | TranslationError::AlreadyRunning { .. } => {
                (StatusCode::CONFLICT, "invalid_state")
            }
            TranslationError::EmptyDocument
            | TranslationError::ConfigError { .. }
            | TranslationError::MissingField { .. }
            | TranslationError::SourceMismatch { .. } => {
                (StatusCode::BAD_REQUEST, "invalid_request")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };
        Self {
            status,
            code,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: ErrorDetail {
                message: self.message,
                code: Some(self.code.to_string()),
                r#type: Some(
                    if self.status.is_client_error() {
                        "invalid_request_error"
                    } else {
                        "api_error"
                    }
                    .to_string(),
                ),
            },
        };
        (self.status, axum::Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Log how a background run ended
fn watch_run(job_id: String, handle: JoinHandle<crate::core::errors::Result<JobSummary>>) {
    tokio::spawn(async move {
        match handle.await {
            Ok(Ok(summary)) => info!("Job {} halted in state {}", job_id, summary.state),
            Ok(Err(e)) => warn!("Job {} run failed: {}", job_id, e),
            Err(e) => warn!("Job {} task ended abnormally: {}", job_id, e),
        }
    });
}

/// Health check handler
async fn health_check() -> axum::Json<HealthResponse> {
    axum::Json(HealthResponse {
        status: "ok".to_string(),
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Get models handler
async fn get_models(State(state): State<Arc<AppState>>) -> axum::Json<ModelsResponse> {
    let data = state
        .config
        .models
        .iter()
        .map(|m| ModelInfo {
            id: m.id.clone(),
            object: "model".to_string(),
            input_price_per_million: m.input_price_per_million,
            output_price_per_million: m.output_price_per_million,
            max_output_tokens: m.max_output_tokens,
        })
        .collect();

    axum::Json(ModelsResponse {
        object: "list".to_string(),
        data,
    })
}

/// Submit a document and start translating it
async fn submit_job(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SubmitJobRequest>,
) -> ApiResult<(StatusCode, axum::Json<SubmitJobResponse>)> {
    let model = payload
        .model
        .or_else(|| state.config.models.first().map(|m| m.id.clone()))
        .ok_or_else(|| {
            ApiError::from(TranslationError::MissingField {
                field: "model".to_string(),
            })
        })?;

    let mut config = JobConfig::new(model, payload.target_lang);
    config.source_lang = payload.source_lang;
    if let Some(budget) = payload.chunk_size_budget {
        config.chunk_size_budget = budget;
    }
    if let Some(template) = payload.prompt_template {
        config.prompt_template = template;
    }
    if let Some(temperature) = payload.temperature {
        config.temperature = temperature;
    }
    config.validate(&state.config)?;

    let source_name = payload.source_name.unwrap_or_else(|| "untitled".to_string());
    let job = TranslationJob::create(source_name, &payload.text, config, state.estimator());
    if job.total_chunks() == 0 {
        return Err(TranslationError::EmptyDocument.into());
    }

    let response = SubmitJobResponse {
        job_id: job.id().to_string(),
        total_chunks: job.total_chunks(),
    };

    let orchestrator =
        Orchestrator::from_config(job, state.client.clone(), state.store.clone(), &state.config)?;
    state.install(orchestrator, Launch::Start).await?;

    info!(
        "Accepted job {} ({} chunks)",
        response.job_id, response.total_chunks
    );

    Ok((StatusCode::ACCEPTED, axum::Json(response)))
}

/// Current job summary
async fn current_job(State(state): State<Arc<AppState>>) -> ApiResult<axum::Json<JobSummary>> {
    let orchestrator = state.current().await?;
    Ok(axum::Json(orchestrator.summary().await))
}

async fn pause_job(State(state): State<Arc<AppState>>) -> ApiResult<axum::Json<JobSummary>> {
    let orchestrator = state.current().await?;
    orchestrator.pause().await?;
    Ok(axum::Json(orchestrator.summary().await))
}

async fn stop_job(State(state): State<Arc<AppState>>) -> ApiResult<axum::Json<JobSummary>> {
    let orchestrator = state.current().await?;
    orchestrator.stop().await?;
    Ok(axum::Json(orchestrator.summary().await))
}

async fn resume_job(
    State(state): State<Arc<AppState>>,
) -> ApiResult<(StatusCode, axum::Json<JobSummary>)> {
    let orchestrator = state.current().await?;
    let handle = orchestrator.spawn_resume().await?;
    watch_run(orchestrator.job_id().to_string(), handle);
    Ok((StatusCode::ACCEPTED, axum::Json(orchestrator.summary().await)))
}

async fn retry_failed(
    State(state): State<Arc<AppState>>,
) -> ApiResult<(StatusCode, axum::Json<JobSummary>)> {
    let orchestrator = state.current().await?;
    let handle = orchestrator.spawn_retry_failed().await?;
    watch_run(orchestrator.job_id().to_string(), handle);
    Ok((StatusCode::ACCEPTED, axum::Json(orchestrator.summary().await)))
}

/// Joined translation as plain text
async fn export_job(State(state): State<Arc<AppState>>) -> ApiResult<String> {
    let orchestrator = state.current().await?;
    Ok(orchestrator.export().await)
}

async fn list_checkpoints(
    State(state): State<Arc<AppState>>,
) -> ApiResult<axum::Json<Vec<CheckpointInfo>>> {
    let snapshots = state.store.get_all().await?;
    let infos = snapshots
        .into_iter()
        .map(|s| CheckpointInfo {
            job_id: s.job_id,
            timestamp: s.timestamp.to_rfc3339(),
            source_name: s.source.name,
            run_state: s.run_state,
            cursor: s.cursor,
            total_chunks: s.total_chunks,
        })
        .collect();
    Ok(axum::Json(infos))
}

async fn clear_checkpoints(State(state): State<Arc<AppState>>) -> ApiResult<StatusCode> {
    state.store.clear().await?;
    info!("Checkpoints cleared");
    Ok(StatusCode::NO_CONTENT)
}

/// Restore a checkpointed job and continue it
async fn resume_checkpoint(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
    Json(payload): Json<ResumeCheckpointRequest>,
) -> ApiResult<(StatusCode, axum::Json<JobSummary>)> {
    let snapshot = state
        .store
        .get(&job_id)
        .await?
        .ok_or_else(|| ApiError::not_found("No checkpoint for this job"))?;

    let job = TranslationJob::restore(snapshot, &payload.text, state.estimator())?;
    let launch = match job.run_state() {
        RunState::Idle => Launch::Start,
        RunState::Paused => Launch::Resume,
        RunState::Completed => Launch::Idle,
        other => {
            return Err(TranslationError::InvalidState {
                from: other.to_string(),
                action: "resume".to_string(),
            }
            .into())
        }
    };

    let orchestrator =
        Orchestrator::from_config(job, state.client.clone(), state.store.clone(), &state.config)?;
    state.install(orchestrator.clone(), launch).await?;

    Ok((StatusCode::ACCEPTED, axum::Json(orchestrator.summary().await)))
}

/// Build the router over shared state
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/v1/models", get(get_models))
        .route("/jobs", post(submit_job))
        .route("/jobs/current", get(current_job))
        .route("/jobs/current/pause", post(pause_job))
        .route("/jobs/current/resume", post(resume_job))
        .route("/jobs/current/stop", post(stop_job))
        .route("/jobs/current/retry-failed", post(retry_failed))
        .route("/jobs/current/export", get(export_job))
        .route("/checkpoints", get(list_checkpoints).delete(clear_checkpoints))
        .route("/checkpoints/:job_id/resume", post(resume_checkpoint))
        .with_state(state)
}

/// Run the HTTP server
pub async fn run_server(host: String, port: u16, config: TranslatorConfig) -> anyhow::Result<()> {
    let client: Arc<dyn Translate> = Arc::new(AsyncTranslator::new(config.clone())?);
    let store: Arc<dyn CheckpointStore> =
        Arc::new(FileCheckpointStore::new(config.checkpoint_dir.clone()));
    let state = Arc::new(AppState::new(config, client, store));

    let app = router(state);

    // Bind address
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;

    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

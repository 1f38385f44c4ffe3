//! HTTP client against a local chat-completions stub

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

use longdoc_translator::core::budget::SizeEstimator;
use longdoc_translator::core::client::{AsyncTranslator, Translate};
use longdoc_translator::core::config::{JobConfig, TranslatorConfig};
use longdoc_translator::core::errors::TranslationError;
use longdoc_translator::core::models::ModelSpec;
use longdoc_translator::core::prompt::PromptConfig;
use longdoc_translator::core::retry::FailureKind;
use longdoc_translator::pipeline::checkpoint::MemoryCheckpointStore;
use longdoc_translator::pipeline::job::{ChunkOutcome, RunState, TranslationJob};
use longdoc_translator::pipeline::orchestrator::Orchestrator;

type Requests = Arc<Mutex<Vec<Value>>>;

async fn chat(
    State(requests): State<Requests>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    requests.lock().unwrap().push(body.clone());

    if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("Bearer test-key") {
        return (StatusCode::UNAUTHORIZED, "bad key").into_response();
    }

    let text = body["messages"][1]["content"].as_str().unwrap_or_default().to_string();

    if text.contains("throttle") {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [("retry-after", "7")],
            "Too Many Requests",
        )
            .into_response();
    }
    if text.contains("huge") {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": {
                    "message": "This model's maximum context length is 8192 tokens",
                    "code": "context_length_exceeded"
                }
            })),
        )
            .into_response();
    }
    if text.contains("broken") {
        return (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded").into_response();
    }

    let finish_reason = if text.contains("cut") { "length" } else { "stop" };
    Json(json!({
        "choices": [{
            "message": { "role": "assistant", "content": format!("  EN: {}\n", text) },
            "finish_reason": finish_reason
        }],
        "usage": { "prompt_tokens": 100, "completion_tokens": 50 }
    }))
    .into_response()
}

async fn spawn_stub() -> (TranslatorConfig, Requests) {
    let requests: Requests = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/v1/chat/completions", post(chat))
        .with_state(requests.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let config = TranslatorConfig {
        api_key: "test-key".to_string(),
        api_endpoint: format!("http://{}/v1/chat/completions", addr),
        retry_delay_ms: 1,
        rate_limit_delay_ms: 1,
        rate_limit_max_delay_ms: 1,
        checkpoint_every: 1,
        ..TranslatorConfig::default()
    };
    (config, requests)
}

fn model() -> ModelSpec {
    ModelSpec::new("gpt-4o-mini", 0.15, 0.6, 16384)
}

fn prompt() -> PromptConfig {
    PromptConfig::for_job(&JobConfig::new("gpt-4o-mini", "en").with_source_lang("pt"))
}

#[tokio::test]
async fn test_successful_translation_request() {
    let (config, requests) = spawn_stub().await;
    let translator = AsyncTranslator::new(config).unwrap();

    let result = translator
        .translate("Olá mundo", &prompt(), &model())
        .await
        .unwrap();

    assert_eq!(result.translated_text, "EN: Olá mundo");
    assert_eq!(result.input_tokens, 100);
    assert_eq!(result.output_tokens, 50);
    assert!((result.cost - model().cost(100, 50)).abs() < 1e-12);

    let requests = requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    let body = &requests[0];
    assert_eq!(body["model"], "gpt-4o-mini");
    assert_eq!(body["messages"][0]["role"], "system");
    assert!(body["messages"][0]["content"].as_str().unwrap().contains("into en"));
    assert_eq!(body["messages"][1]["content"], "Olá mundo");
    assert!(body["max_tokens"].as_u64().unwrap() >= 1024);
}

#[tokio::test]
async fn test_rate_limit_carries_retry_after() {
    let (config, _) = spawn_stub().await;
    let translator = AsyncTranslator::new(config).unwrap();

    let err = translator
        .translate("please throttle me", &prompt(), &model())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        TranslationError::RateLimitError {
            retry_after: Some(7)
        }
    ));
}

#[tokio::test]
async fn test_context_length_error_is_too_large() {
    let (config, _) = spawn_stub().await;
    let translator = AsyncTranslator::new(config).unwrap();

    let err = translator
        .translate("a huge chunk", &prompt(), &model())
        .await
        .unwrap_err();
    assert!(matches!(err, TranslationError::ContentTooLarge { .. }));

    let err = translator
        .translate("a cut answer", &prompt(), &model())
        .await
        .unwrap_err();
    assert!(matches!(err, TranslationError::ContentTooLarge { .. }));
}

#[tokio::test]
async fn test_server_error_is_api_error() {
    let (config, _) = spawn_stub().await;
    let translator = AsyncTranslator::new(config).unwrap();

    let err = translator
        .translate("broken", &prompt(), &model())
        .await
        .unwrap_err();
    assert!(matches!(err, TranslationError::ApiError { status: 500, .. }));
}

#[tokio::test]
async fn test_unreachable_endpoint_is_network_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = TranslatorConfig {
        api_key: "test-key".to_string(),
        api_endpoint: format!("http://{}/v1/chat/completions", addr),
        ..TranslatorConfig::default()
    };
    let translator = AsyncTranslator::new(config).unwrap();
    let err = translator
        .translate("hello", &prompt(), &model())
        .await
        .unwrap_err();
    assert!(matches!(err, TranslationError::NetworkError { .. }));
}

#[tokio::test]
async fn test_pipeline_over_http() {
    let (config, requests) = spawn_stub().await;
    let text = "First paragraph.\n\nA huge paragraph.\n\nLast paragraph.";
    let job_config = JobConfig::new("gpt-4o-mini", "de").with_budget(6);
    let job = TranslationJob::create(
        "doc.txt",
        text,
        job_config,
        SizeEstimator::new(config.chars_per_token),
    );
    assert_eq!(job.total_chunks(), 3);

    let client = Arc::new(AsyncTranslator::new(config.clone()).unwrap());
    let orchestrator =
        Orchestrator::from_config(job, client, Arc::new(MemoryCheckpointStore::new()), &config)
            .unwrap();

    let summary = orchestrator.start().await.unwrap();

    assert_eq!(summary.state, RunState::Completed);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed_indices, vec![1]);
    assert_eq!(summary.usage.input_tokens, 200);
    assert_eq!(summary.usage.output_tokens, 100);
    // The too-large chunk is not retried.
    assert_eq!(requests.lock().unwrap().len(), 3);

    let job = orchestrator.job().await;
    assert!(matches!(
        &job.results()[1],
        ChunkOutcome::Failed {
            kind: FailureKind::ChunkTooLarge,
            ..
        }
    ));
    assert_eq!(
        orchestrator.export().await.lines().next(),
        Some("EN: First paragraph.")
    );
}

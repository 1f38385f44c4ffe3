//! HTTP control surface driven over a real socket

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use longdoc_translator::core::budget::SizeEstimator;
use longdoc_translator::core::config::{JobConfig, TranslatorConfig};
use longdoc_translator::core::mock::MockTranslator;
use longdoc_translator::pipeline::checkpoint::{CheckpointStore, MemoryCheckpointStore};
use longdoc_translator::pipeline::job::{RunState, TranslationJob};
use longdoc_translator::server::api::{router, AppState};

const DOCUMENT: &str = "alpha one.\n\nbravo two.\n\ncharlie three.";

struct TestServer {
    base: String,
    http: reqwest::Client,
    mock: Arc<MockTranslator>,
    store: Arc<MemoryCheckpointStore>,
}

async fn spawn_server() -> TestServer {
    let mock = Arc::new(MockTranslator::new());
    let store = Arc::new(MemoryCheckpointStore::new());
    let state = Arc::new(AppState::new(
        TranslatorConfig::default(),
        mock.clone(),
        store.clone(),
    ));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });

    TestServer {
        base: format!("http://{}", addr),
        http: reqwest::Client::new(),
        mock,
        store,
    }
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn submit(&self, text: &str) -> reqwest::Response {
        self.http
            .post(self.url("/jobs"))
            .json(&json!({
                "text": text,
                "source_name": "doc.txt",
                "model": "gpt-4o-mini",
                "target_lang": "en",
                "chunk_size_budget": 4
            }))
            .send()
            .await
            .unwrap()
    }

    async fn post(&self, path: &str) -> reqwest::Response {
        self.http.post(self.url(path)).send().await.unwrap()
    }

    async fn current(&self) -> Value {
        self.http
            .get(self.url("/jobs/current"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    async fn wait_for_state(&self, state: &str) -> Value {
        for _ in 0..200 {
            let summary = self.current().await;
            if summary["state"] == state {
                return summary;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job never reached state {}", state);
    }
}

#[tokio::test]
async fn test_health_and_models() {
    let server = spawn_server().await;

    let health: Value = server
        .http
        .get(server.url("/"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let models: Value = server
        .http
        .get(server.url("/v1/models"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(models["object"], "list");
    assert!(models["data"]
        .as_array()
        .unwrap()
        .iter()
        .any(|m| m["id"] == "gpt-4o-mini"));
}

#[tokio::test]
async fn test_submit_runs_to_completion_and_exports() {
    let server = spawn_server().await;

    let response = server.submit(DOCUMENT).await;
    assert_eq!(response.status(), 202);
    let accepted: Value = response.json().await.unwrap();
    assert_eq!(accepted["total_chunks"], 3);

    let summary = server.wait_for_state("completed").await;
    assert_eq!(summary["succeeded"], 3);
    assert_eq!(summary["cursor"], 3);
    assert_eq!(summary["job_id"], accepted["job_id"]);

    let export = server
        .http
        .get(server.url("/jobs/current/export"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(
        export,
        "translated: alpha one.\n\ntranslated: bravo two.\n\ntranslated: charlie three."
    );

    // Nothing failed, so retrying is accepted and changes nothing.
    assert_eq!(server.post("/jobs/current/retry-failed").await.status(), 202);
    assert_eq!(server.mock.call_count(), 3);
}

#[tokio::test]
async fn test_rejects_bad_submissions() {
    let server = spawn_server().await;

    let response = server.submit("   \n\n  ").await;
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "invalid_request");

    let response = server
        .http
        .post(server.url("/jobs"))
        .json(&json!({ "text": DOCUMENT, "model": "no-such-model", "target_lang": "en" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_lifecycle_without_job_is_not_found() {
    let server = spawn_server().await;
    assert_eq!(server.post("/jobs/current/pause").await.status(), 404);
    assert_eq!(
        server
            .http
            .get(server.url("/jobs/current"))
            .send()
            .await
            .unwrap()
            .status(),
        404
    );
}

#[tokio::test]
async fn test_pause_resume_and_conflicts() {
    let server = spawn_server().await;
    let gate = server.mock.gate("bravo");

    assert_eq!(server.submit(DOCUMENT).await.status(), 202);
    gate.entered().await;

    // One running job at a time.
    assert_eq!(server.submit(DOCUMENT).await.status(), 409);
    assert_eq!(server.post("/jobs/current/resume").await.status(), 409);

    let response = server.post("/jobs/current/pause").await;
    assert_eq!(response.status(), 200);
    let paused: Value = response.json().await.unwrap();
    assert_eq!(paused["state"], "paused");
    gate.release();

    assert_eq!(server.post("/jobs/current/pause").await.status(), 409);
    assert_eq!(server.post("/jobs/current/resume").await.status(), 202);

    let summary = server.wait_for_state("completed").await;
    assert_eq!(summary["succeeded"], 3);
    assert_eq!(server.mock.call_count(), 3);
}

#[tokio::test]
async fn test_checkpoints_list_resume_and_clear() {
    let server = spawn_server().await;

    let config = JobConfig::new("gpt-4o-mini", "en").with_budget(4);
    let job = TranslationJob::create("saved.txt", DOCUMENT, config, SizeEstimator::new(4));
    let job_id = job.id().to_string();
    server.store.put(&job.snapshot()).await.unwrap();

    let listed: Value = server
        .http
        .get(server.url("/checkpoints"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed[0]["job_id"], job_id);
    assert_eq!(listed[0]["source_name"], "saved.txt");
    assert_eq!(listed[0]["total_chunks"], 3);

    let path = format!("/checkpoints/{}/resume", job_id);
    let response = server
        .http
        .post(server.url(&path))
        .json(&json!({ "text": "a different document" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let response = server
        .http
        .post(server.url(&path))
        .json(&json!({ "text": DOCUMENT }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 202);
    server.wait_for_state("completed").await;

    let response = server
        .http
        .post(server.url("/checkpoints/missing/resume"))
        .json(&json!({ "text": DOCUMENT }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    let response = server
        .http
        .delete(server.url("/checkpoints"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);
    assert!(server.store.get_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_simultaneous_submits_accept_only_one() {
    let server = spawn_server().await;
    // Hold whichever job wins so it is still running when the other lands.
    let first_gate = server.mock.gate("AAA");
    let second_gate = server.mock.gate("BBB");

    let (first, second) = tokio::join!(
        server.submit("AAA first doc"),
        server.submit("BBB second doc")
    );
    let mut statuses = vec![first.status().as_u16(), second.status().as_u16()];
    statuses.sort();
    assert_eq!(statuses, vec![202, 409]);

    let (winner, gate) = if first.status() == 202 {
        (first, first_gate.clone())
    } else {
        (second, second_gate.clone())
    };
    let accepted: Value = winner.json().await.unwrap();
    gate.entered().await;
    first_gate.release();
    second_gate.release();

    let summary = server.wait_for_state("completed").await;
    assert_eq!(summary["job_id"], accepted["job_id"]);
    assert_eq!(server.mock.call_count(), 1);
}

#[tokio::test]
async fn test_stopped_checkpoint_cannot_be_resumed() {
    let server = spawn_server().await;

    let config = JobConfig::new("gpt-4o-mini", "en").with_budget(4);
    let job = TranslationJob::create("saved.txt", DOCUMENT, config, SizeEstimator::new(4));
    let mut snapshot = job.snapshot();
    snapshot.run_state = RunState::Stopped;
    server.store.put(&snapshot).await.unwrap();

    let response = server
        .http
        .post(server.url(&format!("/checkpoints/{}/resume", job.id())))
        .json(&json!({ "text": DOCUMENT }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "invalid_state");

    assert_eq!(server.mock.call_count(), 0);
    assert_eq!(
        server
            .http
            .get(server.url("/jobs/current"))
            .send()
            .await
            .unwrap()
            .status(),
        404
    );
}

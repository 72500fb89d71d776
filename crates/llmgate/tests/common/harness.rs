//! Test harness wiring a store, worker and HTTP surface around a fake backend.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use llmgate::api::{self, AppState};
use llmgate::jobs::{JobStore, JobSubmitter, JobWorker, ResultRetriever, WorkerOptions};
use llmgate::{Database, OllamaClient};

use super::fake_backend::FakeBackend;

pub const MULTIMODAL_MODELS: &[&str] = &["llava:7b", "rambler"];

/// Isolated gateway instance backed by a temp directory and a fake backend.
pub struct TestHarness {
    temp_dir: TempDir,
    pub backend: FakeBackend,
    pub client: OllamaClient,
    pub store: JobStore,
    pub submitter: JobSubmitter,
    pub retriever: ResultRetriever,
    pub worker: JobWorker,
    shutdown: CancellationToken,
}

impl TestHarness {
    pub async fn new() -> Self {
        Self::with_expiry(chrono::Duration::minutes(60)).await
    }

    /// Harness whose results expire after `expiry`.
    pub async fn with_expiry(expiry: chrono::Duration) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let backend = FakeBackend::start().await;
        let client = OllamaClient::new(&backend.url(), Duration::from_secs(10))
            .expect("Failed to create backend client");

        let db = Database::open_in_dir(&temp_dir.path().join("data"))
            .expect("Failed to open database");
        let store = JobStore::new(db);

        let worker = JobWorker::new(
            store.clone(),
            Arc::new(client.clone()),
            WorkerOptions::default(),
        );
        let submitter = JobSubmitter::new(
            store.clone(),
            temp_dir.path().join("scratch"),
            MULTIMODAL_MODELS.iter().map(|m| m.to_string()).collect(),
        )
        .with_trigger(worker.trigger());
        let retriever = ResultRetriever::new(store.clone(), expiry);

        Self {
            temp_dir,
            backend,
            client,
            store,
            submitter,
            retriever,
            worker,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.temp_dir.path().join("scratch")
    }

    /// Number of files currently staged.
    pub fn staged_files(&self) -> usize {
        std::fs::read_dir(self.scratch_dir())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    /// Serves the HTTP surface on an ephemeral port and returns its base URL.
    pub async fn serve_api(&self) -> String {
        let router = api::router(AppState {
            store: self.store.clone(),
            submitter: self.submitter.clone(),
            retriever: self.retriever.clone(),
            backend: self.client.clone(),
        });
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            api::serve(listener, router, shutdown).await.unwrap();
        });
        format!("http://{}", addr)
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

//! Caller-facing HTTP surface.
//!
//! Authentication happens upstream; handlers only check the role header the
//! proxy sets (see [`auth::ROLE_HEADER`]).

use axum::extract::{DefaultBodyLimit, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::backend::OllamaClient;
use crate::db;
use crate::jobs::{JobStore, JobSubmitter, ResultRetriever};

pub mod auth;
pub mod error;
pub mod inference;
pub mod jobs;

pub use auth::{Role, ROLE_HEADER};
pub use error::ApiError;

/// Upload size accepted by the extraction endpoint.
pub const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub store: JobStore,
    pub submitter: JobSubmitter,
    pub retriever: ResultRetriever,
    pub backend: OllamaClient,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        // Direct inference
        .route("/api/generate", post(inference::generate))
        .route("/api/generate/stream", post(inference::generate_stream))
        .route("/api/chat", post(inference::chat))
        .route("/api/chat/stream", post(inference::chat_stream))
        .route(
            "/api/models",
            get(inference::list_models)
                .post(inference::pull_model)
                .delete(inference::delete_model),
        )
        // Jobs
        .route("/jobs", get(jobs::list_jobs).delete(jobs::delete_jobs))
        .route("/jobs/generate", post(jobs::create_generation_job))
        .route(
            "/jobs/ocr",
            post(jobs::create_extraction_job).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/jobs/:id/status", get(jobs::job_status))
        .route("/jobs/:id/result", get(jobs::job_result))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let store = state.store.clone();
    let counts = db::blocking(move || store.status_counts()).await?;
    Ok(Json(json!({ "status": "ok", "jobs": counts })))
}

/// Serves `router` on `listener` until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

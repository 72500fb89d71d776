//! Inference gateway with a durable job queue.
//!
//! Callers either proxy requests straight to an Ollama-compatible backend or
//! submit jobs that a background worker runs later; results stay
//! retrievable for a configured window.

pub mod api;
pub mod backend;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod telemetry;

pub use backend::{BackendError, InferenceBackend, OllamaClient};
pub use config::{load_config, Config};
pub use db::{Database, DatabaseError};
pub use error::{ConfigError, GatewayError, Result};
pub use jobs::{
    Job, JobError, JobStatus, JobStore, JobSubmitter, JobType, JobWorker, ResultRetriever,
    WorkerOptions,
};
pub use telemetry::{init_logging, LogFormat};

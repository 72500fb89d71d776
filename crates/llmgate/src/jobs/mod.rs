//! Asynchronous inference jobs: persistence, submission, background
//! processing and result retrieval.

use std::path::PathBuf;

use thiserror::Error;

use crate::db::DatabaseError;

pub mod model;
pub mod retrieve;
pub mod store;
pub mod submit;
pub mod worker;

pub use model::{Job, JobStatus, JobTask, JobType, PendingJob, EXTRACTION_PROMPT};
pub use retrieve::{ResultRetriever, ResultView, StatusView};
pub use store::{JobOutcome, JobStore, StatusCounts};
pub use submit::{JobSubmitter, WorkerTrigger};
pub use worker::{JobWorker, WorkerOptions};

/// Errors surfaced to callers of the job operations.
#[derive(Debug, Error)]
pub enum JobError {
    /// Caller-supplied data rejected before anything was persisted.
    #[error("{0}")]
    Validation(String),

    #[error("Job not found")]
    NotFound(String),

    #[error("Job result has expired")]
    ResultExpired(String),

    #[error("Failed to stage upload at {path}: {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Job store error: {0}")]
    Store(#[from] DatabaseError),
}

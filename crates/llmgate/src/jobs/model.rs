//! Job domain types and their storage codecs.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

pub use crate::backend::EXTRACTION_PROMPT;

/// Lifecycle state of a job. Only ever moves forward:
/// `Pending -> Running -> Fulfilled | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Fulfilled,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Fulfilled => "fulfilled",
            JobStatus::Failed => "failed",
        }
    }

    /// Returns true for `Fulfilled` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Fulfilled | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "fulfilled" => Ok(JobStatus::Fulfilled),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// Kind of backend operation a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Generate,
    OcrExtract,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Generate => "generate",
            JobType::OcrExtract => "ocr_extract",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generate" => Ok(JobType::Generate),
            "ocr_extract" => Ok(JobType::OcrExtract),
            other => Err(format!("unknown job type: {}", other)),
        }
    }
}

/// A persisted unit of deferred inference work.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fulfilled_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub job_type: JobType,
    pub model: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip)]
    pub images_path: Vec<PathBuf>,
}

impl Job {
    /// Creates a new pending job with a fresh id.
    pub fn new_pending(job_type: JobType, model: &str, prompt: &str) -> Self {
        Self::with_id(new_job_id(), job_type, model, prompt)
    }

    /// Creates a new pending job with a caller-chosen id. Used when the id
    /// must be known before the row exists (e.g. to name a staged file).
    pub fn with_id(id: String, job_type: JobType, model: &str, prompt: &str) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            fulfilled_at: None,
            status: JobStatus::Pending,
            job_type,
            model: model.to_string(),
            prompt: prompt.to_string(),
            result: None,
            images_path: Vec::new(),
        }
    }
}

/// The work a pending job asks for, decoded from its stored fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobTask {
    Generate { model: String, prompt: String },
    OcrExtract { model: String, image_path: PathBuf },
}

/// Why a stored job cannot be turned into a [`JobTask`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("unknown job type: {0}")]
    UnknownJobType(String),
    #[error("no image path found")]
    MissingImage,
    #[error("expected exactly one image path, found {0}")]
    TooManyImages(usize),
}

/// A pending job as read by the worker. `job_type` stays a raw tag so that
/// rows written with an unknown type can still be failed cleanly.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingJob {
    pub id: String,
    pub job_type: String,
    pub model: String,
    pub prompt: String,
    pub images_path: Vec<PathBuf>,
}

impl PendingJob {
    pub fn task(&self) -> Result<JobTask, TaskError> {
        let job_type: JobType = self
            .job_type
            .parse()
            .map_err(|_| TaskError::UnknownJobType(self.job_type.clone()))?;

        match job_type {
            JobType::Generate => Ok(JobTask::Generate {
                model: self.model.clone(),
                prompt: self.prompt.clone(),
            }),
            JobType::OcrExtract => match self.images_path.as_slice() {
                [path] => Ok(JobTask::OcrExtract {
                    model: self.model.clone(),
                    image_path: path.clone(),
                }),
                [] => Err(TaskError::MissingImage),
                paths => Err(TaskError::TooManyImages(paths.len())),
            },
        }
    }
}

/// Generates a new unique job id.
pub fn new_job_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Encodes staged paths for the `images_path` column. An empty list is
/// stored as NULL.
pub fn encode_paths(paths: &[PathBuf]) -> Result<Option<String>, serde_json::Error> {
    if paths.is_empty() {
        return Ok(None);
    }
    serde_json::to_string(paths).map(Some)
}

/// Decodes the `images_path` column.
pub fn decode_paths(raw: Option<&str>) -> Result<Vec<PathBuf>, serde_json::Error> {
    match raw {
        None => Ok(Vec::new()),
        Some(s) if s.trim().is_empty() => Ok(Vec::new()),
        Some(s) => serde_json::from_str(s),
    }
}

/// Formats a timestamp for storage. Fixed-width so string order is time order.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parses a stored timestamp.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

//! Typed job store over the raw `jobs` table.

use chrono::{Duration, Utc};
use serde::Serialize;

use crate::db::job_repo::{self, JobRow};
use crate::db::{Database, DatabaseError};

use super::model::{
    decode_paths, encode_paths, format_timestamp, parse_timestamp, Job, JobStatus, PendingJob,
};

/// Result text written to running jobs that outlived the staleness window.
pub const ABANDONED_RESULT: &str = "job abandoned while running";

/// Terminal outcome of a dispatched job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Fulfilled(String),
    Failed(String),
}

impl JobOutcome {
    pub fn status(&self) -> JobStatus {
        match self {
            JobOutcome::Fulfilled(_) => JobStatus::Fulfilled,
            JobOutcome::Failed(_) => JobStatus::Failed,
        }
    }

    pub fn result(&self) -> &str {
        match self {
            JobOutcome::Fulfilled(r) | JobOutcome::Failed(r) => r,
        }
    }
}

/// Number of jobs per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub running: u64,
    pub fulfilled: u64,
    pub failed: u64,
}

/// Durable table of jobs. Cloning shares the underlying connection.
#[derive(Clone)]
pub struct JobStore {
    db: Database,
}

impl JobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Persists a new job. Fails on a duplicate id.
    pub fn insert(&self, job: &Job) -> Result<(), DatabaseError> {
        let images_path = encode_paths(&job.images_path).map_err(|e| DatabaseError::Corrupt {
            id: job.id.clone(),
            reason: format!("cannot encode images_path: {}", e),
        })?;

        job_repo::insert(
            &self.db,
            &JobRow {
                id: job.id.clone(),
                created_at: format_timestamp(job.created_at),
                started_at: None,
                fulfilled_at: job.fulfilled_at.map(format_timestamp),
                status: job.status.as_str().to_string(),
                job_type: job.job_type.as_str().to_string(),
                model: job.model.clone(),
                prompt: job.prompt.clone(),
                result: job.result.clone(),
                images_path,
            },
        )
    }

    /// Loads a job. With `include_result = false` the result column is not read.
    pub fn get_by_id(&self, id: &str, include_result: bool) -> Result<Option<Job>, DatabaseError> {
        job_repo::find_by_id(&self.db, id, include_result)?
            .map(decode_job)
            .transpose()
    }

    /// Reads only the status of a job.
    pub fn get_status(&self, id: &str) -> Result<Option<JobStatus>, DatabaseError> {
        job_repo::find_status(&self.db, id)?
            .map(|s| {
                s.parse().map_err(|reason| DatabaseError::Corrupt {
                    id: id.to_string(),
                    reason,
                })
            })
            .transpose()
    }

    /// `Pending -> Running`. Returns `false` if the job was no longer pending.
    pub fn mark_running(&self, id: &str) -> Result<bool, DatabaseError> {
        job_repo::mark_running(&self.db, id, &format_timestamp(Utc::now()))
    }

    /// `Running -> Fulfilled | Failed`, writing the result and `fulfilled_at`
    /// together. Returns `false` if the job was not running.
    pub fn mark_finished(&self, id: &str, outcome: &JobOutcome) -> Result<bool, DatabaseError> {
        job_repo::mark_finished(
            &self.db,
            id,
            outcome.status().as_str(),
            outcome.result(),
            &format_timestamp(Utc::now()),
        )
    }

    /// All pending jobs, oldest first.
    pub fn list_pending(&self) -> Result<Vec<PendingJob>, DatabaseError> {
        let rows = job_repo::list_by_status(&self.db, JobStatus::Pending.as_str())?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let images_path = decode_paths(row.images_path.as_deref()).unwrap_or_else(|e| {
                    log::warn!("Job {} has unreadable images_path: {}", row.id, e);
                    Vec::new()
                });
                PendingJob {
                    id: row.id,
                    job_type: row.job_type,
                    model: row.model,
                    prompt: row.prompt,
                    images_path,
                }
            })
            .collect())
    }

    /// The most recent `limit` jobs, newest first. Undecodable rows are skipped.
    pub fn list(&self, limit: u32, include_result: bool) -> Result<Vec<Job>, DatabaseError> {
        let rows = job_repo::list_recent(&self.db, limit, include_result)?;
        Ok(rows
            .into_iter()
            .filter_map(|row| match decode_job(row) {
                Ok(job) => Some(job),
                Err(e) => {
                    log::warn!("Skipping job in listing: {}", e);
                    None
                }
            })
            .collect())
    }

    /// Fails running jobs that started more than `older_than` ago. A cutoff
    /// before the earliest representable time matches nothing.
    pub fn fail_stale(&self, older_than: Duration) -> Result<Vec<String>, DatabaseError> {
        let now = Utc::now();
        let Some(cutoff) = now.checked_sub_signed(older_than) else {
            return Ok(Vec::new());
        };
        job_repo::fail_running_before(
            &self.db,
            &format_timestamp(cutoff),
            ABANDONED_RESULT,
            &format_timestamp(now),
        )
    }

    pub fn status_counts(&self) -> Result<StatusCounts, DatabaseError> {
        let mut counts = StatusCounts::default();
        for (status, n) in job_repo::count_by_status(&self.db)? {
            match status.parse::<JobStatus>() {
                Ok(JobStatus::Pending) => counts.pending = n,
                Ok(JobStatus::Running) => counts.running = n,
                Ok(JobStatus::Fulfilled) => counts.fulfilled = n,
                Ok(JobStatus::Failed) => counts.failed = n,
                Err(e) => log::warn!("Ignoring {} jobs: {}", n, e),
            }
        }
        Ok(counts)
    }

    /// Administrative bulk clear.
    pub fn delete_all(&self) -> Result<u64, DatabaseError> {
        job_repo::delete_all(&self.db)
    }
}

fn decode_job(row: JobRow) -> Result<Job, DatabaseError> {
    let corrupt = |reason: String| DatabaseError::Corrupt {
        id: row.id.clone(),
        reason,
    };

    let status = row.status.parse().map_err(corrupt)?;
    let job_type = row.job_type.parse().map_err(corrupt)?;
    let created_at =
        parse_timestamp(&row.created_at).map_err(|e| corrupt(format!("created_at: {}", e)))?;
    let fulfilled_at = row
        .fulfilled_at
        .as_deref()
        .map(parse_timestamp)
        .transpose()
        .map_err(|e| corrupt(format!("fulfilled_at: {}", e)))?;
    let images_path = decode_paths(row.images_path.as_deref())
        .map_err(|e| corrupt(format!("images_path: {}", e)))?;

    Ok(Job {
        id: row.id,
        created_at,
        fulfilled_at,
        status,
        job_type,
        model: row.model,
        prompt: row.prompt,
        result: row.result,
        images_path,
    })
}

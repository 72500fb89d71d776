//! Status and result lookups with the retrievability window applied.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::model::JobStatus;
use super::store::JobStore;
use super::JobError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusView {
    pub id: String,
    pub status: JobStatus,
}

/// Answer to a result query. `result` is only ever present for a fulfilled
/// job inside its retrievability window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultView {
    pub id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

#[derive(Clone)]
pub struct ResultRetriever {
    store: JobStore,
    expiry: Duration,
}

impl ResultRetriever {
    pub fn new(store: JobStore, expiry: Duration) -> Self {
        Self { store, expiry }
    }

    pub fn get_status(&self, id: &str) -> Result<StatusView, JobError> {
        let status = self
            .store
            .get_status(id)?
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;
        Ok(StatusView {
            id: id.to_string(),
            status,
        })
    }

    pub fn get_result(&self, id: &str) -> Result<ResultView, JobError> {
        self.get_result_at(id, Utc::now())
    }

    /// Same as [`get_result`](Self::get_result) evaluated at a given instant.
    pub fn get_result_at(&self, id: &str, now: DateTime<Utc>) -> Result<ResultView, JobError> {
        let job = self
            .store
            .get_by_id(id, true)?
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;

        if job.status != JobStatus::Fulfilled {
            return Ok(ResultView {
                id: job.id,
                status: job.status,
                result: None,
            });
        }

        let retrievable = job
            .fulfilled_at
            .is_some_and(|at| !is_expired(at, now, self.expiry));
        if !retrievable {
            return Err(JobError::ResultExpired(job.id));
        }

        Ok(ResultView {
            id: job.id,
            status: job.status,
            result: job.result,
        })
    }
}

/// A result fulfilled at `fulfilled_at` is retrievable only while less than
/// `window` has elapsed. At the edge itself it is expired.
pub fn is_expired(fulfilled_at: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
    now - fulfilled_at >= window
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::jobs::model::{Job, JobType};
    use crate::jobs::store::JobOutcome;

    fn retriever() -> (JobStore, ResultRetriever) {
        let store = JobStore::new(Database::open_in_memory().unwrap());
        let retriever = ResultRetriever::new(store.clone(), Duration::minutes(60));
        (store, retriever)
    }

    fn fulfilled(store: &JobStore, result: &str) -> Job {
        let job = Job::new_pending(JobType::Generate, "llama3", "hi");
        store.insert(&job).unwrap();
        store.mark_running(&job.id).unwrap();
        store
            .mark_finished(&job.id, &JobOutcome::Fulfilled(result.to_string()))
            .unwrap();
        store.get_by_id(&job.id, true).unwrap().unwrap()
    }

    #[test]
    fn test_expiry_boundary() {
        let at = Utc::now();
        let window = Duration::minutes(60);
        assert!(!is_expired(at, at, window));
        assert!(!is_expired(at, at + window - Duration::seconds(1), window));
        assert!(!is_expired(at, at + window - Duration::microseconds(1), window));
        assert!(is_expired(at, at + window, window));
        assert!(is_expired(at, at + window + Duration::microseconds(1), window));
    }

    #[test]
    fn test_unfinished_jobs_never_return_result() {
        let (store, retriever) = retriever();
        let job = Job::new_pending(JobType::Generate, "llama3", "hi");
        store.insert(&job).unwrap();

        let view = retriever.get_result(&job.id).unwrap();
        assert_eq!(view.status, JobStatus::Pending);
        assert!(view.result.is_none());

        store.mark_running(&job.id).unwrap();
        let view = retriever.get_result(&job.id).unwrap();
        assert_eq!(view.status, JobStatus::Running);
        assert!(view.result.is_none());
        let json = serde_json::to_value(&view).unwrap();
        assert!(json.get("result").is_none());
    }

    #[test]
    fn test_failed_job_reports_status_only() {
        let (store, retriever) = retriever();
        let job = Job::new_pending(JobType::Generate, "x", "hi");
        store.insert(&job).unwrap();
        store.mark_running(&job.id).unwrap();
        store
            .mark_finished(&job.id, &JobOutcome::Failed("model not found".into()))
            .unwrap();

        let view = retriever.get_result(&job.id).unwrap();
        assert_eq!(view.status, JobStatus::Failed);
        assert!(view.result.is_none());
    }

    #[test]
    fn test_fulfilled_result_within_and_after_window() {
        let (store, retriever) = retriever();
        let job = fulfilled(&store, "{\"response\":\"hello\"}");
        let at = job.fulfilled_at.unwrap();

        let view = retriever
            .get_result_at(&job.id, at + Duration::minutes(59))
            .unwrap();
        assert_eq!(view.result.as_deref(), Some("{\"response\":\"hello\"}"));

        let at_edge = retriever.get_result_at(&job.id, at + Duration::minutes(60));
        assert!(matches!(at_edge, Err(JobError::ResultExpired(ref id)) if *id == job.id));

        let expired = retriever.get_result_at(&job.id, at + Duration::minutes(61));
        assert!(matches!(expired, Err(JobError::ResultExpired(id)) if id == job.id));
    }

    #[test]
    fn test_unknown_id_is_not_found() {
        let (_, retriever) = retriever();
        assert!(matches!(retriever.get_status("nope"), Err(JobError::NotFound(_))));
        assert!(matches!(retriever.get_result("nope"), Err(JobError::NotFound(_))));
    }

    #[test]
    fn test_get_status() {
        let (store, retriever) = retriever();
        let job = fulfilled(&store, "r");
        let view = retriever.get_status(&job.id).unwrap();
        assert_eq!(view.status, JobStatus::Fulfilled);
        assert_eq!(view.id, job.id);
    }
}

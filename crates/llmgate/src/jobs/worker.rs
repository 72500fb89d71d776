//! Background worker that drains pending jobs through the inference backend.
//!
//! One worker runs per process. Each tick first fails running jobs that
//! have been abandoned, then claims and dispatches every pending job one at
//! a time, so at most one backend request is in flight.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::backend::InferenceBackend;
use crate::db;

use super::model::{JobTask, PendingJob};
use super::store::{JobOutcome, JobStore};
use super::submit::WorkerTrigger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerOptions {
    /// Time between ticks when nothing triggers the worker early.
    pub poll_interval: Duration,
    /// Running jobs older than this are failed as abandoned. Must exceed the
    /// backend request timeout.
    pub stale_after: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            stale_after: Duration::from_secs(900),
        }
    }
}

/// What one tick did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    pub reclaimed: usize,
    pub fulfilled: usize,
    pub failed: usize,
    /// Jobs that could not be claimed or whose outcome could not be stored.
    pub skipped: usize,
}

pub struct JobWorker {
    store: JobStore,
    backend: Arc<dyn InferenceBackend>,
    options: WorkerOptions,
    trigger: WorkerTrigger,
}

impl JobWorker {
    pub fn new(store: JobStore, backend: Arc<dyn InferenceBackend>, options: WorkerOptions) -> Self {
        Self {
            store,
            backend,
            options,
            trigger: WorkerTrigger::new(),
        }
    }

    /// Handle that wakes this worker before its next interval.
    pub fn trigger(&self) -> WorkerTrigger {
        self.trigger.clone()
    }

    /// Runs ticks until `cancel` fires. A tick in progress finishes its
    /// current job before the loop exits.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            interval_secs = self.options.poll_interval.as_secs_f64(),
            stale_after_secs = self.options.stale_after.as_secs(),
            "Job worker started"
        );

        let mut interval = tokio::time::interval(self.options.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
                _ = self.trigger.notified() => debug!("Worker woken by submission"),
            }

            let summary = self.tick(&cancel).await;
            if summary != TickSummary::default() {
                info!(
                    reclaimed = summary.reclaimed,
                    fulfilled = summary.fulfilled,
                    failed = summary.failed,
                    skipped = summary.skipped,
                    "Worker tick finished"
                );
            }
        }

        info!("Job worker stopped");
    }

    /// Runs exactly one tick.
    pub async fn run_tick(&self) -> TickSummary {
        self.tick(&CancellationToken::new()).await
    }

    async fn tick(&self, cancel: &CancellationToken) -> TickSummary {
        async {
            let mut summary = TickSummary {
                reclaimed: self.reclaim_stale().await,
                ..TickSummary::default()
            };

            let store = self.store.clone();
            let pending = match db::blocking(move || store.list_pending()).await {
                Ok(pending) => pending,
                Err(e) => {
                    error!(error = %e, "Failed to query pending jobs");
                    return summary;
                }
            };
            if !pending.is_empty() {
                debug!(count = pending.len(), "Processing pending jobs");
            }

            for (done, job) in pending.iter().enumerate() {
                if cancel.is_cancelled() {
                    info!(remaining = pending.len() - done, "Shutdown requested, leaving jobs pending");
                    break;
                }

                let span = info_span!("job", job_id = %job.id, job_type = %job.job_type, model = %job.model);
                match self.process(job).instrument(span).await {
                    Some(JobOutcome::Fulfilled(_)) => summary.fulfilled += 1,
                    Some(JobOutcome::Failed(_)) => summary.failed += 1,
                    None => summary.skipped += 1,
                }
            }

            summary
        }
        .instrument(info_span!("worker_tick"))
        .await
    }

    async fn reclaim_stale(&self) -> usize {
        let older_than = chrono::Duration::from_std(self.options.stale_after)
            .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));

        let store = self.store.clone();
        match db::blocking(move || store.fail_stale(older_than)).await {
            Ok(ids) => {
                for id in &ids {
                    warn!(job_id = %id, "Failed abandoned running job");
                }
                ids.len()
            }
            Err(e) => {
                error!(error = %e, "Failed to reclaim stale jobs");
                0
            }
        }
    }

    /// Claims and runs one job. Returns the stored outcome, or `None` if the
    /// job was skipped.
    async fn process(&self, job: &PendingJob) -> Option<JobOutcome> {
        let (store, id) = (self.store.clone(), job.id.clone());
        match db::blocking(move || store.mark_running(&id)).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("Job no longer pending, skipping");
                return None;
            }
            Err(e) => {
                error!(error = %e, "Failed to mark job running");
                return None;
            }
        }
        info!("Processing job");

        let outcome = self.execute(job).await;

        let (store, id, stored) = (self.store.clone(), job.id.clone(), outcome.clone());
        match db::blocking(move || store.mark_finished(&id, &stored)).await {
            Ok(true) => {
                match &outcome {
                    JobOutcome::Fulfilled(_) => info!(status = "fulfilled", "Job finished"),
                    JobOutcome::Failed(reason) => {
                        warn!(status = "failed", reason = %reason, "Job finished")
                    }
                }
                Some(outcome)
            }
            Ok(false) => {
                warn!("Job was no longer running, outcome discarded");
                None
            }
            Err(e) => {
                error!(error = %e, "Failed to store job outcome");
                None
            }
        }
    }

    async fn execute(&self, job: &PendingJob) -> JobOutcome {
        let task = match job.task() {
            Ok(task) => task,
            Err(e) => {
                for path in &job.images_path {
                    remove_staged(path).await;
                }
                return JobOutcome::Failed(e.to_string());
            }
        };

        match task {
            JobTask::Generate { model, prompt } => match self.backend.generate(&model, &prompt).await {
                Ok(reply) => serialize(&reply),
                Err(e) => JobOutcome::Failed(e.to_string()),
            },
            JobTask::OcrExtract { model, image_path } => self.extract(&model, &image_path).await,
        }
    }

    async fn extract(&self, model: &str, image_path: &Path) -> JobOutcome {
        let image = match tokio::fs::read(image_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                remove_staged(image_path).await;
                return JobOutcome::Failed(format!(
                    "failed to read staged image {}: {}",
                    image_path.display(),
                    e
                ));
            }
        };

        let file_name = image_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| image_path.display().to_string());

        let result = self.backend.extract_text(model, &image, &file_name).await;
        remove_staged(image_path).await;

        match result {
            Ok(outcome) => serialize(&outcome),
            Err(e) => JobOutcome::Failed(e.to_string()),
        }
    }
}

fn serialize<T: Serialize>(value: &T) -> JobOutcome {
    match serde_json::to_string(value) {
        Ok(text) => JobOutcome::Fulfilled(text),
        Err(e) => JobOutcome::Failed(format!("failed to serialize response: {}", e)),
    }
}

async fn remove_staged(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed staged file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove staged file"),
    }
}

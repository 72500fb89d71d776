//! Job submission: validation, scratch staging and persistence.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{error, info};

use crate::db;

use super::model::{new_job_id, Job, JobType, EXTRACTION_PROMPT};
use super::store::JobStore;
use super::JobError;

/// Image types accepted for text extraction.
const ACCEPTED_IMAGE_TYPES: &[&str] = &["image/png", "image/jpeg"];

const PROMPT_PREVIEW_CHARS: usize = 48;

/// Wakes the worker early after a submission.
///
/// A notification sent while the worker is busy is remembered, so the next
/// wait returns immediately instead of sleeping a full interval.
#[derive(Clone, Default)]
pub struct WorkerTrigger {
    notify: Arc<Notify>,
}

impl WorkerTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        self.notify.notify_one();
    }

    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

/// Creates pending jobs on behalf of callers.
#[derive(Clone)]
pub struct JobSubmitter {
    store: JobStore,
    scratch_dir: PathBuf,
    multimodal_models: Vec<String>,
    trigger: Option<WorkerTrigger>,
}

impl JobSubmitter {
    pub fn new(store: JobStore, scratch_dir: impl Into<PathBuf>, multimodal_models: Vec<String>) -> Self {
        Self {
            store,
            scratch_dir: scratch_dir.into(),
            multimodal_models,
            trigger: None,
        }
    }

    /// Nudges the given worker after every successful submission.
    pub fn with_trigger(mut self, trigger: WorkerTrigger) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    pub fn multimodal_models(&self) -> &[String] {
        &self.multimodal_models
    }

    /// Persists a pending text generation job.
    pub fn submit_generation(&self, model: &str, prompt: &str) -> Result<Job, JobError> {
        if prompt.trim().is_empty() {
            return Err(JobError::Validation("Prompt is required".to_string()));
        }
        if model.trim().is_empty() {
            return Err(JobError::Validation("Model is required".to_string()));
        }

        let job = Job::new_pending(JobType::Generate, model, prompt);
        self.store.insert(&job)?;

        info!(
            job_id = %job.id,
            model = %job.model,
            prompt = %preview(prompt),
            "Generation job created"
        );
        self.wake_worker();
        Ok(job)
    }

    /// Stages an image in the scratch directory and persists a pending
    /// extraction job pointing at it.
    ///
    /// Nothing is written unless the model, the extension and the payload
    /// are acceptable. If the row cannot be stored the staged file is
    /// removed again.
    pub async fn submit_extraction(
        &self,
        model: &str,
        image: &[u8],
        extension: &str,
    ) -> Result<Job, JobError> {
        if model.trim().is_empty() {
            return Err(JobError::Validation("Model is required".to_string()));
        }
        if !self.multimodal_models.iter().any(|m| m == model) {
            return Err(JobError::Validation(format!(
                "Unsupported model for multimodal extraction: {} (supported: {})",
                model,
                self.multimodal_models.join(", ")
            )));
        }
        let extension = normalize_extension(extension)?;
        if image.is_empty() {
            return Err(JobError::Validation("File is empty".to_string()));
        }

        let id = new_job_id();
        let path = self.scratch_dir.join(format!("{}{}", id, extension));

        tokio::fs::create_dir_all(&self.scratch_dir)
            .await
            .map_err(|source| JobError::Staging {
                path: self.scratch_dir.clone(),
                source,
            })?;
        tokio::fs::write(&path, image)
            .await
            .map_err(|source| JobError::Staging {
                path: path.clone(),
                source,
            })?;

        let mut job = Job::with_id(id, JobType::OcrExtract, model, EXTRACTION_PROMPT);
        job.images_path = vec![path.clone()];

        let (store, row) = (self.store.clone(), job.clone());
        if let Err(e) = db::blocking(move || store.insert(&row)).await {
            error!(job_id = %job.id, error = %e, "Failed to store extraction job");
            if let Err(rm) = tokio::fs::remove_file(&path).await {
                error!(path = %path.display(), error = %rm, "Failed to remove staged file");
            }
            return Err(e.into());
        }

        info!(
            job_id = %job.id,
            model = %job.model,
            bytes = image.len(),
            path = %path.display(),
            "Extraction job created"
        );
        self.wake_worker();
        Ok(job)
    }

    fn wake_worker(&self) {
        if let Some(trigger) = &self.trigger {
            trigger.notify();
        }
    }
}

/// Returns the extension with a leading dot if it names an accepted image type.
fn normalize_extension(extension: &str) -> Result<String, JobError> {
    let bare = extension.trim().trim_start_matches('.');
    let accepted = !bare.is_empty()
        && mime_guess::from_ext(bare)
            .iter()
            .any(|mime| ACCEPTED_IMAGE_TYPES.contains(&mime.essence_str()));

    if !accepted {
        return Err(JobError::Validation(format!(
            "Unsupported file type: {}",
            if extension.is_empty() { "(none)" } else { extension }
        )));
    }
    Ok(format!(".{}", bare.to_ascii_lowercase()))
}

fn preview(prompt: &str) -> String {
    let mut chars = prompt.chars();
    let head: String = chars.by_ref().take(PROMPT_PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use tempfile::TempDir;

    use super::*;
    use crate::db::Database;
    use crate::jobs::model::JobStatus;

    fn submitter(dir: &TempDir) -> JobSubmitter {
        let store = JobStore::new(Database::open_in_memory().unwrap());
        JobSubmitter::new(
            store,
            dir.path().join("scratch"),
            vec!["llava:7b".to_string(), "gemma3:4b".to_string()],
        )
    }

    fn scratch_entries(submitter: &JobSubmitter) -> usize {
        std::fs::read_dir(submitter.scratch_dir())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    #[test]
    fn test_submissions_are_pending_with_unique_ids() {
        let dir = TempDir::new().unwrap();
        let submitter = submitter(&dir);

        let mut ids = HashSet::new();
        for i in 0..20 {
            let job = submitter
                .submit_generation("llama3", &format!("prompt {}", i))
                .unwrap();
            assert_eq!(job.status, JobStatus::Pending);
            assert!(ids.insert(job.id));
        }
    }

    #[test]
    fn test_generation_requires_model_and_prompt() {
        let dir = TempDir::new().unwrap();
        let submitter = submitter(&dir);

        for (model, prompt) in [("", "hi"), ("llama3", ""), ("  ", "hi"), ("llama3", "\n")] {
            let err = submitter.submit_generation(model, prompt).unwrap_err();
            assert!(matches!(err, JobError::Validation(_)));
        }
        assert!(submitter.store.list(10, false).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_extraction_stages_file_named_by_id() {
        let dir = TempDir::new().unwrap();
        let submitter = submitter(&dir);

        let job = submitter
            .submit_extraction("llava:7b", b"\x89PNG fake", ".PNG")
            .await
            .unwrap();

        assert_eq!(job.job_type, JobType::OcrExtract);
        assert_eq!(job.prompt, EXTRACTION_PROMPT);
        let expected = submitter.scratch_dir().join(format!("{}.png", job.id));
        assert_eq!(job.images_path, vec![expected.clone()]);
        assert_eq!(std::fs::read(&expected).unwrap(), b"\x89PNG fake");

        let stored = submitter.store.get_by_id(&job.id, false).unwrap().unwrap();
        assert_eq!(stored.images_path, vec![expected]);
    }

    #[tokio::test]
    async fn test_disallowed_model_leaves_no_trace() {
        let dir = TempDir::new().unwrap();
        let submitter = submitter(&dir);

        let err = submitter
            .submit_extraction("llama3", b"data", ".png")
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Validation(_)));
        assert_eq!(scratch_entries(&submitter), 0);
        assert!(submitter.store.list(10, false).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disallowed_extension_and_empty_payload_rejected() {
        let dir = TempDir::new().unwrap();
        let submitter = submitter(&dir);

        for ext in [".gif", ".pdf", ".unknown", "", "."] {
            let err = submitter
                .submit_extraction("llava:7b", b"data", ext)
                .await
                .unwrap_err();
            assert!(matches!(err, JobError::Validation(_)), "extension {:?}", ext);
        }
        let err = submitter
            .submit_extraction("llava:7b", b"", ".jpg")
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Validation(_)));
        assert_eq!(scratch_entries(&submitter), 0);
    }

    #[tokio::test]
    async fn test_staging_failure_creates_no_job() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();
        let store = JobStore::new(Database::open_in_memory().unwrap());
        let submitter = JobSubmitter::new(store.clone(), &blocker, vec!["llava:7b".to_string()]);

        let err = submitter
            .submit_extraction("llava:7b", b"data", ".jpeg")
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Staging { .. }));
        assert!(store.list(10, false).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_insert_removes_staged_file() {
        let dir = TempDir::new().unwrap();
        let submitter = submitter(&dir);
        submitter
            .store
            .database()
            .with_conn(|conn| {
                conn.execute_batch("DROP TABLE jobs")?;
                Ok(())
            })
            .unwrap();

        let err = submitter
            .submit_extraction("llava:7b", b"data", ".jpg")
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Store(_)));
        assert_eq!(scratch_entries(&submitter), 0);
    }

    #[tokio::test]
    async fn test_submission_triggers_worker() {
        let dir = TempDir::new().unwrap();
        let trigger = WorkerTrigger::new();
        let submitter = submitter(&dir).with_trigger(trigger.clone());

        submitter.submit_generation("llama3", "hi").unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), trigger.notified())
            .await
            .unwrap();
    }

    #[test]
    fn test_preview_truncates_long_prompts() {
        assert_eq!(preview("short"), "short");
        let long = "x".repeat(100);
        let p = preview(&long);
        assert!(p.ends_with("..."));
        assert_eq!(p.chars().count(), PROMPT_PREVIEW_CHARS + 3);
    }
}

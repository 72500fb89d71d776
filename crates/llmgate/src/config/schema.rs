use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::db::DATABASE_FILE;
use crate::telemetry::LogFormat;

/// Largest expiry window representable as a `chrono::Duration`.
const MAX_EXPIRY_MINUTES: i64 = i64::MAX / 60_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_backend_url")]
    pub backend_url: String,
    /// Directory holding the job database.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Directory where uploads wait for the worker.
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_result_expiry_minutes")]
    pub result_expiry_minutes: u64,
    #[serde(default = "default_backend_timeout_secs")]
    pub backend_timeout_secs: u64,
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_multimodal_models")]
    pub multimodal_models: Vec<String>,
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_backend_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data")
}

fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir().join("llmgate-scratch")
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_result_expiry_minutes() -> u64 {
    60
}

fn default_backend_timeout_secs() -> u64 {
    300
}

fn default_stale_after_secs() -> u64 {
    900
}

fn default_listen_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_multimodal_models() -> Vec<String> {
    ["gemma3:4b", "llava:7b", "minicpm-v:8b"]
        .iter()
        .map(|m| m.to_string())
        .collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: default_backend_url(),
            database_path: default_database_path(),
            scratch_dir: default_scratch_dir(),
            poll_interval_secs: default_poll_interval_secs(),
            result_expiry_minutes: default_result_expiry_minutes(),
            backend_timeout_secs: default_backend_timeout_secs(),
            stale_after_secs: default_stale_after_secs(),
            listen_addr: default_listen_addr(),
            multimodal_models: default_multimodal_models(),
            log_format: LogFormat::default(),
        }
    }
}

impl Config {
    pub fn database_file(&self) -> PathBuf {
        self.database_path.join(DATABASE_FILE)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    /// Retrievability window of fulfilled results.
    pub fn result_expiry(&self) -> chrono::Duration {
        let minutes = i64::try_from(self.result_expiry_minutes)
            .unwrap_or(i64::MAX)
            .min(MAX_EXPIRY_MINUTES);
        chrono::Duration::minutes(minutes)
    }
}

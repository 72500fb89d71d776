use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;
use crate::telemetry::LogFormat;

/// Environment variable naming an optional JSON config file.
pub const CONFIG_PATH_VAR: &str = "LLMGATE_CONFIG";

/// Loads the process configuration: defaults, then the JSON file named by
/// `LLMGATE_CONFIG` (if set), then environment overrides.
pub fn load_config() -> Result<Config, ConfigError> {
    let config = match std::env::var(CONFIG_PATH_VAR) {
        Ok(path) if !path.trim().is_empty() => load_config_file(path)?,
        _ => Config::default(),
    };
    finish(config, |key| std::env::var(key).ok())
}

pub fn load_config_file<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;
    Ok(config)
}

/// Applies overrides from `lookup` and validates the result.
pub fn finish<F>(mut config: Config, lookup: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    apply_env_overrides(&mut config, lookup);
    validate_config(&config)?;
    Ok(config)
}

/// Overrides fields from environment-style variables. Unparseable numbers
/// are ignored.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
    let number = |key: &str| get(key).and_then(|v| v.trim().parse::<i64>().ok());

    if let Some(url) = get("OLLAMA_URL") {
        config.backend_url = url;
    }
    if let Some(path) = get("DATABASE_PATH") {
        config.database_path = path.into();
    }
    if let Some(path) = get("SCRATCH_DIR") {
        config.scratch_dir = path.into();
    }
    if let Some(secs) = number("JOB_WORKER_INTERVAL_SECONDS").filter(|n| *n > 0) {
        config.poll_interval_secs = secs as u64;
    }
    if let Some(minutes) = number("JOB_RESULT_EXPIRY_MINUTES").and_then(|n| u64::try_from(n).ok()) {
        config.result_expiry_minutes = minutes;
    }
    if let Some(secs) = number("BACKEND_TIMEOUT_SECONDS").filter(|n| *n > 0) {
        config.backend_timeout_secs = secs as u64;
    }
    if let Some(secs) = number("JOB_STALE_AFTER_SECONDS").filter(|n| *n > 0) {
        config.stale_after_secs = secs as u64;
    }
    if let Some(addr) = get("LISTEN_ADDR") {
        config.listen_addr = addr;
    } else if let Some(port) = number("PORT").filter(|p| (1..=65535).contains(p)) {
        config.listen_addr = format!("0.0.0.0:{}", port);
    }
    if let Some(format) = get("LLMGATE_LOG_FORMAT") {
        config.log_format = LogFormat::parse(&format);
    }
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.backend_url.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "backend_url must not be empty".to_string(),
        });
    }
    if config.poll_interval_secs == 0 {
        return Err(ConfigError::Validation {
            message: "poll_interval_secs must be positive".to_string(),
        });
    }
    if config.result_expiry_minutes == 0 {
        return Err(ConfigError::Validation {
            message: "result_expiry_minutes must be positive".to_string(),
        });
    }
    if config.backend_timeout_secs == 0 {
        return Err(ConfigError::Validation {
            message: "backend_timeout_secs must be positive".to_string(),
        });
    }
    if config.stale_after_secs <= config.backend_timeout_secs {
        return Err(ConfigError::Validation {
            message: format!(
                "stale_after_secs ({}) must be larger than backend_timeout_secs ({})",
                config.stale_after_secs, config.backend_timeout_secs
            ),
        });
    }
    if config.multimodal_models.iter().any(|m| m.trim().is_empty()) {
        return Err(ConfigError::Validation {
            message: "multimodal_models must not contain empty names".to_string(),
        });
    }
    Ok(())
}

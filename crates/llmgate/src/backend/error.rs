//! Inference backend error types.

use thiserror::Error;

/// Classified failure of a backend call. The `Display` text is what gets
/// persisted as a failed job's result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The requested model is not available on the backend.
    #[error("model not found")]
    ModelNotFound,

    /// The backend cannot load the model with the memory it has.
    #[error("model requires more system memory")]
    InsufficientResources,

    /// Any other error reported by the backend.
    #[error("backend error: {0}")]
    Backend(String),

    /// The backend could not be reached or answered with something unreadable.
    #[error("transport error: {0}")]
    Transport(String),

    /// The request was rejected before it was sent.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendError::Transport(format!("request timed out: {}", err))
        } else {
            BackendError::Transport(err.to_string())
        }
    }
}

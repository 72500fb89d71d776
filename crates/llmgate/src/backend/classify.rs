//! Maps free-text backend errors onto [`BackendError`] variants.
//!
//! The backend does not report error codes, only messages. Matching on
//! message text is a best-effort heuristic, so the resource check sits
//! behind a trait and can be replaced.

use super::BackendError;

/// Phrases the backend is known to use when it runs out of memory.
pub const MEMORY_PHRASES: &[&str] = &[
    "model requires more system memory",
    "not enough memory",
    "insufficient memory",
    "out of memory",
    "memory allocation failed",
];

/// Decides whether an error message means the backend lacked resources.
pub trait ResourceErrorMatcher: Send + Sync {
    fn is_resource_error(&self, message: &str) -> bool;
}

/// Case-insensitive substring matcher.
#[derive(Debug, Clone)]
pub struct PhraseMatcher {
    phrases: Vec<String>,
}

impl PhraseMatcher {
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            phrases: phrases
                .into_iter()
                .map(|p| p.as_ref().to_lowercase())
                .collect(),
        }
    }
}

impl Default for PhraseMatcher {
    fn default() -> Self {
        Self::new(MEMORY_PHRASES)
    }
}

impl ResourceErrorMatcher for PhraseMatcher {
    fn is_resource_error(&self, message: &str) -> bool {
        let message = message.to_lowercase();
        self.phrases.iter().any(|p| message.contains(p.as_str()))
    }
}

/// Classifies a backend error message. "not found" wins over resource errors.
pub fn classify(message: &str, matcher: &dyn ResourceErrorMatcher) -> BackendError {
    if message.contains("not found") {
        BackendError::ModelNotFound
    } else if matcher.is_resource_error(message) {
        BackendError::InsufficientResources
    } else {
        BackendError::Backend(message.to_string())
    }
}

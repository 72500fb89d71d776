//! Inference backend client: request shaping, error classification and
//! line-oriented streaming.

mod classify;
mod client;
mod error;
pub mod ndjson;
mod types;

pub use classify::{classify, PhraseMatcher, ResourceErrorMatcher, MEMORY_PHRASES};
pub use client::{InferenceBackend, LineStream, OllamaClient, DEFAULT_CONNECT_TIMEOUT, EXTRACTION_PROMPT};
pub use error::BackendError;
pub use types::{ChatMessage, ChatReply, ChatRole, GenerateReply, OcrOutcome, UNPARSED_WARNING};

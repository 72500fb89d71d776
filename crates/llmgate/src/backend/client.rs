//! HTTP client for an Ollama-compatible inference backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::classify::{classify, PhraseMatcher, ResourceErrorMatcher};
use super::ndjson;
use super::types::{ChatMessage, ChatReply, GenerateReply, OcrOutcome};
use super::BackendError;

/// Instruction sent alongside an image for text extraction.
pub const EXTRACTION_PROMPT: &str = "Please carefully extract and transcribe all text visible in this image. Return your response as a JSON object with the following structure: {\"original_text\": \"[extracted text]\"}";

/// Connect timeout for every backend request.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Lines of a streamed backend reply, in arrival order.
pub type LineStream = BoxStream<'static, Result<String, BackendError>>;

/// The backend operations the job worker depends on.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn generate(&self, model: &str, prompt: &str) -> Result<GenerateReply, BackendError>;

    async fn chat(&self, model: &str, messages: &[ChatMessage]) -> Result<ChatReply, BackendError>;

    /// Extracts text from an image. `file_name` is echoed in the outcome.
    async fn extract_text(
        &self,
        model: &str,
        image: &[u8],
        file_name: &str,
    ) -> Result<OcrOutcome, BackendError>;
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    #[serde(default)]
    name: Option<String>,
}

/// Client for the backend's JSON API.
///
/// Non-streaming calls are bounded by `request_timeout`; streaming calls only
/// by the connect timeout, since they legitimately run for a long time.
#[derive(Clone)]
pub struct OllamaClient {
    http: Client,
    base_url: String,
    request_timeout: Duration,
    matcher: Arc<dyn ResourceErrorMatcher>,
}

impl OllamaClient {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, BackendError> {
        let http = Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| BackendError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout,
            matcher: Arc::new(PhraseMatcher::default()),
        })
    }

    /// Replaces the matcher used to recognize resource exhaustion errors.
    pub fn with_matcher(mut self, matcher: Arc<dyn ResourceErrorMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn bounded(&self, request: RequestBuilder) -> RequestBuilder {
        request.timeout(self.request_timeout)
    }

    /// Reads a JSON reply, turning an `error` field (on any status) or a
    /// non-2xx status into a classified error.
    async fn read_json(&self, response: Response) -> Result<Value, BackendError> {
        let status = response.status();
        let body = response.text().await?;
        let value: Option<Value> = serde_json::from_str(&body).ok();

        if let Some(message) = value.as_ref().and_then(error_message) {
            debug!(status = status.as_u16(), error = message, "Backend reported an error");
            return Err(classify(message, self.matcher.as_ref()));
        }
        if !status.is_success() {
            return Err(unexpected_status(status));
        }
        value.ok_or_else(|| BackendError::Transport("backend returned invalid JSON".to_string()))
    }

    /// Passes a successful response through; otherwise classifies its body.
    async fn ensure_success(&self, response: Response) -> Result<Response, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        match self.read_json(response).await {
            Err(e) => Err(e),
            Ok(_) => Err(unexpected_status(status)),
        }
    }

    async fn open_stream(&self, path: &str, body: Value) -> Result<LineStream, BackendError> {
        let response = self.http.post(self.url(path)).json(&body).send().await?;
        let response = self.ensure_success(response).await?;
        Ok(ndjson::response_lines(response))
    }

    /// Streams generation output line by line.
    pub async fn generate_stream(&self, model: &str, prompt: &str) -> Result<LineStream, BackendError> {
        require_model(model)?;
        self.open_stream(
            "/api/generate",
            json!({ "model": model, "prompt": prompt, "stream": true }),
        )
        .await
    }

    /// Streams chat output line by line.
    pub async fn chat_stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<LineStream, BackendError> {
        require_model(model)?;
        self.open_stream(
            "/api/chat",
            json!({ "model": model, "messages": messages, "stream": true }),
        )
        .await
    }

    /// Names of the models available on the backend.
    pub async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        let response = self.bounded(self.http.get(self.url("/api/tags"))).send().await?;
        let value = self.read_json(response).await?;
        let tags: TagsResponse = serde_json::from_value(value).map_err(|e| {
            BackendError::Transport(format!("invalid model list from backend: {}", e))
        })?;
        Ok(tags.models.into_iter().filter_map(|m| m.name).collect())
    }

    /// Downloads a model onto the backend and returns the backend's reply.
    pub async fn pull_model(&self, model: &str) -> Result<Value, BackendError> {
        require_model(model)?;
        let response = self
            .bounded(self.http.post(self.url("/api/pull")))
            .json(&json!({ "model": model, "stream": false }))
            .send()
            .await?;
        self.read_json(response).await
    }

    pub async fn delete_model(&self, model: &str) -> Result<(), BackendError> {
        require_model(model)?;
        let response = self
            .bounded(self.http.delete(self.url("/api/delete")))
            .json(&json!({ "model": model }))
            .send()
            .await?;
        self.ensure_success(response).await?;
        Ok(())
    }
}

#[async_trait]
impl InferenceBackend for OllamaClient {
    async fn generate(&self, model: &str, prompt: &str) -> Result<GenerateReply, BackendError> {
        require_model(model)?;
        debug!(model, "Sending generate request");

        let response = self
            .bounded(self.http.post(self.url("/api/generate")))
            .json(&json!({ "model": model, "prompt": prompt, "stream": false }))
            .send()
            .await?;
        let value = self.read_json(response).await?;

        Ok(GenerateReply {
            model: model.to_string(),
            response: response_text(&value),
        })
    }

    async fn chat(&self, model: &str, messages: &[ChatMessage]) -> Result<ChatReply, BackendError> {
        require_model(model)?;
        debug!(model, messages = messages.len(), "Sending chat request");

        let response = self
            .bounded(self.http.post(self.url("/api/chat")))
            .json(&json!({ "model": model, "messages": messages }))
            .send()
            .await?;
        let response = self.ensure_success(response).await?;

        let mut lines = ndjson::response_lines(response);
        let mut content = String::new();
        let mut saw_message = false;
        let mut last: Option<Value> = None;

        while let Some(line) = lines.next().await {
            let line = line?;
            let fragment: Value = match serde_json::from_str(&line) {
                Ok(v) => v,
                Err(e) => {
                    warn!(model, error = %e, "Skipping unparseable chat line");
                    continue;
                }
            };
            if let Some(message) = error_message(&fragment) {
                return Err(classify(message, self.matcher.as_ref()));
            }
            if let Some(part) = fragment
                .get("message")
                .and_then(|m| m.get("content"))
                .and_then(Value::as_str)
            {
                content.push_str(part);
                saw_message = true;
            }
            last = Some(fragment);
        }

        if saw_message {
            return Ok(ChatReply {
                model: model.to_string(),
                response: content,
            });
        }
        match last {
            Some(last) => Ok(ChatReply {
                model: model.to_string(),
                response: response_text(&last),
            }),
            None => Err(BackendError::Transport(
                "no valid response from backend".to_string(),
            )),
        }
    }

    async fn extract_text(
        &self,
        model: &str,
        image: &[u8],
        file_name: &str,
    ) -> Result<OcrOutcome, BackendError> {
        require_model(model)?;
        debug!(model, bytes = image.len(), file_name, "Sending extraction request");

        let response = self
            .bounded(self.http.post(self.url("/api/generate")))
            .json(&json!({
                "model": model,
                "prompt": EXTRACTION_PROMPT,
                "images": [STANDARD.encode(image)],
                "stream": false,
            }))
            .send()
            .await?;
        let value = self.read_json(response).await?;

        let text = value.get("response").and_then(Value::as_str).ok_or_else(|| {
            BackendError::Transport("invalid response format from backend".to_string())
        })?;

        Ok(OcrOutcome::from_response(text, file_name, model))
    }
}

fn require_model(model: &str) -> Result<(), BackendError> {
    if model.trim().is_empty() {
        return Err(BackendError::InvalidRequest("model is required".to_string()));
    }
    Ok(())
}

fn error_message(value: &Value) -> Option<&str> {
    value.get("error").and_then(Value::as_str)
}

fn response_text(value: &Value) -> String {
    value
        .get("response")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn unexpected_status(status: reqwest::StatusCode) -> BackendError {
    BackendError::Transport(format!("unexpected status {}", status.as_u16()))
}

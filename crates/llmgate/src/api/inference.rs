//! Synchronous and streaming proxies to the inference backend, plus model
//! management.

use std::convert::Infallible;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::Json;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::backend::{ChatMessage, ChatReply, GenerateReply, InferenceBackend, LineStream};

use super::auth::{Admin, Caller};
use super::error::ApiError;
use super::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub prompt: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ModelRequest {
    #[serde(default)]
    pub model: String,
}

fn parse_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(v)| v)
        .map_err(|e| ApiError::BadRequest(format!("Error parsing request body: {}", e)))
}

fn validate_generate(req: &GenerateRequest) -> Result<(), ApiError> {
    if req.prompt.trim().is_empty() {
        return Err(ApiError::BadRequest("Prompt is required".to_string()));
    }
    if req.model.trim().is_empty() {
        return Err(ApiError::BadRequest("Model is required".to_string()));
    }
    Ok(())
}

fn validate_chat(req: &ChatRequest) -> Result<(), ApiError> {
    if req.model.trim().is_empty() {
        return Err(ApiError::BadRequest("Model is required".to_string()));
    }
    if req.messages.is_empty() {
        return Err(ApiError::BadRequest("Messages are required".to_string()));
    }
    Ok(())
}

fn require_model(req: &ModelRequest) -> Result<(), ApiError> {
    if req.model.trim().is_empty() {
        return Err(ApiError::BadRequest("Model is required".to_string()));
    }
    Ok(())
}

/// Relays backend lines as server-sent events. A mid-stream failure is sent
/// as a final `error` event.
fn sse(lines: LineStream) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = lines.map(|line| {
        Ok(match line {
            Ok(line) => Event::default().data(line),
            Err(e) => {
                tracing::warn!(error = %e, "Backend stream failed");
                Event::default().event("error").data(e.to_string())
            }
        })
    });
    Sse::new(events)
}

pub async fn generate(
    State(state): State<AppState>,
    _caller: Caller,
    body: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<GenerateReply>, ApiError> {
    let req = parse_body(body)?;
    validate_generate(&req)?;
    Ok(Json(state.backend.generate(&req.model, &req.prompt).await?))
}

pub async fn generate_stream(
    State(state): State<AppState>,
    _caller: Caller,
    body: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let req = parse_body(body)?;
    validate_generate(&req)?;
    let lines = state.backend.generate_stream(&req.model, &req.prompt).await?;
    Ok(sse(lines))
}

pub async fn chat(
    State(state): State<AppState>,
    _caller: Caller,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatReply>, ApiError> {
    let req = parse_body(body)?;
    validate_chat(&req)?;
    Ok(Json(state.backend.chat(&req.model, &req.messages).await?))
}

pub async fn chat_stream(
    State(state): State<AppState>,
    _caller: Caller,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let req = parse_body(body)?;
    validate_chat(&req)?;
    let lines = state.backend.chat_stream(&req.model, &req.messages).await?;
    Ok(sse(lines))
}

pub async fn list_models(
    State(state): State<AppState>,
    _caller: Caller,
) -> Result<Json<Value>, ApiError> {
    let models = state.backend.list_models().await?;
    Ok(Json(json!({ "models": models })))
}

pub async fn pull_model(
    State(state): State<AppState>,
    _admin: Admin,
    body: Result<Json<ModelRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let req = parse_body(body)?;
    require_model(&req)?;
    tracing::info!(model = %req.model, "Pulling model");
    Ok(Json(state.backend.pull_model(&req.model).await?))
}

pub async fn delete_model(
    State(state): State<AppState>,
    _admin: Admin,
    body: Result<Json<ModelRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let req = parse_body(body)?;
    require_model(&req)?;
    state.backend.delete_model(&req.model).await?;
    tracing::info!(model = %req.model, "Model deleted");
    Ok(Json(json!({ "message": "Model deleted successfully" })))
}

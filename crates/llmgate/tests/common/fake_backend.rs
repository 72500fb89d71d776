//! In-process stand-in for an Ollama-compatible backend.
//!
//! Behavior is selected by model name:
//! - `x`: 404 with a "not found" error
//! - `big`: 500 with an out-of-memory error
//! - `quirky`: 200 whose body carries an `error` field
//! - `broken`: 502 with a non-JSON body
//! - `slow`: answers after two seconds
//! - `rambler`: extraction answer without any JSON in it
//! - `midstream`: chat stream that fails after the first fragment
//! - `oneshot`: chat answered with a single JSON object
//! - `legacy`: chat answered with a single object carrying only `response`
//! - anything else: a normal answer

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;

pub const OCR_TEXT: &str = "HELLO WORLD";

#[derive(Clone, Default)]
struct Recorder {
    requests: Arc<Mutex<Vec<(String, Value)>>>,
}

impl Recorder {
    fn record(&self, path: &str, body: &Value) {
        self.requests
            .lock()
            .unwrap()
            .push((path.to_string(), body.clone()));
    }
}

pub struct FakeBackend {
    addr: SocketAddr,
    recorder: Recorder,
}

impl FakeBackend {
    pub async fn start() -> Self {
        let recorder = Recorder::default();
        let app = Router::new()
            .route("/api/generate", post(generate))
            .route("/api/chat", post(chat))
            .route("/api/tags", get(tags))
            .route("/api/pull", post(pull))
            .route("/api/delete", delete(remove))
            .with_state(recorder.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, recorder }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Request bodies received so far, with their paths.
    pub fn requests(&self) -> Vec<(String, Value)> {
        self.recorder.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.recorder.requests.lock().unwrap().len()
    }
}

fn model_of(body: &Value) -> String {
    body.get("model")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn ndjson(lines: &[Value]) -> String {
    lines
        .iter()
        .map(|l| format!("{}\n", l))
        .collect::<Vec<_>>()
        .join("")
}

/// Shared failure modes. Returns `None` for models that answer normally.
async fn failure_for(model: &str) -> Option<Response> {
    match model {
        "x" => Some(
            (
                StatusCode::NOT_FOUND,
                Json(json!({"error": "model 'x' not found, try pulling it first"})),
            )
                .into_response(),
        ),
        "big" => Some(
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "model requires more system memory (8.0 GiB) than is available (4.0 GiB)"
                })),
            )
                .into_response(),
        ),
        "quirky" => Some(Json(json!({"error": "template rendering failed"})).into_response()),
        "broken" => Some((StatusCode::BAD_GATEWAY, "bad gateway").into_response()),
        "slow" => {
            tokio::time::sleep(Duration::from_secs(2)).await;
            None
        }
        _ => None,
    }
}

async fn generate(State(recorder): State<Recorder>, Json(body): Json<Value>) -> Response {
    recorder.record("/api/generate", &body);
    let model = model_of(&body);
    if let Some(failure) = failure_for(&model).await {
        return failure;
    }

    if body.get("stream").and_then(Value::as_bool) == Some(true) {
        return ndjson(&[
            json!({"model": model, "response": "hel", "done": false}),
            json!({"model": model, "response": "lo", "done": false}),
            json!({"model": model, "response": "", "done": true}),
        ])
        .into_response();
    }

    if body.get("images").is_some() {
        let response = if model == "rambler" {
            "I could not find any structured text, sorry.".to_string()
        } else {
            format!(
                "Here is the result:\n{{\"original_text\": \"{}\"}}\nLet me know!",
                OCR_TEXT
            )
        };
        return Json(json!({"model": model, "response": response, "done": true})).into_response();
    }

    Json(json!({"model": model, "response": "hello", "done": true})).into_response()
}

async fn chat(State(recorder): State<Recorder>, Json(body): Json<Value>) -> Response {
    recorder.record("/api/chat", &body);
    let model = model_of(&body);
    if let Some(failure) = failure_for(&model).await {
        return failure;
    }

    match model.as_str() {
        "oneshot" => {
            return Json(json!({
                "model": model,
                "message": {"role": "assistant", "content": "hi"},
                "done": true
            }))
            .into_response()
        }
        "legacy" => return Json(json!({"model": model, "response": "hi"})).into_response(),
        _ => {}
    }

    let mut lines = vec![json!({"model": model, "message": {"role": "assistant", "content": "hel"}, "done": false})];
    if model == "midstream" {
        lines.push(json!({"error": "CUDA error: out of memory"}));
    } else {
        lines.push(json!({"model": model, "message": {"role": "assistant", "content": "lo"}, "done": false}));
        lines.push(json!({"model": model, "message": {"role": "assistant", "content": ""}, "done": true}));
    }

    let mut body = ndjson(&lines);
    // Garbage between fragments is skipped by the client.
    body.insert_str(0, "not json\n");
    body.into_response()
}

async fn tags(State(recorder): State<Recorder>) -> Response {
    recorder.record("/api/tags", &Value::Null);
    Json(json!({
        "models": [
            {"name": "llama3:latest", "size": 1},
            {"name": "llava:7b", "size": 2},
            {"size": 3}
        ]
    }))
    .into_response()
}

async fn pull(State(recorder): State<Recorder>, Json(body): Json<Value>) -> Response {
    recorder.record("/api/pull", &body);
    if let Some(failure) = failure_for(&model_of(&body)).await {
        return failure;
    }
    Json(json!({"status": "success"})).into_response()
}

async fn remove(State(recorder): State<Recorder>, Json(body): Json<Value>) -> Response {
    recorder.record("/api/delete", &body);
    if let Some(failure) = failure_for(&model_of(&body)).await {
        return failure;
    }
    StatusCode::OK.into_response()
}

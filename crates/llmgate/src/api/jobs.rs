//! Job submission and polling endpoints.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::db;
use crate::jobs::{Job, JobStatus, ResultView, StatusView};

use super::auth::{Admin, Caller};
use super::error::ApiError;
use super::AppState;

/// Default and fallback page size of the job listing.
pub const DEFAULT_LIST_LIMIT: u32 = 50;

#[derive(Debug, Default, Deserialize)]
pub struct GenerationJobRequest {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub prompt: String,
}

#[derive(Debug, Serialize)]
pub struct JobCreated {
    pub id: String,
    pub status: JobStatus,
    pub message: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub limit: Option<String>,
    pub with_result: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct JobList {
    pub jobs: Vec<Job>,
}

pub async fn create_generation_job(
    State(state): State<AppState>,
    _caller: Caller,
    body: Result<Json<GenerationJobRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<JobCreated>), ApiError> {
    let Json(req) =
        body.map_err(|e| ApiError::BadRequest(format!("Error parsing request body: {}", e)))?;

    let submitter = state.submitter.clone();
    let job = db::blocking(move || submitter.submit_generation(&req.model, &req.prompt)).await?;

    Ok((
        StatusCode::CREATED,
        Json(JobCreated {
            id: job.id,
            status: job.status,
            message: "Generation job created successfully",
        }),
    ))
}

pub async fn create_extraction_job(
    State(state): State<AppState>,
    _caller: Caller,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<JobCreated>), ApiError> {
    let mut model: Option<String> = None;
    let mut file: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Error parsing multipart form: {}", e)))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("model") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Error reading model: {}", e)))?;
                model = Some(text);
            }
            Some("file") => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Error reading uploaded file: {}", e)))?;
                file = Some((file_name, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let model = model
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Model is required".to_string()))?;
    let (file_name, bytes) =
        file.ok_or_else(|| ApiError::BadRequest("File is required".to_string()))?;

    let job = state
        .submitter
        .submit_extraction(&model, &bytes, upload_extension(&file_name))
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(JobCreated {
            id: job.id,
            status: job.status,
            message: "Multimodal extraction job created successfully",
        }),
    ))
}

/// Extension of an uploaded file name including the dot, or `.unknown`.
pub fn upload_extension(file_name: &str) -> &str {
    match file_name.rfind('.') {
        Some(idx) => &file_name[idx..],
        None => ".unknown",
    }
}

pub async fn job_status(
    State(state): State<AppState>,
    _caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<StatusView>, ApiError> {
    let retriever = state.retriever.clone();
    Ok(Json(db::blocking(move || retriever.get_status(&id)).await?))
}

pub async fn job_result(
    State(state): State<AppState>,
    _caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<ResultView>, ApiError> {
    let retriever = state.retriever.clone();
    Ok(Json(db::blocking(move || retriever.get_result(&id)).await?))
}

pub async fn list_jobs(
    State(state): State<AppState>,
    _admin: Admin,
    Query(q): Query<ListJobsQuery>,
) -> Result<Json<JobList>, ApiError> {
    let limit = q
        .limit
        .as_deref()
        .and_then(|l| l.parse::<u32>().ok())
        .filter(|l| *l > 0)
        .unwrap_or(DEFAULT_LIST_LIMIT);
    let with_result = q.with_result.as_deref() == Some("true");

    let store = state.store.clone();
    let jobs = db::blocking(move || store.list(limit, with_result)).await?;
    Ok(Json(JobList { jobs }))
}

pub async fn delete_jobs(
    State(state): State<AppState>,
    _admin: Admin,
) -> Result<Json<Value>, ApiError> {
    let store = state.store.clone();
    let deleted = db::blocking(move || store.delete_all()).await?;
    tracing::info!(deleted, "All jobs deleted");
    Ok(Json(json!({ "message": "All jobs deleted", "deleted": deleted })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_extension() {
        assert_eq!(upload_extension("scan.PNG"), ".PNG");
        assert_eq!(upload_extension("archive.tar.jpg"), ".jpg");
        assert_eq!(upload_extension("README"), ".unknown");
        assert_eq!(upload_extension(""), ".unknown");
    }
}

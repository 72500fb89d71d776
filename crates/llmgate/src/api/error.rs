//! Mapping of gateway errors onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::backend::BackendError;
use crate::db::DatabaseError;
use crate::jobs::JobError;

#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    Forbidden,
    BadRequest(String),
    Job(JobError),
    Backend(BackendError),
    Database(DatabaseError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Job(JobError::Validation(_)) => StatusCode::BAD_REQUEST,
            ApiError::Job(JobError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Job(JobError::ResultExpired(_)) => StatusCode::GONE,
            ApiError::Job(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Backend(BackendError::ModelNotFound) => StatusCode::NOT_FOUND,
            ApiError::Backend(BackendError::InsufficientResources) => {
                StatusCode::INSUFFICIENT_STORAGE
            }
            ApiError::Backend(BackendError::InvalidRequest(_)) => StatusCode::BAD_REQUEST,
            ApiError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Unauthorized => "Authentication required".to_string(),
            ApiError::Forbidden => "Insufficient permissions".to_string(),
            ApiError::BadRequest(msg) => msg.clone(),
            ApiError::Job(e) => e.to_string(),
            ApiError::Backend(e) => e.to_string(),
            ApiError::Database(e) => e.to_string(),
        }
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        ApiError::Job(err)
    }
}

impl From<BackendError> for ApiError {
    fn from(err: BackendError) -> Self {
        ApiError::Backend(err)
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        ApiError::Database(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.message();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %message, "Request failed");
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}

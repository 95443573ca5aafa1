//! API Error Handling
//!
//! Unified error types and conversion for API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use gantry_core::domain::pipeline::InstanceVarsError;
use gantry_core::dto::pipeline::SaveConfigResponse;
use gantry_core::validate::ValidationReport;

use crate::service::admission::AdmissionError;
use crate::service::build::BuildError;
use crate::service::check::CheckError;
use crate::service::pipeline::PipelineError;
use crate::service::scanner::ScanError;
use crate::store::StoreError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Validation(ValidationReport),
    UnsupportedMediaType(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::UnsupportedMediaType(msg) => (StatusCode::UNSUPPORTED_MEDIA_TYPE, msg),
            ApiError::Validation(report) => {
                let body = SaveConfigResponse {
                    errors: report.errors,
                    warnings: report.warnings,
                };
                return (StatusCode::BAD_REQUEST, Json(body)).into_response();
            }
            ApiError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ConfigVersionConflict { .. } | StoreError::BuildAlreadyFinished(_) => {
                ApiError::Conflict(err.to_string())
            }
            StoreError::PipelineNotFound(_)
            | StoreError::BuildNotFound(_)
            | StoreError::CheckableNotFound(_) => ApiError::NotFound(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Validation(report) => ApiError::Validation(report),
            PipelineError::InstanceVarsDisabled => ApiError::BadRequest(err.to_string()),
            PipelineError::Conflict { .. } => ApiError::Conflict(err.to_string()),
            PipelineError::TeamNotFound(_) | PipelineError::PipelineNotFound(_) => {
                ApiError::NotFound(err.to_string())
            }
            PipelineError::Store(e) => e.into(),
        }
    }
}

impl From<CheckError> for ApiError {
    fn from(err: CheckError) -> Self {
        match err {
            CheckError::Pipeline(e) => e.into(),
            CheckError::CheckableNotFound { .. } => ApiError::NotFound(err.to_string()),
            CheckError::Admission(AdmissionError::Store(e)) | CheckError::Store(e) => e.into(),
        }
    }
}

impl From<BuildError> for ApiError {
    fn from(err: BuildError) -> Self {
        match err {
            BuildError::NotFound(_) => ApiError::NotFound(err.to_string()),
            BuildError::AlreadyFinished(_) => ApiError::Conflict(err.to_string()),
            BuildError::NotTerminal(_) => ApiError::BadRequest(err.to_string()),
            BuildError::Store(e) => e.into(),
        }
    }
}

impl From<ScanError> for ApiError {
    fn from(err: ScanError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<InstanceVarsError> for ApiError {
    fn from(err: InstanceVarsError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

//! Shared error handling utilities.

use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::ToSchema;

use crate::instrument::{ReportStatus, UnclassifiedFailure};
use crate::store::StoreError;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    #[schema(example = "Invalid email format")]
    pub detail: String,
}

impl ApiError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Malformed or missing input.
    #[error("{0}")]
    Validation(String),
    /// Storage refused the write (constraint violation).
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Storage(StoreError),
}

pub type ApiResult<T> = Result<T, AppError>;

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(msg) => AppError::Conflict(msg),
            other => AppError::Storage(other),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(format!("Validation error: {}", errors))
    }
}

/// Storage failures carry no client-facing code and fall back to the
/// wrapper's sentinel status.
impl ReportStatus for AppError {
    fn status_code(&self) -> Option<u16> {
        match self {
            AppError::Validation(_) | AppError::Conflict(_) => Some(self.status().as_u16()),
            AppError::Storage(_) => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let unclassified = self.status_code().is_none();
        let detail = match &self {
            AppError::Storage(e) => {
                error!(error = %e, "Storage failure");
                "Database error".to_string()
            }
            other => other.to_string(),
        };
        let mut response = (status, Json(ApiError::new(detail))).into_response();
        if unclassified {
            response.extensions_mut().insert(UnclassifiedFailure);
        }
        response
    }
}

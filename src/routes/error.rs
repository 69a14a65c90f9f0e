use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::services::dispatcher::DispatchError;
use crate::services::extractor::ExtractError;
use crate::services::storage::StorageError;
use crate::services::tracker::TrackerError;

/// JSON error body: `{"error": {"code": ..., "message": ...}}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

/// Errors returned by HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Backpressure(String),

    #[error("{0}")]
    Extraction(#[from] ExtractError),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Backpressure(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Extraction(ExtractError::InvalidUrl(_)) => StatusCode::BAD_REQUEST,
            ApiError::Extraction(ExtractError::Source(_)) => StatusCode::BAD_GATEWAY,
            ApiError::Extraction(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "not_found",
            ApiError::InvalidRequest(_) => "invalid_request",
            ApiError::Backpressure(_) => "backpressure",
            ApiError::Extraction(e) => match e {
                ExtractError::InvalidUrl(_) => "invalid_url",
                ExtractError::Source(_) => "extraction_failed",
                ExtractError::UnsupportedFormat(_) => "unsupported_format",
                _ => "internal_error",
            },
            ApiError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::InvalidRequest(msg) => ApiError::InvalidRequest(msg),
            DispatchError::Backpressure(e) => ApiError::Backpressure(e.to_string()),
            DispatchError::Tracker(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<TrackerError> for ApiError {
    fn from(err: TrackerError) -> Self {
        match err {
            TrackerError::NotFound(_)
            | TrackerError::BatchNotFound(_)
            | TrackerError::FileNotFound(_) => ApiError::NotFound(err.to_string()),
            TrackerError::Duplicate(_) | TrackerError::Transition(_) => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) | StorageError::InvalidName(_) => {
                ApiError::NotFound(err.to_string())
            }
            StorageError::Io { .. } | StorageError::Exhausted(_) => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl From<garde::Report> for ApiError {
    fn from(report: garde::Report) -> Self {
        ApiError::InvalidRequest(report.to_string())
    }
}

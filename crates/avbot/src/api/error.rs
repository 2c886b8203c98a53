//! Admin API errors and their HTTP mapping.

use crate::error::ServiceError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Service not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Service(e) => match e {
                ServiceError::UnknownServiceType(_) => {
                    (StatusCode::BAD_REQUEST, "UNKNOWN_SERVICE_TYPE")
                }
                ServiceError::UnknownClient(_) => (StatusCode::BAD_REQUEST, "UNKNOWN_CLIENT"),
                ServiceError::TypeMismatch { .. } => (StatusCode::BAD_REQUEST, "TYPE_MISMATCH"),
                ServiceError::InvalidConfig(_) => (StatusCode::BAD_REQUEST, "INVALID_CONFIG"),
                ServiceError::RegisterFailed(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "REGISTER_FAILED")
                }
                ServiceError::Persistence(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR")
                }
            },
        };

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

//! API error types
//!
//! Maps monitor errors onto HTTP status codes and a JSON error body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::MonitorError;

/// API error that converts into an HTTP response
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound { resource_type: String, id: String },

    /// Malformed request (400)
    #[error("Bad request: {message}")]
    BadRequest { message: String },

    /// Request data out of bounds (422)
    #[error("Validation failed: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    /// Operation not possible in the current state (409)
    #[error("Precondition failed: {message}")]
    Precondition { message: String },

    /// Request did not finish in time (503)
    #[error("Service unavailable: {message}")]
    ServiceUnavailable { message: String },

    /// Internal server error (500)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ApiError {
    pub fn officer_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            resource_type: "Officer".to_string(),
            id: id.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::ValidationError { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Precondition { .. } => StatusCode::CONFLICT,
            Self::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::BadRequest { .. } => "BAD_REQUEST",
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::Precondition { .. } => "PRECONDITION_FAILED",
            Self::ServiceUnavailable { .. } => "SERVICE_UNAVAILABLE",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

impl From<MonitorError> for ApiError {
    fn from(err: MonitorError) -> Self {
        match err {
            MonitorError::Validation(e) => Self::ValidationError {
                field: Some(e.field().to_string()),
                message: e.to_string(),
            },
            MonitorError::OfficerNotFound(id) => Self::officer_not_found(id),
            MonitorError::Precondition(message) => Self::Precondition { message },
            MonitorError::ParseError(message) => Self::BadRequest { message },
            MonitorError::JsonError(e) => Self::BadRequest {
                message: e.to_string(),
            },
            other @ (MonitorError::ConfigError(_) | MonitorError::Io(_) | MonitorError::RecordLog(_)) => {
                Self::internal(other.to_string())
            }
        }
    }
}

/// JSON error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let details = match &self {
            ApiError::NotFound { resource_type, id } => Some(ErrorDetails {
                resource_type: Some(resource_type.clone()),
                resource_id: Some(id.clone()),
                field: None,
            }),
            ApiError::ValidationError { field, .. } => Some(ErrorDetails {
                resource_type: None,
                resource_id: None,
                field: field.clone(),
            }),
            _ => None,
        };

        match &self {
            ApiError::Internal { .. } => tracing::error!(error = %self, "API error"),
            _ => tracing::warn!(error = %self, "API error"),
        }

        let body = ErrorResponse {
            code: self.error_code().to_string(),
            message: self.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

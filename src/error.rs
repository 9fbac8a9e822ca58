//! Error types for Fieldwatch

use crate::schema::ValidationError;
use thiserror::Error;

/// Errors that can occur while monitoring officers
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Officer not found: {0}")]
    OfficerNotFound(String),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Failed to parse ingestion payload: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Record log error: {0}")]
    RecordLog(String),
}

impl MonitorError {
    /// Stable machine-readable code for this error
    pub fn code(&self) -> &'static str {
        match self {
            MonitorError::Validation(_) => "VALIDATION_ERROR",
            MonitorError::OfficerNotFound(_) => "OFFICER_NOT_FOUND",
            MonitorError::Precondition(_) => "PRECONDITION_FAILED",
            MonitorError::ParseError(_) => "PARSE_ERROR",
            MonitorError::JsonError(_) => "JSON_ERROR",
            MonitorError::ConfigError(_) => "CONFIG_ERROR",
            MonitorError::Io(_) => "IO_ERROR",
            MonitorError::RecordLog(_) => "RECORD_LOG_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_follow_variant() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert_eq!(MonitorError::from(io).code(), "IO_ERROR");
        assert_eq!(MonitorError::OfficerNotFound("A-1".to_string()).code(), "OFFICER_NOT_FOUND");
        assert_eq!(
            MonitorError::from(ValidationError::MissingField("officer_id".to_string())).code(),
            "VALIDATION_ERROR"
        );
        assert_eq!(MonitorError::ParseError("line 2".to_string()).code(), "PARSE_ERROR");
        assert_eq!(MonitorError::ConfigError("bad".to_string()).code(), "CONFIG_ERROR");
    }
}

//! Error types for rsync-courier
//!
//! This module defines the error hierarchy covering:
//! - Configuration file and CLI errors
//! - HTTP gateway errors
//!
//! Design philosophy:
//! - Use thiserror for structured error types in library code
//! - Errors should be actionable - include context about what to do
//! - Preserve error chains for debugging

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the rsync-courier application
#[derive(Error, Debug)]
pub enum CourierError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors (file operations, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config file '{path}': {reason}")]
    ReadFailed { path: PathBuf, reason: String },

    /// Line without a `key = value` shape
    #[error("Malformed config line {line}: '{content}'")]
    MalformedLine { line: usize, content: String },

    /// Required key missing
    #[error("Missing required config key '{key}'")]
    MissingKey { key: &'static str },

    /// Value failed validation
    #[error("Invalid value for '{key}': {reason}")]
    InvalidValue { key: &'static str, reason: String },

    /// Invalid bind address
    #[error("Invalid bind address '{addr}': {reason}")]
    InvalidBindAddr { addr: String, reason: String },

    /// Completion marker file could not be created
    #[error("Failed to create completion marker '{path}': {reason}")]
    MarkerCreateFailed { path: PathBuf, reason: String },
}

/// Gateway errors returned to HTTP callers
#[derive(Error, Debug)]
pub enum ServerError {
    /// jobID form field is not an integer
    #[error("Invalid job id '{0}': expected an integer")]
    InvalidJobId(String),

    /// jobID fell below the cancel tracker's pruning floor - a cancel mark
    /// for it could already have been discarded
    #[error("Stale job id {got}: ids below {floor} have already been processed (job ids are monotonic)")]
    StaleJobId { got: u64, floor: u64 },

    /// files/localFiles field is not a JSON array of strings
    #[error("Invalid file list in field '{field}': {reason}")]
    InvalidFileList { field: &'static str, reason: String },

    /// I/O error while reading the progress sink
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl axum::response::IntoResponse for ServerError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;
        use axum::Json;

        let (status, message) = match &self {
            ServerError::InvalidJobId(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::StaleJobId { .. } => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::InvalidFileList { .. } => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };

        let body = serde_json::json!({ "error": message });
        (status, Json(body)).into_response()
    }
}

/// Result type alias for CourierError
pub type Result<T> = std::result::Result<T, CourierError>;

/// Result type alias for ConfigError
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for ServerError
pub type ServerResult<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let cfg_err = ConfigError::MissingKey {
            key: "storage.host",
        };
        let courier_err: CourierError = cfg_err.into();
        assert!(matches!(courier_err, CourierError::Config(_)));
    }

    #[test]
    fn test_stale_job_id_display() {
        let err = ServerError::StaleJobId { got: 3, floor: 7 };
        let msg = err.to_string();
        assert!(msg.contains('3'));
        assert!(msg.contains('7'));
    }
}

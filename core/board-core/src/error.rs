//! Error types for vitalboard-core operations.

use std::path::PathBuf;

use vitalboard_protocol::{ErrorInfo, FieldKey};

/// All errors that can occur in the engine and its transports.
///
/// Rejected commands are not errors; see [`crate::command::Rejected`].
#[derive(Debug, thiserror::Error)]
pub enum BoardError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("Configuration read failed: {path}: {source}")]
    ConfigReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ─────────────────────────────────────────────────────────────────────
    // Transport Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Failed to connect to authority socket {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Timed out waiting for authority response")]
    Timeout,

    #[error("Authority response exceeded maximum size")]
    ResponseTooLarge,

    #[error("Authority response was empty")]
    EmptyResponse,

    #[error("Authority rejected request: {code}: {message}")]
    Rejected { code: String, message: String },

    #[error("Transport not started")]
    NotStarted,

    // ─────────────────────────────────────────────────────────────────────
    // State Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Invalid value for {key}: {details}")]
    InvalidField { key: FieldKey, details: String },
}

impl From<ErrorInfo> for BoardError {
    fn from(info: ErrorInfo) -> Self {
        BoardError::Rejected {
            code: info.code,
            message: info.message,
        }
    }
}

/// Convenience type alias for Results using BoardError.
pub type Result<T> = std::result::Result<T, BoardError>;

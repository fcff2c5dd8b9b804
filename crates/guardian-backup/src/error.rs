use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cron::CronError;

/// Failures reported by a backup engine adapter.
///
/// The display form is the human-readable message recorded on a failed
/// backup and in its error log entry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("{0}")]
    Connection(String),

    #[error("{0}")]
    Authentication(String),

    /// Backup artifact is missing or unreadable
    #[error("{0}")]
    Artifact(String),

    /// Selective restore asked for an item the manifest does not list
    #[error("{0}")]
    MissingItem(String),

    #[error("{0}")]
    Unsupported(String),

    #[error("{0}")]
    Io(String),

    #[error("{0}")]
    Internal(String),

    #[error("operation timed out")]
    Timeout,

    #[error("cancelled by user")]
    Cancelled,
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io(err.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackupError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<CronError> for BackupError {
    fn from(err: CronError) -> Self {
        BackupError::Validation(format!("Invalid cron expression: {}", err))
    }
}

impl From<anyhow::Error> for BackupError {
    fn from(err: anyhow::Error) -> Self {
        BackupError::Internal(err.to_string())
    }
}

/// Error kind surfaced to every external caller alongside the message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ValidationError,
    NotFoundError,
    ConflictError,
    EngineError,
    TimeoutError,
    InternalError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::NotFoundError => "not_found_error",
            ErrorKind::ConflictError => "conflict_error",
            ErrorKind::EngineError => "engine_error",
            ErrorKind::TimeoutError => "timeout_error",
            ErrorKind::InternalError => "internal_error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl BackupError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BackupError::Validation(_) => ErrorKind::ValidationError,
            BackupError::NotFound(_) => ErrorKind::NotFoundError,
            BackupError::Conflict(_) => ErrorKind::ConflictError,
            BackupError::Engine(EngineError::Timeout) => ErrorKind::TimeoutError,
            BackupError::Engine(_) => ErrorKind::EngineError,
            BackupError::Internal(_) => ErrorKind::InternalError,
        }
    }

    /// The message without the kind prefix
    pub fn message(&self) -> String {
        match self {
            BackupError::Validation(msg)
            | BackupError::NotFound(msg)
            | BackupError::Conflict(msg)
            | BackupError::Internal(msg) => msg.clone(),
            BackupError::Engine(e) => e.to_string(),
        }
    }
}

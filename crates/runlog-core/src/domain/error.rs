//! Domain-level error taxonomy for runlog.

use std::path::PathBuf;

/// runlog domain errors.
///
/// Every failure is fatal and surfaced immediately to the caller; nothing
/// is retried or defaulted internally.
#[derive(Debug, thiserror::Error)]
pub enum RunlogError {
    #[error("run directory already exists: {0}")]
    DirectoryExists(PathBuf),

    #[error("invalid run config: {0}")]
    InvalidConfig(String),

    #[error("malformed params file: {0}")]
    Format(String),

    #[error("missing required field: {0}")]
    Schema(&'static str),

    #[error("invalid session state: expected {expected}, was {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for runlog domain operations.
pub type Result<T> = std::result::Result<T, RunlogError>;

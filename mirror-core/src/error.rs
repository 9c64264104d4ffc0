//! Error types for the mirror engine.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for mirror operations.
pub type Result<T> = std::result::Result<T, MirrorError>;

/// Errors that can occur while mirroring or managing watch sessions.
#[derive(Error, Debug)]
pub enum MirrorError {
    /// Unknown record id.
    #[error("record not found: {0}")]
    NotFound(String),

    /// A watch session already exists for the record.
    #[error("watch already active for record: {0}")]
    AlreadyActive(String),

    /// No watch session exists for the record.
    #[error("watch not active for record: {0}")]
    NotActive(String),

    /// The source root of a rule does not exist.
    #[error("source directory not found: {}", .0.display())]
    SourceMissing(PathBuf),

    /// Redirect file content is not valid UTF-8.
    #[error("cannot decode {} as UTF-8: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: std::str::Utf8Error,
    },

    /// Malformed rule or path.
    #[error("validation error: {0}")]
    Validation(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Directory walk error.
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),

    /// Notify error.
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    /// A background task panicked or was cancelled.
    #[error("task join error: {0}")]
    Join(String),
}

impl From<tokio::task::JoinError> for MirrorError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Join(err.to_string())
    }
}

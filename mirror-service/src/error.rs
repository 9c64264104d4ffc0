//! Error types for the mirror service.

use thiserror::Error;

use strm_mirror_core::MirrorError;

/// Result type alias for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Errors that can occur in the mirror service.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Engine or supervisor error.
    #[error(transparent)]
    Mirror(#[from] MirrorError),

    /// Records file could not be parsed or written.
    #[error("records file error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Service configuration could not be parsed.
    #[error("configuration error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A record or configuration value is malformed.
    #[error("validation error: {0}")]
    Validation(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    /// Whether this error names an unknown record.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Mirror(MirrorError::NotFound(_)))
    }
}

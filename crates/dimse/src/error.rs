//! Error types for DICOM node and relay operations

use thiserror::Error;

/// Result type alias for DIMSE operations
pub type Result<T> = std::result::Result<T, DimseError>;

/// Error types that can occur while addressing or relaying DICOM nodes
#[derive(Error, Debug)]
pub enum DimseError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid AE Title: {0}")]
    InvalidAeTitle(String),

    #[error("Invalid port: {0}")]
    InvalidPort(String),
}

impl DimseError {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the error was raised while validating a node address
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            DimseError::InvalidAeTitle(_) | DimseError::InvalidPort(_) | DimseError::Config(_)
        )
    }
}

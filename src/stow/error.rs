//! Error types for STOW-RS transfers

use dimse::types::{STATUS_OUT_OF_RESOURCES, STATUS_PROCESSING_FAILURE, STATUS_UNABLE_TO_PROCESS};
use thiserror::Error;

/// Result type alias for STOW-RS operations
pub type Result<T> = std::result::Result<T, StowError>;

/// Single failure condition of an upload, whatever phase it happened in
#[derive(Error, Debug)]
pub enum StowError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("STOW-RS service answered {status}: {message}")]
    Status { status: u16, message: String },

    #[error("DICOM encoding error: {0}")]
    Encoding(String),

    #[error("Metadata error: {0}")]
    Metadata(#[from] dicom_json_tool::ConvertError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Uploader is closed")]
    Closed,

    #[error("Transfer cancelled")]
    Cancelled,
}

impl StowError {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new encoding error
    pub fn encoding(msg: impl Into<String>) -> Self {
        Self::Encoding(msg.into())
    }

    /// HTTP status returned by the service, if the exchange got that far
    pub fn http_status(&self) -> Option<u16> {
        match self {
            StowError::Status { status, .. } => Some(*status),
            StowError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// DIMSE status code reported for a failed sub-operation
    pub fn dimse_status(&self) -> u16 {
        match self {
            StowError::Status { .. } => STATUS_UNABLE_TO_PROCESS,
            StowError::Http(e) if e.is_connect() || e.is_timeout() => STATUS_OUT_OF_RESOURCES,
            _ => STATUS_PROCESSING_FAILURE,
        }
    }
}

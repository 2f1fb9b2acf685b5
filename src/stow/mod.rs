//! STOW-RS client
//!
//! Uploads DICOM instances to a DICOMweb store endpoint as
//! `multipart/related` request bodies. Parts are produced lazily so that
//! large objects stream straight from disk or from the encoder.

pub mod batch;
pub mod encapsulated;
pub mod error;
pub mod multipart;
pub mod payload;
pub mod uploader;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use encapsulated::{ensure_uid, generate_uid};
pub use error::{Result, StowError};
pub use multipart::{MultipartBody, Part, MULTIPART_BOUNDARY};
pub use payload::{Payload, CHUNK_SIZE};
pub use uploader::{StowResponse, StowUploader, DEFAULT_USER_AGENT};

/// Representation negotiated for the instance metadata part
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpContentType {
    #[default]
    Dicom,
    Xml,
    Json,
}

impl HttpContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpContentType::Dicom => "application/dicom",
            HttpContentType::Xml => "application/dicom+xml",
            HttpContentType::Json => "application/dicom+json",
        }
    }
}

impl fmt::Display for HttpContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpContentType {
    type Err = StowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dicom" | "application/dicom" => Ok(HttpContentType::Dicom),
            "xml" | "application/dicom+xml" => Ok(HttpContentType::Xml),
            "json" | "application/dicom+json" => Ok(HttpContentType::Json),
            other => Err(StowError::config(format!(
                "unsupported STOW-RS content type '{}'",
                other
            ))),
        }
    }
}

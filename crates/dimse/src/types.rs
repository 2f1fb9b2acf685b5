//! Common types for DIMSE status reporting

use serde::{Deserialize, Serialize};

/// Status code of a successful operation
pub const STATUS_SUCCESS: u16 = 0x0000;
/// Warning: some sub-operations failed or data elements were coerced
pub const STATUS_SUB_OPERATIONS_WARNING: u16 = 0xB000;
/// Failure: the receiver could not process the request
pub const STATUS_UNABLE_TO_PROCESS: u16 = 0xC000;
/// Failure: generic processing failure
pub const STATUS_PROCESSING_FAILURE: u16 = 0x0110;
/// Failure: out of resources or unreachable peer
pub const STATUS_OUT_OF_RESOURCES: u16 = 0xA700;
const STATUS_PENDING: u16 = 0xFF00;
const STATUS_CANCEL: u16 = 0xFE00;

/// Outcome of a single sub-operation within a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProgressStatus {
    Completed,
    Failed,
    Warning,
}

/// DIMSE operation status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DimseStatus {
    /// Operation completed successfully
    Success,
    /// Operation is pending (more responses to follow)
    #[default]
    Pending,
    /// Operation cancelled by user
    Cancel,
    /// Operation failed with error
    Failure(u16), // DICOM status code
    /// Warning occurred during operation
    Warning(u16), // DICOM status code
}

impl DimseStatus {
    /// Numeric DICOM status code
    pub fn code(&self) -> u16 {
        match self {
            DimseStatus::Success => STATUS_SUCCESS,
            DimseStatus::Pending => STATUS_PENDING,
            DimseStatus::Cancel => STATUS_CANCEL,
            DimseStatus::Failure(code) | DimseStatus::Warning(code) => *code,
        }
    }

    /// Classify a raw DICOM status code (PS3.7 Annex C)
    pub fn from_code(code: u16) -> Self {
        match code {
            STATUS_SUCCESS => DimseStatus::Success,
            STATUS_PENDING | 0xFF01 => DimseStatus::Pending,
            STATUS_CANCEL => DimseStatus::Cancel,
            0x0001 | 0x0107 | 0x0116 => DimseStatus::Warning(code),
            c if c & 0xF000 == 0xB000 => DimseStatus::Warning(code),
            _ => DimseStatus::Failure(code),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DimseStatus::Success)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, DimseStatus::Failure(_))
    }
}

impl std::fmt::Display for DimseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DimseStatus::Success => write!(f, "SUCCESS"),
            DimseStatus::Pending => write!(f, "PENDING"),
            DimseStatus::Cancel => write!(f, "CANCEL"),
            DimseStatus::Failure(c) => write!(f, "FAILURE(0x{:04X})", c),
            DimseStatus::Warning(c) => write!(f, "WARNING(0x{:04X})", c),
        }
    }
}

impl std::fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProgressStatus::Completed => write!(f, "COMPLETED"),
            ProgressStatus::Failed => write!(f, "FAILED"),
            ProgressStatus::Warning => write!(f, "WARNING"),
        }
    }
}

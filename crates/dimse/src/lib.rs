//! DICOM network node model
//!
//! This crate provides the network-side building blocks used by the STOW-RS
//! transfer client and by relay logic sitting above it.
//!
//! # Features
//! - Validated node addressing (AE title, host, port) usable as map keys
//! - Forwarding (relay) nodes with source allow-lists
//! - Idle-connection watchdog reporting through a channel
//! - Sub-operation progress accounting for batch transfers

pub mod config;
pub mod error;
pub mod forward;
pub mod node;
pub mod progress;
pub mod types;
pub mod watchdog;

// Re-export commonly used types
pub use config::{ForwardNodeConfig, RelayConfig};
pub use error::{DimseError, Result};
pub use forward::ForwardingNode;
pub use node::NodeAddress;
pub use progress::{
    total_of, total_of_command, ProgressListener, ProgressState, ProgressTracker, TransferState,
};
pub use types::{DimseStatus, ProgressStatus};
pub use watchdog::{IdleSignal, IdleWatchdog};

pub mod config;
pub mod logging;
pub mod stow;

use std::sync::Arc;

use dimse::{ProgressState, ProgressTracker, TransferState};

use crate::config::Config;
use crate::stow::StowUploader;

/// Upload `files` with the endpoint described by `config`
///
/// Progress is logged after each instance.
pub async fn run(config: &Config, files: &[std::path::PathBuf]) -> stow::Result<TransferState> {
    let uploader = StowUploader::new(&config.stow)?;

    let tracker = Arc::new(ProgressTracker::new());
    tracker.add_listener(Arc::new(|state: &ProgressState| {
        tracing::info!(
            "{} - completed={} failed={} warning={} remaining={}",
            state.affected_sop_instance_uid.as_deref().unwrap_or("<unreadable>"),
            state.completed,
            state.failed,
            state.warning,
            state.remaining
        );
    }));

    let state = uploader.store_files(files, Some(tracker)).await;
    uploader.close();
    Ok(state)
}

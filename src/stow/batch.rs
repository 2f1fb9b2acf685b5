//! Multi-file store with sub-operation accounting

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dicom_dictionary_std::tags;
use dicom_object::OpenFileOptions;
use dimse::types::{
    STATUS_PROCESSING_FAILURE, STATUS_SUB_OPERATIONS_WARNING, STATUS_SUCCESS,
    STATUS_UNABLE_TO_PROCESS,
};
use dimse::{DimseStatus, ProgressStatus, ProgressTracker, TransferState};
use tracing::{debug, error, info, warn};

use crate::stow::error::StowError;
use crate::stow::uploader::StowUploader;

/// SOP identity of a Part 10 file, read from its file meta group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SopReference {
    pub sop_instance_uid: String,
    pub sop_class_uid: String,
}

/// Read the SOP identity of `path` without loading its pixel data
pub async fn read_sop_reference(path: &Path) -> Result<SopReference, StowError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let object = OpenFileOptions::new()
            .read_until(tags::PIXEL_DATA)
            .open_file(&path)
            .map_err(|e| StowError::encoding(format!("{}: {}", path.display(), e)))?;
        let meta = object.meta();
        Ok(SopReference {
            sop_instance_uid: trim_uid(meta.media_storage_sop_instance_uid()),
            sop_class_uid: trim_uid(meta.media_storage_sop_class_uid()),
        })
    })
    .await
    .map_err(|e| StowError::encoding(format!("file reader task failed: {}", e)))?
}

fn trim_uid(uid: &str) -> String {
    uid.trim_end_matches(['\0', ' ']).to_string()
}

impl StowUploader {
    /// Upload each file in turn and account every instance
    ///
    /// Files that cannot be read or stored count as failed sub-operations;
    /// the batch goes on with the next file. The returned state is `Success`
    /// when every instance was stored, `Failure` when none was, and a
    /// warning otherwise. Cancelling `progress` or closing the uploader stops
    /// the batch with a `Cancel` status.
    ///
    /// Counters left in `progress` by an earlier batch are discarded first.
    pub async fn store_files(
        &self,
        paths: &[PathBuf],
        progress: Option<Arc<ProgressTracker>>,
    ) -> TransferState {
        let mut state = match &progress {
            Some(tracker) => {
                tracker.reset();
                TransferState::with_progress(Arc::clone(tracker))
            }
            None => TransferState::new(),
        };

        let total = paths.len() as u32;
        if total == 0 {
            state.set_status(DimseStatus::Success);
            state.set_message("No file to store");
            return state;
        }

        info!("Storing {} file(s) to {}", total, self.url());
        let started = std::time::Instant::now();
        let mut failed = 0u32;
        let mut warnings = 0u32;
        let mut processed = 0u32;

        for path in paths {
            if self.is_closed() || progress.as_ref().is_some_and(|p| p.is_cancelled()) {
                warn!(
                    "Store cancelled after {} of {} file(s)",
                    processed, total
                );
                state.set_status(DimseStatus::Cancel);
                state.set_message(format!(
                    "Store cancelled after {} of {} file(s)",
                    processed, total
                ));
                return state;
            }
            processed += 1;

            let reference = match read_sop_reference(path).await {
                Ok(reference) => reference,
                Err(e) => {
                    error!("Cannot read {}: {}", path.display(), e);
                    failed += 1;
                    state.notify_progression(
                        None,
                        None,
                        STATUS_PROCESSING_FAILURE,
                        ProgressStatus::Failed,
                        total,
                    );
                    continue;
                }
            };

            match self.upload_file(path).await {
                Ok(response) => {
                    debug!(
                        "Stored {} ({})",
                        reference.sop_instance_uid, response.outcome
                    );
                    let status = match response.outcome {
                        ProgressStatus::Warning => {
                            warnings += 1;
                            STATUS_SUB_OPERATIONS_WARNING
                        }
                        _ => STATUS_SUCCESS,
                    };
                    state.notify_progression(
                        Some(&reference.sop_instance_uid),
                        Some(&reference.sop_class_uid),
                        status,
                        response.outcome,
                        total,
                    );
                }
                Err(StowError::Cancelled) | Err(StowError::Closed) => {
                    state.set_status(DimseStatus::Cancel);
                    state.set_message(format!(
                        "Store cancelled after {} of {} file(s)",
                        processed - 1,
                        total
                    ));
                    return state;
                }
                Err(e) => {
                    error!("Cannot store {}: {}", path.display(), e);
                    failed += 1;
                    state.notify_progression(
                        Some(&reference.sop_instance_uid),
                        Some(&reference.sop_class_uid),
                        e.dimse_status(),
                        ProgressStatus::Failed,
                        total,
                    );
                }
            }
        }

        let elapsed = started.elapsed();
        if failed == 0 && warnings == 0 {
            state.set_status(DimseStatus::Success);
            state.set_message(format!(
                "{} instance(s) stored in {:.3} s",
                total,
                elapsed.as_secs_f64()
            ));
        } else if failed == total {
            state.set_status(DimseStatus::Failure(STATUS_UNABLE_TO_PROCESS));
            state.set_message(format!("All {} instance(s) failed to be stored", total));
        } else {
            state.set_status(DimseStatus::Warning(STATUS_SUB_OPERATIONS_WARNING));
            state.set_message(format!(
                "{} of {} instance(s) failed, {} stored with warnings",
                failed, total, warnings
            ));
        }
        info!("{}", state);
        state
    }
}

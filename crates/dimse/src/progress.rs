//! Sub-operation accounting for batch transfers
//!
//! A [`TransferState`] reports the overall status of one logical batch. When a
//! [`ProgressTracker`] is attached, every instance outcome updates the
//! completed/failed/warning/remaining counters and is pushed to listeners;
//! without a tracker accounting is a no-op.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use dicom_core::{DataElement, PrimitiveValue, VR};
use dicom_dictionary_std::tags;
use dicom_object::InMemDicomObject;
use serde::{Deserialize, Serialize};

use crate::types::{DimseStatus, ProgressStatus};

/// Counter snapshot of a batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressState {
    pub completed: u32,
    pub failed: u32,
    pub warning: u32,
    pub remaining: u32,
    /// Status code of the last sub-operation
    pub status: Option<u16>,
    pub affected_sop_instance_uid: Option<String>,
    pub affected_sop_class_uid: Option<String>,
}

impl ProgressState {
    /// Declared batch size recovered from the counters
    pub fn total(&self) -> u32 {
        self.remaining + self.completed + self.failed + self.warning
    }

    /// Whether every declared sub-operation has reported
    pub fn is_done(&self) -> bool {
        self.remaining == 0
    }

    /// Render the snapshot as a DIMSE command dataset
    pub fn to_command(&self) -> InMemDicomObject {
        let mut cmd = InMemDicomObject::new_empty();
        if let Some(status) = self.status {
            cmd.put(DataElement::new(
                tags::STATUS,
                VR::US,
                PrimitiveValue::from(status),
            ));
        }
        if let Some(uid) = &self.affected_sop_instance_uid {
            cmd.put_str(tags::AFFECTED_SOP_INSTANCE_UID, VR::UI, uid.as_str());
        }
        if let Some(uid) = &self.affected_sop_class_uid {
            cmd.put_str(tags::AFFECTED_SOP_CLASS_UID, VR::UI, uid.as_str());
        }
        for (tag, value) in [
            (tags::NUMBER_OF_COMPLETED_SUBOPERATIONS, self.completed),
            (tags::NUMBER_OF_FAILED_SUBOPERATIONS, self.failed),
            (tags::NUMBER_OF_WARNING_SUBOPERATIONS, self.warning),
            (tags::NUMBER_OF_REMAINING_SUBOPERATIONS, self.remaining),
        ] {
            cmd.put(DataElement::new(
                tag,
                VR::US,
                PrimitiveValue::from(clamp_u16(value)),
            ));
        }
        cmd
    }

    /// Read counters back from a DIMSE command dataset; missing values are 0
    pub fn from_command(cmd: &InMemDicomObject) -> Self {
        let count = |tag| {
            cmd.get(tag)
                .and_then(|e| e.to_int::<u32>().ok())
                .unwrap_or(0)
        };
        let text = |tag| {
            cmd.get(tag)
                .and_then(|e| e.to_str().ok())
                .map(|s| s.trim_end_matches('\0').trim().to_string())
        };
        Self {
            completed: count(tags::NUMBER_OF_COMPLETED_SUBOPERATIONS),
            failed: count(tags::NUMBER_OF_FAILED_SUBOPERATIONS),
            warning: count(tags::NUMBER_OF_WARNING_SUBOPERATIONS),
            remaining: count(tags::NUMBER_OF_REMAINING_SUBOPERATIONS),
            status: cmd.get(tags::STATUS).and_then(|e| e.to_int::<u16>().ok()),
            affected_sop_instance_uid: text(tags::AFFECTED_SOP_INSTANCE_UID),
            affected_sop_class_uid: text(tags::AFFECTED_SOP_CLASS_UID),
        }
    }
}

fn clamp_u16(value: u32) -> u16 {
    u16::try_from(value).unwrap_or(u16::MAX)
}

/// Declared batch size of a snapshot, 0 when there is none
pub fn total_of(state: Option<&ProgressState>) -> u32 {
    state.map(ProgressState::total).unwrap_or(0)
}

/// Declared batch size carried by a DIMSE command dataset
pub fn total_of_command(cmd: Option<&InMemDicomObject>) -> u32 {
    cmd.map(|c| ProgressState::from_command(c).total())
        .unwrap_or(0)
}

/// Receives a snapshot after every sub-operation notification
pub trait ProgressListener: Send + Sync {
    fn handle_progression(&self, state: &ProgressState);
}

impl<F> ProgressListener for F
where
    F: Fn(&ProgressState) + Send + Sync,
{
    fn handle_progression(&self, state: &ProgressState) {
        self(state)
    }
}

/// Observer of a batch: serialized counters plus listeners
///
/// Concurrent notifications from several transfer workers are applied one at
/// a time under the tracker's lock.
#[derive(Default)]
pub struct ProgressTracker {
    state: Mutex<Option<ProgressState>>,
    listeners: Mutex<Vec<Arc<dyn ProgressListener>>>,
    cancelled: AtomicBool,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn ProgressListener>) {
        lock(&self.listeners).push(listener);
    }

    /// Latest snapshot, `None` before the first notification
    pub fn snapshot(&self) -> Option<ProgressState> {
        lock(&self.state).clone()
    }

    /// Account one sub-operation outcome of a batch of `total` items
    pub fn notify(&self, outcome: ProgressStatus, total: u32) -> ProgressState {
        self.notify_with(outcome, total, |_| {})
    }

    fn notify_with(
        &self,
        outcome: ProgressStatus,
        total: u32,
        annotate: impl FnOnce(&mut ProgressState),
    ) -> ProgressState {
        let snapshot = {
            let mut guard = lock(&self.state);
            let mut state = guard.take().unwrap_or_default();

            let done = state.completed + state.failed + state.warning;
            // Open batch: at least this notification is still outstanding
            let remaining = total.saturating_sub(done).max(1);

            match outcome {
                ProgressStatus::Completed => state.completed += 1,
                ProgressStatus::Failed => state.failed += 1,
                ProgressStatus::Warning => state.warning += 1,
            }
            state.remaining = remaining - 1;
            annotate(&mut state);

            *guard = Some(state.clone());
            state
        };

        let listeners = lock(&self.listeners).clone();
        for listener in listeners {
            listener.handle_progression(&snapshot);
        }
        snapshot
    }

    /// Forget previous counters so the tracker can account a new batch
    pub fn reset(&self) {
        *lock(&self.state) = None;
    }

    /// Ask the transfer loop to stop after the current sub-operation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("state", &self.snapshot())
            .field("listeners", &lock(&self.listeners).len())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

// Accounting must never fail the transfer, so a poisoned lock is recovered.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Caller-visible state of one logical batch transfer
#[derive(Debug, Clone, Default)]
pub struct TransferState {
    status: DimseStatus,
    message: Option<String>,
    progress: Option<Arc<ProgressTracker>>,
}

impl TransferState {
    pub fn new() -> Self {
        Self::default()
    }

    /// State whose sub-operations are accounted by `progress`
    pub fn with_progress(progress: Arc<ProgressTracker>) -> Self {
        Self {
            progress: Some(progress),
            ..Self::default()
        }
    }

    pub fn status(&self) -> DimseStatus {
        self.status
    }

    pub fn set_status(&mut self, status: DimseStatus) {
        self.status = status;
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = Some(message.into());
    }

    pub fn progress(&self) -> Option<&Arc<ProgressTracker>> {
        self.progress.as_ref()
    }

    /// Record the outcome of one instance of the batch
    ///
    /// Sets the overall status to `status` and, when a tracker is attached,
    /// accounts the sub-operation with its affected SOP UIDs.
    pub fn notify_progression(
        &mut self,
        sop_instance_uid: Option<&str>,
        sop_class_uid: Option<&str>,
        status: u16,
        outcome: ProgressStatus,
        total: u32,
    ) -> Option<ProgressState> {
        self.status = DimseStatus::from_code(status);
        let progress = self.progress.as_ref()?;
        Some(progress.notify_with(outcome, total, |state| {
            state.status = Some(status);
            state.affected_sop_instance_uid = sop_instance_uid.map(str::to_string);
            state.affected_sop_class_uid = sop_class_uid.map(str::to_string);
        }))
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status)?;
        if let Some(message) = &self.message {
            write!(f, ": {}", message)?;
        }
        if let Some(state) = self.progress.as_ref().and_then(|p| p.snapshot()) {
            write!(
                f,
                " (completed={}, failed={}, warning={}, remaining={})",
                state.completed, state.failed, state.warning, state.remaining
            )?;
        }
        Ok(())
    }
}

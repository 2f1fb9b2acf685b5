//! Idle-connection watchdog for forwarding nodes

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{DimseError, Result};

/// Raised when a forwarding node has been idle longer than its threshold
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdleSignal {
    /// AE title of the idle forwarding node
    pub forward_ae_title: String,
    /// Time elapsed since the last recorded activity
    pub idle_for: Duration,
}

/// Last-activity marker of a node, in epoch milliseconds (0 = no activity)
#[derive(Debug, Default)]
pub struct ActivityMarker(AtomicI64);

impl ActivityMarker {
    pub fn new() -> Self {
        Self(AtomicI64::new(0))
    }

    /// Record activity now
    pub fn touch(&self) {
        self.set(now_millis());
    }

    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, timestamp_ms: i64) {
        self.0.store(timestamp_ms, Ordering::Release);
    }

    /// Clear the marker if it still holds `expected`
    fn clear_if(&self, expected: i64) -> bool {
        self.0
            .compare_exchange(expected, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Periodic task comparing a node's activity marker against an idle threshold
///
/// The watchdog only reads and clears its own node's marker; cleanup of idle
/// connections is left to whoever receives the [`IdleSignal`].
pub struct IdleWatchdog {
    shutdown: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl IdleWatchdog {
    /// Spawn the watchdog on the current tokio runtime
    ///
    /// Fails without spawning when `check_interval` is zero.
    pub fn spawn(
        forward_ae_title: String,
        marker: Arc<ActivityMarker>,
        idle_timeout: Duration,
        check_interval: Duration,
        signals: mpsc::Sender<IdleSignal>,
    ) -> Result<Self> {
        if check_interval.is_zero() {
            return Err(DimseError::config(format!(
                "Watchdog check interval for {} must be greater than 0",
                forward_ae_title
            )));
        }

        let shutdown = CancellationToken::new();
        let token = shutdown.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(check_interval);
            // The first tick completes immediately
            ticker.tick().await;
            debug!(
                "Idle watchdog started for {} (threshold {:?}, period {:?})",
                forward_ae_title, idle_timeout, check_interval
            );

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Some(signal) = check_idle(&forward_ae_title, &marker, idle_timeout) {
                            info!(
                                "Forwarding node {} idle for {:?}, requesting connection cleanup",
                                signal.forward_ae_title, signal.idle_for
                            );
                            if signals.send(signal).await.is_err() {
                                warn!("Idle signal receiver for {} is gone, stopping watchdog", forward_ae_title);
                                break;
                            }
                        }
                    }
                }
            }

            debug!("Idle watchdog stopped for {}", forward_ae_title);
        });

        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    /// Whether the watchdog task is still running
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Cancel the watchdog and wait for its task to finish
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("Idle watchdog terminated abnormally: {}", e);
            }
        }
    }
}

impl Drop for IdleWatchdog {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn check_idle(
    forward_ae_title: &str,
    marker: &ActivityMarker,
    idle_timeout: Duration,
) -> Option<IdleSignal> {
    let last = marker.get();
    if last == 0 {
        return None;
    }
    let elapsed = now_millis().saturating_sub(last);
    if elapsed <= idle_timeout.as_millis() as i64 {
        return None;
    }
    // New activity between the read and the clear wins over the signal
    if !marker.clear_if(last) {
        return None;
    }
    Some(IdleSignal {
        forward_ae_title: forward_ae_title.to_string(),
        idle_for: Duration::from_millis(elapsed as u64),
    })
}

//! Configuration types for relay (forwarding) nodes

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::node::NodeAddress;

/// Idle threshold after which a forwarding connection is considered stale
pub const MAX_IDLE_CONNECTION_SECS: u64 = 15;

/// Configuration shared by every forwarding node of a relay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Seconds without forwarded traffic before an idle signal is raised
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Seconds between two watchdog checks
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    /// Forwarding nodes of this relay
    #[serde(default)]
    pub nodes: Vec<ForwardNodeConfig>,
}

/// Configuration of a single forwarding node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardNodeConfig {
    /// AE title the relay answers to; unique per relay
    pub forward_ae_title: String,

    /// Host the relay listens on
    #[serde(default)]
    pub hostname: Option<String>,

    /// Sources allowed to send through this node; empty accepts everyone
    #[serde(default)]
    pub accepted_sources: Vec<NodeAddress>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout(),
            check_interval_secs: default_check_interval(),
            nodes: Vec::new(),
        }
    }
}

impl RelayConfig {
    /// Get idle threshold as Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Get watchdog period as Duration
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.idle_timeout_secs == 0 {
            return Err(crate::error::DimseError::config(
                "Idle timeout must be greater than 0",
            ));
        }

        if self.check_interval_secs == 0 {
            return Err(crate::error::DimseError::config(
                "Watchdog check interval must be greater than 0",
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for node in &self.nodes {
            NodeAddress::new(node.forward_ae_title.clone(), node.hostname.clone(), None)?;
            if !seen.insert(node.forward_ae_title.as_str()) {
                return Err(crate::error::DimseError::config(format!(
                    "Duplicate forward AE title '{}'",
                    node.forward_ae_title
                )));
            }
        }

        Ok(())
    }
}

// Default value functions
fn default_idle_timeout() -> u64 {
    MAX_IDLE_CONNECTION_SECS
}

fn default_check_interval() -> u64 {
    MAX_IDLE_CONNECTION_SECS
}

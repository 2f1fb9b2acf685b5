//! Relay (forwarding) node: an address plus an allow-list and liveness state

use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::config::{ForwardNodeConfig, RelayConfig};
use crate::node::NodeAddress;
use crate::watchdog::{ActivityMarker, IdleSignal, IdleWatchdog};
use crate::Result;

/// A relay endpoint addressed by its own AE title
///
/// Equality and hashing use `forward_ae_title` only: a relay keeps its
/// identity whatever host or port its peers currently see.
pub struct ForwardingNode {
    address: NodeAddress,
    accepted_source_nodes: HashSet<NodeAddress>,
    activity: Arc<ActivityMarker>,
    watchdog: Option<IdleWatchdog>,
}

impl ForwardingNode {
    pub fn new(forward_ae_title: impl Into<String>) -> Result<Self> {
        Self::with_hostname(forward_ae_title, None)
    }

    pub fn with_hostname(
        forward_ae_title: impl Into<String>,
        hostname: Option<String>,
    ) -> Result<Self> {
        Ok(Self {
            address: NodeAddress::new(forward_ae_title, hostname, None)?,
            accepted_source_nodes: HashSet::new(),
            activity: Arc::new(ActivityMarker::new()),
            watchdog: None,
        })
    }

    /// Build a node and its allow-list from configuration
    pub fn from_config(config: &ForwardNodeConfig) -> Result<Self> {
        let mut node = Self::with_hostname(config.forward_ae_title.clone(), config.hostname.clone())?;
        node.accepted_source_nodes
            .extend(config.accepted_sources.iter().cloned());
        Ok(node)
    }

    pub fn forward_ae_title(&self) -> &str {
        self.address.ae_title()
    }

    pub fn address(&self) -> &NodeAddress {
        &self.address
    }

    /// Accept a source by AE title only
    pub fn add_accepted_source_node(&mut self, ae_title: impl Into<String>) -> Result<()> {
        self.add_accepted_source_node_with(ae_title, None, false)
    }

    /// Accept a source, optionally checking its host on every association
    pub fn add_accepted_source_node_with(
        &mut self,
        ae_title: impl Into<String>,
        hostname: Option<String>,
        validate_hostname: bool,
    ) -> Result<()> {
        let node = NodeAddress::new(ae_title, hostname, None)?
            .with_hostname_validation(validate_hostname);
        self.accepted_source_nodes.insert(node);
        Ok(())
    }

    pub fn accepted_source_nodes(&self) -> &HashSet<NodeAddress> {
        &self.accepted_source_nodes
    }

    /// Whether a calling node may send through this relay
    ///
    /// An empty allow-list accepts every source. Entries flagged for hostname
    /// validation also require the caller's host to resolve to the same address,
    /// which blocks on DNS; relay tasks should call
    /// [`ForwardingNode::is_accepted_source_async`].
    pub fn is_accepted_source(&self, source: &NodeAddress) -> bool {
        if self.accepted_source_nodes.is_empty() {
            return true;
        }
        self.accepted_source_nodes.iter().any(|accepted| {
            accepted.ae_title() == source.ae_title()
                && (!accepted.validate_hostname() || accepted.equals_hostname(source.hostname()))
        })
    }

    /// [`ForwardingNode::is_accepted_source`] resolving names on the tokio resolver
    pub async fn is_accepted_source_async(&self, source: &NodeAddress) -> bool {
        if self.accepted_source_nodes.is_empty() {
            return true;
        }
        for accepted in &self.accepted_source_nodes {
            if accepted.ae_title() != source.ae_title() {
                continue;
            }
            if !accepted.validate_hostname()
                || accepted.equals_hostname_async(source.hostname()).await
            {
                return true;
            }
        }
        false
    }

    /// Record a forwarded transfer
    pub fn touch(&self) {
        self.activity.touch();
    }

    /// Last activity in epoch milliseconds, 0 when nothing was forwarded yet
    pub fn activity_timestamp(&self) -> i64 {
        self.activity.get()
    }

    pub fn set_activity_timestamp(&self, timestamp_ms: i64) {
        self.activity.set(timestamp_ms);
    }

    /// Start the idle watchdog, replacing any previous one
    ///
    /// Idle periods are reported on `signals`; the receiver owns the cleanup.
    /// Invalid relay timings are rejected before anything is spawned, and the
    /// previous watchdog is then left running.
    pub async fn start_watchdog(
        &mut self,
        config: &RelayConfig,
        signals: mpsc::Sender<IdleSignal>,
    ) -> Result<()> {
        config.validate()?;
        if let Some(previous) = self.watchdog.take() {
            previous.shutdown().await;
        }
        self.watchdog = Some(IdleWatchdog::spawn(
            self.forward_ae_title().to_string(),
            self.activity.clone(),
            config.idle_timeout(),
            config.check_interval(),
            signals,
        )?);
        Ok(())
    }

    pub fn has_watchdog(&self) -> bool {
        self.watchdog.as_ref().is_some_and(IdleWatchdog::is_running)
    }

    /// Tear down the node: the watchdog is cancelled and joined
    pub async fn shutdown(&mut self) {
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.shutdown().await;
            debug!("Forwarding node {} shut down", self.forward_ae_title());
        }
    }
}

impl PartialEq for ForwardingNode {
    fn eq(&self, other: &Self) -> bool {
        self.forward_ae_title() == other.forward_ae_title()
    }
}

impl Eq for ForwardingNode {}

impl Hash for ForwardingNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.forward_ae_title().hash(state);
    }
}

impl fmt::Debug for ForwardingNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForwardingNode")
            .field("address", &self.address)
            .field("accepted_source_nodes", &self.accepted_source_nodes)
            .field("activity_timestamp", &self.activity_timestamp())
            .field("watchdog", &self.has_watchdog())
            .finish()
    }
}

impl fmt::Display for ForwardingNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.forward_ae_title())
    }
}

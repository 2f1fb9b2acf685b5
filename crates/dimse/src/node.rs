//! Addressing of DICOM network endpoints

use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{SocketAddr, ToSocketAddrs};

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::{DimseError, Result};

/// Maximum length of an Application Entity title
pub const MAX_AE_TITLE_LEN: usize = 16;

/// Address used when a hostname is missing or cannot be resolved
pub const LOOPBACK_ADDRESS: &str = "127.0.0.1";

/// Identity of a DICOM network endpoint (AE title, host, port)
///
/// Equality and hashing only consider the `(ae_title, hostname, port)` triple,
/// so two addresses differing by `id` or `validate_hostname` are the same key
/// in routing tables and allow-lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "NodeAddressConfig")]
pub struct NodeAddress {
    ae_title: String,
    hostname: Option<String>,
    port: Option<u16>,
    validate_hostname: bool,
    id: Option<i64>,
}

/// Unvalidated form of a [`NodeAddress`] as found in configuration files
#[derive(Debug, Clone, Deserialize)]
pub struct NodeAddressConfig {
    pub ae_title: String,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub port: Option<u32>,
    #[serde(default)]
    pub validate_hostname: bool,
    #[serde(default)]
    pub id: Option<i64>,
}

impl NodeAddress {
    /// Create a validated address
    ///
    /// The port is taken as `u32` so out-of-range values can be rejected
    /// instead of silently truncated.
    pub fn new(
        ae_title: impl Into<String>,
        hostname: Option<String>,
        port: Option<u32>,
    ) -> Result<Self> {
        let ae_title = ae_title.into();
        if ae_title.trim().is_empty() {
            return Err(DimseError::InvalidAeTitle("Missing AE title".to_string()));
        }
        if ae_title.chars().count() > MAX_AE_TITLE_LEN {
            return Err(DimseError::InvalidAeTitle(format!(
                "'{}' has more than {} characters",
                ae_title, MAX_AE_TITLE_LEN
            )));
        }
        let port = match port {
            Some(p) if (1..=65535).contains(&p) => Some(p as u16),
            Some(p) => {
                return Err(DimseError::InvalidPort(format!(
                    "{} is out of bound [1, 65535]",
                    p
                )))
            }
            None => None,
        };

        Ok(Self {
            ae_title,
            hostname,
            port,
            validate_hostname: false,
            id: None,
        })
    }

    /// Address made of an AE title only
    pub fn from_ae_title(ae_title: impl Into<String>) -> Result<Self> {
        Self::new(ae_title, None, None)
    }

    /// Address of a remote peer, from the socket it connected with
    pub fn from_peer(ae_title: impl Into<String>, peer: SocketAddr) -> Result<Self> {
        Self::new(
            ae_title,
            Some(peer.ip().to_string()),
            Some(u32::from(peer.port())),
        )
    }

    /// Request hostname validation when this address is used in an allow-list
    pub fn with_hostname_validation(mut self, validate: bool) -> Self {
        self.validate_hostname = validate;
        self
    }

    /// Attach a persistence identifier
    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn ae_title(&self) -> &str {
        &self.ae_title
    }

    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn validate_hostname(&self) -> bool {
        self.validate_hostname
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    /// Compare this node's hostname with another one
    ///
    /// Literal matches win; otherwise both names are resolved and their IP
    /// forms compared. Resolution failures fall back to the literal name.
    ///
    /// Name resolution blocks the calling thread. From async code use
    /// [`NodeAddress::equals_hostname_async`].
    pub fn equals_hostname(&self, other: Option<&str>) -> bool {
        if self.hostname.as_deref() == other {
            return true;
        }
        Self::convert_to_ip(self.hostname.as_deref()) == Self::convert_to_ip(other)
    }

    /// Non-blocking [`NodeAddress::equals_hostname`]
    pub async fn equals_hostname_async(&self, other: Option<&str>) -> bool {
        if self.hostname.as_deref() == other {
            return true;
        }
        let (mine, theirs) = tokio::join!(
            Self::convert_to_ip_async(self.hostname.as_deref()),
            Self::convert_to_ip_async(other)
        );
        mine == theirs
    }

    /// Resolve a hostname to the textual form of its first IP address
    ///
    /// Blocks on the system resolver; see [`NodeAddress::convert_to_ip_async`].
    pub fn convert_to_ip(hostname: Option<&str>) -> String {
        let host = match non_blank(hostname) {
            Some(h) => h,
            None => return LOOPBACK_ADDRESS.to_string(),
        };
        first_ip(host, (host, 0u16).to_socket_addrs())
    }

    /// Resolve a hostname through `tokio::net::lookup_host`
    pub async fn convert_to_ip_async(hostname: Option<&str>) -> String {
        let host = match non_blank(hostname) {
            Some(h) => h,
            None => return LOOPBACK_ADDRESS.to_string(),
        };
        first_ip(host, tokio::net::lookup_host((host, 0u16)).await)
    }
}

fn non_blank(hostname: Option<&str>) -> Option<&str> {
    hostname.map(str::trim).filter(|h| !h.is_empty())
}

fn first_ip(host: &str, resolved: std::io::Result<impl Iterator<Item = SocketAddr>>) -> String {
    match resolved {
        Ok(mut addrs) => match addrs.next() {
            Some(addr) => addr.ip().to_string(),
            None => {
                error!("Cannot resolve hostname '{}': no address returned", host);
                host.to_string()
            }
        },
        Err(e) => {
            error!("Cannot resolve hostname '{}': {}", host, e);
            host.to_string()
        }
    }
}

impl TryFrom<NodeAddressConfig> for NodeAddress {
    type Error = DimseError;

    fn try_from(raw: NodeAddressConfig) -> Result<Self> {
        let mut node = NodeAddress::new(raw.ae_title, raw.hostname, raw.port)?
            .with_hostname_validation(raw.validate_hostname);
        node.id = raw.id;
        Ok(node)
    }
}

impl PartialEq for NodeAddress {
    fn eq(&self, other: &Self) -> bool {
        self.ae_title == other.ae_title
            && self.hostname == other.hostname
            && self.port == other.port
    }
}

impl Eq for NodeAddress {}

impl Hash for NodeAddress {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ae_title.hash(state);
        self.hostname.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Host={} AET={} Port={}",
            self.hostname.as_deref().unwrap_or("null"),
            self.ae_title,
            self.port
                .map(|p| p.to_string())
                .unwrap_or_else(|| "null".to_string())
        )
    }
}

//! Peer and link snapshots reported by the radio layer.

use std::fmt;
use std::net::IpAddr;

/// One nearby device as reported by a peer enumeration. Snapshots are
/// immutable: a fresh list replaces the whole cached set, never patches it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    /// Human-readable device name.
    pub name: String,
    /// Stable hardware address.
    pub address: String,
    pub status: DiscoveryStatus,
}

impl PeerIdentity {
    pub fn new(name: impl Into<String>, address: impl Into<String>, status: DiscoveryStatus) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            status,
        }
    }
}

/// Discovery status of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiscoveryStatus {
    Available,
    Invited,
    Connected,
    Failed,
    Unavailable,
}

impl fmt::Display for DiscoveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DiscoveryStatus::Available => "available",
            DiscoveryStatus::Invited => "invited",
            DiscoveryStatus::Connected => "connected",
            DiscoveryStatus::Failed => "failed",
            DiscoveryStatus::Unavailable => "unavailable",
        };
        f.write_str(label)
    }
}

/// Result of one link negotiation. Superseded by the next negotiation,
/// cleared on disconnection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    pub group_established: bool,
    /// True when this device is the group owner.
    pub is_host: bool,
    /// Address of the group owner, present once a group has formed.
    pub host_address: Option<IpAddr>,
}

/// Which side of the transfer this device runs once a group has formed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Host,
    Client,
}

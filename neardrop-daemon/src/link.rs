//! Radio collaborator boundary: asynchronous requests and notifications.
//! The radio itself lives outside this crate; the daemon only consumes it.

use async_trait::async_trait;
use neardrop_core::peer::{LinkInfo, PeerIdentity};
use tokio::sync::mpsc;

/// Notifications delivered by the link layer on its own schedule.
#[derive(Debug, Clone)]
pub enum LinkNotification {
    RadioStateChanged(bool),
    /// The nearby-device set changed; enumerate to get the new one.
    PeersChanged,
    /// A link came up or went down. The authoritative negotiation outcome.
    ConnectionChanged { connected: bool },
    SelfDeviceChanged(PeerIdentity),
}

/// Channel the backend delivers notifications over.
pub type LinkNotifications = mpsc::UnboundedReceiver<LinkNotification>;

/// A formed group as reported by the link layer.
#[derive(Debug, Clone, Default)]
pub struct GroupInfo {
    pub owner: Option<PeerIdentity>,
}

/// Failure reason reported by a link-layer request. Informational only:
/// state transitions come from notifications, never from these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("internal radio failure")]
    Internal,
    #[error("peer-to-peer unsupported on this device")]
    Unsupported,
    #[error("radio busy")]
    Busy,
}

/// Request surface of the link layer. Every operation completes
/// asynchronously with success or a reason code; "success" for
/// `start_discovery` and `connect` only means the process started.
#[async_trait]
pub trait LinkBackend: Send + Sync + 'static {
    /// Enumerate nearby devices.
    async fn request_peers(&self) -> Result<Vec<PeerIdentity>, LinkError>;

    /// Fetch the outcome of the most recent negotiation.
    async fn request_link_info(&self) -> Result<LinkInfo, LinkError>;

    /// Query the current group, if any.
    async fn request_group_info(&self) -> Result<Option<GroupInfo>, LinkError>;

    /// Form a group with this device as owner.
    async fn create_group(&self) -> Result<(), LinkError>;

    /// Tear down the current group.
    async fn remove_group(&self) -> Result<(), LinkError>;

    /// Start a peer scan; results arrive via `PeersChanged`.
    async fn start_discovery(&self) -> Result<(), LinkError>;

    /// Negotiate a link with `peer` using automatic pairing (no PIN).
    async fn connect(&self, peer: &PeerIdentity) -> Result<(), LinkError>;

    /// Abandon an in-flight negotiation.
    async fn cancel_connect(&self) -> Result<(), LinkError>;
}

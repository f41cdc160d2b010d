//! Host-driven session state machine: the daemon passes link events and
//! performs the returned actions.

use std::net::IpAddr;

use crate::peer::{LinkInfo, PeerIdentity, SessionRole};

/// Link-layer notifications and request completions, as passed by the host.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Radio availability toggled.
    RadioStateChanged(bool),
    /// The set of nearby devices changed; the cached set is stale.
    PeersChanged,
    /// The link went up or down. This is the authoritative outcome of a
    /// negotiation; request callbacks are not.
    LinkStatusChanged { connected: bool },
    /// The local device snapshot changed.
    SelfDeviceChanged(PeerIdentity),
    /// Completion of a `RequestPeers` action.
    PeersResolved(Vec<PeerIdentity>),
    /// Completion of a `RequestLinkInfo` action.
    LinkInfoResolved(LinkInfo),
    /// The host started a peer scan.
    DiscoveryStarted,
    /// The host issued a link negotiation request.
    NegotiationStarted,
}

/// Side effects for the host to perform after an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Enumerate nearby devices; the completion comes back as
    /// `SessionEvent::PeersResolved`.
    RequestPeers,
    /// Fetch the negotiation outcome; the completion comes back as
    /// `SessionEvent::LinkInfoResolved`.
    RequestLinkInfo,
    /// Push a wholesale replacement of the peer set to observers.
    PublishPeers(Vec<PeerIdentity>),
    /// Push the updated local device snapshot to observers.
    PublishSelf(PeerIdentity),
    /// The session state moved.
    StateChanged(SessionState),
    /// Tear down any in-flight transfer job.
    AbortTransfer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disabled,
    EnabledIdle,
    Discovering,
    Negotiating,
    Established(SessionRole),
    Disconnected,
}

/// Session coordinator. Owns the peer-list, link-info and identity caches;
/// each is replaced wholesale, never patched in place.
pub struct SessionCore {
    state: SessionState,
    peers: Vec<PeerIdentity>,
    link: Option<LinkInfo>,
    identity: Option<PeerIdentity>,
}

impl SessionCore {
    pub fn new() -> Self {
        Self {
            state: SessionState::Disabled,
            peers: Vec::new(),
            link: None,
            identity: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn peers(&self) -> &[PeerIdentity] {
        &self.peers
    }

    pub fn link_info(&self) -> Option<&LinkInfo> {
        self.link.as_ref()
    }

    pub fn identity(&self) -> Option<&PeerIdentity> {
        self.identity.as_ref()
    }

    /// Address to dial for an outbound transfer. Present only once a group
    /// has formed with the remote side as its owner.
    pub fn host_address(&self) -> Option<IpAddr> {
        match &self.link {
            Some(link) if link.group_established && !link.is_host => link.host_address,
            _ => None,
        }
    }

    /// Feed one event; returns the actions the host must perform.
    pub fn on_event(&mut self, event: SessionEvent) -> Vec<SessionAction> {
        match event {
            SessionEvent::RadioStateChanged(false) => {
                self.state = SessionState::Disabled;
                self.peers = Vec::new();
                vec![
                    SessionAction::StateChanged(self.state),
                    SessionAction::PublishPeers(Vec::new()),
                ]
            }
            SessionEvent::RadioStateChanged(true) => {
                if self.state == SessionState::Disabled {
                    self.state = SessionState::EnabledIdle;
                    vec![SessionAction::StateChanged(self.state)]
                } else {
                    vec![]
                }
            }
            SessionEvent::PeersChanged => vec![SessionAction::RequestPeers],
            SessionEvent::PeersResolved(list) => {
                self.peers = list.clone();
                vec![SessionAction::PublishPeers(list)]
            }
            SessionEvent::LinkStatusChanged { connected: true } => {
                vec![SessionAction::RequestLinkInfo]
            }
            SessionEvent::LinkStatusChanged { connected: false } => {
                self.state = SessionState::Disconnected;
                self.link = None;
                self.peers = Vec::new();
                vec![
                    SessionAction::StateChanged(self.state),
                    SessionAction::PublishPeers(Vec::new()),
                    SessionAction::AbortTransfer,
                ]
            }
            SessionEvent::SelfDeviceChanged(identity) => {
                self.identity = Some(identity.clone());
                vec![SessionAction::PublishSelf(identity)]
            }
            SessionEvent::LinkInfoResolved(info) => {
                let mut actions = Vec::new();
                if info.group_established {
                    let role = if info.is_host {
                        SessionRole::Host
                    } else {
                        SessionRole::Client
                    };
                    self.state = SessionState::Established(role);
                    actions.push(SessionAction::StateChanged(self.state));
                }
                self.link = Some(info);
                actions
            }
            SessionEvent::DiscoveryStarted => {
                if self.state == SessionState::Disabled {
                    vec![]
                } else {
                    self.state = SessionState::Discovering;
                    vec![SessionAction::StateChanged(self.state)]
                }
            }
            SessionEvent::NegotiationStarted => {
                if self.state == SessionState::Disabled {
                    vec![]
                } else {
                    self.state = SessionState::Negotiating;
                    vec![SessionAction::StateChanged(self.state)]
                }
            }
        }
    }
}

impl Default for SessionCore {
    fn default() -> Self {
        Self::new()
    }
}

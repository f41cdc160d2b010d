//! Session controller: feeds link notifications into the core state machine,
//! performs the actions it returns, and exposes the observable streams.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use neardrop_core::peer::PeerIdentity;
use neardrop_core::{SessionAction, SessionCore, SessionEvent, SessionState, ViewState};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::link::{LinkBackend, LinkNotification, LinkNotifications};
use crate::receiver::FileReceiver;
use crate::sender::FileSender;
use crate::transfer::{self, JobSlot};

const BUS_CAPACITY: usize = 256;

/// Broadcast streams observed by the UI layer. Multi-subscriber; new
/// subscribers only see future emissions.
#[derive(Clone)]
pub struct EventBus {
    view: broadcast::Sender<ViewState>,
    log: broadcast::Sender<String>,
}

impl EventBus {
    pub fn new() -> Self {
        let (view, _) = broadcast::channel(BUS_CAPACITY);
        let (log, _) = broadcast::channel(BUS_CAPACITY);
        Self { view, log }
    }

    /// Push a job lifecycle state. Dropped silently when nobody subscribes.
    pub fn emit(&self, state: ViewState) {
        let _ = self.view.send(state);
    }

    pub fn log(&self, line: impl Into<String>) {
        let line = line.into();
        debug!(target: "neardrop", "{line}");
        let _ = self.log.send(line);
    }

    pub fn subscribe_view(&self) -> broadcast::Receiver<ViewState> {
        self.view.subscribe()
    }

    pub fn subscribe_log(&self) -> broadcast::Receiver<String> {
        self.log.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// One peer session: created when the surrounding screen starts, torn down
/// when it ends. Owns the caches, the notification pump and the single
/// transfer-job slot shared by both transfer components.
pub struct SessionController<B: LinkBackend> {
    backend: Arc<B>,
    core: Arc<Mutex<SessionCore>>,
    bus: EventBus,
    job: JobSlot,
    receiver: FileReceiver,
    sender: FileSender,
    /// Serializes group teardown-then-create sequences without blocking
    /// notification delivery.
    group_ops: Mutex<()>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    pump: JoinHandle<()>,
}

impl<B: LinkBackend> SessionController<B> {
    pub fn new(backend: Arc<B>, notifications: LinkNotifications, cache_dir: PathBuf) -> Self {
        let bus = EventBus::new();
        let core = Arc::new(Mutex::new(SessionCore::new()));
        let job = JobSlot::default();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let receiver = FileReceiver::new(bus.clone(), cache_dir.clone(), job.clone());
        let sender = FileSender::new(bus.clone(), cache_dir, job.clone());
        let pump = tokio::spawn(pump(
            backend.clone(),
            core.clone(),
            bus.clone(),
            job.clone(),
            notifications,
            events_tx.clone(),
            events_rx,
        ));
        Self {
            backend,
            core,
            bus,
            job,
            receiver,
            sender,
            group_ops: Mutex::new(()),
            events_tx,
            pump,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub async fn state(&self) -> SessionState {
        self.core.lock().await.state()
    }

    pub async fn peers(&self) -> Vec<PeerIdentity> {
        self.core.lock().await.peers().to_vec()
    }

    /// Address of the remote group owner, once established as client.
    pub async fn host_address(&self) -> Option<IpAddr> {
        self.core.lock().await.host_address()
    }

    /// Start a peer scan. Success only means the scan started; results
    /// arrive later as a peers-changed notification.
    pub async fn discover_peers(&self) {
        match self.backend.start_discovery().await {
            Ok(()) => {
                let _ = self.events_tx.send(SessionEvent::DiscoveryStarted);
                self.bus.log("discoverPeers started");
            }
            Err(err) => self.bus.log(format!("discoverPeers failed: {err}")),
        }
    }

    /// Negotiate a link with `peer` using automatic pairing. Request success
    /// only means negotiation started; the authoritative outcome arrives as
    /// a connection-changed notification.
    pub async fn connect(&self, peer: &PeerIdentity) {
        self.bus
            .log(format!("connecting to {} ({})", peer.name, peer.address));
        match self.backend.connect(peer).await {
            Ok(()) => {
                let _ = self.events_tx.send(SessionEvent::NegotiationStarted);
                self.bus.log("connect request accepted, awaiting link status");
            }
            Err(err) => self.bus.log(format!("connect failed: {err}")),
        }
    }

    /// Abandon an in-flight negotiation and leave any group.
    pub async fn disconnect(&self) {
        match self.backend.cancel_connect().await {
            Ok(()) => self.bus.log("cancelConnect ok"),
            Err(err) => self.bus.log(format!("cancelConnect failed: {err}")),
        }
        self.leave_group().await;
    }

    /// Form a new group with this device as owner, tearing down any existing
    /// group first so stale state never leaks into the new one. Serialized
    /// with other group operations: a call issued while a teardown is
    /// outstanding waits for it.
    pub async fn form_group(&self) {
        let _guard = self.group_ops.lock().await;
        self.remove_group_if_needed().await;
        match self.backend.create_group().await {
            Ok(()) => self.bus.log("createGroup ok"),
            Err(err) => self.bus.log(format!("createGroup failed: {err}")),
        }
    }

    /// Leave the current group. Safe to call when none exists, any number of
    /// times.
    pub async fn leave_group(&self) {
        let _guard = self.group_ops.lock().await;
        self.remove_group_if_needed().await;
    }

    async fn remove_group_if_needed(&self) {
        match self.backend.request_group_info().await {
            Ok(Some(_)) => match self.backend.remove_group().await {
                Ok(()) => self.bus.log("removeGroup ok"),
                Err(err) => self.bus.log(format!("removeGroup failed: {err}")),
            },
            Ok(None) => {}
            Err(err) => self.bus.log(format!("requestGroupInfo failed: {err}")),
        }
    }

    /// Arm the host-side listener. No-op while a job is in flight.
    pub async fn start_listening(&self) {
        self.receiver.start_listening().await;
    }

    /// Send `source` to the group owner at `host`. No-op while a job is in
    /// flight.
    pub async fn send_file(&self, host: IpAddr, source: PathBuf) {
        self.sender.send(host, source).await;
    }

    /// Tear the session down: stop notification processing and cancel any
    /// in-flight job by closing its resources.
    pub async fn shutdown(&self) {
        self.pump.abort();
        transfer::cancel_job(&self.job).await;
    }

    #[cfg(test)]
    pub(crate) fn job_slot(&self) -> &JobSlot {
        &self.job
    }
}

impl<B: LinkBackend> Drop for SessionController<B> {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Drain notifications and request completions into the core, one at a time.
/// Completions re-enter through the same channel set, so the whole reaction
/// chain stays serialized.
async fn pump<B: LinkBackend>(
    backend: Arc<B>,
    core: Arc<Mutex<SessionCore>>,
    bus: EventBus,
    job: JobSlot,
    mut notifications: LinkNotifications,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    mut events_rx: mpsc::UnboundedReceiver<SessionEvent>,
) {
    loop {
        let event = tokio::select! {
            notification = notifications.recv() => match notification {
                Some(notification) => notification_event(notification),
                None => break,
            },
            completion = events_rx.recv() => match completion {
                Some(event) => event,
                None => break,
            },
        };
        dispatch(&backend, &core, &bus, &job, &events_tx, event).await;
    }
}

fn notification_event(notification: LinkNotification) -> SessionEvent {
    match notification {
        LinkNotification::RadioStateChanged(enabled) => SessionEvent::RadioStateChanged(enabled),
        LinkNotification::PeersChanged => SessionEvent::PeersChanged,
        LinkNotification::ConnectionChanged { connected } => {
            SessionEvent::LinkStatusChanged { connected }
        }
        LinkNotification::SelfDeviceChanged(identity) => {
            SessionEvent::SelfDeviceChanged(identity)
        }
    }
}

async fn dispatch<B: LinkBackend>(
    backend: &Arc<B>,
    core: &Arc<Mutex<SessionCore>>,
    bus: &EventBus,
    job: &JobSlot,
    events_tx: &mpsc::UnboundedSender<SessionEvent>,
    event: SessionEvent,
) {
    let actions = core.lock().await.on_event(event);
    for action in actions {
        match action {
            SessionAction::RequestPeers => {
                let backend = backend.clone();
                let bus = bus.clone();
                let events_tx = events_tx.clone();
                tokio::spawn(async move {
                    match backend.request_peers().await {
                        Ok(peers) => {
                            let _ = events_tx.send(SessionEvent::PeersResolved(peers));
                        }
                        Err(err) => bus.log(format!("requestPeers failed: {err}")),
                    }
                });
            }
            SessionAction::RequestLinkInfo => {
                let backend = backend.clone();
                let bus = bus.clone();
                let events_tx = events_tx.clone();
                tokio::spawn(async move {
                    match backend.request_link_info().await {
                        Ok(info) => {
                            let _ = events_tx.send(SessionEvent::LinkInfoResolved(info));
                        }
                        Err(err) => bus.log(format!("requestLinkInfo failed: {err}")),
                    }
                });
            }
            SessionAction::PublishPeers(peers) => {
                bus.log(format!("peers available, size: {}", peers.len()));
            }
            SessionAction::PublishSelf(identity) => {
                bus.log(format!(
                    "self device: {} ({}), status: {}",
                    identity.name, identity.address, identity.status
                ));
            }
            SessionAction::StateChanged(state) => {
                debug!(?state, "session state changed");
                bus.log(format!("session state: {state:?}"));
            }
            SessionAction::AbortTransfer => {
                bus.log("link lost, aborting transfer job");
                transfer::cancel_job(job).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{GroupInfo, LinkError};
    use async_trait::async_trait;
    use neardrop_core::peer::{DiscoveryStatus, LinkInfo, SessionRole};
    use std::net::Ipv4Addr;
    use std::time::Duration;

    const HOST_ADDR: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 49, 1));

    fn peer(name: &str) -> PeerIdentity {
        PeerIdentity::new(name, "aa:bb:cc:dd:ee:ff", DiscoveryStatus::Available)
    }

    struct FakeBackend {
        peers: Mutex<Vec<PeerIdentity>>,
        link_info: Mutex<LinkInfo>,
        group: Mutex<Option<GroupInfo>>,
        calls: Mutex<Vec<String>>,
        remove_delay: Duration,
        connect_result: Result<(), LinkError>,
    }

    impl FakeBackend {
        fn new() -> Self {
            Self {
                peers: Mutex::new(Vec::new()),
                link_info: Mutex::new(LinkInfo {
                    group_established: false,
                    is_host: false,
                    host_address: None,
                }),
                group: Mutex::new(None),
                calls: Mutex::new(Vec::new()),
                remove_delay: Duration::ZERO,
                connect_result: Ok(()),
            }
        }

        async fn record(&self, call: &str) {
            self.calls.lock().await.push(call.to_string());
        }

        async fn calls(&self) -> Vec<String> {
            self.calls.lock().await.clone()
        }

        async fn index_of(&self, call: &str) -> usize {
            self.calls()
                .await
                .iter()
                .position(|c| c == call)
                .unwrap_or_else(|| panic!("{call} never happened"))
        }
    }

    #[async_trait]
    impl LinkBackend for FakeBackend {
        async fn request_peers(&self) -> Result<Vec<PeerIdentity>, LinkError> {
            self.record("requestPeers").await;
            Ok(self.peers.lock().await.clone())
        }

        async fn request_link_info(&self) -> Result<LinkInfo, LinkError> {
            self.record("requestLinkInfo").await;
            Ok(self.link_info.lock().await.clone())
        }

        async fn request_group_info(&self) -> Result<Option<GroupInfo>, LinkError> {
            self.record("requestGroupInfo").await;
            Ok(self.group.lock().await.clone())
        }

        async fn create_group(&self) -> Result<(), LinkError> {
            self.record("createGroup").await;
            *self.group.lock().await = Some(GroupInfo::default());
            Ok(())
        }

        async fn remove_group(&self) -> Result<(), LinkError> {
            self.record("removeGroup").await;
            tokio::time::sleep(self.remove_delay).await;
            *self.group.lock().await = None;
            self.record("removeGroup:done").await;
            Ok(())
        }

        async fn start_discovery(&self) -> Result<(), LinkError> {
            self.record("discoverPeers").await;
            Ok(())
        }

        async fn connect(&self, _peer: &PeerIdentity) -> Result<(), LinkError> {
            self.record("connect").await;
            self.connect_result
        }

        async fn cancel_connect(&self) -> Result<(), LinkError> {
            self.record("cancelConnect").await;
            Ok(())
        }
    }

    type Harness = (
        SessionController<FakeBackend>,
        Arc<FakeBackend>,
        mpsc::UnboundedSender<LinkNotification>,
        tempfile::TempDir,
    );

    fn controller_with(backend: FakeBackend) -> Harness {
        let backend = Arc::new(backend);
        let (tx, rx) = mpsc::unbounded_channel();
        let cache = tempfile::tempdir().unwrap();
        let controller = SessionController::new(backend.clone(), rx, cache.path().to_path_buf());
        (controller, backend, tx, cache)
    }

    async fn wait_for_state(controller: &SessionController<FakeBackend>, want: SessionState) {
        for _ in 0..200 {
            if controller.state().await == want {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "state never became {want:?}, last: {:?}",
            controller.state().await
        );
    }

    async fn wait_for_peer_count(controller: &SessionController<FakeBackend>, want: usize) {
        for _ in 0..200 {
            if controller.peers().await.len() == want {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("peer count never became {want}");
    }

    #[tokio::test]
    async fn connected_notification_establishes_host_role() {
        let mut backend = FakeBackend::new();
        *backend.link_info.get_mut() = LinkInfo {
            group_established: true,
            is_host: true,
            host_address: Some(HOST_ADDR),
        };
        let (controller, backend, tx, _cache) = controller_with(backend);
        tx.send(LinkNotification::RadioStateChanged(true)).unwrap();
        tx.send(LinkNotification::ConnectionChanged { connected: true })
            .unwrap();
        wait_for_state(&controller, SessionState::Established(SessionRole::Host)).await;
        assert_eq!(backend.index_of("requestLinkInfo").await, 0);
        // The host does not dial anyone.
        assert_eq!(controller.host_address().await, None);
    }

    #[tokio::test]
    async fn connected_notification_establishes_client_and_host_address() {
        let mut backend = FakeBackend::new();
        *backend.link_info.get_mut() = LinkInfo {
            group_established: true,
            is_host: false,
            host_address: Some(HOST_ADDR),
        };
        let (controller, _backend, tx, _cache) = controller_with(backend);
        tx.send(LinkNotification::RadioStateChanged(true)).unwrap();
        tx.send(LinkNotification::ConnectionChanged { connected: true })
            .unwrap();
        wait_for_state(&controller, SessionState::Established(SessionRole::Client)).await;
        assert_eq!(controller.host_address().await, Some(HOST_ADDR));
    }

    #[tokio::test]
    async fn unformed_link_info_changes_nothing() {
        let (controller, _backend, tx, _cache) = controller_with(FakeBackend::new());
        tx.send(LinkNotification::RadioStateChanged(true)).unwrap();
        wait_for_state(&controller, SessionState::EnabledIdle).await;
        tx.send(LinkNotification::ConnectionChanged { connected: true })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(controller.state().await, SessionState::EnabledIdle);
    }

    #[tokio::test]
    async fn peer_list_is_replaced_wholesale_including_empty() {
        let (controller, backend, tx, _cache) = controller_with(FakeBackend::new());
        *backend.peers.lock().await = vec![peer("a"), peer("b")];
        tx.send(LinkNotification::PeersChanged).unwrap();
        wait_for_peer_count(&controller, 2).await;

        *backend.peers.lock().await = Vec::new();
        tx.send(LinkNotification::PeersChanged).unwrap();
        wait_for_peer_count(&controller, 0).await;
    }

    #[tokio::test]
    async fn form_group_tears_down_an_existing_group_first() {
        let mut backend = FakeBackend::new();
        *backend.group.get_mut() = Some(GroupInfo::default());
        let (controller, backend, _tx, _cache) = controller_with(backend);

        controller.form_group().await;

        let removed = backend.index_of("removeGroup:done").await;
        let created = backend.index_of("createGroup").await;
        assert!(
            removed < created,
            "createGroup must wait for teardown completion"
        );
    }

    #[tokio::test]
    async fn form_group_without_existing_group_skips_teardown() {
        let (controller, backend, _tx, _cache) = controller_with(FakeBackend::new());
        controller.form_group().await;
        let calls = backend.calls().await;
        assert_eq!(calls, vec!["requestGroupInfo", "createGroup"]);
    }

    #[tokio::test]
    async fn leave_group_is_idempotent() {
        let mut backend = FakeBackend::new();
        *backend.group.get_mut() = Some(GroupInfo::default());
        let (controller, backend, _tx, _cache) = controller_with(backend);

        controller.leave_group().await;
        controller.leave_group().await;

        let calls = backend.calls().await;
        assert_eq!(
            calls.iter().filter(|c| *c == "removeGroup").count(),
            1,
            "second leave finds no group"
        );
    }

    #[tokio::test]
    async fn group_operations_serialize() {
        let mut backend = FakeBackend::new();
        backend.remove_delay = Duration::from_millis(100);
        *backend.group.get_mut() = Some(GroupInfo::default());
        let (controller, backend, _tx, _cache) = controller_with(backend);
        let controller = Arc::new(controller);

        let teardown = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.leave_group().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        controller.form_group().await;
        teardown.await.unwrap();

        let removed = backend.index_of("removeGroup:done").await;
        let created = backend.index_of("createGroup").await;
        assert!(removed < created, "form waited for the outstanding teardown");
    }

    #[tokio::test]
    async fn connect_request_success_is_not_connected() {
        let (controller, _backend, tx, _cache) = controller_with(FakeBackend::new());
        tx.send(LinkNotification::RadioStateChanged(true)).unwrap();
        wait_for_state(&controller, SessionState::EnabledIdle).await;

        controller.connect(&peer("target")).await;
        wait_for_state(&controller, SessionState::Negotiating).await;
        assert!(!matches!(
            controller.state().await,
            SessionState::Established(_)
        ));
    }

    #[tokio::test]
    async fn connect_request_failure_is_logged_without_transition() {
        let mut backend = FakeBackend::new();
        backend.connect_result = Err(LinkError::Busy);
        let (controller, _backend, tx, _cache) = controller_with(backend);
        tx.send(LinkNotification::RadioStateChanged(true)).unwrap();
        wait_for_state(&controller, SessionState::EnabledIdle).await;

        let mut log = controller.bus().subscribe_log();
        controller.connect(&peer("target")).await;

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let line = tokio::time::timeout_at(deadline, log.recv())
                .await
                .expect("log line within deadline")
                .expect("bus open");
            if line.contains("connect failed") {
                break;
            }
        }
        assert_eq!(controller.state().await, SessionState::EnabledIdle);
    }

    #[tokio::test]
    async fn disconnection_aborts_the_active_job() {
        let (controller, _backend, tx, _cache) = controller_with(FakeBackend::new());
        let parked = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        *controller.job_slot().lock().await = Some(parked);

        tx.send(LinkNotification::ConnectionChanged { connected: false })
            .unwrap();

        for _ in 0..200 {
            if controller.job_slot().lock().await.is_none() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job slot never cleared after disconnection");
    }

    #[tokio::test]
    async fn disconnect_cancels_negotiation_then_leaves_group() {
        let mut backend = FakeBackend::new();
        *backend.group.get_mut() = Some(GroupInfo::default());
        let (controller, backend, _tx, _cache) = controller_with(backend);

        controller.disconnect().await;

        let cancelled = backend.index_of("cancelConnect").await;
        let queried = backend.index_of("requestGroupInfo").await;
        let removed = backend.index_of("removeGroup").await;
        assert!(cancelled < queried && queried < removed);
    }
}

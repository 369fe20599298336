//! Coordinator: routes transport events to the discovery, advertising and
//! session listeners, one event at a time.
//!
//! Browsing nodes invite every peer they discover; advertising nodes answer
//! invitations according to `auto_accept`. Session events feed the tracker.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::MeshConfig;
use crate::listeners::{AdvertisingListener, DiscoveryListener, SessionListener};
use crate::membership::{PeerIdentity, SessionState};
use crate::role::{Role, RoleController};
use crate::transport::{DiscoveryInfo, InvitationResponder, Transport, TransportEvent};

pub struct MeshCoordinator {
    transport: Arc<dyn Transport>,
    controller: Arc<RoleController>,
    invite_timeout: Duration,
    auto_accept: bool,
}

impl MeshCoordinator {
    pub fn new(
        config: &MeshConfig,
        transport: Arc<dyn Transport>,
        controller: Arc<RoleController>,
    ) -> Self {
        Self {
            transport,
            controller,
            invite_timeout: config.invite_timeout(),
            auto_accept: config.auto_accept,
        }
    }

    fn local_peer(&self) -> &PeerIdentity {
        self.controller.tracker().local_peer()
    }

    /// Route one inbound event to the matching listener.
    pub async fn dispatch(&self, event: TransportEvent) {
        match event {
            TransportEvent::PeerDiscovered { peer, metadata } => {
                self.peer_discovered(peer, metadata).await
            }
            TransportEvent::PeerLost { peer } => self.peer_lost(peer).await,
            TransportEvent::InvitationReceived {
                peer,
                context,
                responder,
            } => self.invitation_received(peer, context, responder).await,
            TransportEvent::SessionStateChanged { peer, state } => {
                self.session_state_changed(peer, state).await
            }
        }
    }

    /// Drain `events` until the transport drops its sender.
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            self.dispatch(event).await;
        }
        debug!("transport event channel closed");
    }

    pub fn spawn(
        self: Arc<Self>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(events))
    }
}

#[async_trait::async_trait]
impl DiscoveryListener for MeshCoordinator {
    async fn peer_discovered(&self, peer: PeerIdentity, metadata: DiscoveryInfo) {
        info!("found peer: {peer}");
        if peer == *self.local_peer() {
            return;
        }
        if self.controller.role().await != Role::Browsing {
            debug!("not browsing, ignoring {peer} ({} metadata keys)", metadata.len());
            return;
        }
        let tracker = self.controller.tracker();
        if tracker.is_connected(&peer) || tracker.state_of(&peer) == SessionState::Connecting {
            debug!("{peer} already connected or invited");
            return;
        }

        info!("inviting peer: {peer}");
        if let Err(e) = self.transport.invite(&peer, self.invite_timeout).await {
            warn!("invite to {peer} failed: {e:#}");
        }
    }

    async fn peer_lost(&self, peer: PeerIdentity) {
        info!("lost peer: {peer}");
    }
}

#[async_trait::async_trait]
impl AdvertisingListener for MeshCoordinator {
    async fn invitation_received(
        &self,
        peer: PeerIdentity,
        context: Option<Vec<u8>>,
        responder: InvitationResponder,
    ) {
        let accept = self.auto_accept && self.controller.role().await == Role::Advertising;
        debug!(
            "invitation from {peer} ({} context bytes), accept={accept}",
            context.as_ref().map_or(0, Vec::len)
        );
        responder.respond(accept);
    }
}

#[async_trait::async_trait]
impl SessionListener for MeshCoordinator {
    async fn session_state_changed(&self, peer: PeerIdentity, state: SessionState) {
        debug!("state changed: {peer} is {state}");
        // Connections still in flight when the node went idle are stale.
        self.controller.apply_session_event(&peer, state).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listeners::StateChangeListener;
    use crate::session::SessionTracker;
    use crate::transport::{MockTransport, TransportCall};

    struct Fixture {
        coordinator: Arc<MeshCoordinator>,
        controller: Arc<RoleController>,
        transport: Arc<MockTransport>,
    }

    fn fixture(config: MeshConfig) -> Fixture {
        let transport = Arc::new(MockTransport::new());
        let dyn_transport = transport.clone() as Arc<dyn Transport>;
        let tracker = Arc::new(SessionTracker::new(
            config.local_identity(),
            dyn_transport.clone(),
        ));
        let controller = Arc::new(RoleController::new(dyn_transport.clone(), tracker));
        let coordinator = Arc::new(MeshCoordinator::new(
            &config,
            dyn_transport,
            controller.clone(),
        ));
        Fixture {
            coordinator,
            controller,
            transport,
        }
    }

    fn noop_listener() -> StateChangeListener {
        Arc::new(|_: &PeerIdentity, _: SessionState| {})
    }

    fn discovered(peer: &PeerIdentity) -> TransportEvent {
        TransportEvent::PeerDiscovered {
            peer: peer.clone(),
            metadata: DiscoveryInfo::new(),
        }
    }

    fn state(peer: &PeerIdentity, state: SessionState) -> TransportEvent {
        TransportEvent::SessionStateChanged {
            peer: peer.clone(),
            state,
        }
    }

    #[tokio::test]
    async fn browsing_invites_discovered_peers() {
        let f = fixture(MeshConfig::default());
        f.controller.start_browsing(noop_listener()).await.unwrap();
        f.transport.take_calls();

        let peer = PeerIdentity::new("remote");
        f.coordinator.dispatch(discovered(&peer)).await;

        assert_eq!(
            f.transport.take_calls(),
            vec![TransportCall::Invite(peer, Duration::from_secs(10))]
        );
    }

    #[tokio::test]
    async fn idle_node_does_not_invite() {
        let f = fixture(MeshConfig::default());
        f.coordinator
            .dispatch(discovered(&PeerIdentity::new("remote")))
            .await;
        assert!(f.transport.take_calls().is_empty());
    }

    #[tokio::test]
    async fn connected_peer_is_not_reinvited() {
        let f = fixture(MeshConfig::default());
        f.controller.start_browsing(noop_listener()).await.unwrap();
        let peer = PeerIdentity::new("remote");
        f.coordinator
            .dispatch(state(&peer, SessionState::Connected))
            .await;
        f.transport.take_calls();

        f.coordinator.dispatch(discovered(&peer)).await;
        assert!(f.transport.take_calls().is_empty());
    }

    #[tokio::test]
    async fn pending_invite_is_not_repeated() {
        let f = fixture(MeshConfig::default());
        f.controller.start_browsing(noop_listener()).await.unwrap();
        let peer = PeerIdentity::new("remote");
        f.coordinator.dispatch(discovered(&peer)).await;
        f.coordinator
            .dispatch(state(&peer, SessionState::Connecting))
            .await;
        f.transport.take_calls();

        f.coordinator.dispatch(discovered(&peer)).await;
        assert!(f.transport.take_calls().is_empty());

        f.coordinator
            .dispatch(state(&peer, SessionState::NotConnected))
            .await;
        f.coordinator.dispatch(discovered(&peer)).await;
        assert_eq!(
            f.transport.take_calls(),
            vec![TransportCall::Invite(peer, Duration::from_secs(10))]
        );
    }

    #[tokio::test]
    async fn advertising_accepts_invitations() {
        let f = fixture(MeshConfig::default());
        f.controller
            .start_advertising(noop_listener())
            .await
            .unwrap();

        let (responder, rx) = InvitationResponder::channel();
        f.coordinator
            .dispatch(TransportEvent::InvitationReceived {
                peer: PeerIdentity::new("browser"),
                context: None,
                responder,
            })
            .await;
        assert!(rx.await.unwrap());
    }

    #[tokio::test]
    async fn declines_when_not_advertising_or_disabled() {
        let f = fixture(MeshConfig::default());
        let (responder, rx) = InvitationResponder::channel();
        f.coordinator
            .dispatch(TransportEvent::InvitationReceived {
                peer: PeerIdentity::new("browser"),
                context: Some(vec![1, 2, 3]),
                responder,
            })
            .await;
        assert!(!rx.await.unwrap());

        let f = fixture(MeshConfig {
            auto_accept: false,
            ..MeshConfig::default()
        });
        f.controller
            .start_advertising(noop_listener())
            .await
            .unwrap();
        let (responder, rx) = InvitationResponder::channel();
        f.coordinator
            .dispatch(TransportEvent::InvitationReceived {
                peer: PeerIdentity::new("browser"),
                context: None,
                responder,
            })
            .await;
        assert!(!rx.await.unwrap());
    }

    #[tokio::test]
    async fn late_connect_after_reset_is_dropped() {
        let f = fixture(MeshConfig::default());
        f.controller.start_browsing(noop_listener()).await.unwrap();
        let a = PeerIdentity::new("A");
        f.coordinator.dispatch(state(&a, SessionState::Connected)).await;
        f.controller.reset().await.unwrap();

        let b = PeerIdentity::new("B");
        f.coordinator.dispatch(state(&b, SessionState::Connected)).await;

        assert!(f.controller.tracker().connected_peers().is_empty());
    }

    #[tokio::test]
    async fn run_applies_events_in_order() {
        let f = fixture(MeshConfig::default());
        f.controller.start_browsing(noop_listener()).await.unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = f.coordinator.clone().spawn(rx);

        let a = PeerIdentity::new("A");
        let b = PeerIdentity::new("B");
        tx.send(state(&a, SessionState::Connected)).unwrap();
        tx.send(state(&b, SessionState::Connected)).unwrap();
        tx.send(state(&a, SessionState::NotConnected)).unwrap();
        tx.send(TransportEvent::PeerLost { peer: a.clone() }).unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(f.controller.tracker().connected_peers(), vec![b]);
    }
}

//! Listener interfaces: one per transport event kind, plus the
//! presentation-facing state-change callback.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::membership::{PeerIdentity, SessionState};
use crate::transport::{DiscoveryInfo, InvitationResponder};

/// Called after the tracker has applied a state change.
pub type StateChangeListener = Arc<dyn Fn(&PeerIdentity, SessionState) + Send + Sync>;

/// Browsing side: peers appearing and disappearing.
#[async_trait::async_trait]
pub trait DiscoveryListener: Send + Sync {
    async fn peer_discovered(&self, peer: PeerIdentity, metadata: DiscoveryInfo);

    async fn peer_lost(&self, peer: PeerIdentity);
}

/// Advertising side: invitations from browsing peers.
#[async_trait::async_trait]
pub trait AdvertisingListener: Send + Sync {
    async fn invitation_received(
        &self,
        peer: PeerIdentity,
        context: Option<Vec<u8>>,
        responder: InvitationResponder,
    );
}

/// Session membership changes.
#[async_trait::async_trait]
pub trait SessionListener: Send + Sync {
    async fn session_state_changed(&self, peer: PeerIdentity, state: SessionState);
}

/// A state change as seen by a presentation context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEvent {
    pub peer: PeerIdentity,
    pub state: SessionState,
}

/// Build a listener that forwards every notification onto `tx`.
///
/// Whoever drains the receiver is the presentation context; the tracker
/// never runs presentation code itself. Notifications sent after the
/// receiver is gone are dropped.
pub fn channel_listener(tx: mpsc::UnboundedSender<PeerEvent>) -> StateChangeListener {
    Arc::new(move |peer: &PeerIdentity, state: SessionState| {
        let _ = tx.send(PeerEvent {
            peer: peer.clone(),
            state,
        });
    })
}

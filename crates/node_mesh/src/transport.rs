//! Transport abstraction for peer discovery and sessions.
//!
//! The transport owns radio-level discovery, encryption and connection
//! management. This crate only sees the events it reports and the few
//! calls it accepts.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::membership::{PeerIdentity, SessionState};

/// Discovery metadata a peer attaches to its announcement.
pub type DiscoveryInfo = HashMap<String, String>;

/// Inbound events reported by a transport.
#[derive(Debug)]
pub enum TransportEvent {
    PeerDiscovered {
        peer: PeerIdentity,
        metadata: DiscoveryInfo,
    },
    PeerLost {
        peer: PeerIdentity,
    },
    InvitationReceived {
        peer: PeerIdentity,
        context: Option<Vec<u8>>,
        responder: InvitationResponder,
    },
    SessionStateChanged {
        peer: PeerIdentity,
        state: SessionState,
    },
}

/// One-shot reply handle for an incoming invitation.
///
/// Dropping it without responding counts as a decline.
#[derive(Debug)]
pub struct InvitationResponder {
    reply: oneshot::Sender<bool>,
}

impl InvitationResponder {
    /// Create a responder and the receiver the transport waits on.
    pub fn channel() -> (Self, oneshot::Receiver<bool>) {
        let (reply, rx) = oneshot::channel();
        (Self { reply }, rx)
    }

    pub fn respond(self, accept: bool) {
        // The inviter may already have given up on the invitation.
        let _ = self.reply.send(accept);
    }
}

/// Outbound calls into the transport.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Start scanning for advertised peers.
    async fn start_discovery(&self) -> anyhow::Result<()>;

    async fn stop_discovery(&self) -> anyhow::Result<()>;

    /// Start announcing the local peer so browsers can invite it.
    async fn start_announcing(&self) -> anyhow::Result<()>;

    async fn stop_announcing(&self) -> anyhow::Result<()>;

    /// Invite a discovered peer into the session. An invitation that is not
    /// answered within `timeout` is abandoned and reported as NotConnected.
    async fn invite(&self, peer: &PeerIdentity, timeout: Duration) -> anyhow::Result<()>;
}

/// A call recorded by [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    StartDiscovery,
    StopDiscovery,
    StartAnnouncing,
    StopAnnouncing,
    Invite(PeerIdentity, Duration),
}

impl TransportCall {
    pub fn is_start(&self) -> bool {
        matches!(self, Self::StartDiscovery | Self::StartAnnouncing)
    }
}

/// Mock transport for testing: records calls, optionally failing all of them.
pub struct MockTransport {
    calls: Mutex<Vec<TransportCall>>,
    fail: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    /// A transport whose every call is recorded and then fails.
    pub fn failing() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn take_calls(&self) -> Vec<TransportCall> {
        std::mem::take(&mut *self.calls.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn record(&self, call: TransportCall) -> anyhow::Result<()> {
        let name = format!("{call:?}");
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
        if self.fail {
            anyhow::bail!("mock transport refused {name}");
        }
        Ok(())
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn start_discovery(&self) -> anyhow::Result<()> {
        self.record(TransportCall::StartDiscovery)
    }

    async fn stop_discovery(&self) -> anyhow::Result<()> {
        self.record(TransportCall::StopDiscovery)
    }

    async fn start_announcing(&self) -> anyhow::Result<()> {
        self.record(TransportCall::StartAnnouncing)
    }

    async fn stop_announcing(&self) -> anyhow::Result<()> {
        self.record(TransportCall::StopAnnouncing)
    }

    async fn invite(&self, peer: &PeerIdentity, timeout: Duration) -> anyhow::Result<()> {
        self.record(TransportCall::Invite(peer.clone(), timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_records_calls_in_order() {
        let transport = MockTransport::new();
        let peer = PeerIdentity::new("node-1");
        transport.start_discovery().await.unwrap();
        transport
            .invite(&peer, Duration::from_secs(10))
            .await
            .unwrap();
        transport.stop_discovery().await.unwrap();

        let calls = transport.take_calls();
        assert_eq!(
            calls,
            vec![
                TransportCall::StartDiscovery,
                TransportCall::Invite(peer, Duration::from_secs(10)),
                TransportCall::StopDiscovery,
            ]
        );
        assert!(transport.take_calls().is_empty());
    }

    #[tokio::test]
    async fn failing_mock_errors_but_records() {
        let transport = MockTransport::failing();
        assert!(transport.start_announcing().await.is_err());
        assert_eq!(transport.take_calls(), vec![TransportCall::StartAnnouncing]);
    }

    #[tokio::test]
    async fn responder_delivers_answer() {
        let (responder, rx) = InvitationResponder::channel();
        responder.respond(true);
        assert!(rx.await.unwrap());
    }

    #[tokio::test]
    async fn dropped_responder_closes_channel() {
        let (responder, rx) = InvitationResponder::channel();
        drop(responder);
        assert!(rx.await.is_err());
    }
}

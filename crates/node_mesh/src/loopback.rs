//! In-process transport: nodes joined to the same hub discover, invite and
//! connect to each other without touching the network.
//!
//! Discovery is scoped by service name. An invitation is delivered to the
//! target's event channel and abandoned if no answer arrives within the
//! timeout, in which case the inviter sees NotConnected for that peer.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use crate::membership::{PeerIdentity, SessionState};
use crate::transport::{DiscoveryInfo, InvitationResponder, Transport, TransportEvent};

const PROP_SERVICE: &str = "service";

struct Node {
    service_name: String,
    events: mpsc::UnboundedSender<TransportEvent>,
    browsing: bool,
    announcing: bool,
    connected: HashSet<PeerIdentity>,
}

impl Node {
    fn send(&self, event: TransportEvent) {
        // A node whose event pump has stopped just misses the event.
        let _ = self.events.send(event);
    }
}

#[derive(Default)]
pub struct LoopbackHub {
    nodes: Mutex<HashMap<PeerIdentity, Node>>,
}

impl LoopbackHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach a node. Its transport events arrive on the returned receiver.
    pub fn join(
        self: &Arc<Self>,
        service_name: &str,
        identity: PeerIdentity,
    ) -> (LoopbackTransport, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.nodes().insert(
            identity.clone(),
            Node {
                service_name: service_name.to_string(),
                events: tx,
                browsing: false,
                announcing: false,
                connected: HashSet::new(),
            },
        );
        debug!("loopback: {identity} joined service {service_name}");
        let transport = LoopbackTransport {
            hub: self.clone(),
            local: identity,
        };
        (transport, rx)
    }

    pub fn node_count(&self) -> usize {
        self.nodes().len()
    }

    fn nodes(&self) -> MutexGuard<'_, HashMap<PeerIdentity, Node>> {
        self.nodes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn leave(&self, identity: &PeerIdentity) {
        let mut nodes = self.nodes();
        let Some(node) = nodes.remove(identity) else {
            return;
        };
        for other in nodes.values_mut() {
            if other.service_name != node.service_name {
                continue;
            }
            if node.announcing && other.browsing {
                other.send(TransportEvent::PeerLost {
                    peer: identity.clone(),
                });
            }
            if other.connected.remove(identity) {
                other.send(TransportEvent::SessionStateChanged {
                    peer: identity.clone(),
                    state: SessionState::NotConnected,
                });
            }
        }
        debug!("loopback: {identity} left");
    }

    fn complete_invite(&self, inviter: &PeerIdentity, invitee: &PeerIdentity, accepted: bool) {
        let mut nodes = self.nodes();
        if !nodes.contains_key(inviter) {
            debug!("loopback: {inviter} left before {invitee} answered");
            return;
        }
        if !accepted || !nodes.contains_key(invitee) {
            if let Some(node) = nodes.get(inviter) {
                node.send(TransportEvent::SessionStateChanged {
                    peer: invitee.clone(),
                    state: SessionState::NotConnected,
                });
            }
            return;
        }

        for (this, other) in [(inviter, invitee), (invitee, inviter)] {
            if let Some(node) = nodes.get_mut(this) {
                if this == invitee {
                    node.send(TransportEvent::SessionStateChanged {
                        peer: other.clone(),
                        state: SessionState::Connecting,
                    });
                }
                node.connected.insert(other.clone());
                node.send(TransportEvent::SessionStateChanged {
                    peer: other.clone(),
                    state: SessionState::Connected,
                });
            }
        }
    }
}

/// One node's handle onto a [`LoopbackHub`]. Dropping it leaves the hub.
pub struct LoopbackTransport {
    hub: Arc<LoopbackHub>,
    local: PeerIdentity,
}

impl LoopbackTransport {
    pub fn local_peer(&self) -> &PeerIdentity {
        &self.local
    }

    fn discovery_info(service_name: &str) -> DiscoveryInfo {
        DiscoveryInfo::from([(PROP_SERVICE.to_string(), service_name.to_string())])
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        self.hub.leave(&self.local);
    }
}

#[async_trait::async_trait]
impl Transport for LoopbackTransport {
    async fn start_discovery(&self) -> anyhow::Result<()> {
        let mut nodes = self.hub.nodes();
        let node = nodes
            .get_mut(&self.local)
            .ok_or_else(|| anyhow::anyhow!("{} is not on the hub", self.local))?;
        node.browsing = true;
        let service = node.service_name.clone();

        let announcers: Vec<PeerIdentity> = nodes
            .iter()
            .filter(|(id, n)| **id != self.local && n.announcing && n.service_name == service)
            .map(|(id, _)| id.clone())
            .collect();
        if let Some(node) = nodes.get(&self.local) {
            for peer in announcers {
                node.send(TransportEvent::PeerDiscovered {
                    peer,
                    metadata: Self::discovery_info(&service),
                });
            }
        }
        Ok(())
    }

    async fn stop_discovery(&self) -> anyhow::Result<()> {
        if let Some(node) = self.hub.nodes().get_mut(&self.local) {
            node.browsing = false;
        }
        Ok(())
    }

    async fn start_announcing(&self) -> anyhow::Result<()> {
        let mut nodes = self.hub.nodes();
        let node = nodes
            .get_mut(&self.local)
            .ok_or_else(|| anyhow::anyhow!("{} is not on the hub", self.local))?;
        node.announcing = true;
        let service = node.service_name.clone();

        for (id, other) in nodes.iter() {
            if *id != self.local && other.browsing && other.service_name == service {
                other.send(TransportEvent::PeerDiscovered {
                    peer: self.local.clone(),
                    metadata: Self::discovery_info(&service),
                });
            }
        }
        Ok(())
    }

    async fn stop_announcing(&self) -> anyhow::Result<()> {
        let mut nodes = self.hub.nodes();
        let Some(node) = nodes.get_mut(&self.local) else {
            return Ok(());
        };
        let was_announcing = std::mem::replace(&mut node.announcing, false);
        let service = node.service_name.clone();

        if was_announcing {
            for (id, other) in nodes.iter() {
                if *id != self.local && other.browsing && other.service_name == service {
                    other.send(TransportEvent::PeerLost {
                        peer: self.local.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    async fn invite(&self, peer: &PeerIdentity, timeout: Duration) -> anyhow::Result<()> {
        let reply = {
            let nodes = self.hub.nodes();
            let target = nodes
                .get(peer)
                .filter(|n| n.announcing)
                .ok_or_else(|| anyhow::anyhow!("{peer} is not advertising"))?;

            let (responder, reply) = InvitationResponder::channel();
            target.send(TransportEvent::InvitationReceived {
                peer: self.local.clone(),
                context: None,
                responder,
            });
            if let Some(node) = nodes.get(&self.local) {
                node.send(TransportEvent::SessionStateChanged {
                    peer: peer.clone(),
                    state: SessionState::Connecting,
                });
            }
            reply
        };

        let hub = self.hub.clone();
        let inviter = self.local.clone();
        let invitee = peer.clone();
        tokio::spawn(async move {
            let accepted = matches!(tokio::time::timeout(timeout, reply).await, Ok(Ok(true)));
            if !accepted {
                debug!("loopback: invitation {inviter} -> {invitee} not accepted");
            }
            hub.complete_invite(&inviter, &invitee, accepted);
        });
        Ok(())
    }
}

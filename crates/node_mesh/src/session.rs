//! Session tracker: the authoritative set of connected peers.
//!
//! Membership only changes on session state events. Every event is applied
//! against the last state seen for that peer, so replays and duplicates are
//! absorbed without touching the set or waking the listener.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::listeners::StateChangeListener;
use crate::membership::{PeerIdentity, SessionState};
use crate::transport::Transport;

#[derive(Default)]
struct TrackerState {
    /// Connected peers in order of first connection.
    connected: Vec<PeerIdentity>,
    /// Last state seen per peer. Absent means NotConnected.
    last_state: HashMap<PeerIdentity, SessionState>,
}

pub struct SessionTracker {
    local: PeerIdentity,
    transport: Arc<dyn Transport>,
    state: Mutex<TrackerState>,
    listener: Mutex<Option<StateChangeListener>>,
}

impl SessionTracker {
    pub fn new(local: PeerIdentity, transport: Arc<dyn Transport>) -> Self {
        Self {
            local,
            transport,
            state: Mutex::new(TrackerState::default()),
            listener: Mutex::new(None),
        }
    }

    pub fn local_peer(&self) -> &PeerIdentity {
        &self.local
    }

    /// Install the callback invoked after each applied state change.
    /// Replaces any previous listener.
    pub fn register_listener(&self, listener: StateChangeListener) {
        *lock(&self.listener) = Some(listener);
    }

    pub fn clear_listener(&self) {
        *lock(&self.listener) = None;
    }

    /// Apply a session state event. Returns true if it changed anything.
    ///
    /// The listener runs after the mutation with no lock held, so it may
    /// read the tracker back.
    pub fn on_state_change(&self, peer: &PeerIdentity, new_state: SessionState) -> bool {
        if *peer == self.local {
            debug!("ignoring session event about local peer {peer}");
            return false;
        }

        {
            let mut state = lock(&self.state);
            let previous = state
                .last_state
                .get(peer)
                .copied()
                .unwrap_or(SessionState::NotConnected);
            if previous == new_state {
                return false;
            }

            match new_state {
                SessionState::Connected => {
                    if !state.connected.contains(peer) {
                        state.connected.push(peer.clone());
                    }
                    state.last_state.insert(peer.clone(), new_state);
                }
                SessionState::NotConnected => {
                    state.connected.retain(|p| p != peer);
                    state.last_state.remove(peer);
                }
                SessionState::Connecting => {
                    state.last_state.insert(peer.clone(), new_state);
                }
            }
        }

        debug!("session: {peer} is {new_state}");

        let listener = lock(&self.listener).clone();
        if let Some(listener) = listener {
            listener(peer, new_state);
        }
        true
    }

    /// Snapshot of connected peers, in connection order.
    pub fn connected_peers(&self) -> Vec<PeerIdentity> {
        lock(&self.state).connected.clone()
    }

    pub fn connected_count(&self) -> usize {
        lock(&self.state).connected.len()
    }

    pub fn is_connected(&self, peer: &PeerIdentity) -> bool {
        lock(&self.state).connected.contains(peer)
    }

    pub fn state_of(&self, peer: &PeerIdentity) -> SessionState {
        lock(&self.state)
            .last_state
            .get(peer)
            .copied()
            .unwrap_or(SessionState::NotConnected)
    }

    /// Forget every peer and stop discovery. No per-peer notifications.
    pub async fn reset(&self) -> Result<()> {
        let dropped = {
            let mut state = lock(&self.state);
            let dropped = state.connected.len();
            *state = TrackerState::default();
            dropped
        };
        info!("session reset, dropped {dropped} connected peers");

        self.transport
            .stop_discovery()
            .await
            .context("stop discovery on reset")
    }
}

/// Tracker state stays consistent across a panicking listener, so a
/// poisoned lock is still usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

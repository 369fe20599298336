//! Role controller: Idle, Browsing or Advertising, never both.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::listeners::StateChangeListener;
use crate::membership::{PeerIdentity, SessionState};
use crate::session::SessionTracker;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Idle,
    Browsing,
    Advertising,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Browsing => write!(f, "browsing"),
            Self::Advertising => write!(f, "advertising"),
        }
    }
}

#[derive(Debug, Error)]
pub enum RoleError {
    #[error("cannot start {requested} while {active}; reset first")]
    AlreadyActive { active: Role, requested: Role },
    #[error("transport call failed: {0:#}")]
    Transport(anyhow::Error),
}

pub struct RoleController {
    transport: Arc<dyn Transport>,
    tracker: Arc<SessionTracker>,
    role: Mutex<Role>,
}

impl RoleController {
    pub fn new(transport: Arc<dyn Transport>, tracker: Arc<SessionTracker>) -> Self {
        Self {
            transport,
            tracker,
            role: Mutex::new(Role::Idle),
        }
    }

    pub async fn role(&self) -> Role {
        *self.role.lock().await
    }

    pub fn tracker(&self) -> &Arc<SessionTracker> {
        &self.tracker
    }

    /// Seek peers and invite them. Fails if currently advertising.
    pub async fn start_browsing(&self, listener: StateChangeListener) -> Result<(), RoleError> {
        self.start(Role::Browsing, listener).await
    }

    /// Announce the local peer and accept invitations. Fails if currently browsing.
    pub async fn start_advertising(&self, listener: StateChangeListener) -> Result<(), RoleError> {
        self.start(Role::Advertising, listener).await
    }

    async fn start(&self, target: Role, listener: StateChangeListener) -> Result<(), RoleError> {
        let mut role = self.role.lock().await;
        if *role == target {
            debug!("already {target}, replacing listener");
            self.tracker.register_listener(listener);
            return Ok(());
        }
        if *role != Role::Idle {
            return Err(RoleError::AlreadyActive {
                active: *role,
                requested: target,
            });
        }

        let started = match target {
            Role::Browsing => self.transport.start_discovery().await,
            Role::Advertising => self.transport.start_announcing().await,
            Role::Idle => Ok(()),
        };
        started.map_err(RoleError::Transport)?;

        // Session events wait on the role lock, so none can slip in before this.
        self.tracker.register_listener(listener);
        *role = target;
        info!("started {target}");
        Ok(())
    }

    /// Apply a session event unless the node is idle. NotConnected always
    /// applies. Holds the role lock throughout, so a concurrent reset runs
    /// entirely before or after.
    pub async fn apply_session_event(&self, peer: &PeerIdentity, state: SessionState) -> bool {
        let role = self.role.lock().await;
        if state != SessionState::NotConnected && *role == Role::Idle {
            debug!("idle, dropping {state} for {peer}");
            return false;
        }
        self.tracker.on_state_change(peer, state)
    }

    /// Stop advertising and browsing, then clear the session.
    ///
    /// Only stop calls reach the transport. Every step runs even if an
    /// earlier one fails; the first failure is returned.
    pub async fn reset(&self) -> Result<(), RoleError> {
        let mut role = self.role.lock().await;
        let previous = std::mem::replace(&mut *role, Role::Idle);

        let announcing = self.transport.stop_announcing().await;
        if announcing.is_ok() {
            info!("stopped advertising");
        }
        let session = self.tracker.reset().await;
        if session.is_ok() {
            info!("stopped browsing");
        }
        debug!("reset from {previous}");

        for result in [&announcing, &session] {
            if let Err(e) = result {
                warn!("reset: {e:#}");
            }
        }
        announcing.and(session).map_err(RoleError::Transport)
    }
}

//! Peer discovery, invitations and session membership over a pluggable transport.
//!
//! A node either browses (finds peers and invites them) or advertises
//! (announces itself and accepts invitations). Connected peers are tracked
//! by [`SessionTracker`]; transport events reach it through [`MeshCoordinator`].

pub mod config;
pub mod coordinator;
pub mod listeners;
pub mod loopback;
pub mod membership;
pub mod role;
pub mod session;
pub mod transport;

pub use config::{ConfigError, MeshConfig};
pub use coordinator::MeshCoordinator;
pub use listeners::{channel_listener, PeerEvent, StateChangeListener};
pub use loopback::{LoopbackHub, LoopbackTransport};
pub use membership::{PeerIdentity, SessionState};
pub use role::{Role, RoleController, RoleError};
pub use session::SessionTracker;
pub use transport::{InvitationResponder, Transport, TransportEvent};

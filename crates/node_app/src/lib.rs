//! Node wiring: configuration, node assembly on a transport hub, peer grid.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use node_mesh::{
    LoopbackHub, MeshConfig, MeshCoordinator, PeerIdentity, Role, RoleController, RoleError,
    SessionTracker, StateChangeListener, Transport,
};
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Browse,
    Advertise,
}

impl NodeRole {
    pub fn opposite(self) -> Self {
        match self {
            Self::Browse => Self::Advertise,
            Self::Advertise => Self::Browse,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub mesh: MeshConfig,
    #[serde(default = "default_role")]
    pub role: NodeRole,
    /// Loopback counterparts started with the opposite role.
    #[serde(default = "default_demo_peers")]
    pub demo_peers: usize,
    #[serde(default = "default_run_secs")]
    pub run_secs: u64,
}

fn default_role() -> NodeRole {
    NodeRole::Browse
}
fn default_demo_peers() -> usize {
    3
}
fn default_run_secs() -> u64 {
    5
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mesh: MeshConfig::default(),
            role: default_role(),
            demo_peers: default_demo_peers(),
            run_secs: default_run_secs(),
        }
    }
}

/// Read `path` if it exists, otherwise fall back to defaults.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let config = if path.exists() {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parse {}", path.display()))?
    } else {
        AppConfig::default()
    };
    config.mesh.validate().context("invalid [mesh] config")?;
    Ok(config)
}

/// A fully wired mesh node: tracker, role controller and an event pump
/// draining its transport.
pub struct MeshNode {
    controller: Arc<RoleController>,
    pump: JoinHandle<()>,
}

impl MeshNode {
    pub fn on_hub(hub: &Arc<LoopbackHub>, config: &MeshConfig) -> Result<Self> {
        config.validate().context("invalid mesh config")?;
        let local = config.local_identity();
        let (transport, events) = hub.join(&config.service_name, local.clone());
        let transport: Arc<dyn Transport> = Arc::new(transport);

        let tracker = Arc::new(SessionTracker::new(local, transport.clone()));
        let controller = Arc::new(RoleController::new(transport.clone(), tracker));
        let coordinator = Arc::new(MeshCoordinator::new(config, transport, controller.clone()));
        let pump = coordinator.spawn(events);

        Ok(Self { controller, pump })
    }

    pub fn local_peer(&self) -> &PeerIdentity {
        self.tracker().local_peer()
    }

    pub fn tracker(&self) -> &Arc<SessionTracker> {
        self.controller.tracker()
    }

    pub async fn role(&self) -> Role {
        self.controller.role().await
    }

    pub async fn start(&self, role: NodeRole, listener: StateChangeListener) -> Result<(), RoleError> {
        match role {
            NodeRole::Browse => self.controller.start_browsing(listener).await,
            NodeRole::Advertise => self.controller.start_advertising(listener).await,
        }
    }

    pub async fn reset(&self) -> Result<(), RoleError> {
        self.controller.reset().await
    }
}

impl Drop for MeshNode {
    fn drop(&mut self) {
        // The pump keeps the transport alive, so it never sees its channel close.
        self.pump.abort();
        info!("node {} stopped", self.local_peer());
    }
}

/// Render connected peers as a fixed-width text grid, `columns` per row.
pub fn render_peer_grid(peers: &[PeerIdentity], columns: usize) -> String {
    if peers.is_empty() {
        return "(no connected peers)".into();
    }
    let width = peers
        .iter()
        .map(|p| p.display_name().len())
        .max()
        .unwrap_or(0);
    peers
        .chunks(columns.max(1))
        .map(|row| {
            row.iter()
                .map(|p| format!("[{:<width$}]", p.display_name()))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use node_app::{load_config, render_peer_grid, MeshNode, NodeRole};
use node_mesh::{channel_listener, LoopbackHub, MeshConfig, PeerIdentity, SessionState};

const GRID_COLUMNS: usize = 4;

async fn start_counterparts(
    hub: &Arc<LoopbackHub>,
    mesh: &MeshConfig,
    role: NodeRole,
    count: usize,
) -> Result<Vec<MeshNode>> {
    let mut nodes = Vec::with_capacity(count);
    for i in 0..count {
        let config = MeshConfig {
            display_name: format!("demo-peer-{i}"),
            ..mesh.clone()
        };
        let node = MeshNode::on_hub(hub, &config)?;
        node.start(role, Arc::new(|_: &PeerIdentity, _: SessionState| {}))
            .await
            .with_context(|| format!("start demo peer {i}"))?;
        nodes.push(node);
    }
    Ok(nodes)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = load_config(&PathBuf::from("meshlink.toml"))?;

    tracing::info!("meshlink starting...");
    tracing::info!("service    = {}", config.mesh.service_name);
    tracing::info!("name       = {}", config.mesh.display_name);
    tracing::info!("role       = {:?}", config.role);
    tracing::info!("demo_peers = {}", config.demo_peers);

    let hub = LoopbackHub::new();
    let node = MeshNode::on_hub(&hub, &config.mesh)?;
    let (tx, mut rx) = mpsc::unbounded_channel();

    // Advertisers must be visible before browsers start scanning.
    let counterpart_role = config.role.opposite();
    let _counterparts = if config.role == NodeRole::Browse {
        let peers =
            start_counterparts(&hub, &config.mesh, counterpart_role, config.demo_peers).await?;
        node.start(config.role, channel_listener(tx)).await?;
        peers
    } else {
        node.start(config.role, channel_listener(tx)).await?;
        start_counterparts(&hub, &config.mesh, counterpart_role, config.demo_peers).await?
    };

    let deadline = tokio::time::sleep(Duration::from_secs(config.run_secs));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            Some(event) = rx.recv() => {
                tracing::info!("{} is {}", event.peer, event.state);
                let peers = node.tracker().connected_peers();
                println!("{}\n", render_peer_grid(&peers, GRID_COLUMNS));
            }
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
        }
    }

    node.reset().await?;
    tracing::info!(
        "reset complete, {} connected peers",
        node.tracker().connected_count()
    );
    Ok(())
}

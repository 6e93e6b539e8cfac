//! Arena Game Server
//!
//! Loads the world assets, then serves WebSocket clients until Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use arena::{
    game::{ground::TriangleMesh, scenery::StaticLayout},
    GameServer, ServerConfig, VERSION,
};

/// Half extent of the fallback flat ground; covers the built-in arena.
const FLAT_GROUND_HALF_EXTENT: f32 = 200.0;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env().context("reading ARENA_* configuration")?;

    info!("Arena Server v{}", VERSION);
    info!("Tick Rate: {} Hz", config.world.tick_rate);
    info!("Max Players per World: {}", config.world.max_players);

    let mesh = match &config.mesh_path {
        Some(path) => TriangleMesh::load(path)
            .with_context(|| format!("loading ground mesh {}", path.display()))?,
        None => {
            warn!("ARENA_MESH_PATH not set, using flat ground");
            TriangleMesh::flat_ground(FLAT_GROUND_HALF_EXTENT, 0.0)
        }
    };

    let layout = match &config.scenery_path {
        Some(path) => StaticLayout::load(path)
            .with_context(|| format!("loading scenery {}", path.display()))?,
        None => {
            info!("ARENA_SCENERY_PATH not set, using built-in arena");
            StaticLayout::default_arena()
        }
    };

    info!(
        "World assets: {} triangles, {} scenery objects, {} spawn points",
        mesh.triangle_count(),
        layout.objects.len(),
        layout.spawn_points.len()
    );

    let server = Arc::new(GameServer::new(config, mesh, Arc::new(layout)));

    let serving = server.clone();
    let mut handle = tokio::spawn(async move { serving.run().await });

    tokio::select! {
        result = &mut handle => {
            result.context("server task panicked")??;
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
            server.shutdown();
        }
    }

    handle.await.context("server task panicked")??;
    info!("Server stopped");
    Ok(())
}

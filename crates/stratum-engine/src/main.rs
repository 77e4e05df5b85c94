//! Engine binary for the Stratum field store.
//!
//! Brings one configured field grid up, seeds it, and keeps it open until
//! Ctrl-C, then flushes and disposes it.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `stratum-config.yaml` (defaults if absent)
//! 2. Initialize structured logging (tracing)
//! 3. Connect the persistence gateway, falling back to memory-only
//! 4. Open the grid and register it
//! 5. Import the sparse overlay seed file, if configured
//! 6. Materialize every layer, if configured, and flush
//! 7. Wait for Ctrl-C, then close every registered grid

mod error;
mod seed;

use std::path::Path;

use futures::future::try_join_all;
use stratum_core::{GridRegistry, StratumConfig};
use stratum_field::FieldGrid;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;

/// Configuration file looked up in the working directory.
const CONFIG_PATH: &str = "stratum-config.yaml";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if any startup step fails or a grid does not close
/// cleanly.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let config = StratumConfig::load_or_default(Path::new(CONFIG_PATH)).map_err(EngineError::from)?;

    // 2. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_target(true)
        .init();

    info!(
        cells = ?config.grid.cells,
        spacing = config.grid.spacing,
        fields = ?config.grid.fields,
        dense_width = config.dense.width,
        dense_height = config.dense.height,
        quadrant_count = config.dense.quadrant_count,
        "stratum-engine starting"
    );

    let registry = GridRegistry::new();
    run(&config, &registry).await?;

    // 7. Serve until interrupted.
    info!("running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await.map_err(EngineError::from)?;
    info!("shutdown requested");
    registry.close_all().await.map_err(EngineError::from)?;

    info!("stratum-engine shutdown complete");
    Ok(())
}

/// Startup steps 3 through 6.
async fn run(config: &StratumConfig, registry: &GridRegistry) -> Result<(), EngineError> {
    // 3. Connect the persistence gateway.
    let gateway = stratum_core::connect_gateway(&config.infrastructure).await;

    // 4. Open and register the grid.
    let grid = stratum_core::open_grid_with(config, gateway).await?;
    let id = registry.register(grid.clone()).await?;
    info!(grid = %id, backend = grid.backend(), "grid ready");

    // 5. Seed the sparse overlay.
    if let Some(path) = &config.seed.sparse_path {
        let cells = seed::load_seed(path)?;
        let total = cells.len();
        let imported = grid.import_sparse(cells).await?;
        info!(path = %path.display(), total, imported, "sparse overlay seeded");
    }

    // 6. Pre-materialize and flush.
    if config.seed.materialize_all {
        materialize_all(&grid).await?;
    }
    let report = grid.flush().await?;
    info!(
        quadrants = report.quadrants,
        layers = report.layers,
        "startup flush complete"
    );
    Ok(())
}

/// Materialize every layer of `grid` concurrently.
async fn materialize_all(grid: &FieldGrid) -> Result<(), EngineError> {
    let depth = grid.geometry().await.cells_z;
    let layers = (0..depth).filter_map(|z| i32::try_from(z).ok());
    let built = try_join_all(layers.map(|z| grid.ensure_dense_layer(z))).await?;
    info!(layers = built.len(), "layers materialized");
    Ok(())
}

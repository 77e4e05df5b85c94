//! Integration tests for the grid registry.

#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::float_cmp
)]

use std::sync::Arc;

use stratum_core::{GridRegistry, RegistryError, StratumConfig, open_grid_with};
use stratum_db::{MemoryGateway, PersistenceGateway, Substore};
use stratum_field::FieldGrid;
use stratum_types::FieldMap;

fn config() -> StratumConfig {
    let mut config = StratumConfig::default();
    config.grid.cells = [4, 4, 2];
    config.dense.width = 64;
    config.dense.height = 64;
    config.infrastructure.dragonfly_url = String::new();
    config
}

async fn open(gateway: Option<Arc<dyn PersistenceGateway>>) -> FieldGrid {
    open_grid_with(&config(), gateway).await.expect("grid opens")
}

#[tokio::test]
async fn register_get_and_remove() {
    let registry = GridRegistry::new();
    let grid = open(None).await;
    let id = registry.register(grid.clone()).await.unwrap();

    assert_eq!(registry.ids().await, vec![id]);
    assert_eq!(registry.get(id).await.map(|g| g.id()), Some(id));

    let removed = registry.remove(id).await.expect("registered");
    assert_eq!(removed.id(), id);
    assert!(registry.is_empty().await);
    // Removal leaves the grid usable.
    assert!(!removed.is_disposed());
}

#[tokio::test]
async fn duplicate_registration_is_rejected() {
    let registry = GridRegistry::new();
    let grid = open(None).await;
    registry.register(grid.clone()).await.unwrap();
    let err = registry.register(grid).await.unwrap_err();
    assert!(matches!(err, RegistryError::Duplicate(_)));
    assert_eq!(registry.len().await, 1);
}

#[tokio::test]
async fn close_all_flushes_and_disposes() {
    let memory = Arc::new(MemoryGateway::new());
    let gateway: Arc<dyn PersistenceGateway> = memory.clone();
    let registry = GridRegistry::new();
    let grid = open(Some(gateway)).await;
    registry.register(grid.clone()).await.unwrap();

    let values = FieldMap::from([("O2".to_owned(), 3.0)]);
    grid.set_dense_from_cell(1, 0, 0, &values).await.unwrap();
    assert!(grid.pending_quadrants().await > 0);

    registry.close_all().await.unwrap();
    assert!(registry.is_empty().await);
    assert!(grid.is_disposed());
    assert!(memory.keys(Substore::OverlayMeta).await.contains(&"1".to_owned()));
}

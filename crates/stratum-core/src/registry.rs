//! Explicit registry of open grids.
//!
//! Grids are looked up by [`GridId`] through a value the caller owns and
//! passes around, rather than through a process-wide table. Removing a grid
//! from the registry does not dispose it; [`GridRegistry::close_all`]
//! flushes and disposes everything still registered.

use std::collections::BTreeMap;

use stratum_field::{FieldError, FieldGrid};
use stratum_types::GridId;
use tokio::sync::RwLock;

/// Errors from registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// A grid with this id is already registered.
    #[error("grid {0} is already registered")]
    Duplicate(GridId),

    /// Closing one or more grids failed. Every grid was still disposed.
    #[error("{} grid(s) failed to close cleanly", failures.len())]
    Close {
        /// Each failing grid with its error.
        failures: Vec<(GridId, FieldError)>,
    },
}

/// Open grids by id.
#[derive(Debug, Default)]
pub struct GridRegistry {
    grids: RwLock<BTreeMap<GridId, FieldGrid>>,
}

impl GridRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `grid` under its own id.
    pub async fn register(&self, grid: FieldGrid) -> Result<GridId, RegistryError> {
        let id = grid.id();
        let mut grids = self.grids.write().await;
        if grids.contains_key(&id) {
            return Err(RegistryError::Duplicate(id));
        }
        grids.insert(id, grid);
        tracing::debug!(grid = %id, "grid registered");
        Ok(id)
    }

    /// Handle to a registered grid.
    pub async fn get(&self, id: GridId) -> Option<FieldGrid> {
        self.grids.read().await.get(&id).cloned()
    }

    /// Ids of every registered grid, oldest first.
    pub async fn ids(&self) -> Vec<GridId> {
        self.grids.read().await.keys().copied().collect()
    }

    /// Number of registered grids.
    pub async fn len(&self) -> usize {
        self.grids.read().await.len()
    }

    /// Whether no grid is registered.
    pub async fn is_empty(&self) -> bool {
        self.grids.read().await.is_empty()
    }

    /// Unregister a grid and hand it back.
    pub async fn remove(&self, id: GridId) -> Option<FieldGrid> {
        self.grids.write().await.remove(&id)
    }

    /// Flush and dispose every registered grid, emptying the registry.
    pub async fn close_all(&self) -> Result<(), RegistryError> {
        let grids = std::mem::take(&mut *self.grids.write().await);
        let mut failures = Vec::new();
        for (id, grid) in grids {
            match grid.close().await {
                Ok(report) => {
                    tracing::info!(grid = %id, quadrants = report.quadrants, "grid closed");
                }
                Err(e) => {
                    tracing::error!(grid = %id, error = %e, "grid did not close cleanly");
                    failures.push((id, e));
                }
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(RegistryError::Close { failures })
        }
    }
}

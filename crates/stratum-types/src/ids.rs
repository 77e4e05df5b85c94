//! Type-safe identifier wrapper around [`Uuid`].
//!
//! Grids are registered with the runtime layer under a [`GridId`]. IDs use
//! UUID v7 (time-ordered) so registry listings sort by creation time.

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Unique identifier for a field grid instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct GridId(pub Uuid);

impl GridId {
    /// Create a new identifier using UUID v7 (time-ordered).
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Return the inner [`Uuid`] value.
    pub const fn into_inner(self) -> Uuid {
        self.0
    }
}

impl Default for GridId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for GridId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for GridId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl From<GridId> for Uuid {
    fn from(id: GridId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_time_ordered() {
        let first = GridId::new();
        let second = GridId::new();
        assert!(first <= second);
        assert_ne!(first, second);
    }

    #[test]
    fn display_matches_uuid() {
        let uuid = Uuid::now_v7();
        let id = GridId::from(uuid);
        assert_eq!(id.to_string(), uuid.to_string());
        assert_eq!(Uuid::from(id), uuid);
    }
}

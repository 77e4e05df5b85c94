//! In-process gateway.
//!
//! Backs memory-only grids and the test suites. Values live in a
//! [`RwLock`]-guarded map keyed by `(substore, key)`; nothing survives the
//! process.

use std::collections::HashMap;

use futures::FutureExt as _;
use futures::future::BoxFuture;
use tokio::sync::RwLock;

use crate::error::DbError;
use crate::gateway::{PersistenceGateway, Substore};

/// Map-backed [`PersistenceGateway`].
#[derive(Debug, Default)]
pub struct MemoryGateway {
    entries: RwLock<HashMap<(Substore, String), Vec<u8>>>,
}

impl MemoryGateway {
    /// Create an empty gateway.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored values across all substores.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the gateway holds no values.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Keys stored in `store`, sorted.
    pub async fn keys(&self, store: Substore) -> Vec<String> {
        let entries = self.entries.read().await;
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|(s, _)| *s == store)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Remove a value, returning it if present.
    pub async fn remove(&self, store: Substore, key: &str) -> Option<Vec<u8>> {
        self.entries.write().await.remove(&(store, key.to_owned()))
    }
}

impl PersistenceGateway for MemoryGateway {
    fn get<'a>(
        &'a self,
        store: Substore,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<Vec<u8>>, DbError>> {
        async move {
            let entries = self.entries.read().await;
            Ok(entries.get(&(store, key.to_owned())).cloned())
        }
        .boxed()
    }

    fn put<'a>(
        &'a self,
        store: Substore,
        key: &'a str,
        value: &'a [u8],
    ) -> BoxFuture<'a, Result<(), DbError>> {
        async move {
            self.entries
                .write()
                .await
                .insert((store, key.to_owned()), value.to_vec());
            Ok(())
        }
        .boxed()
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get() {
        let gateway = MemoryGateway::new();
        assert!(gateway.is_empty().await);

        gateway.put(Substore::Overlay, "0,1", b"abcd").await.unwrap();
        let value = gateway.get(Substore::Overlay, "0,1").await.unwrap();
        assert_eq!(value.as_deref(), Some(&b"abcd"[..]));

        // Same key in another substore is independent.
        assert!(gateway.get(Substore::Base, "0,1").await.unwrap().is_none());
        assert_eq!(gateway.len().await, 1);
    }

    #[tokio::test]
    async fn keys_are_scoped_and_sorted() {
        let gateway = MemoryGateway::new();
        gateway.put(Substore::Overlay, "1,0", b"").await.unwrap();
        gateway.put(Substore::Overlay, "0,3", b"").await.unwrap();
        gateway.put(Substore::Meta, "schema", b"{}").await.unwrap();

        assert_eq!(gateway.keys(Substore::Overlay).await, vec!["0,3", "1,0"]);
        assert_eq!(gateway.keys(Substore::Meta).await, vec!["schema"]);

        assert!(gateway.remove(Substore::Overlay, "0,3").await.is_some());
        assert_eq!(gateway.keys(Substore::Overlay).await, vec!["1,0"]);
    }
}

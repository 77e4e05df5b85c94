//! The persistence gateway contract.
//!
//! A gateway is an opaque key/value store partitioned into five logical
//! [`Substore`]s. Both operations may fail transiently; callers own retry
//! and verification policy.

use std::fmt;

use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::DbError;

/// Logical partitions of the key/value store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Substore {
    /// Layout, schema record, and per-layer nucleus.
    Meta,
    /// Quantized distance samples per layer.
    Base,
    /// Zero templates keyed by schema id.
    BaseZero,
    /// Quadrant field buffers keyed by `<layer>,<quadrant>`.
    Overlay,
    /// Per-layer overlay metadata.
    OverlayMeta,
}

impl Substore {
    /// Every substore, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Meta,
        Self::Base,
        Self::BaseZero,
        Self::Overlay,
        Self::OverlayMeta,
    ];

    /// Stable name used in composite storage keys.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Meta => "meta",
            Self::Base => "base",
            Self::BaseZero => "base-zero",
            Self::Overlay => "overlay",
            Self::OverlayMeta => "overlay-meta",
        }
    }
}

impl fmt::Display for Substore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque key/value store behind the field engine.
///
/// Implementations must be cheap to share (`Arc<dyn PersistenceGateway>`)
/// and safe to call from spawned flush tasks.
pub trait PersistenceGateway: Send + Sync {
    /// Read the value at `key` in `store`. `Ok(None)` means absent.
    fn get<'a>(
        &'a self,
        store: Substore,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<Vec<u8>>, DbError>>;

    /// Write `value` at `key` in `store`, replacing any previous value.
    fn put<'a>(
        &'a self,
        store: Substore,
        key: &'a str,
        value: &'a [u8],
    ) -> BoxFuture<'a, Result<(), DbError>>;

    /// Short human-readable backend name for logs.
    fn backend(&self) -> &'static str;
}

/// Read and deserialize a JSON record.
///
/// # Errors
///
/// Returns [`DbError::Serialization`] if the stored bytes are not valid JSON
/// for `T`, or the gateway's own error if the read fails.
pub async fn get_json<T: DeserializeOwned>(
    gateway: &dyn PersistenceGateway,
    store: Substore,
    key: &str,
) -> Result<Option<T>, DbError> {
    match gateway.get(store, key).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Serialize a record as JSON and write it.
///
/// # Errors
///
/// Returns [`DbError::Serialization`] if serialization fails, or the
/// gateway's own error if the write fails.
pub async fn put_json<T: Serialize>(
    gateway: &dyn PersistenceGateway,
    store: Substore,
    key: &str,
    value: &T,
) -> Result<(), DbError> {
    let bytes = serde_json::to_vec(value)?;
    gateway.put(store, key, &bytes).await
}

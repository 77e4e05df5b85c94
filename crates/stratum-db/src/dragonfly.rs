//! `Dragonfly` (Redis-compatible) gateway.
//!
//! Every substore shares one keyspace. Keys are namespaced as
//! `{prefix}:{substore}:{key}` so several deployments can share an instance.
//!
//! # Key Patterns
//!
//! | Pattern | Type | Description |
//! |---------|------|-------------|
//! | `{prefix}:meta:schema` | JSON | Current schema record |
//! | `{prefix}:meta:layout` | JSON | Grid layout record |
//! | `{prefix}:meta:nucleus:{layer}` | JSON | Layer nucleus |
//! | `{prefix}:base:{layer}` | Bytes | Int16 distance samples |
//! | `{prefix}:base-zero:schema:{id}` | JSON | Zero template |
//! | `{prefix}:overlay:{layer},{quadrant}` | Bytes | `f32` quadrant slice |
//! | `{prefix}:overlay-meta:{layer}` | JSON | Layer metadata |

use fred::prelude::*;
use fred::types::Value;
use futures::FutureExt as _;
use futures::future::BoxFuture;

use crate::error::DbError;
use crate::gateway::{PersistenceGateway, Substore};

/// Connection handle to a `Dragonfly` (Redis-compatible) instance.
///
/// Wraps a [`fred::prelude::Client`] and implements
/// [`PersistenceGateway`] over it.
#[derive(Clone)]
pub struct DragonflyGateway {
    client: Client,
    prefix: String,
}

impl DragonflyGateway {
    /// Connect to `Dragonfly` at the given URL.
    ///
    /// The URL should follow the Redis URL scheme:
    /// `redis://host:port` or `redis://host:port/db`
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Config`] if the URL cannot be parsed.
    /// Returns [`DbError::Dragonfly`] if the connection fails.
    pub async fn connect(url: &str, prefix: &str) -> Result<Self, DbError> {
        let config = Config::from_url(url)
            .map_err(|e| DbError::Config(format!("Invalid Dragonfly URL: {e}")))?;

        let client = Builder::from_config(config).build()?;
        client.init().await?;

        tracing::info!(prefix, "Connected to Dragonfly");
        Ok(Self {
            client,
            prefix: prefix.to_owned(),
        })
    }

    /// Full storage key for `key` in `store`.
    pub fn full_key(&self, store: Substore, key: &str) -> String {
        if self.prefix.is_empty() {
            format!("{store}:{key}")
        } else {
            format!("{}:{store}:{key}", self.prefix)
        }
    }

    /// Flush all keys from the `Dragonfly` instance.
    ///
    /// **WARNING:** This deletes all data. Only use for testing.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Dragonfly`] if the flush fails.
    pub async fn flush_all(&self) -> Result<(), DbError> {
        let _: () = self.client.flushall(false).await?;
        Ok(())
    }

    /// Return a reference to the underlying [`Client`].
    pub const fn client(&self) -> &Client {
        &self.client
    }
}

impl PersistenceGateway for DragonflyGateway {
    fn get<'a>(
        &'a self,
        store: Substore,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<Vec<u8>>, DbError>> {
        async move {
            let full = self.full_key(store, key);
            let value: Option<Vec<u8>> = self.client.get(full.as_str()).await?;
            Ok(value)
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
            let full = self.full_key(store, key);
            let payload = Value::from(value.to_vec().into_boxed_slice());
            let _: () = self
                .client
                .set(full.as_str(), payload, None, None, false)
                .await?;
            Ok(())
        }
        .boxed()
    }

    fn backend(&self) -> &'static str {
        "dragonfly"
    }
}

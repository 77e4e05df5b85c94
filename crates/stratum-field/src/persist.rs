//! Retried reads and write-then-read-back verified writes.
//!
//! A write counts as durable only once a read of the same key returns a
//! value of the expected byte length. Each key gets `max_attempts` tries
//! with a linearly growing pause in between; exhausting them is a
//! [`FieldError::PersistenceWriteFailure`].

use std::time::Duration;

use stratum_db::{DbError, PersistenceGateway, Substore};

use crate::error::FieldError;
use crate::settings::GridSettings;

/// Retry bound and backoff for gateway operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per key, at least one.
    pub max_attempts: u32,
    /// Pause before attempt `n + 1` is `backoff * n`.
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Policy configured in `settings`.
    pub fn from_settings(settings: &GridSettings) -> Self {
        Self {
            max_attempts: settings.max_write_attempts.max(1),
            backoff: settings.retry_backoff,
        }
    }

    async fn pause(&self, attempt: u32) {
        let delay = self.backoff.saturating_mul(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

/// `<substore>/<key>` label used in logs and failure reports.
pub fn describe(store: Substore, key: &str) -> String {
    format!("{store}/{key}")
}

/// Write `value` and confirm it by reading it back.
///
/// Returns the number of attempts used.
pub async fn write_verified(
    gateway: &dyn PersistenceGateway,
    store: Substore,
    key: &str,
    value: &[u8],
    policy: RetryPolicy,
) -> Result<u32, FieldError> {
    let mut attempt: u32 = 0;
    loop {
        attempt = attempt.saturating_add(1);
        match gateway.put(store, key, value).await {
            Ok(()) => match gateway.get(store, key).await {
                Ok(Some(stored)) if stored.len() == value.len() => return Ok(attempt),
                Ok(stored) => {
                    tracing::warn!(
                        store = %store,
                        key,
                        attempt,
                        expected = value.len(),
                        stored = ?stored.map(|s| s.len()),
                        "write verification mismatch"
                    );
                }
                Err(e) => {
                    tracing::warn!(store = %store, key, attempt, error = %e, "read-back failed");
                }
            },
            Err(e) => {
                tracing::warn!(store = %store, key, attempt, error = %e, "write failed");
            }
        }
        if attempt >= policy.max_attempts {
            return Err(FieldError::PersistenceWriteFailure {
                keys: vec![describe(store, key)],
                attempts: attempt,
            });
        }
        policy.pause(attempt).await;
    }
}

/// Read `key`, retrying transient failures up to the policy bound.
pub async fn read_retried(
    gateway: &dyn PersistenceGateway,
    store: Substore,
    key: &str,
    policy: RetryPolicy,
) -> Result<Option<Vec<u8>>, FieldError> {
    let mut attempt: u32 = 0;
    loop {
        attempt = attempt.saturating_add(1);
        match gateway.get(store, key).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= policy.max_attempts => return Err(FieldError::Gateway(e)),
            Err(e) => {
                tracing::debug!(store = %store, key, attempt, error = %e, "read failed, retrying");
            }
        }
        policy.pause(attempt).await;
    }
}

/// Read and decode a JSON record with [`read_retried`].
pub async fn read_json<T: serde::de::DeserializeOwned>(
    gateway: &dyn PersistenceGateway,
    store: Substore,
    key: &str,
    policy: RetryPolicy,
) -> Result<Option<T>, FieldError> {
    match read_retried(gateway, store, key, policy).await? {
        Some(bytes) => Ok(Some(
            serde_json::from_slice(&bytes).map_err(DbError::Serialization)?,
        )),
        None => Ok(None),
    }
}

/// Encode a JSON record and store it with [`write_verified`].
pub async fn write_json<T: serde::Serialize>(
    gateway: &dyn PersistenceGateway,
    store: Substore,
    key: &str,
    value: &T,
    policy: RetryPolicy,
) -> Result<u32, FieldError> {
    let bytes = serde_json::to_vec(value).map_err(DbError::Serialization)?;
    write_verified(gateway, store, key, &bytes, policy).await
}

//! Error types for the persistence layer.
//!
//! All errors are propagated via [`DbError`] which wraps the underlying
//! [`fred`] and [`serde_json`] errors with additional context about which
//! operation failed.

/// Errors that can occur in the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A `Dragonfly`/Redis operation failed.
    #[error("Dragonfly error: {0}")]
    Dragonfly(#[from] fred::error::Error),

    /// A serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored binary payload could not be decoded.
    #[error("Codec error: {0}")]
    Codec(String),

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The backing store cannot be reached.
    #[error("Gateway unavailable: {0}")]
    Unavailable(String),
}

//! Error types for the engine binary.
//!
//! [`EngineError`] wraps every failure mode of startup, seeding, and
//! shutdown so `main` can propagate with `?`.

use std::path::PathBuf;

/// Top-level error for the engine binary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: stratum_core::ConfigError,
    },

    /// Gateway or grid bring-up failed.
    #[error("bootstrap error: {source}")]
    Bootstrap {
        /// The underlying bootstrap error.
        #[from]
        source: stratum_core::BootstrapError,
    },

    /// A grid operation failed.
    #[error("grid error: {source}")]
    Field {
        /// The underlying field error.
        #[from]
        source: stratum_field::FieldError,
    },

    /// Registering or closing grids failed.
    #[error("registry error: {source}")]
    Registry {
        /// The underlying registry error.
        #[from]
        source: stratum_core::RegistryError,
    },

    /// The sparse seed file could not be read or parsed.
    #[error("seed file {}: {message}", path.display())]
    Seed {
        /// Path of the seed file.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// Waiting for the shutdown signal failed.
    #[error("signal error: {source}")]
    Signal {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },
}

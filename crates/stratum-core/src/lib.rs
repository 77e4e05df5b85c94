//! Runtime layer for the Stratum field store.
//!
//! Turns `stratum-config.yaml` into an open [`FieldGrid`] and keeps track
//! of the grids a process has open.
//!
//! # Modules
//!
//! - [`config`] -- Configuration loading from `stratum-config.yaml` into
//!   strongly-typed structs.
//! - [`bootstrap`] -- Gateway connection with memory-only fallback,
//!   environment source selection, and grid opening.
//! - [`registry`] -- [`GridRegistry`], the explicit table of open grids.
//!
//! [`FieldGrid`]: stratum_field::FieldGrid

pub mod bootstrap;
pub mod config;
pub mod registry;

pub use bootstrap::{BootstrapError, connect_gateway, environment_source, open_grid, open_grid_with};
pub use config::{ConfigError, StratumConfig};
pub use registry::{GridRegistry, RegistryError};

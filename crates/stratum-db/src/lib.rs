//! Persistence gateway for the Stratum field store.
//!
//! The field engine treats storage as an opaque key/value store split into
//! five logical substores. This crate defines that contract and ships two
//! implementations of it.
//!
//! # Architecture
//!
//! ```text
//! FieldGrid
//!     |
//!     +-- get/put (store, key) --> dyn PersistenceGateway
//!                                     |-- DragonflyGateway (Redis-compatible, fred)
//!                                     +-- MemoryGateway    (in-process map)
//! ```
//!
//! # Modules
//!
//! - [`gateway`] -- [`PersistenceGateway`] trait, [`Substore`], JSON helpers
//! - [`keys`] -- Key construction for every record family
//! - [`codec`] -- Binary encodings for quadrant buffers and base distances
//! - [`dragonfly`] -- `Dragonfly` (Redis-compatible) gateway
//! - [`memory`] -- In-process gateway used for memory-only grids and tests
//! - [`error`] -- Shared error types

pub mod codec;
pub mod dragonfly;
pub mod error;
pub mod gateway;
pub mod keys;
pub mod memory;

// Re-export primary types for convenience.
pub use dragonfly::DragonflyGateway;
pub use error::DbError;
pub use gateway::{PersistenceGateway, Substore, get_json, put_json};
pub use memory::MemoryGateway;

//! Shared type definitions for the Stratum field store.
//!
//! This crate holds the records that cross the persistence boundary and the
//! identifiers used to address grids. Everything here is plain data: no I/O,
//! no async. The records derive [`ts_rs::TS`] so external consumers (the
//! renderer and debug console) can share the exact wire shapes.
//!
//! # Modules
//!
//! - [`ids`] -- [`GridId`], the UUID v7 identifier of a grid instance.
//! - [`records`] -- Persisted records (`meta`, `base-zero`, `overlay-meta`),
//!   the composite [`QuadrantKey`], and overlay seed entries.

pub mod ids;
pub mod records;

// Re-export primary types at crate root.
pub use ids::GridId;
pub use records::{
    FieldMap, KeyParseError, LayerMeta, LayoutRecord, NucleusRecord, QuadrantKey, SchemaRecord,
    SparseCell, ZeroTemplateRecord,
};

//! Quadrant-partitioned dense field layers for the Stratum field store.
//!
//! A grid keeps one fixed-resolution dense canvas per depth slice and
//! addresses it through a coarse, resizable logical grid. Layers are
//! materialized on demand, kept in the channel order of the current
//! schema, and persisted incrementally one rectangular quadrant at a time.
//!
//! # Architecture
//!
//! ```text
//! set/add_dense_from_cell(z, x, y)
//!     |
//!     +-- ensure_dense_layer(z) --> resident? else template / stored slices
//!     +-- nucleus mapping       --> dense pixel
//!     +-- mutate buffer, mark quadrant dirty
//!     +-- debounce --> flush --> write + read-back verify per quadrant
//! ```
//!
//! # Modules
//!
//! - [`grid`] -- [`FieldGrid`] handle, open, schema evolution, resize,
//!   repartition, disposal
//! - [`materialize`] -- Layer materialization and schema migration
//! - [`write`] -- Cell-addressed writes and reads
//! - [`flush`] -- Debounced, verified persistence of dirty quadrants
//! - [`schema`] -- Versioned field schema
//! - [`nucleus`] -- Per-layer anchor cell selection
//! - [`geometry`] -- Logical geometry and cell-to-pixel mapping
//! - [`quadrant`] -- Quadrant partition of the dense canvas
//! - [`zero_template`] -- Seed content per schema and environment sources
//! - [`overlay`] -- Sparse per-cell overlay and resize reprojection
//! - [`dense`] -- Dense layer buffers
//! - [`cache`] -- Resident layers with optional LRU bound
//! - [`dirty`] -- Pending quadrant set
//! - [`persist`] -- Retried reads and verified writes
//! - [`settings`] -- Grid tunables
//! - [`error`] -- Error types

pub mod cache;
pub mod dense;
pub mod dirty;
pub mod error;
pub mod flush;
pub mod geometry;
pub mod grid;
pub mod materialize;
pub mod nucleus;
pub mod overlay;
pub mod persist;
pub mod quadrant;
pub mod schema;
pub mod settings;
pub mod write;
pub mod zero_template;

// Re-export primary types at crate root.
pub use dense::DenseLayer;
pub use error::FieldError;
pub use flush::FlushReport;
pub use geometry::{Direction, GridGeometry, dense_center};
pub use grid::{FieldGrid, GridOptions};
pub use nucleus::{Nucleus, pick_nucleus};
pub use overlay::{Reprojection, SparseOverlayTable};
pub use persist::RetryPolicy;
pub use quadrant::{QuadrantLayout, Rect};
pub use schema::{Schema, SchemaRegistry};
pub use settings::GridSettings;
pub use zero_template::{
    AmbientSource, EnvironmentSource, SeededEnvironment, ZeroTemplate, ZeroTemplateProvider,
    pareto_quantize,
};

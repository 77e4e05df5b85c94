//! Error types for the `stratum-field` crate.
//!
//! Two of the variants are recoverable classification signals rather than
//! failures surfaced to callers: [`FieldError::SchemaMismatch`] routes a
//! stored layer through channel reindexing and [`FieldError::QuadrantMissing`]
//! routes an unreadable slice through zero-template back-fill.

use stratum_db::DbError;

/// Errors that can occur during field-grid operations.
#[derive(Debug, thiserror::Error)]
pub enum FieldError {
    /// Stored slices were written under a different schema.
    #[error("layer {layer} stored under schema {stored}, current schema is {current}")]
    SchemaMismatch {
        /// The layer.
        layer: i32,
        /// Schema id recorded with the stored slices.
        stored: u32,
        /// Current schema id.
        current: u32,
    },

    /// A stored quadrant slice is absent or has the wrong size.
    #[error("quadrant {quadrant} of layer {layer} is missing or malformed")]
    QuadrantMissing {
        /// The layer.
        layer: i32,
        /// The quadrant index.
        quadrant: u32,
    },

    /// Writes kept failing verification after the retry bound.
    #[error("persistence failed after {attempts} attempts for keys {keys:?}")]
    PersistenceWriteFailure {
        /// Failed keys, as `<substore>/<key>`.
        keys: Vec<String>,
        /// Attempts made per key.
        attempts: u32,
    },

    /// A gateway operation failed.
    #[error("gateway error: {0}")]
    Gateway(#[from] DbError),

    /// The requested quadrant count cannot partition the dense canvas.
    #[error("quadrant count {count} outside [1, {max}]")]
    InvalidQuadrantCount {
        /// Requested count.
        count: u32,
        /// Largest valid count (`width * height`).
        max: u64,
    },

    /// Grid or dense dimensions are unusable.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// The layer index lies outside the grid depth.
    #[error("layer {layer} outside grid depth {depth}")]
    LayerOutOfRange {
        /// Requested layer.
        layer: i32,
        /// Grid depth in cells.
        depth: u32,
    },

    /// The grid was disposed while or before the operation ran.
    #[error("grid has been disposed")]
    Disposed,

    /// The grid was reshaped while the operation was suspended; its result
    /// was discarded.
    #[error("grid changed shape during the operation")]
    Superseded,
}

//! Persisted records shared between the field engine and the gateway.
//!
//! Each record maps to one key family of the persistence gateway:
//!
//! | Substore | Key | Record |
//! |----------|-----|--------|
//! | `meta` | `schema` | [`SchemaRecord`] |
//! | `meta` | `layout` | [`LayoutRecord`] |
//! | `meta` | `nucleus:<layer>` | [`NucleusRecord`] |
//! | `base-zero` | `schema:<id>` | [`ZeroTemplateRecord`] |
//! | `overlay` | `<layer>,<quadrant>` | raw quadrant buffer ([`QuadrantKey`]) |
//! | `overlay-meta` | `<layer>` | [`LayerMeta`] |

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Field values keyed by field name, in name order.
pub type FieldMap = BTreeMap<String, f32>;

/// Versioned field schema as persisted under `meta/schema`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct SchemaRecord {
    /// Schema version. Strictly increases whenever the ordered field
    /// sequence changes.
    pub id: u32,
    /// Ordered field names; position is the channel offset.
    pub fields: Vec<String>,
}

/// Per-layer overlay metadata as persisted under `overlay-meta/<layer>`.
///
/// Records the schema and the quadrant partition the layer's slices were
/// written with, so a reader can reassemble them even after the grid's
/// schema or quadrant count moved on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct LayerMeta {
    /// Schema id the stored slices were written under.
    pub schema_id: u32,
    /// Channel order of the stored slices.
    pub field_names: Vec<String>,
    /// Quadrant count of the partition the slices were cut with.
    pub quadrant_count: u32,
    /// When the metadata was last written.
    pub updated_at: DateTime<Utc>,
}

/// Anchor cell chosen for a layer, persisted under `meta/nucleus:<layer>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct NucleusRecord {
    /// Nucleus cell x.
    pub cx: i32,
    /// Nucleus cell y.
    pub cy: i32,
    /// Grid width (cells) the nucleus was chosen for.
    pub w: u32,
    /// Grid height (cells) the nucleus was chosen for.
    pub h: u32,
    /// Selection rule, including the propagation direction used.
    pub rule: String,
}

/// Grid geometry and dense partition, persisted under `meta/layout`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct LayoutRecord {
    /// Dense canvas width in pixels.
    pub dense_width: u32,
    /// Dense canvas height in pixels.
    pub dense_height: u32,
    /// Number of persistence quadrants per layer.
    pub quadrant_count: u32,
    /// Logical grid size in cells `[x, y, z]`.
    pub cells: [u32; 3],
    /// Logical cell edge length in world units.
    pub spacing: f64,
    /// World position of cell `(0, 0, 0)`.
    pub origin: [f64; 3],
    /// Propagation direction used for nucleus selection.
    pub direction: [f64; 2],
}

/// Zero template for one schema, persisted under `base-zero/schema:<id>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct ZeroTemplateRecord {
    /// Schema the template was built for.
    pub schema_id: u32,
    /// Number of quadrants. Authoritative over the configured count.
    pub quadrant_count: u32,
    /// Sparse field values per quadrant, `quadrant_count` entries.
    pub quadrants: Vec<FieldMap>,
}

/// One sparse overlay entry: field values attached to a logical cell.
///
/// This is the shape of overlay seed files and of overlay exports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct SparseCell {
    /// Cell x.
    pub x: i32,
    /// Cell y.
    pub y: i32,
    /// Cell z (layer).
    pub z: i32,
    /// Field values at the cell.
    pub values: FieldMap,
}

/// Errors produced when parsing a [`QuadrantKey`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyParseError {
    /// The key did not contain exactly one `,` separator.
    #[error("quadrant key {0:?} is not of the form <layer>,<quadrant>")]
    Malformed(String),

    /// One of the components was not an integer.
    #[error("quadrant key {key:?} has a non-integer component: {reason}")]
    NotInteger {
        /// The offending key.
        key: String,
        /// Parser message.
        reason: String,
    },
}

/// Composite `<layer>,<quadrant>` key addressing one stored quadrant slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct QuadrantKey {
    /// Depth layer index.
    pub layer: i32,
    /// Quadrant index within the layer.
    pub quadrant: u32,
}

impl QuadrantKey {
    /// Build a key for `quadrant` of `layer`.
    pub const fn new(layer: i32, quadrant: u32) -> Self {
        Self { layer, quadrant }
    }
}

impl fmt::Display for QuadrantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.layer, self.quadrant)
    }
}

impl FromStr for QuadrantKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (layer, quadrant) = s
            .split_once(',')
            .ok_or_else(|| KeyParseError::Malformed(s.to_owned()))?;
        if quadrant.contains(',') {
            return Err(KeyParseError::Malformed(s.to_owned()));
        }
        let not_integer = |e: std::num::ParseIntError| KeyParseError::NotInteger {
            key: s.to_owned(),
            reason: e.to_string(),
        };
        Ok(Self {
            layer: layer.trim().parse().map_err(not_integer)?,
            quadrant: quadrant.trim().parse().map_err(not_integer)?,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn quadrant_key_format() {
        assert_eq!(QuadrantKey::new(3, 15).to_string(), "3,15");
        assert_eq!(QuadrantKey::new(-1, 0).to_string(), "-1,0");
    }

    #[test]
    fn quadrant_key_parse() {
        let key: QuadrantKey = "7,2".parse().unwrap();
        assert_eq!(key, QuadrantKey::new(7, 2));

        assert!(matches!(
            "7".parse::<QuadrantKey>(),
            Err(KeyParseError::Malformed(_))
        ));
        assert!(matches!(
            "7,2,1".parse::<QuadrantKey>(),
            Err(KeyParseError::Malformed(_))
        ));
        assert!(matches!(
            "a,2".parse::<QuadrantKey>(),
            Err(KeyParseError::NotInteger { .. })
        ));
        assert!(matches!(
            "1,-2".parse::<QuadrantKey>(),
            Err(KeyParseError::NotInteger { .. })
        ));
    }

    #[test]
    fn layer_meta_uses_camel_case() {
        let meta = LayerMeta {
            schema_id: 2,
            field_names: vec![String::from("O2")],
            quadrant_count: 16,
            updated_at: Utc::now(),
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["schemaId"], 2);
        assert_eq!(json["fieldNames"][0], "O2");
        assert_eq!(json["quadrantCount"], 16);
    }

    #[test]
    fn schema_record_shape() {
        let json = r#"{"id":4,"fields":["O2","N2"]}"#;
        let record: SchemaRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.id, 4);
        assert_eq!(record.fields, vec!["O2", "N2"]);
    }

    #[test]
    fn sparse_cell_shape() {
        let json = r#"[{"x":1,"y":2,"z":0,"values":{"O2":0.5}}]"#;
        let cells: Vec<SparseCell> = serde_json::from_str(json).unwrap();
        assert_eq!(cells.len(), 1);
        assert_eq!(cells[0].values["O2"], 0.5);
    }
}

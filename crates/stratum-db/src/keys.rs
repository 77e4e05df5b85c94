//! Key construction for every record family.
//!
//! | Substore | Key pattern |
//! |----------|-------------|
//! | `meta` | `schema`, `layout`, `nucleus:<layer>` |
//! | `base` | `<layer>` |
//! | `base-zero` | `schema:<id>` |
//! | `overlay` | `<layer>,<quadrant>` |
//! | `overlay-meta` | `<layer>` |

use stratum_types::QuadrantKey;

/// `meta` key holding the current [`stratum_types::SchemaRecord`].
pub const SCHEMA: &str = "schema";

/// `meta` key holding the [`stratum_types::LayoutRecord`].
pub const LAYOUT: &str = "layout";

/// `meta` key for the nucleus of `layer`.
pub fn nucleus(layer: i32) -> String {
    format!("nucleus:{layer}")
}

/// `base-zero` key for the zero template of `schema_id`.
pub fn zero_template(schema_id: u32) -> String {
    format!("schema:{schema_id}")
}

/// `base` and `overlay-meta` key for `layer`.
pub fn layer(layer: i32) -> String {
    layer.to_string()
}

/// `overlay` key for one quadrant slice.
pub fn quadrant(layer: i32, quadrant: u32) -> String {
    QuadrantKey::new(layer, quadrant).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_patterns() {
        assert_eq!(nucleus(4), "nucleus:4");
        assert_eq!(zero_template(12), "schema:12");
        assert_eq!(layer(-3), "-3");
        assert_eq!(quadrant(2, 15), "2,15");
    }
}

//! Sparse overlay seed files.
//!
//! A seed file is a JSON array of cells, each with integer coordinates and
//! a map of field values:
//!
//! ```json
//! [{ "x": 2, "y": 1, "z": 0, "values": { "O2": 5.0 } }]
//! ```

use std::path::Path;

use stratum_types::SparseCell;

use crate::error::EngineError;

/// Read and parse the seed file at `path`.
pub fn load_seed(path: &Path) -> Result<Vec<SparseCell>, EngineError> {
    let contents = std::fs::read_to_string(path).map_err(|e| EngineError::Seed {
        path: path.to_path_buf(),
        message: format!("failed to read: {e}"),
    })?;
    parse_seed(&contents).map_err(|e| EngineError::Seed {
        path: path.to_path_buf(),
        message: format!("failed to parse: {e}"),
    })
}

/// Parse seed cells from JSON text.
pub fn parse_seed(json: &str) -> Result<Vec<SparseCell>, serde_json::Error> {
    serde_json::from_str(json)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn parses_cell_list() {
        let cells = parse_seed(r#"[{"x": 2, "y": 1, "z": 0, "values": {"O2": 5.0, "CO2": 0.5}}]"#).unwrap();
        assert_eq!(cells.len(), 1);
        assert_eq!((cells[0].x, cells[0].y, cells[0].z), (2, 1, 0));
        assert_eq!(cells[0].values.get("O2"), Some(&5.0));
    }

    #[test]
    fn rejects_malformed_cells() {
        assert!(parse_seed(r#"[{"x": 2, "values": {}}]"#).is_err());
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = load_seed(Path::new("does/not/exist.json")).unwrap_err();
        assert!(err.to_string().contains("does/not/exist.json"));
    }
}

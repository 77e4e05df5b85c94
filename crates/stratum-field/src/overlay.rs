//! Sparse per-cell overlay.
//!
//! The overlay maps logical cells to field records. It seeds a layer the
//! first time it is materialized and carries values across grid resizes,
//! where every entry is re-projected by the world position of its cell
//! centre. Records whose values are all zero are never kept.

use std::collections::BTreeMap;

use stratum_types::{FieldMap, SparseCell};

use crate::geometry::GridGeometry;

/// Logical cell coordinate `(x, y, z)`.
pub type CellCoord = (i32, i32, i32);

/// Outcome of a resize reprojection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reprojection {
    /// Entries that landed inside the new grid.
    pub kept: usize,
    /// Entries that fell outside and were discarded.
    pub dropped: usize,
    /// Entries that landed on a cell already taken and were summed into it.
    pub merged: usize,
}

fn is_blank(values: &FieldMap) -> bool {
    values.values().all(|v| *v == 0.0)
}

/// Ordered map of sparse cell records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseOverlayTable {
    entries: BTreeMap<CellCoord, FieldMap>,
}

impl SparseOverlayTable {
    /// Empty overlay.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the record at `cell`. An all-zero record removes the entry.
    pub fn set(&mut self, cell: CellCoord, values: FieldMap) {
        if is_blank(&values) {
            self.entries.remove(&cell);
        } else {
            self.entries.insert(cell, values);
        }
    }

    /// Record at `cell`.
    pub fn get(&self, cell: CellCoord) -> Option<&FieldMap> {
        self.entries.get(&cell)
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the overlay is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries of layer `z`, in `(x, y)` order.
    pub fn layer(&self, z: i32) -> impl Iterator<Item = (CellCoord, &FieldMap)> {
        self.entries
            .range((i32::MIN, i32::MIN, z)..=(i32::MAX, i32::MAX, z))
            .filter(move |((_, _, cz), _)| *cz == z)
            .map(|(cell, values)| (*cell, values))
    }

    /// Merge seed cells, later duplicates replacing earlier ones. Returns
    /// how many entries were stored.
    pub fn import<I>(&mut self, cells: I) -> usize
    where
        I: IntoIterator<Item = SparseCell>,
    {
        let mut stored: usize = 0;
        for cell in cells {
            let blank = is_blank(&cell.values);
            self.set((cell.x, cell.y, cell.z), cell.values);
            if !blank {
                stored = stored.saturating_add(1);
            }
        }
        stored
    }

    /// Export every entry as a seed cell.
    pub fn export(&self) -> Vec<SparseCell> {
        self.entries
            .iter()
            .map(|(&(x, y, z), values)| SparseCell {
                x,
                y,
                z,
                values: values.clone(),
            })
            .collect()
    }

    /// Re-home every entry from `old` to `new` geometry.
    ///
    /// Each entry moves to the new cell containing its old cell centre.
    /// Entries outside the new grid are dropped; entries colliding on one
    /// new cell are summed.
    pub fn reproject(&mut self, old: &GridGeometry, new: &GridGeometry) -> Reprojection {
        let mut report = Reprojection::default();
        let mut moved: BTreeMap<CellCoord, FieldMap> = BTreeMap::new();
        for ((x, y, z), values) in std::mem::take(&mut self.entries) {
            let Some(target) = new.cell_at(old.cell_center(x, y, z)) else {
                report.dropped = report.dropped.saturating_add(1);
                continue;
            };
            match moved.get_mut(&target) {
                Some(existing) => {
                    for (name, v) in values {
                        *existing.entry(name).or_insert(0.0) += v;
                    }
                    report.merged = report.merged.saturating_add(1);
                }
                None => {
                    moved.insert(target, values);
                    report.kept = report.kept.saturating_add(1);
                }
            }
        }
        moved.retain(|_, values| !is_blank(values));
        self.entries = moved;
        report
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, f32)]) -> FieldMap {
        entries.iter().map(|(k, v)| ((*k).to_owned(), *v)).collect()
    }

    fn grid(cells: u32, spacing: f64) -> GridGeometry {
        GridGeometry::new([cells, cells, 2], spacing, [0.0; 3]).unwrap()
    }

    #[test]
    fn zero_records_are_removed() {
        let mut table = SparseOverlayTable::new();
        table.set((1, 1, 0), map(&[("O2", 1.0)]));
        assert_eq!(table.len(), 1);
        table.set((1, 1, 0), map(&[("O2", 0.0), ("N2", 0.0)]));
        assert!(table.is_empty());
        assert!(table.get((1, 1, 0)).is_none());
    }

    #[test]
    fn layer_filters_by_z() {
        let mut table = SparseOverlayTable::new();
        table.set((0, 0, 0), map(&[("O2", 1.0)]));
        table.set((3, 1, 1), map(&[("O2", 2.0)]));
        table.set((-2, 5, 1), map(&[("O2", 3.0)]));
        table.set((1, 0, 2), map(&[("O2", 4.0)]));
        let cells: Vec<CellCoord> = table.layer(1).map(|(c, _)| c).collect();
        assert_eq!(cells, vec![(-2, 5, 1), (3, 1, 1)]);
    }

    #[test]
    fn import_counts_nonblank_cells() {
        let mut table = SparseOverlayTable::new();
        let stored = table.import(vec![
            SparseCell { x: 0, y: 0, z: 0, values: map(&[("O2", 1.0)]) },
            SparseCell { x: 1, y: 0, z: 0, values: map(&[("O2", 0.0)]) },
        ]);
        assert_eq!(stored, 1);
        assert_eq!(table.export().len(), 1);
    }

    #[test]
    fn upsizing_keeps_world_position() {
        // 4 cells of 2.0 -> 8 cells of 1.0; cell 1 (centre 3.0) -> cell 3.
        let mut table = SparseOverlayTable::new();
        table.set((1, 1, 0), map(&[("O2", 5.0)]));
        let report = table.reproject(&grid(4, 2.0), &grid(8, 1.0));
        assert_eq!(report, Reprojection { kept: 1, dropped: 0, merged: 0 });
        assert_eq!(table.get((3, 3, 0)).unwrap()["O2"], 5.0);
    }

    #[test]
    fn downsizing_sums_collisions() {
        // 8 cells of 1.0 -> 4 cells of 2.0; cells 2 and 3 both land in 1.
        let mut table = SparseOverlayTable::new();
        table.set((2, 0, 0), map(&[("O2", 1.0)]));
        table.set((3, 0, 0), map(&[("O2", 2.0), ("N2", 1.0)]));
        let report = table.reproject(&grid(8, 1.0), &grid(4, 2.0));
        assert_eq!(report, Reprojection { kept: 1, dropped: 0, merged: 1 });
        let merged = table.get((1, 0, 0)).unwrap();
        assert_eq!(merged["O2"], 3.0);
        assert_eq!(merged["N2"], 1.0);
    }

    #[test]
    fn entries_outside_new_bounds_are_dropped() {
        let mut table = SparseOverlayTable::new();
        table.set((7, 7, 0), map(&[("O2", 1.0)]));
        table.set((1, 1, 0), map(&[("O2", 1.0)]));
        let report = table.reproject(&grid(8, 1.0), &grid(4, 1.0));
        assert_eq!(report.dropped, 1);
        assert_eq!(report.kept, 1);
        assert!(table.get((1, 1, 0)).is_some());
    }
}

//! Logical grid geometry and the cell-to-dense-pixel mapping.
//!
//! The logical grid is coarse and resizable; the dense canvas is fixed. A
//! cell maps to a dense pixel by its offset from the layer's nucleus, scaled
//! by `dense / cells` per axis, around a dense centre that never moves:
//!
//! ```text
//! px = clamp(dense_center(W) + round((x - nucleus.x) * W / cells_x), 0, W - 1)
//! py = clamp(dense_center(H) + round((y - nucleus.y) * H / cells_y), 0, H - 1)
//! ```
//!
//! Because the centre is independent of the logical resolution, the nucleus
//! cell always lands on the same dense pixel across resizes.

use crate::error::FieldError;
use crate::nucleus::Nucleus;

/// Logical simulation grid: size, cell spacing, and world placement.
#[derive(Debug, Clone, PartialEq)]
pub struct GridGeometry {
    /// Cells along x.
    pub cells_x: u32,
    /// Cells along y.
    pub cells_y: u32,
    /// Cells along z (one dense layer per z).
    pub cells_z: u32,
    /// Cell edge length in world units.
    pub spacing: f64,
    /// World position of the corner of cell `(0, 0, 0)`.
    pub origin: [f64; 3],
}

impl GridGeometry {
    /// Build a validated geometry.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::InvalidGeometry`] for zero-sized axes or a
    /// non-positive or non-finite spacing.
    pub fn new(cells: [u32; 3], spacing: f64, origin: [f64; 3]) -> Result<Self, FieldError> {
        let [cells_x, cells_y, cells_z] = cells;
        if cells_x == 0 || cells_y == 0 || cells_z == 0 {
            return Err(FieldError::InvalidGeometry(format!(
                "grid must have at least one cell per axis, got {cells_x}x{cells_y}x{cells_z}"
            )));
        }
        if !spacing.is_finite() || spacing <= 0.0 {
            return Err(FieldError::InvalidGeometry(format!(
                "cell spacing must be positive, got {spacing}"
            )));
        }
        if origin.iter().any(|o| !o.is_finite()) {
            return Err(FieldError::InvalidGeometry(String::from(
                "grid origin must be finite",
            )));
        }
        Ok(Self {
            cells_x,
            cells_y,
            cells_z,
            spacing,
            origin,
        })
    }

    /// Cell counts as `[x, y, z]`.
    pub const fn cells(&self) -> [u32; 3] {
        [self.cells_x, self.cells_y, self.cells_z]
    }

    /// Check that `layer` is a valid z index.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::LayerOutOfRange`] otherwise.
    pub fn check_layer(&self, layer: i32) -> Result<(), FieldError> {
        match u32::try_from(layer) {
            Ok(z) if z < self.cells_z => Ok(()),
            _ => Err(FieldError::LayerOutOfRange {
                layer,
                depth: self.cells_z,
            }),
        }
    }

    /// World position of the centre of cell `(x, y, z)`.
    pub fn cell_center(&self, x: i32, y: i32, z: i32) -> [f64; 3] {
        let [ox, oy, oz] = self.origin;
        [
            (f64::from(x) + 0.5).mul_add(self.spacing, ox),
            (f64::from(y) + 0.5).mul_add(self.spacing, oy),
            (f64::from(z) + 0.5).mul_add(self.spacing, oz),
        ]
    }

    /// Cell containing world position `world`, or `None` outside the grid.
    #[allow(clippy::cast_possible_truncation)]
    pub fn cell_at(&self, world: [f64; 3]) -> Option<(i32, i32, i32)> {
        let axis = |w: f64, o: f64, n: u32| -> Option<i32> {
            let idx = ((w - o) / self.spacing).floor();
            if idx.is_finite() && idx >= 0.0 && idx < f64::from(n) {
                // Bounded by n <= u32::MAX and checked below for i32.
                i32::try_from(idx as i64).ok()
            } else {
                None
            }
        };
        let [wx, wy, wz] = world;
        let [ox, oy, oz] = self.origin;
        Some((
            axis(wx, ox, self.cells_x)?,
            axis(wy, oy, self.cells_y)?,
            axis(wz, oz, self.cells_z)?,
        ))
    }
}

/// Propagation direction used to break nucleus ties on even dimensions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Direction {
    /// X component.
    pub x: f64,
    /// Y component.
    pub y: f64,
}

impl Direction {
    /// Build a direction from its components. Zero-length is allowed and
    /// normalizes to `+X`.
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Unit vector of this direction; zero-length or non-finite input
    /// yields `(1, 0)`.
    pub fn normalized(self) -> (f64, f64) {
        let len = self.x.hypot(self.y);
        if len.is_finite() && len > 0.0 {
            (self.x / len, self.y / len)
        } else {
            (1.0, 0.0)
        }
    }
}

impl Default for Direction {
    fn default() -> Self {
        Self::new(1.0, 0.0)
    }
}

/// Dense pixel the nucleus maps to along an axis of `dim` pixels.
pub const fn dense_center(dim: u32) -> u32 {
    (dim / 2).saturating_sub(1)
}

/// Map logical cell `(x, y)` to its dense pixel.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn map_cell_to_dense(
    nucleus: Nucleus,
    geometry: &GridGeometry,
    dense_width: u32,
    dense_height: u32,
    x: i32,
    y: i32,
) -> (u32, u32) {
    let axis = |cell: i32, anchor: i32, cells: u32, dense: u32| -> u32 {
        let scale = f64::from(dense) / f64::from(cells);
        let offset = ((f64::from(cell) - f64::from(anchor)) * scale).round();
        let max = f64::from(dense.saturating_sub(1));
        // Clamped into [0, dense - 1] before the cast.
        (f64::from(dense_center(dense)) + offset).clamp(0.0, max) as u32
    };
    (
        axis(x, nucleus.x, geometry.cells_x, dense_width),
        axis(y, nucleus.y, geometry.cells_y, dense_height),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    fn geometry(x: u32, y: u32) -> GridGeometry {
        GridGeometry::new([x, y, 2], 1.0, [0.0, 0.0, 0.0]).unwrap()
    }

    #[test]
    fn rejects_degenerate_geometry() {
        assert!(GridGeometry::new([0, 4, 1], 1.0, [0.0; 3]).is_err());
        assert!(GridGeometry::new([4, 4, 1], 0.0, [0.0; 3]).is_err());
        assert!(GridGeometry::new([4, 4, 1], f64::NAN, [0.0; 3]).is_err());
        assert!(GridGeometry::new([4, 4, 1], 1.0, [f64::INFINITY, 0.0, 0.0]).is_err());
    }

    #[test]
    fn layer_range() {
        let g = geometry(4, 4);
        assert!(g.check_layer(0).is_ok());
        assert!(g.check_layer(1).is_ok());
        assert!(matches!(
            g.check_layer(2),
            Err(FieldError::LayerOutOfRange { layer: 2, depth: 2 })
        ));
        assert!(g.check_layer(-1).is_err());
    }

    #[test]
    fn nucleus_maps_to_dense_center_for_any_grid_size() {
        for size in [1_u32, 2, 3, 4, 7, 16, 100, 1024] {
            let g = geometry(size, size);
            let n = Nucleus::new(i32::try_from(size / 2).unwrap(), 0);
            let (px, py) = map_cell_to_dense(n, &g, 1024, 1024, n.x, n.y);
            assert_eq!((px, py), (511, 511), "size {size}");
        }
    }

    #[test]
    fn offsets_scale_with_resolution() {
        let g = geometry(4, 4);
        let n = Nucleus::new(2, 1);
        // One cell is 256 dense pixels on a 4-cell axis.
        assert_eq!(map_cell_to_dense(n, &g, 1024, 1024, 3, 1), (767, 511));
        assert_eq!(map_cell_to_dense(n, &g, 1024, 1024, 1, 2), (255, 767));
        // Far cells clamp to the canvas edge.
        assert_eq!(map_cell_to_dense(n, &g, 1024, 1024, 40, -40), (1023, 0));
    }

    #[test]
    fn direction_normalizes() {
        assert_eq!(Direction::new(0.0, 0.0).normalized(), (1.0, 0.0));
        assert_eq!(Direction::new(0.0, -3.0).normalized(), (0.0, -1.0));
        let (x, y) = Direction::new(3.0, 4.0).normalized();
        assert!((x - 0.6).abs() < 1e-12 && (y - 0.8).abs() < 1e-12);
    }

    #[test]
    fn world_round_trip_through_cells() {
        let g = GridGeometry::new([4, 4, 4], 2.0, [-4.0, -4.0, 0.0]).unwrap();
        let c = g.cell_center(1, 2, 3);
        assert_eq!(c, [-1.0, 1.0, 7.0]);
        assert_eq!(g.cell_at(c), Some((1, 2, 3)));
        assert_eq!(g.cell_at([100.0, 0.0, 0.0]), None);
        assert_eq!(g.cell_at([-5.0, 0.0, 0.0]), None);
    }
}

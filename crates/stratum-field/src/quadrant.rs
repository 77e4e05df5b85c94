//! Partition of a dense canvas into persistence quadrants.
//!
//! For `W x H` pixels and `Q` quadrants:
//!
//! ```text
//! cols = ceil(sqrt(Q))    rows = ceil(Q / cols)
//! qW   = ceil(W / cols)   qH   = ceil(H / rows)
//! index(px, py) = min(row * cols + col, Q - 1)
//! ```
//!
//! When `Q < rows * cols` the grid cells past `Q - 1` in the last row fold
//! into quadrant `Q - 1`, whose region then runs to the right edge. Every
//! pixel belongs to exactly one quadrant for any `Q` in `[1, W * H]`;
//! trailing quadrants may be empty when the ceilings overshoot.

use crate::error::FieldError;

/// Half-open pixel rectangle `[x0, x1) x [y0, y1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    /// Left edge (inclusive).
    pub x0: u32,
    /// Top edge (inclusive).
    pub y0: u32,
    /// Right edge (exclusive).
    pub x1: u32,
    /// Bottom edge (exclusive).
    pub y1: u32,
}

impl Rect {
    /// Width in pixels.
    pub const fn width(&self) -> u32 {
        self.x1.saturating_sub(self.x0)
    }

    /// Height in pixels.
    pub const fn height(&self) -> u32 {
        self.y1.saturating_sub(self.y0)
    }

    /// Pixel count.
    pub fn area(&self) -> usize {
        (self.width() as usize).saturating_mul(self.height() as usize)
    }

    /// Whether `(px, py)` lies inside.
    pub const fn contains(&self, px: u32, py: u32) -> bool {
        px >= self.x0 && px < self.x1 && py >= self.y0 && py < self.y1
    }
}

/// Quadrant partition of a `width` x `height` canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuadrantLayout {
    width: u32,
    height: u32,
    count: u32,
    cols: u32,
    rows: u32,
    quad_width: u32,
    quad_height: u32,
}

/// Smallest `c` with `c * c >= n`.
fn ceil_sqrt(n: u32) -> u32 {
    let n = u64::from(n);
    let mut c: u64 = 0;
    let mut step: u64 = 1 << 16;
    // Binary descent for the largest c with c * c < n, then one more.
    while step > 0 {
        let next = c.saturating_add(step);
        if next.saturating_mul(next) < n {
            c = next;
        }
        step >>= 1;
    }
    let root = if n == 0 { 0 } else { c.saturating_add(1) };
    u32::try_from(root).unwrap_or(u32::MAX)
}

impl QuadrantLayout {
    /// Partition a `width` x `height` canvas into `count` quadrants.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::InvalidGeometry`] for an empty canvas and
    /// [`FieldError::InvalidQuadrantCount`] unless `1 <= count <= width * height`.
    pub fn new(width: u32, height: u32, count: u32) -> Result<Self, FieldError> {
        if width == 0 || height == 0 {
            return Err(FieldError::InvalidGeometry(format!(
                "dense canvas must be non-empty, got {width}x{height}"
            )));
        }
        let max = u64::from(width).saturating_mul(u64::from(height));
        if count == 0 || u64::from(count) > max {
            return Err(FieldError::InvalidQuadrantCount { count, max });
        }
        let cols = ceil_sqrt(count);
        let rows = count.div_ceil(cols);
        Ok(Self {
            width,
            height,
            count,
            cols,
            rows,
            quad_width: width.div_ceil(cols),
            quad_height: height.div_ceil(rows),
        })
    }

    /// Canvas width.
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Canvas height.
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Quadrant count.
    pub const fn count(&self) -> u32 {
        self.count
    }

    /// Quadrant columns.
    pub const fn cols(&self) -> u32 {
        self.cols
    }

    /// Quadrant rows.
    pub const fn rows(&self) -> u32 {
        self.rows
    }

    /// Nominal quadrant size `(qW, qH)`.
    pub const fn quadrant_size(&self) -> (u32, u32) {
        (self.quad_width, self.quad_height)
    }

    /// Quadrant owning pixel `(px, py)`. Out-of-canvas coordinates clamp to
    /// the edge quadrants.
    pub fn quadrant_index(&self, px: u32, py: u32) -> u32 {
        let col = (px / self.quad_width).min(self.cols.saturating_sub(1));
        let row = (py / self.quad_height).min(self.rows.saturating_sub(1));
        row.saturating_mul(self.cols)
            .saturating_add(col)
            .min(self.count.saturating_sub(1))
    }

    /// Pixel region of quadrant `index`. Indices past the count yield an
    /// empty rectangle.
    pub fn region(&self, index: u32) -> Rect {
        if index >= self.count {
            return Rect {
                x0: self.width,
                y0: self.height,
                x1: self.width,
                y1: self.height,
            };
        }
        let row = index / self.cols;
        let col = index % self.cols;
        let x0 = col.saturating_mul(self.quad_width).min(self.width);
        let y0 = row.saturating_mul(self.quad_height).min(self.height);
        let x1 = if index == self.count.saturating_sub(1) {
            self.width
        } else {
            x0.saturating_add(self.quad_width).min(self.width)
        };
        let y1 = y0.saturating_add(self.quad_height).min(self.height);
        Rect { x0, y0, x1, y1 }
    }

    /// Every quadrant index.
    pub fn indices(&self) -> std::ops::Range<u32> {
        0..self.count
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::arithmetic_side_effects)]
mod tests {
    use super::*;

    /// Assert exact coverage: each pixel's index region contains it, and
    /// region areas sum to the canvas.
    fn assert_exact_cover(layout: &QuadrantLayout) {
        let mut counts = vec![0_usize; layout.count() as usize];
        for py in 0..layout.height() {
            for px in 0..layout.width() {
                let q = layout.quadrant_index(px, py);
                assert!(q < layout.count());
                assert!(
                    layout.region(q).contains(px, py),
                    "pixel ({px},{py}) not in region of quadrant {q} for Q={}",
                    layout.count()
                );
                counts[q as usize] += 1;
            }
        }
        for q in layout.indices() {
            assert_eq!(counts[q as usize], layout.region(q).area(), "Q={} q={q}", layout.count());
        }
        let total: usize = layout.indices().map(|q| layout.region(q).area()).sum();
        assert_eq!(total, (layout.width() * layout.height()) as usize);
    }

    #[test]
    fn ceil_sqrt_values() {
        let expected = [(1, 1), (2, 2), (4, 2), (5, 3), (9, 3), (10, 4), (16, 4), (17, 5)];
        for (n, root) in expected {
            assert_eq!(ceil_sqrt(n), root, "n={n}");
        }
        assert_eq!(ceil_sqrt(1_048_576), 1024);
        assert_eq!(ceil_sqrt(1_048_577), 1025);
    }

    #[test]
    fn default_layout_is_four_by_four() {
        let layout = QuadrantLayout::new(1024, 1024, 16).unwrap();
        assert_eq!((layout.cols(), layout.rows()), (4, 4));
        assert_eq!(layout.quadrant_size(), (256, 256));
        assert_eq!(layout.quadrant_index(511, 511), 5);
        assert_eq!(layout.quadrant_index(1023, 1023), 15);
        assert_eq!(
            layout.region(5),
            Rect {
                x0: 256,
                y0: 256,
                x1: 512,
                y1: 512
            }
        );
    }

    #[test]
    fn every_count_covers_small_canvases_exactly() {
        for (w, h) in [(7_u32, 5_u32), (1, 9), (10, 10), (3, 1)] {
            for q in 1..=(w * h) {
                assert_exact_cover(&QuadrantLayout::new(w, h, q).unwrap());
            }
        }
    }

    #[test]
    fn sampled_counts_cover_full_canvas_exactly() {
        for q in [1_u32, 3, 16, 1000] {
            assert_exact_cover(&QuadrantLayout::new(1024, 1024, q).unwrap());
        }
        // The largest count degenerates to one pixel per quadrant.
        let layout = QuadrantLayout::new(1024, 1024, 1024 * 1024).unwrap();
        let total: usize = layout.indices().map(|q| layout.region(q).area()).sum();
        assert_eq!(total, 1024 * 1024);
        assert_eq!(layout.quadrant_index(5, 7), 7 * 1024 + 5);
    }

    #[test]
    fn uneven_count_folds_tail_into_last_quadrant() {
        // Q=3: 2x2 grid, cell (1,1) belongs to quadrant 2.
        let layout = QuadrantLayout::new(10, 10, 3).unwrap();
        assert_eq!(layout.quadrant_index(9, 9), 2);
        assert_eq!(
            layout.region(2),
            Rect {
                x0: 0,
                y0: 5,
                x1: 10,
                y1: 10
            }
        );
    }

    #[test]
    fn rejects_out_of_range_counts() {
        assert!(matches!(
            QuadrantLayout::new(4, 4, 0),
            Err(FieldError::InvalidQuadrantCount { count: 0, max: 16 })
        ));
        assert!(QuadrantLayout::new(4, 4, 17).is_err());
        assert!(QuadrantLayout::new(0, 4, 1).is_err());
        assert_eq!(QuadrantLayout::new(4, 4, 3).unwrap().region(3).area(), 0);
    }
}

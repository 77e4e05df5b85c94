//! Deterministic anchor-cell selection per layer.
//!
//! The nucleus is the logical cell that maps to the dense centre. For an odd
//! axis the geometric centre is a single cell; for an even axis it sits
//! between two, so the candidates are enumerated in a fixed order
//!
//! ```text
//! (cx-1, cy-1), (cx-1, cy), (cx, cy-1), (cx, cy)     cx = w >> 1, cy = h >> 1
//! ```
//!
//! (dropping the `-1` variants on odd axes) and the candidate whose unit
//! offset from the pivot `((w-1)/2, (h-1)/2)` best aligns with the
//! propagation direction wins. Ties keep the earliest candidate.

use stratum_types::NucleusRecord;

use crate::geometry::Direction;

/// Anchor cell of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Nucleus {
    /// Cell x.
    pub x: i32,
    /// Cell y.
    pub y: i32,
}

impl Nucleus {
    /// Build a nucleus at `(x, y)`.
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Persisted form of this nucleus for a `width` x `height` grid.
    pub fn to_record(self, width: u32, height: u32, direction: Direction) -> NucleusRecord {
        NucleusRecord {
            cx: self.x,
            cy: self.y,
            w: width,
            h: height,
            rule: selection_rule(direction),
        }
    }
}

/// Rule tag stored with a nucleus record.
pub fn selection_rule(direction: Direction) -> String {
    let (dx, dy) = direction.normalized();
    format!("max-alignment:{dx:.6},{dy:.6}")
}

/// Candidate coordinates along one axis of `dim` cells, in enumeration order.
fn axis_candidates(dim: u32) -> Vec<i64> {
    let c = i64::from(dim >> 1);
    if dim % 2 == 0 {
        vec![c.saturating_sub(1), c]
    } else {
        vec![c]
    }
}

/// Pick the nucleus of a `width` x `height` grid for `direction`.
///
/// Both dimensions must be non-zero.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
pub fn pick_nucleus(width: u32, height: u32, direction: Direction) -> Nucleus {
    let (dir_x, dir_y) = direction.normalized();
    let pivot_x = (f64::from(width) - 1.0) / 2.0;
    let pivot_y = (f64::from(height) - 1.0) / 2.0;

    let mut best: Option<((i64, i64), f64)> = None;
    for &x in &axis_candidates(width) {
        for &y in &axis_candidates(height) {
            // Coordinates are bounded by u32 >> 1 and exact in f64.
            let off_x = x as f64 - pivot_x;
            let off_y = y as f64 - pivot_y;
            let len = off_x.hypot(off_y);
            let score = if len > 0.0 {
                (off_x / len).mul_add(dir_x, (off_y / len) * dir_y)
            } else {
                0.0
            };
            match best {
                Some((_, s)) if score <= s => {}
                _ => best = Some(((x, y), score)),
            }
        }
    }

    let (x, y) = best.map_or((0, 0), |(cell, _)| cell);
    // Candidates are at most u32::MAX >> 1, which fits in i32.
    Nucleus::new(x as i32, y as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_x_on_even_grid_takes_first_aligned_candidate() {
        // Candidates (1,1) (1,2) (2,1) (2,2); (2,1) and (2,2) tie on +X and
        // the earlier one wins.
        let n = pick_nucleus(4, 4, Direction::new(1.0, 0.0));
        assert_eq!(n, Nucleus::new(2, 1));
    }

    #[test]
    fn diagonal_direction_picks_matching_corner() {
        assert_eq!(pick_nucleus(4, 4, Direction::new(1.0, 1.0)), Nucleus::new(2, 2));
        assert_eq!(pick_nucleus(4, 4, Direction::new(-1.0, -1.0)), Nucleus::new(1, 1));
        assert_eq!(pick_nucleus(4, 4, Direction::new(-1.0, 1.0)), Nucleus::new(1, 2));
    }

    #[test]
    fn negative_x_tie_resolves_to_first_enumerated() {
        // (1,1) and (1,2) tie; (1,1) is enumerated first.
        assert_eq!(pick_nucleus(4, 4, Direction::new(-1.0, 0.0)), Nucleus::new(1, 1));
    }

    #[test]
    fn zero_direction_defaults_to_positive_x() {
        assert_eq!(
            pick_nucleus(8, 6, Direction::new(0.0, 0.0)),
            pick_nucleus(8, 6, Direction::new(1.0, 0.0))
        );
    }

    #[test]
    fn odd_dimensions_use_the_exact_centre() {
        assert_eq!(pick_nucleus(5, 5, Direction::new(0.0, 1.0)), Nucleus::new(2, 2));
        assert_eq!(pick_nucleus(1, 1, Direction::default()), Nucleus::new(0, 0));
        // Mixed parity: x fixed at 2, y chosen between 1 and 2.
        assert_eq!(pick_nucleus(5, 4, Direction::new(0.0, 1.0)), Nucleus::new(2, 2));
        assert_eq!(pick_nucleus(5, 4, Direction::new(0.0, -1.0)), Nucleus::new(2, 1));
    }

    #[test]
    fn record_carries_dimensions_and_rule() {
        let record = Nucleus::new(2, 1).to_record(4, 4, Direction::new(2.0, 0.0));
        assert_eq!((record.cx, record.cy, record.w, record.h), (2, 1, 4, 4));
        assert_eq!(record.rule, "max-alignment:1.000000,0.000000");
    }
}

//! Pending quadrant writes.

use std::collections::{BTreeMap, BTreeSet};

/// Per-layer set of quadrant indices awaiting persistence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirtySet {
    pending: BTreeMap<i32, BTreeSet<u32>>,
}

impl DirtySet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark one quadrant.
    pub fn mark(&mut self, layer: i32, quadrant: u32) {
        self.pending.entry(layer).or_default().insert(quadrant);
    }

    /// Mark several quadrants of one layer.
    pub fn mark_all<I>(&mut self, layer: i32, quadrants: I)
    where
        I: IntoIterator<Item = u32>,
    {
        let set = self.pending.entry(layer).or_default();
        set.extend(quadrants);
        if set.is_empty() {
            self.pending.remove(&layer);
        }
    }

    /// Whether `layer` has any pending quadrant.
    pub fn is_dirty(&self, layer: i32) -> bool {
        self.pending.contains_key(&layer)
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Number of pending `(layer, quadrant)` pairs.
    pub fn len(&self) -> usize {
        self.pending.values().map(BTreeSet::len).sum()
    }

    /// Pending pairs in `(layer, quadrant)` order.
    pub fn iter(&self) -> impl Iterator<Item = (i32, u32)> + '_ {
        self.pending
            .iter()
            .flat_map(|(layer, quadrants)| quadrants.iter().map(move |q| (*layer, *q)))
    }

    /// Layers with pending quadrants.
    pub fn layers(&self) -> impl Iterator<Item = i32> + '_ {
        self.pending.keys().copied()
    }

    /// Move everything out, leaving an empty set behind.
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }

    /// Move out the pending quadrants of one layer.
    pub fn take_layer(&mut self, layer: i32) -> Self {
        let mut taken = Self::new();
        if let Some(quadrants) = self.pending.remove(&layer) {
            taken.pending.insert(layer, quadrants);
        }
        taken
    }

    /// Add every pair of `other`.
    pub fn merge(&mut self, other: Self) {
        for (layer, quadrants) in other.pending {
            self.pending.entry(layer).or_default().extend(quadrants);
        }
    }

    /// Forget every pending quadrant.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marks_are_deduplicated() {
        let mut dirty = DirtySet::new();
        dirty.mark(0, 3);
        dirty.mark(0, 3);
        dirty.mark(2, 1);
        assert_eq!(dirty.len(), 2);
        assert!(dirty.is_dirty(0));
        assert!(!dirty.is_dirty(1));
        assert_eq!(dirty.iter().collect::<Vec<_>>(), vec![(0, 3), (2, 1)]);
    }

    #[test]
    fn take_swaps_in_a_fresh_set() {
        let mut dirty = DirtySet::new();
        dirty.mark_all(1, 0..4);
        let taken = dirty.take();
        assert!(dirty.is_empty());
        assert_eq!(taken.len(), 4);

        dirty.mark(1, 9);
        dirty.merge(taken);
        assert_eq!(dirty.len(), 5);
    }

    #[test]
    fn take_layer_leaves_others() {
        let mut dirty = DirtySet::new();
        dirty.mark(0, 1);
        dirty.mark(1, 1);
        let taken = dirty.take_layer(0);
        assert_eq!(taken.layers().collect::<Vec<_>>(), vec![0]);
        assert_eq!(dirty.layers().collect::<Vec<_>>(), vec![1]);
        dirty.mark_all(5, std::iter::empty());
        assert!(!dirty.is_dirty(5));
    }
}

//! Resident dense layers.
//!
//! Unbounded by default: a layer stays resident until the grid is resized
//! or disposed. With a capacity, the least recently used layers beyond it
//! are evicted, except layers with pending or in-flight writes.

use std::collections::HashMap;

use crate::dense::DenseLayer;
use crate::dirty::DirtySet;

#[derive(Debug)]
struct Entry {
    layer: DenseLayer,
    last_used: u64,
}

/// Layer buffers keyed by layer index, with optional LRU bound.
#[derive(Debug, Default)]
pub struct LayerCache {
    entries: HashMap<i32, Entry>,
    capacity: Option<usize>,
    clock: u64,
}

impl LayerCache {
    /// Cache holding at most `capacity` clean layers; `None` is unbounded.
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.map(|c| c.max(1)),
            clock: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock = self.clock.wrapping_add(1);
        self.clock
    }

    /// Resident layer `z`, marked as recently used.
    pub fn get(&mut self, z: i32) -> Option<&DenseLayer> {
        let now = self.tick();
        self.entries.get_mut(&z).map(|e| {
            e.last_used = now;
            &e.layer
        })
    }

    /// Resident layer `z`, leaving its recency untouched.
    pub fn peek(&self, z: i32) -> Option<&DenseLayer> {
        self.entries.get(&z).map(|e| &e.layer)
    }

    /// Mutable resident layer `z`, marked as recently used.
    pub fn get_mut(&mut self, z: i32) -> Option<&mut DenseLayer> {
        let now = self.tick();
        self.entries.get_mut(&z).map(|e| {
            e.last_used = now;
            &mut e.layer
        })
    }

    /// Whether layer `z` is resident.
    pub fn contains(&self, z: i32) -> bool {
        self.entries.contains_key(&z)
    }

    /// Make `layer` resident.
    pub fn insert(&mut self, layer: DenseLayer) {
        let last_used = self.tick();
        self.entries.insert(layer.layer(), Entry { layer, last_used });
    }

    /// Evict least recently used layers other than `keep` until within
    /// capacity. Layers with quadrants in `dirty` or `in_flight` stay.
    /// Returns the evicted layer indices.
    pub fn evict(&mut self, dirty: &DirtySet, in_flight: &DirtySet, keep: i32) -> Vec<i32> {
        let Some(capacity) = self.capacity else {
            return Vec::new();
        };
        let mut evicted = Vec::new();
        while self.entries.len() > capacity {
            let victim = self
                .entries
                .iter()
                .filter(|(z, _)| **z != keep && !dirty.is_dirty(**z) && !in_flight.is_dirty(**z))
                .min_by_key(|(_, e)| e.last_used)
                .map(|(z, _)| *z);
            match victim {
                Some(z) => {
                    self.entries.remove(&z);
                    evicted.push(z);
                }
                None => break,
            }
        }
        evicted
    }

    /// Resident layer indices, ascending.
    pub fn layers(&self) -> Vec<i32> {
        let mut layers: Vec<i32> = self.entries.keys().copied().collect();
        layers.sort_unstable();
        layers
    }

    /// Every resident layer, mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut DenseLayer> {
        self.entries.values_mut().map(|e| &mut e.layer)
    }

    /// Number of resident layers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no layer is resident.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every resident layer.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

//! Versioned field schema.
//!
//! A [`Schema`] is an ordered sequence of unique field names; a name's
//! position is its channel offset in every dense pixel. Schemas are never
//! patched: evolution replaces the whole value and allocates the next id
//! whenever the ordered sequence changes, reorders included.

use std::collections::HashMap;
use std::sync::Arc;

use stratum_types::SchemaRecord;

/// Immutable ordered field set with a derived name index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    id: u32,
    fields: Vec<String>,
    index: HashMap<String, usize>,
}

impl Schema {
    /// Build schema `id` over `fields`. Duplicate names keep their first
    /// position.
    pub fn new(id: u32, fields: &[String]) -> Self {
        let mut ordered: Vec<String> = Vec::with_capacity(fields.len());
        let mut index = HashMap::with_capacity(fields.len());
        for name in fields {
            if !index.contains_key(name) {
                index.insert(name.clone(), ordered.len());
                ordered.push(name.clone());
            }
        }
        Self {
            id,
            fields: ordered,
            index,
        }
    }

    /// Schema id.
    pub const fn id(&self) -> u32 {
        self.id
    }

    /// Ordered field names.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Number of channels per dense pixel.
    pub fn channel_count(&self) -> usize {
        self.fields.len()
    }

    /// Channel offset of `name`, if it is part of the schema.
    pub fn channel(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Whether this schema's ordered fields equal `fields` exactly.
    pub fn same_fields(&self, fields: &[String]) -> bool {
        self.fields == fields
    }

    /// Persisted form of this schema.
    pub fn to_record(&self) -> SchemaRecord {
        SchemaRecord {
            id: self.id,
            fields: self.fields.clone(),
        }
    }
}

/// Owner of the current schema.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    current: Arc<Schema>,
}

impl SchemaRegistry {
    /// Start from the empty schema with id 0.
    pub fn new() -> Self {
        Self {
            current: Arc::new(Schema::new(0, &[])),
        }
    }

    /// Resume from a persisted record.
    pub fn restore(record: &SchemaRecord) -> Self {
        Self {
            current: Arc::new(Schema::new(record.id, &record.fields)),
        }
    }

    /// Current schema.
    pub fn current(&self) -> Arc<Schema> {
        Arc::clone(&self.current)
    }

    /// Replace the schema if `fields` differs from the current ordered
    /// sequence. Returns the new schema, or `None` when nothing changed
    /// (empty input or an identical sequence).
    pub fn evolve(&mut self, fields: &[String]) -> Option<Arc<Schema>> {
        if fields.is_empty() {
            return None;
        }
        let candidate = Schema::new(self.current.id, fields);
        if candidate.fields == self.current.fields {
            return None;
        }
        let next = Arc::new(Schema::new(self.current.id.saturating_add(1), fields));
        self.current = Arc::clone(&next);
        Some(next)
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn evolve_allocates_next_id() {
        let mut registry = SchemaRegistry::new();
        let first = registry.evolve(&names(&["O2", "CO2"])).unwrap();
        assert_eq!(first.id(), 1);
        assert_eq!(first.channel("CO2"), Some(1));
        assert_eq!(first.channel("N2"), None);
    }

    #[test]
    fn identical_or_empty_input_is_a_no_op() {
        let mut registry = SchemaRegistry::new();
        registry.evolve(&names(&["O2", "CO2"])).unwrap();
        assert!(registry.evolve(&names(&["O2", "CO2"])).is_none());
        assert!(registry.evolve(&[]).is_none());
        assert_eq!(registry.current().id(), 1);
    }

    #[test]
    fn reorder_counts_as_a_change() {
        let mut a = SchemaRegistry::new();
        let mut b = SchemaRegistry::new();
        a.evolve(&names(&["O2", "CO2", "H2O"])).unwrap();
        b.evolve(&names(&["O2", "CO2", "H2O"])).unwrap();
        let reordered = b.evolve(&names(&["H2O", "O2", "CO2"])).unwrap();
        assert_ne!(a.current().id(), reordered.id());
        assert_eq!(reordered.channel("H2O"), Some(0));
    }

    #[test]
    fn duplicates_keep_first_position() {
        let schema = Schema::new(1, &names(&["O2", "N2", "O2"]));
        assert_eq!(schema.fields(), names(&["O2", "N2"]).as_slice());
        assert_eq!(schema.channel_count(), 2);
        // A duplicate-laden input equal after dedup is not a change.
        let mut registry = SchemaRegistry::new();
        registry.evolve(&names(&["O2", "N2"])).unwrap();
        assert!(registry.evolve(&names(&["O2", "N2", "N2"])).is_none());
    }

    #[test]
    fn restore_resumes_id_sequence() {
        let mut registry = SchemaRegistry::restore(&SchemaRecord {
            id: 7,
            fields: names(&["O2"]),
        });
        let next = registry.evolve(&names(&["O2", "N2"])).unwrap();
        assert_eq!(next.id(), 8);
        assert_eq!(next.to_record().fields, names(&["O2", "N2"]));
    }
}

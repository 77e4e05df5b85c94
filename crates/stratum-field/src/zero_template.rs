//! Schema-scoped default seed content for fresh layers.
//!
//! A zero template holds one sparse field map per quadrant. It is derived
//! from an [`EnvironmentSource`] by Pareto quantization (keep the top
//! `ceil(0.2 * n)` entries by magnitude), then cached in memory and stored
//! once per schema id under `base-zero/schema:<id>`. Its quadrant count is
//! authoritative: a grid whose configured count disagrees adopts the
//! template's.

use std::collections::HashMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use stratum_db::{PersistenceGateway, Substore, keys};
use stratum_types::{FieldMap, ZeroTemplateRecord};
use tokio::sync::Mutex;

use crate::error::FieldError;
use crate::persist::{self, RetryPolicy};
use crate::quadrant::QuadrantLayout;
use crate::schema::Schema;

// ---------------------------------------------------------------------------
// Pareto quantization
// ---------------------------------------------------------------------------

/// Keep the top `ceil(0.2 * n)` finite entries of `values` by magnitude.
///
/// Ties keep name order.
pub fn pareto_quantize(values: &FieldMap) -> FieldMap {
    let mut ranked: Vec<(&String, f32)> = values
        .iter()
        .filter(|(_, v)| v.is_finite())
        .map(|(k, v)| (k, *v))
        .collect();
    let keep = ranked.len().div_ceil(5);
    ranked.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));
    ranked
        .into_iter()
        .take(keep)
        .map(|(k, v)| (k.clone(), v))
        .collect()
}

// ---------------------------------------------------------------------------
// Environment sources
// ---------------------------------------------------------------------------

/// Supplier of ambient field values for template construction.
pub trait EnvironmentSource: Send + Sync {
    /// Ambient values of `fields` for `quadrant` of `layout`. Names outside
    /// `fields` are ignored by the caller.
    fn sample(&self, fields: &[String], quadrant: u32, layout: &QuadrantLayout) -> FieldMap;
}

/// Source that replicates one ambient map into every quadrant.
#[derive(Debug, Clone, Default)]
pub struct AmbientSource {
    values: FieldMap,
}

impl AmbientSource {
    /// Replicate `values` everywhere.
    pub const fn new(values: FieldMap) -> Self {
        Self { values }
    }
}

impl EnvironmentSource for AmbientSource {
    fn sample(&self, fields: &[String], _quadrant: u32, _layout: &QuadrantLayout) -> FieldMap {
        fields
            .iter()
            .filter_map(|f| self.values.get(f).map(|v| (f.clone(), *v)))
            .collect()
    }
}

/// Source that distributes an ambient map across quadrants with seeded
/// multiplicative jitter. The same `(seed, quadrant, field)` always yields
/// the same value.
#[derive(Debug, Clone)]
pub struct SeededEnvironment {
    ambient: FieldMap,
    seed: u64,
    jitter: f32,
}

impl SeededEnvironment {
    /// Jitter each ambient value by up to `±jitter` of itself.
    pub fn new(ambient: FieldMap, seed: u64, jitter: f32) -> Self {
        let jitter = if jitter.is_finite() {
            jitter.abs()
        } else {
            0.0
        };
        Self {
            ambient,
            seed,
            jitter,
        }
    }

    fn rng_for(&self, quadrant: u32, field: &str) -> StdRng {
        // FNV-1a over the field name, mixed with seed and quadrant.
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in field.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        let mixed = self
            .seed
            .wrapping_add(u64::from(quadrant).wrapping_mul(0x9e37_79b9_7f4a_7c15))
            ^ hash;
        StdRng::seed_from_u64(mixed)
    }
}

impl EnvironmentSource for SeededEnvironment {
    fn sample(&self, fields: &[String], quadrant: u32, _layout: &QuadrantLayout) -> FieldMap {
        fields
            .iter()
            .filter_map(|f| {
                let base = *self.ambient.get(f)?;
                let factor = if self.jitter > 0.0 {
                    let r: f32 = self.rng_for(quadrant, f).random_range(-1.0..=1.0);
                    r.mul_add(self.jitter, 1.0)
                } else {
                    1.0
                };
                Some((f.clone(), base * factor))
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Zero template
// ---------------------------------------------------------------------------

/// Per-quadrant seed values for one schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ZeroTemplate {
    schema_id: u32,
    quadrants: Vec<FieldMap>,
}

impl ZeroTemplate {
    /// Quantize `source` over every quadrant of `layout` for `schema`.
    pub fn build(schema: &Schema, layout: &QuadrantLayout, source: &dyn EnvironmentSource) -> Self {
        let quadrants = layout
            .indices()
            .map(|q| {
                let sampled: FieldMap = source
                    .sample(schema.fields(), q, layout)
                    .into_iter()
                    .filter(|(name, _)| schema.channel(name).is_some())
                    .collect();
                pareto_quantize(&sampled)
            })
            .collect();
        Self {
            schema_id: schema.id(),
            quadrants,
        }
    }

    /// Accept a stored record if it is internally consistent and usable on
    /// a `width` x `height` canvas.
    pub fn from_record(record: ZeroTemplateRecord, width: u32, height: u32) -> Option<Self> {
        let count = usize::try_from(record.quadrant_count).ok()?;
        if record.quadrants.len() != count {
            return None;
        }
        QuadrantLayout::new(width, height, record.quadrant_count).ok()?;
        Some(Self {
            schema_id: record.schema_id,
            quadrants: record.quadrants,
        })
    }

    /// Stored form of this template.
    pub fn to_record(&self) -> ZeroTemplateRecord {
        ZeroTemplateRecord {
            schema_id: self.schema_id,
            quadrant_count: self.quadrant_count(),
            quadrants: self.quadrants.clone(),
        }
    }

    /// Schema the template belongs to.
    pub const fn schema_id(&self) -> u32 {
        self.schema_id
    }

    /// Number of quadrants.
    pub fn quadrant_count(&self) -> u32 {
        u32::try_from(self.quadrants.len()).unwrap_or(u32::MAX)
    }

    /// Seed values of quadrant `q`.
    pub fn quadrant(&self, q: u32) -> Option<&FieldMap> {
        self.quadrants.get(usize::try_from(q).ok()?)
    }
}

/// Lookup-or-create of zero templates, keyed by schema id.
pub struct ZeroTemplateProvider {
    source: Arc<dyn EnvironmentSource>,
    cache: Mutex<HashMap<u32, Arc<ZeroTemplate>>>,
}

impl std::fmt::Debug for ZeroTemplateProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZeroTemplateProvider").finish_non_exhaustive()
    }
}

impl ZeroTemplateProvider {
    /// Provider drawing new templates from `source`.
    pub fn new(source: Arc<dyn EnvironmentSource>) -> Self {
        Self {
            source,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Template for `schema`: memory cache, then the gateway, then a fresh
    /// build that is stored and cached. Idempotent for a fixed schema id and
    /// source.
    pub async fn ensure(
        &self,
        gateway: Option<&dyn PersistenceGateway>,
        policy: RetryPolicy,
        schema: &Schema,
        layout: &QuadrantLayout,
    ) -> Result<Arc<ZeroTemplate>, FieldError> {
        if let Some(template) = self.cache.lock().await.get(&schema.id()) {
            return Ok(Arc::clone(template));
        }

        if let Some(gw) = gateway {
            let key = keys::zero_template(schema.id());
            let stored: Option<ZeroTemplateRecord> =
                persist::read_json(gw, Substore::BaseZero, &key, policy).await?;
            if let Some(record) = stored {
                match ZeroTemplate::from_record(record, layout.width(), layout.height()) {
                    Some(template) if template.schema_id == schema.id() => {
                        tracing::debug!(
                            schema_id = schema.id(),
                            quadrants = template.quadrant_count(),
                            "loaded zero template"
                        );
                        return Ok(self.remember(template).await);
                    }
                    _ => {
                        tracing::warn!(
                            schema_id = schema.id(),
                            "stored zero template is inconsistent, rebuilding"
                        );
                    }
                }
            }
        }

        self.rebuild(gateway, policy, schema, layout).await
    }

    /// Build a template for `schema` over `layout`, overwriting any cached
    /// or stored one.
    pub async fn rebuild(
        &self,
        gateway: Option<&dyn PersistenceGateway>,
        policy: RetryPolicy,
        schema: &Schema,
        layout: &QuadrantLayout,
    ) -> Result<Arc<ZeroTemplate>, FieldError> {
        let template = ZeroTemplate::build(schema, layout, self.source.as_ref());
        if let Some(gw) = gateway {
            let key = keys::zero_template(schema.id());
            // A lost write is rebuilt identically next time.
            if let Err(e) =
                persist::write_json(gw, Substore::BaseZero, &key, &template.to_record(), policy)
                    .await
            {
                tracing::warn!(schema_id = schema.id(), error = %e, "zero template not stored");
            }
        }
        tracing::info!(
            schema_id = schema.id(),
            quadrants = template.quadrant_count(),
            "built zero template"
        );
        Ok(self.remember(template).await)
    }

    /// Drop every cached template.
    pub async fn clear(&self) {
        self.cache.lock().await.clear();
    }

    async fn remember(&self, template: ZeroTemplate) -> Arc<ZeroTemplate> {
        let template = Arc::new(template);
        self.cache
            .lock()
            .await
            .insert(template.schema_id, Arc::clone(&template));
        template
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp, clippy::indexing_slicing)]
mod tests {
    use stratum_db::MemoryGateway;

    use super::*;

    fn map(entries: &[(&str, f32)]) -> FieldMap {
        entries.iter().map(|(k, v)| ((*k).to_owned(), *v)).collect()
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff: std::time::Duration::ZERO,
        }
    }

    #[test]
    fn pareto_keeps_top_fifth_by_magnitude() {
        let values = map(&[("a", 1.0), ("b", -9.0), ("c", 3.0), ("d", 0.5), ("e", 2.0), ("f", 4.0)]);
        // n = 6 -> keep 2.
        let kept = pareto_quantize(&values);
        assert_eq!(kept, map(&[("b", -9.0), ("f", 4.0)]));

        // n = 3 -> keep 1.
        assert_eq!(pareto_quantize(&map(&[("x", 1.0), ("y", 2.0), ("z", 0.0)])), map(&[("y", 2.0)]));
        assert!(pareto_quantize(&FieldMap::new()).is_empty());
    }

    #[test]
    fn pareto_ties_keep_name_order_and_skip_non_finite() {
        let values = map(&[("b", 2.0), ("a", -2.0), ("c", f32::NAN)]);
        assert_eq!(pareto_quantize(&values), map(&[("a", -2.0)]));
    }

    #[test]
    fn template_replicates_ambient_into_every_quadrant() {
        let schema = Schema::new(1, &names(&["O2", "CO2", "H2O"]));
        let layout = QuadrantLayout::new(64, 64, 4).unwrap();
        let source = AmbientSource::new(map(&[("O2", 0.21), ("CO2", 0.04), ("Ar", 0.9)]));
        let template = ZeroTemplate::build(&schema, &layout, &source);
        assert_eq!(template.quadrant_count(), 4);
        for q in 0..4 {
            // Ar is not in the schema; of O2/CO2 only the top one survives.
            assert_eq!(template.quadrant(q).unwrap(), &map(&[("O2", 0.21)]));
        }
    }

    #[test]
    fn seeded_environment_is_deterministic() {
        let layout = QuadrantLayout::new(64, 64, 4).unwrap();
        let fields = names(&["O2"]);
        let a = SeededEnvironment::new(map(&[("O2", 10.0)]), 7, 0.1);
        let b = SeededEnvironment::new(map(&[("O2", 10.0)]), 7, 0.1);
        for q in 0..4 {
            let va = a.sample(&fields, q, &layout)["O2"];
            assert_eq!(va, b.sample(&fields, q, &layout)["O2"]);
            assert!((9.0..=11.0).contains(&va));
        }
        let flat = SeededEnvironment::new(map(&[("O2", 10.0)]), 7, 0.0);
        assert_eq!(flat.sample(&fields, 2, &layout)["O2"], 10.0);
    }

    #[test]
    fn record_validation() {
        let record = ZeroTemplateRecord {
            schema_id: 1,
            quadrant_count: 2,
            quadrants: vec![FieldMap::new()],
        };
        assert!(ZeroTemplate::from_record(record, 8, 8).is_none());

        let record = ZeroTemplateRecord {
            schema_id: 1,
            quadrant_count: 2,
            quadrants: vec![FieldMap::new(), FieldMap::new()],
        };
        assert!(ZeroTemplate::from_record(record.clone(), 8, 8).is_some());
        assert!(ZeroTemplate::from_record(record, 1, 1).is_none());
    }

    #[tokio::test]
    async fn provider_stores_once_and_reloads() {
        let gateway = MemoryGateway::new();
        let schema = Schema::new(3, &names(&["O2"]));
        let layout = QuadrantLayout::new(32, 32, 4).unwrap();
        let source: Arc<dyn EnvironmentSource> = Arc::new(AmbientSource::new(map(&[("O2", 1.0)])));

        let provider = ZeroTemplateProvider::new(Arc::clone(&source));
        let built = provider
            .ensure(Some(&gateway), policy(), &schema, &layout)
            .await
            .unwrap();
        assert_eq!(gateway.keys(Substore::BaseZero).await, vec!["schema:3"]);

        // A fresh provider with a different configured layout still gets the
        // stored quadrant count.
        let other_layout = QuadrantLayout::new(32, 32, 9).unwrap();
        let fresh = ZeroTemplateProvider::new(source);
        let loaded = fresh
            .ensure(Some(&gateway), policy(), &schema, &other_layout)
            .await
            .unwrap();
        assert_eq!(loaded.quadrant_count(), 4);
        assert_eq!(*loaded, *built);
    }
}

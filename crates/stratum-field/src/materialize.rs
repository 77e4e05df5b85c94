//! Layer materialization.
//!
//! [`FieldGrid::ensure_dense_layer`] hands out the resident buffer of a
//! layer, building it on a miss:
//!
//! ```text
//! resident?  -- yes --> snapshot
//!    | no
//! zero template of current schema (its quadrant count wins)
//!    |
//! read overlay-meta + every stored quadrant slice (concurrently)
//!    |
//!    +-- none stored -------------> template + sparse overlay, persist all
//!    +-- same schema & partition -> stored slices, template back-fill for
//!    |                              missing ones (queued for the next flush)
//!    +-- otherwise ---------------> reindex stored slices into the current
//!                                   schema and partition, persist all
//! ```
//!
//! The result always carries the channel order of the schema current when
//! it is installed. Without a gateway the first branch runs in memory only.

use std::sync::Arc;

use futures::future::join_all;
use stratum_db::{PersistenceGateway, Substore, codec, keys};
use stratum_types::{FieldMap, LayerMeta};

use crate::dense::{DenseLayer, reindex_channels};
use crate::error::FieldError;
use crate::geometry::{GridGeometry, map_cell_to_dense};
use crate::grid::FieldGrid;
use crate::nucleus::Nucleus;
use crate::overlay::CellCoord;
use crate::persist;
use crate::quadrant::QuadrantLayout;
use crate::schema::Schema;
use crate::zero_template::ZeroTemplate;

/// Materializations abandoned because the grid was reshaped meanwhile are
/// retried this many times in total.
const MATERIALIZE_ATTEMPTS: u32 = 3;

/// A built layer awaiting installation.
struct Built {
    dense: DenseLayer,
    /// Quadrants (under the build layout) that must be written.
    dirty: Vec<u32>,
    /// Write them before returning instead of on the next flush.
    persist_now: bool,
}

impl FieldGrid {
    /// Dense buffer of `layer`, materializing it if it is not resident.
    ///
    /// The returned layer is a copy-on-write snapshot: two calls with no
    /// write in between return bit-identical buffers.
    pub async fn ensure_dense_layer(&self, layer: i32) -> Result<DenseLayer, FieldError> {
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            match self.materialize(layer).await {
                Err(FieldError::Superseded) if attempt < MATERIALIZE_ATTEMPTS => {
                    tracing::debug!(grid = %self.inner.id, layer, attempt, "grid reshaped during materialization, retrying");
                }
                other => return other,
            }
        }
    }

    async fn materialize(&self, layer: i32) -> Result<DenseLayer, FieldError> {
        self.check_live()?;
        let revision = self.revision();
        let (schema, configured) = {
            let mut state = self.inner.state.lock().await;
            state.geometry.check_layer(layer)?;
            if let Some(resident) = state.cache.get(layer) {
                return Ok(resident.clone());
            }
            (state.schemas.current(), state.layout)
        };

        let gateway = self.inner.gateway.as_deref();
        let template = self
            .inner
            .templates
            .ensure(gateway, self.inner.policy, &schema, &configured)
            .await?;
        let layout = self.adopt_template_layout(&template, configured).await?;

        let built = match gateway {
            Some(gw) => self.load(gw, layer, &schema, &layout, &template).await?,
            None => Built {
                dense: self.build_fresh(layer, &schema, &layout, &template).await,
                dirty: Vec::new(),
                persist_now: false,
            },
        };
        self.install(layer, built, revision, layout).await
    }

    /// Switch to the template's quadrant count if it differs from the
    /// configured one.
    async fn adopt_template_layout(
        &self,
        template: &ZeroTemplate,
        configured: QuadrantLayout,
    ) -> Result<QuadrantLayout, FieldError> {
        if template.quadrant_count() == configured.count() {
            return Ok(configured);
        }
        let corrected = QuadrantLayout::new(
            configured.width(),
            configured.height(),
            template.quadrant_count(),
        )?;
        let changed = {
            let mut state = self.inner.state.lock().await;
            let changed = state.layout != corrected;
            if changed {
                tracing::warn!(
                    grid = %self.inner.id,
                    configured = state.layout.count(),
                    template = corrected.count(),
                    "adopting quadrant count of the stored zero template"
                );
                state.layout = corrected;
                if self.inner.gateway.is_some() {
                    state.mark_resident_dirty();
                }
            }
            changed
        };
        if changed {
            if let Err(e) = self.persist_layout().await {
                tracing::warn!(grid = %self.inner.id, error = %e, "corrected layout not stored");
            }
        }
        Ok(corrected)
    }

    /// Zero template painted over `layout`, plus this layer's overlay cells.
    async fn build_fresh(
        &self,
        layer: i32,
        schema: &Arc<Schema>,
        layout: &QuadrantLayout,
        template: &ZeroTemplate,
    ) -> DenseLayer {
        let mut dense = DenseLayer::zeroed(layer, layout.width(), layout.height(), Arc::clone(schema));
        dense.paint_template(layout, template);
        let (nucleus, chosen) = {
            let mut guard = self.inner.state.lock().await;
            let state = &mut *guard;
            let (nucleus, chosen) = state.nucleus(layer);
            let applied = apply_sparse(&mut dense, state.overlay.layer(layer), nucleus, &state.geometry);
            tracing::debug!(grid = %self.inner.id, layer, applied, "projected sparse overlay");
            (nucleus, chosen)
        };
        if chosen {
            self.record_nucleus(layer, nucleus).await;
        }
        dense
    }

    /// Rebuild `layer` from its stored slices.
    async fn load(
        &self,
        gw: &dyn PersistenceGateway,
        layer: i32,
        schema: &Arc<Schema>,
        layout: &QuadrantLayout,
        template: &ZeroTemplate,
    ) -> Result<Built, FieldError> {
        let policy = self.inner.policy;
        let meta: Option<LayerMeta> =
            persist::read_json(gw, Substore::OverlayMeta, &keys::layer(layer), policy).await?;

        let stored_layout = match &meta {
            Some(m) if m.quadrant_count != layout.count() => {
                match QuadrantLayout::new(layout.width(), layout.height(), m.quadrant_count) {
                    Ok(stored) => stored,
                    Err(e) => {
                        tracing::warn!(grid = %self.inner.id, layer, error = %e, "stored partition unusable, assuming current");
                        *layout
                    }
                }
            }
            _ => *layout,
        };
        let stored_id = meta.as_ref().map_or(schema.id(), |m| m.schema_id);
        let stored_fields: Vec<String> = meta
            .as_ref()
            .map_or_else(|| schema.fields().to_vec(), |m| m.field_names.clone());

        let reads = stored_layout.indices().map(|q| {
            let key = keys::quadrant(layer, q);
            async move { (q, persist::read_retried(gw, Substore::Overlay, &key, policy).await) }
        });
        let mut present: Vec<(u32, Vec<f32>)> = Vec::new();
        let mut missing: Vec<u32> = Vec::new();
        for (q, result) in join_all(reads).await {
            let Some(bytes) = result? else {
                missing.push(q);
                continue;
            };
            let expected = stored_layout
                .region(q)
                .area()
                .saturating_mul(stored_fields.len());
            match decode_slice(layer, q, &bytes, expected) {
                Ok(values) => present.push((q, values)),
                Err(signal) => {
                    tracing::warn!(grid = %self.inner.id, error = %signal, "discarding stored slice");
                    missing.push(q);
                }
            }
        }

        if present.is_empty() {
            tracing::info!(
                grid = %self.inner.id,
                layer,
                schema_id = schema.id(),
                "creating layer from zero template"
            );
            return Ok(Built {
                dense: self.build_fresh(layer, schema, layout, template).await,
                dirty: layout.indices().collect(),
                persist_now: true,
            });
        }

        let mut dense = DenseLayer::zeroed(layer, layout.width(), layout.height(), Arc::clone(schema));
        dense.paint_template(layout, template);

        let same_schema = stored_id == schema.id() && schema.same_fields(&stored_fields);
        if same_schema && stored_layout == *layout {
            for (q, values) in &present {
                dense.insert_region(layout.region(*q), values);
            }
            if !missing.is_empty() {
                tracing::warn!(
                    grid = %self.inner.id,
                    layer,
                    missing = ?missing,
                    "back-filling quadrants from zero template"
                );
            }
            return Ok(Built {
                dense,
                dirty: missing,
                persist_now: false,
            });
        }

        let signal = FieldError::SchemaMismatch {
            layer,
            stored: stored_id,
            current: schema.id(),
        };
        tracing::warn!(
            grid = %self.inner.id,
            error = %signal,
            stored_quadrants = stored_layout.count(),
            current_quadrants = layout.count(),
            "migrating stored layer"
        );
        for (q, values) in &present {
            let rect = stored_layout.region(*q);
            let converted = reindex_channels(values, &stored_fields, schema, rect.area());
            dense.insert_region(rect, &converted);
        }
        Ok(Built {
            dense,
            dirty: layout.indices().collect(),
            persist_now: true,
        })
    }

    /// Make a built layer resident unless the grid moved on meanwhile.
    async fn install(
        &self,
        layer: i32,
        built: Built,
        revision: u64,
        built_layout: QuadrantLayout,
    ) -> Result<DenseLayer, FieldError> {
        let Built {
            mut dense,
            mut dirty,
            persist_now,
        } = built;
        let (snapshot, queued) = {
            let mut guard = self.inner.state.lock().await;
            let state = &mut *guard;
            self.check_live()?;
            if self.revision() != revision {
                return Err(FieldError::Superseded);
            }
            if let Some(resident) = state.cache.get(layer) {
                return Ok(resident.clone());
            }

            let current = state.schemas.current();
            if dense.schema().id() != current.id() || !current.same_fields(dense.schema().fields()) {
                dense.reindex(current);
                dirty = state.layout.indices().collect();
            }
            if state.layout != built_layout {
                dirty = state.layout.indices().collect();
            }

            let queued = self.inner.gateway.is_some() && !dirty.is_empty();
            if queued {
                state.dirty.mark_all(layer, dirty);
            }
            let snapshot = dense.clone();
            state.cache.insert(dense);
            if self.inner.gateway.is_some() {
                let evicted = state.cache.evict(&state.dirty, &state.in_flight, layer);
                if !evicted.is_empty() {
                    tracing::debug!(grid = %self.inner.id, evicted = ?evicted, "evicted resident layers");
                }
            }
            (snapshot, queued)
        };

        if queued {
            if persist_now {
                self.persist_layer_now(layer).await;
            } else {
                self.schedule_flush();
            }
        }
        Ok(snapshot)
    }

    /// Write the pending quadrants of one layer immediately. Failures stay
    /// queued for the next flush.
    async fn persist_layer_now(&self, layer: i32) {
        let _serial = self.inner.flush_lock.lock().await;
        let pending = self.inner.state.lock().await.dirty.take_layer(layer);
        if let Err(e) = self.persist_pending(pending).await {
            tracing::warn!(
                grid = %self.inner.id,
                layer,
                error = %e,
                "initial layer write incomplete, left queued"
            );
        }
    }
}

/// Decode a stored slice of `expected` values.
fn decode_slice(layer: i32, quadrant: u32, bytes: &[u8], expected: usize) -> Result<Vec<f32>, FieldError> {
    match codec::decode_f32s(bytes) {
        Ok(values) if values.len() == expected => Ok(values),
        _ => Err(FieldError::QuadrantMissing { layer, quadrant }),
    }
}

/// Write the non-zero overlay values of `entries` into `dense`. Returns the
/// number of channel values written.
fn apply_sparse<'a, I>(dense: &mut DenseLayer, entries: I, nucleus: Nucleus, geometry: &GridGeometry) -> usize
where
    I: Iterator<Item = (CellCoord, &'a FieldMap)>,
{
    let mut applied: usize = 0;
    for ((x, y, _), values) in entries {
        let (px, py) = map_cell_to_dense(nucleus, geometry, dense.width(), dense.height(), x, y);
        for (name, value) in values {
            if *value == 0.0 {
                continue;
            }
            let Some(channel) = dense.schema().channel(name) else {
                continue;
            };
            if dense.set(px, py, channel, *value).is_some() {
                applied = applied.saturating_add(1);
            }
        }
    }
    applied
}

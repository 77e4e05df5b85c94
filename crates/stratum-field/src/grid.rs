//! The field grid handle and its lifecycle.
//!
//! A [`FieldGrid`] owns one grid's schema, logical geometry, quadrant
//! layout, sparse overlay, resident layers, and pending writes. It is a
//! cheap handle: clones share the same state, so a spawned flush task and
//! any number of callers can hold it at once.
//!
//! # State and suspension
//!
//! All mutable state sits behind one [`tokio::sync::Mutex`] that is never
//! held across a gateway call. Work that suspends (materialization,
//! flushing) snapshots what it needs, releases the lock, talks to the
//! gateway, and re-checks the grid revision before touching state again.
//! Resizing and disposal bump the revision, so results computed against
//! the old shape are discarded instead of installed.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use stratum_db::{PersistenceGateway, Substore, codec, keys};
use stratum_types::{FieldMap, GridId, LayoutRecord, NucleusRecord, SchemaRecord, SparseCell};
use tokio::sync::Mutex;

use crate::cache::LayerCache;
use crate::dirty::DirtySet;
use crate::error::FieldError;
use crate::geometry::{Direction, GridGeometry, map_cell_to_dense};
use crate::nucleus::{Nucleus, pick_nucleus};
use crate::overlay::{Reprojection, SparseOverlayTable};
use crate::persist::{self, RetryPolicy};
use crate::quadrant::QuadrantLayout;
use crate::schema::{Schema, SchemaRegistry};
use crate::settings::GridSettings;
use crate::zero_template::{EnvironmentSource, ZeroTemplateProvider};

/// Everything needed to open a grid.
#[derive(Debug, Clone)]
pub struct GridOptions {
    /// Grid identifier.
    pub id: GridId,
    /// Logical grid geometry.
    pub geometry: GridGeometry,
    /// Propagation direction for nucleus selection.
    pub direction: Direction,
    /// Field names the schema should carry.
    pub fields: Vec<String>,
    /// Dense canvas and persistence settings.
    pub settings: GridSettings,
}

impl GridOptions {
    /// Options with a fresh id, `+X` direction, and default settings.
    pub fn new(geometry: GridGeometry, fields: Vec<String>) -> Self {
        Self {
            id: GridId::new(),
            geometry,
            direction: Direction::default(),
            fields,
            settings: GridSettings::default(),
        }
    }
}

/// Mutable grid state guarded by the grid lock.
#[derive(Debug)]
pub(crate) struct GridState {
    pub(crate) schemas: SchemaRegistry,
    pub(crate) geometry: GridGeometry,
    pub(crate) direction: Direction,
    pub(crate) layout: QuadrantLayout,
    pub(crate) nuclei: HashMap<i32, Nucleus>,
    pub(crate) overlay: SparseOverlayTable,
    pub(crate) cache: LayerCache,
    pub(crate) dirty: DirtySet,
    /// Quadrants taken by the running flush and not yet written.
    pub(crate) in_flight: DirtySet,
    pub(crate) field_max: FieldMap,
    pub(crate) base: HashMap<i32, Vec<f32>>,
}

impl GridState {
    /// Nucleus of `layer`, choosing it on first use. The flag is set when
    /// the nucleus was chosen by this call.
    pub(crate) fn nucleus(&mut self, layer: i32) -> (Nucleus, bool) {
        if let Some(nucleus) = self.nuclei.get(&layer) {
            return (*nucleus, false);
        }
        let nucleus = pick_nucleus(self.geometry.cells_x, self.geometry.cells_y, self.direction);
        self.nuclei.insert(layer, nucleus);
        (nucleus, true)
    }

    /// Mark every quadrant of every resident layer dirty.
    pub(crate) fn mark_resident_dirty(&mut self) {
        for layer in self.cache.layers() {
            self.dirty.mark_all(layer, self.layout.indices());
        }
    }

    fn layout_record(&self) -> LayoutRecord {
        LayoutRecord {
            dense_width: self.layout.width(),
            dense_height: self.layout.height(),
            quadrant_count: self.layout.count(),
            cells: self.geometry.cells(),
            spacing: self.geometry.spacing,
            origin: self.geometry.origin,
            direction: [self.direction.x, self.direction.y],
        }
    }
}

pub(crate) struct GridInner {
    pub(crate) id: GridId,
    pub(crate) settings: GridSettings,
    pub(crate) policy: RetryPolicy,
    pub(crate) gateway: Option<Arc<dyn PersistenceGateway>>,
    pub(crate) templates: ZeroTemplateProvider,
    /// Bumped whenever resident data stops matching the grid shape.
    pub(crate) revision: AtomicU64,
    pub(crate) disposed: AtomicBool,
    pub(crate) flush_scheduled: AtomicBool,
    /// Serializes flushes so quadrant writes never interleave.
    pub(crate) flush_lock: Mutex<()>,
    pub(crate) state: Mutex<GridState>,
}

/// Handle to one field grid.
#[derive(Clone)]
pub struct FieldGrid {
    pub(crate) inner: Arc<GridInner>,
}

impl fmt::Debug for FieldGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldGrid")
            .field("id", &self.inner.id)
            .field("backend", &self.backend())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

impl FieldGrid {
    /// Open a grid.
    ///
    /// With a gateway, the persisted schema record and layout are restored
    /// first, then the schema is evolved to `options.fields`. Without one
    /// the grid runs purely in memory.
    pub async fn open(
        options: GridOptions,
        gateway: Option<Arc<dyn PersistenceGateway>>,
        source: Arc<dyn EnvironmentSource>,
    ) -> Result<Self, FieldError> {
        let GridOptions {
            id,
            geometry,
            direction,
            fields,
            settings,
        } = options;
        let policy = RetryPolicy::from_settings(&settings);
        let mut layout = QuadrantLayout::new(
            settings.dense_width,
            settings.dense_height,
            settings.quadrant_count,
        )?;
        let mut schemas = SchemaRegistry::new();

        if let Some(gw) = gateway.as_deref() {
            let stored: Option<SchemaRecord> =
                persist::read_json(gw, Substore::Meta, keys::SCHEMA, policy).await?;
            if let Some(record) = stored {
                tracing::info!(
                    grid = %id,
                    schema_id = record.id,
                    fields = record.fields.len(),
                    "restored schema"
                );
                schemas = SchemaRegistry::restore(&record);
            }

            let stored: Option<LayoutRecord> =
                persist::read_json(gw, Substore::Meta, keys::LAYOUT, policy).await?;
            if let Some(record) = stored {
                layout = restore_layout(id, layout, &record);
            }
        }

        let evolved = schemas.evolve(&fields);
        let state = GridState {
            schemas,
            geometry,
            direction,
            layout,
            nuclei: HashMap::new(),
            overlay: SparseOverlayTable::new(),
            cache: LayerCache::new(settings.max_resident_layers),
            dirty: DirtySet::new(),
            in_flight: DirtySet::new(),
            field_max: FieldMap::new(),
            base: HashMap::new(),
        };
        let grid = Self {
            inner: Arc::new(GridInner {
                id,
                settings,
                policy,
                gateway,
                templates: ZeroTemplateProvider::new(source),
                revision: AtomicU64::new(0),
                disposed: AtomicBool::new(false),
                flush_scheduled: AtomicBool::new(false),
                flush_lock: Mutex::new(()),
                state: Mutex::new(state),
            }),
        };

        if let Some(schema) = evolved {
            tracing::info!(grid = %id, schema_id = schema.id(), fields = ?schema.fields(), "schema evolved");
            grid.persist_schema(&schema).await?;
        }
        grid.persist_layout().await?;

        tracing::info!(
            grid = %id,
            backend = grid.backend(),
            quadrants = layout.count(),
            "field grid opened"
        );
        Ok(grid)
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Grid identifier.
    pub fn id(&self) -> GridId {
        self.inner.id
    }

    /// Settings the grid was opened with.
    pub fn settings(&self) -> &GridSettings {
        &self.inner.settings
    }

    /// Name of the persistence backend, `"none"` when memory-only.
    pub fn backend(&self) -> &'static str {
        self.inner.gateway.as_ref().map_or("none", |gw| gw.backend())
    }

    /// Whether the grid has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    pub(crate) fn revision(&self) -> u64 {
        self.inner.revision.load(Ordering::Acquire)
    }

    pub(crate) fn check_live(&self) -> Result<(), FieldError> {
        if self.is_disposed() {
            Err(FieldError::Disposed)
        } else {
            Ok(())
        }
    }

    /// Current schema.
    pub async fn schema(&self) -> Arc<Schema> {
        self.inner.state.lock().await.schemas.current()
    }

    /// Current quadrant layout.
    pub async fn layout(&self) -> QuadrantLayout {
        self.inner.state.lock().await.layout
    }

    /// Current logical geometry.
    pub async fn geometry(&self) -> GridGeometry {
        self.inner.state.lock().await.geometry.clone()
    }

    /// Current propagation direction.
    pub async fn direction(&self) -> Direction {
        self.inner.state.lock().await.direction
    }

    /// Indices of the layers currently resident in memory.
    pub async fn resident_layers(&self) -> Vec<i32> {
        self.inner.state.lock().await.cache.layers()
    }

    /// Number of quadrants awaiting persistence.
    pub async fn pending_quadrants(&self) -> usize {
        self.inner.state.lock().await.dirty.len()
    }

    /// Nucleus of `layer` under the current geometry and direction.
    pub async fn nucleus(&self, layer: i32) -> Result<Nucleus, FieldError> {
        let (nucleus, chosen) = {
            let mut state = self.inner.state.lock().await;
            state.geometry.check_layer(layer)?;
            state.nucleus(layer)
        };
        if chosen {
            self.record_nucleus(layer, nucleus).await;
        }
        Ok(nucleus)
    }

    /// Dense pixel that logical cell `(x, y)` of `layer` maps to.
    pub async fn map_cell_to_dense(&self, layer: i32, x: i32, y: i32) -> Result<(u32, u32), FieldError> {
        let (pixel, nucleus, chosen) = {
            let mut guard = self.inner.state.lock().await;
            let state = &mut *guard;
            state.geometry.check_layer(layer)?;
            let (nucleus, chosen) = state.nucleus(layer);
            let pixel = map_cell_to_dense(
                nucleus,
                &state.geometry,
                state.layout.width(),
                state.layout.height(),
                x,
                y,
            );
            (pixel, nucleus, chosen)
        };
        if chosen {
            self.record_nucleus(layer, nucleus).await;
        }
        Ok(pixel)
    }

    // -----------------------------------------------------------------------
    // Sparse overlay
    // -----------------------------------------------------------------------

    /// Replace the overlay record of cell `(x, y, z)`. Only layers
    /// materialized afterwards see it.
    pub async fn set_sparse_cell(&self, x: i32, y: i32, z: i32, values: FieldMap) -> Result<(), FieldError> {
        self.check_live()?;
        let mut state = self.inner.state.lock().await;
        state.geometry.check_layer(z)?;
        state.overlay.set((x, y, z), values);
        Ok(())
    }

    /// Merge seed cells into the overlay. Returns how many were stored.
    pub async fn import_sparse(&self, cells: Vec<SparseCell>) -> Result<usize, FieldError> {
        self.check_live()?;
        let mut state = self.inner.state.lock().await;
        let total = cells.len();
        let depth = state.geometry.cells_z;
        let (inside, outside): (Vec<SparseCell>, Vec<SparseCell>) = cells
            .into_iter()
            .partition(|cell| u32::try_from(cell.z).is_ok_and(|z| z < depth));
        if !outside.is_empty() {
            tracing::warn!(
                grid = %self.inner.id,
                skipped = outside.len(),
                depth,
                "ignoring overlay cells outside the grid depth"
            );
        }
        let stored = state.overlay.import(inside);
        tracing::info!(grid = %self.inner.id, total, stored, "imported sparse overlay");
        Ok(stored)
    }

    /// Every overlay record.
    pub async fn sparse_entries(&self) -> Vec<SparseCell> {
        self.inner.state.lock().await.overlay.export()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Move to the schema over `fields` and return its id.
    ///
    /// Empty input or an unchanged ordered sequence is a no-op. Resident
    /// layers are reindexed at once and fully re-queued for persistence.
    /// A failure to persist the schema record is returned, but the
    /// in-memory change stays applied.
    pub async fn evolve_schema(&self, fields: &[String]) -> Result<u32, FieldError> {
        self.check_live()?;
        let evolved = {
            let mut guard = self.inner.state.lock().await;
            let state = &mut *guard;
            let Some(schema) = state.schemas.evolve(fields) else {
                return Ok(state.schemas.current().id());
            };
            for layer in state.cache.iter_mut() {
                layer.reindex(Arc::clone(&schema));
            }
            if self.inner.gateway.is_some() {
                state.mark_resident_dirty();
            }
            state
                .field_max
                .retain(|name, _| schema.channel(name).is_some());
            schema
        };
        tracing::info!(
            grid = %self.inner.id,
            schema_id = evolved.id(),
            fields = ?evolved.fields(),
            "schema evolved"
        );
        self.schedule_flush();
        self.persist_schema(&evolved).await?;
        Ok(evolved.id())
    }

    /// Change the logical geometry.
    ///
    /// Pending quadrants are flushed first and the resize is abandoned if
    /// that fails. The overlay is re-projected, and resident layers and
    /// nuclei are dropped; layers re-materialize from storage on next use.
    pub async fn resize(&self, geometry: GridGeometry) -> Result<Reprojection, FieldError> {
        self.check_live()?;
        self.flush().await?;
        let report = {
            let mut guard = self.inner.state.lock().await;
            let state = &mut *guard;
            let report = state.overlay.reproject(&state.geometry, &geometry);
            if !state.dirty.is_empty() {
                tracing::warn!(
                    grid = %self.inner.id,
                    pending = state.dirty.len(),
                    "discarding writes made while resizing"
                );
            }
            state.geometry = geometry;
            state.cache.clear();
            state.nuclei.clear();
            state.dirty.clear();
            self.inner.revision.fetch_add(1, Ordering::AcqRel);
            report
        };
        tracing::info!(
            grid = %self.inner.id,
            kept = report.kept,
            merged = report.merged,
            dropped = report.dropped,
            "grid resized"
        );
        self.persist_layout().await?;
        Ok(report)
    }

    /// Change the propagation direction. Nuclei are re-chosen on next use;
    /// resident layers keep their data.
    pub async fn set_direction(&self, direction: Direction) -> Result<(), FieldError> {
        self.check_live()?;
        {
            let mut state = self.inner.state.lock().await;
            state.direction = direction;
            state.nuclei.clear();
        }
        self.persist_layout().await
    }

    /// Re-partition every layer into `count` quadrants.
    ///
    /// Rebuilds and stores the zero template of the current schema for the
    /// new partition and re-queues every resident quadrant under it. Layers
    /// not resident are re-sliced when next materialized, using the
    /// partition recorded in their metadata.
    pub async fn repartition(&self, count: u32) -> Result<(), FieldError> {
        self.check_live()?;
        let target = {
            let state = self.inner.state.lock().await;
            QuadrantLayout::new(state.layout.width(), state.layout.height(), count)?
        };
        self.flush().await?;
        let schema = {
            let state = self.inner.state.lock().await;
            if state.layout == target {
                return Ok(());
            }
            state.schemas.current()
        };
        self.inner
            .templates
            .rebuild(self.inner.gateway.as_deref(), self.inner.policy, &schema, &target)
            .await?;
        let previous = {
            let mut state = self.inner.state.lock().await;
            let previous = state.layout.count();
            state.layout = target;
            if self.inner.gateway.is_some() {
                state.mark_resident_dirty();
            }
            previous
        };
        tracing::info!(
            grid = %self.inner.id,
            from = previous,
            to = count,
            "quadrant partition changed"
        );
        self.schedule_flush();
        self.persist_layout().await
    }

    /// Drop all in-memory state without flushing. Later calls fail with
    /// [`FieldError::Disposed`]; suspended ones discard their results.
    pub async fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.revision.fetch_add(1, Ordering::AcqRel);
        {
            let mut state = self.inner.state.lock().await;
            if !state.dirty.is_empty() {
                tracing::warn!(
                    grid = %self.inner.id,
                    pending = state.dirty.len(),
                    "disposing with unflushed quadrants"
                );
            }
            state.cache.clear();
            state.dirty.clear();
            state.nuclei.clear();
            state.base.clear();
        }
        self.inner.templates.clear().await;
        tracing::info!(grid = %self.inner.id, "field grid disposed");
    }

    /// Flush pending quadrants, then dispose. The grid is disposed even if
    /// the flush fails; the flush error is returned.
    pub async fn close(&self) -> Result<crate::flush::FlushReport, FieldError> {
        let flushed = self.flush().await;
        self.dispose().await;
        flushed
    }

    // -----------------------------------------------------------------------
    // Base distance samples
    // -----------------------------------------------------------------------

    /// Store quantized distance samples for `layer`.
    pub async fn put_base_distances(&self, layer: i32, distances: &[f32]) -> Result<(), FieldError> {
        self.check_live()?;
        self.inner.state.lock().await.geometry.check_layer(layer)?;
        let bytes = codec::encode_base_samples(distances);
        let quantized = codec::decode_base_samples(&bytes)?;
        self.inner.state.lock().await.base.insert(layer, quantized);
        if let Some(gw) = self.inner.gateway.as_deref() {
            persist::write_verified(gw, Substore::Base, &keys::layer(layer), &bytes, self.inner.policy)
                .await?;
        }
        Ok(())
    }

    /// Distance samples of `layer`, as stored (millimetre precision).
    pub async fn base_distances(&self, layer: i32) -> Result<Option<Vec<f32>>, FieldError> {
        self.check_live()?;
        {
            let state = self.inner.state.lock().await;
            state.geometry.check_layer(layer)?;
            if let Some(samples) = state.base.get(&layer) {
                return Ok(Some(samples.clone()));
            }
        }
        let Some(gw) = self.inner.gateway.as_deref() else {
            return Ok(None);
        };
        let Some(bytes) =
            persist::read_retried(gw, Substore::Base, &keys::layer(layer), self.inner.policy).await?
        else {
            return Ok(None);
        };
        let samples = codec::decode_base_samples(&bytes)?;
        self.inner
            .state
            .lock()
            .await
            .base
            .insert(layer, samples.clone());
        Ok(Some(samples))
    }

    // -----------------------------------------------------------------------
    // Metadata persistence
    // -----------------------------------------------------------------------

    async fn persist_schema(&self, schema: &Schema) -> Result<(), FieldError> {
        let Some(gw) = self.inner.gateway.as_deref() else {
            return Ok(());
        };
        persist::write_json(gw, Substore::Meta, keys::SCHEMA, &schema.to_record(), self.inner.policy)
            .await
            .map(|_| ())
    }

    pub(crate) async fn persist_layout(&self) -> Result<(), FieldError> {
        let Some(gw) = self.inner.gateway.as_deref() else {
            return Ok(());
        };
        let record = self.inner.state.lock().await.layout_record();
        persist::write_json(gw, Substore::Meta, keys::LAYOUT, &record, self.inner.policy)
            .await
            .map(|_| ())
    }

    /// Store the nucleus chosen for `layer`, warning if a different one was
    /// stored before. Failures only log.
    pub(crate) async fn record_nucleus(&self, layer: i32, nucleus: Nucleus) {
        let Some(gw) = self.inner.gateway.as_deref() else {
            return;
        };
        let record = {
            let state = self.inner.state.lock().await;
            nucleus.to_record(state.geometry.cells_x, state.geometry.cells_y, state.direction)
        };
        let key = keys::nucleus(layer);
        let previous: Result<Option<NucleusRecord>, FieldError> =
            persist::read_json(gw, Substore::Meta, &key, self.inner.policy).await;
        match previous {
            Ok(Some(previous)) if (previous.cx, previous.cy) != (record.cx, record.cy) => {
                tracing::warn!(
                    grid = %self.inner.id,
                    layer,
                    previous = ?(previous.cx, previous.cy),
                    current = ?(record.cx, record.cy),
                    "nucleus moved; stored quadrants keep their previous alignment"
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(grid = %self.inner.id, layer, error = %e, "previous nucleus unreadable");
            }
        }
        if let Err(e) = persist::write_json(gw, Substore::Meta, &key, &record, self.inner.policy).await {
            tracing::warn!(grid = %self.inner.id, layer, error = %e, "nucleus record not stored");
        }
    }
}

/// Quadrant layout to resume with, given the stored layout record.
fn restore_layout(id: GridId, configured: QuadrantLayout, record: &LayoutRecord) -> QuadrantLayout {
    if record.dense_width != configured.width() || record.dense_height != configured.height() {
        tracing::warn!(
            grid = %id,
            stored = ?(record.dense_width, record.dense_height),
            configured = ?(configured.width(), configured.height()),
            "stored layout has a different canvas size, ignoring it"
        );
        return configured;
    }
    match QuadrantLayout::new(configured.width(), configured.height(), record.quadrant_count) {
        Ok(restored) => {
            if restored != configured {
                tracing::info!(
                    grid = %id,
                    stored = restored.count(),
                    configured = configured.count(),
                    "resuming with stored quadrant count"
                );
            }
            restored
        }
        Err(e) => {
            tracing::warn!(grid = %id, error = %e, "stored layout unusable, ignoring it");
            configured
        }
    }
}

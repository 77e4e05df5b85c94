//! Cell-addressed writes and reads.
//!
//! A logical cell maps to one dense pixel through the layer nucleus. Writes
//! mutate the resident buffer synchronously, so reads observe them at once;
//! persistence follows through the debounced flush. Names outside the
//! current schema are ignored.

use stratum_types::FieldMap;

use crate::error::FieldError;
use crate::geometry::map_cell_to_dense;
use crate::grid::FieldGrid;

/// Attempts at finding the layer resident after materializing it. A layer
/// can be evicted or the grid resized between the two steps.
const WRITE_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    Set,
    Add,
}

impl FieldGrid {
    /// Overwrite the named channels of the pixel cell `(x, y)` of `layer`
    /// maps to.
    pub async fn set_dense_from_cell(
        &self,
        layer: i32,
        x: i32,
        y: i32,
        values: &FieldMap,
    ) -> Result<(), FieldError> {
        self.write_cell(layer, x, y, values, WriteMode::Set).await
    }

    /// Add `values` to the named channels of the pixel cell `(x, y)` of
    /// `layer` maps to.
    pub async fn add_dense_from_cell(
        &self,
        layer: i32,
        x: i32,
        y: i32,
        values: &FieldMap,
    ) -> Result<(), FieldError> {
        self.write_cell(layer, x, y, values, WriteMode::Add).await
    }

    async fn write_cell(
        &self,
        layer: i32,
        x: i32,
        y: i32,
        values: &FieldMap,
        mode: WriteMode,
    ) -> Result<(), FieldError> {
        for _ in 0..WRITE_ATTEMPTS {
            self.ensure_dense_layer(layer).await?;
            let (chosen, touched) = {
                let mut guard = self.inner.state.lock().await;
                let state = &mut *guard;
                self.check_live()?;
                let (nucleus, chosen) = state.nucleus(layer);
                let (px, py) = map_cell_to_dense(
                    nucleus,
                    &state.geometry,
                    state.layout.width(),
                    state.layout.height(),
                    x,
                    y,
                );
                let Some(dense) = state.cache.get_mut(layer) else {
                    continue;
                };
                let mut touched: usize = 0;
                for (name, value) in values {
                    let Some(channel) = dense.schema().channel(name) else {
                        tracing::debug!(grid = %self.inner.id, layer, field = %name, "ignoring unknown field");
                        continue;
                    };
                    let written = match mode {
                        WriteMode::Set => dense.set(px, py, channel, *value),
                        WriteMode::Add => dense.add(px, py, channel, *value),
                    };
                    if let Some(v) = written {
                        touched = touched.saturating_add(1);
                        let max = state.field_max.entry(name.clone()).or_insert(0.0);
                        *max = max.max(v.abs());
                    }
                }
                if touched > 0 && self.inner.gateway.is_some() {
                    state.dirty.mark(layer, state.layout.quadrant_index(px, py));
                }
                (chosen.then_some(nucleus), touched)
            };
            if let Some(nucleus) = chosen {
                self.record_nucleus(layer, nucleus).await;
            }
            if touched > 0 {
                self.schedule_flush();
            }
            return Ok(());
        }
        Err(FieldError::Superseded)
    }

    /// Current-schema values at the pixel cell `(x, y)` of `layer` maps to.
    pub async fn read_cell(&self, layer: i32, x: i32, y: i32) -> Result<FieldMap, FieldError> {
        let dense = self.ensure_dense_layer(layer).await?;
        let (px, py) = self.map_cell_to_dense(layer, x, y).await?;
        Ok(dense.pixel_values(px, py).unwrap_or_default())
    }

    /// Current-schema values at dense pixel `(px, py)` of `layer`, or
    /// `None` outside the canvas.
    pub async fn read_pixel(&self, layer: i32, px: u32, py: u32) -> Result<Option<FieldMap>, FieldError> {
        let dense = self.ensure_dense_layer(layer).await?;
        Ok(dense.pixel_values(px, py))
    }

    /// Largest magnitude written to `field` so far.
    pub async fn field_max(&self, field: &str) -> Option<f32> {
        self.inner.state.lock().await.field_max.get(field).copied()
    }

    /// Largest written magnitude of every field written so far.
    pub async fn field_maxima(&self) -> FieldMap {
        self.inner.state.lock().await.field_max.clone()
    }
}

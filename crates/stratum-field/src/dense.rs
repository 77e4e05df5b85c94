//! In-memory dense layer buffers.
//!
//! A layer is `width * height * channels` `f32`s, row-major with channels
//! interleaved per pixel, in the channel order of the schema it carries.
//! Buffers are shared copy-on-write, so handing a layer out of the cache
//! is cheap and later writes never show through an earlier snapshot.

use std::sync::Arc;

use stratum_types::FieldMap;

use crate::quadrant::{QuadrantLayout, Rect};
use crate::schema::Schema;
use crate::zero_template::ZeroTemplate;

/// One materialized depth slice of the field canvas.
#[derive(Debug, Clone)]
pub struct DenseLayer {
    layer: i32,
    width: u32,
    height: u32,
    schema: Arc<Schema>,
    #[allow(clippy::rc_buffer)]
    data: Arc<Vec<f32>>,
}

impl PartialEq for DenseLayer {
    fn eq(&self, other: &Self) -> bool {
        self.layer == other.layer
            && self.width == other.width
            && self.height == other.height
            && self.schema.same_fields(other.schema.fields())
            && self
                .data
                .iter()
                .zip(other.data.iter())
                .all(|(a, b)| a.to_bits() == b.to_bits())
            && self.data.len() == other.data.len()
    }
}

impl DenseLayer {
    /// All-zero layer.
    pub fn zeroed(layer: i32, width: u32, height: u32, schema: Arc<Schema>) -> Self {
        let len = pixel_count(width, height).saturating_mul(schema.channel_count());
        Self {
            layer,
            width,
            height,
            schema,
            data: Arc::new(vec![0.0; len]),
        }
    }

    /// Layer index.
    pub const fn layer(&self) -> i32 {
        self.layer
    }

    /// Canvas width in pixels.
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Canvas height in pixels.
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Schema whose channel order the buffer follows.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Raw interleaved buffer.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    fn channels(&self) -> usize {
        self.schema.channel_count()
    }

    fn offset(&self, px: u32, py: u32) -> Option<usize> {
        if px >= self.width || py >= self.height {
            return None;
        }
        let row = usize::try_from(py).ok()?.checked_mul(usize::try_from(self.width).ok()?)?;
        row.checked_add(usize::try_from(px).ok()?)?
            .checked_mul(self.channels())
    }

    /// Channel values of pixel `(px, py)`.
    pub fn pixel(&self, px: u32, py: u32) -> Option<&[f32]> {
        let start = self.offset(px, py)?;
        self.data.get(start..start.checked_add(self.channels())?)
    }

    /// Named values of pixel `(px, py)`.
    pub fn pixel_values(&self, px: u32, py: u32) -> Option<FieldMap> {
        let pixel = self.pixel(px, py)?;
        Some(
            self.schema
                .fields()
                .iter()
                .cloned()
                .zip(pixel.iter().copied())
                .collect(),
        )
    }

    fn pixel_mut(&mut self, px: u32, py: u32) -> Option<&mut [f32]> {
        let start = self.offset(px, py)?;
        let end = start.checked_add(self.channels())?;
        Arc::make_mut(&mut self.data).get_mut(start..end)
    }

    /// Overwrite channel `channel` of pixel `(px, py)`.
    pub fn set(&mut self, px: u32, py: u32, channel: usize, value: f32) -> Option<f32> {
        let slot = self.pixel_mut(px, py)?.get_mut(channel)?;
        *slot = value;
        Some(value)
    }

    /// Add `value` to channel `channel` of pixel `(px, py)`; returns the
    /// new value.
    pub fn add(&mut self, px: u32, py: u32, channel: usize, value: f32) -> Option<f32> {
        let slot = self.pixel_mut(px, py)?.get_mut(channel)?;
        *slot += value;
        Some(*slot)
    }

    /// Fill every quadrant region with its template values. Channels the
    /// template does not name keep their current value.
    pub fn paint_template(&mut self, layout: &QuadrantLayout, template: &ZeroTemplate) {
        for q in layout.indices() {
            let Some(values) = template.quadrant(q) else {
                continue;
            };
            let fills: Vec<(usize, f32)> = values
                .iter()
                .filter_map(|(name, v)| self.schema.channel(name).map(|c| (c, *v)))
                .collect();
            if fills.is_empty() {
                continue;
            }
            let rect = layout.region(q);
            for py in rect.y0..rect.y1 {
                for px in rect.x0..rect.x1 {
                    if let Some(pixel) = self.pixel_mut(px, py) {
                        for &(c, v) in &fills {
                            if let Some(slot) = pixel.get_mut(c) {
                                *slot = v;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Copy of the interleaved values inside `rect`, row by row.
    pub fn extract_region(&self, rect: Rect) -> Vec<f32> {
        let row_len = usize::try_from(rect.width())
            .unwrap_or(0)
            .saturating_mul(self.channels());
        let mut out = Vec::with_capacity(rect.area().saturating_mul(self.channels()));
        for py in rect.y0..rect.y1 {
            let Some(start) = self.offset(rect.x0, py) else {
                continue;
            };
            if let Some(row) = start
                .checked_add(row_len)
                .and_then(|end| self.data.get(start..end))
            {
                out.extend_from_slice(row);
            }
        }
        out
    }

    /// Write a slice produced by [`Self::extract_region`] back into
    /// `rect`. Returns `false`, leaving the buffer untouched, if the slice
    /// length does not fit the region.
    pub fn insert_region(&mut self, rect: Rect, slice: &[f32]) -> bool {
        let channels = self.channels();
        if slice.len() != rect.area().saturating_mul(channels) {
            return false;
        }
        let row_len = usize::try_from(rect.width())
            .unwrap_or(0)
            .saturating_mul(channels);
        if row_len == 0 {
            return true;
        }
        let mut starts = Vec::new();
        for py in rect.y0..rect.y1 {
            match self.offset(rect.x0, py) {
                Some(start) => starts.push(start),
                None => return false,
            }
        }
        let data = Arc::make_mut(&mut self.data);
        for (start, row) in starts.into_iter().zip(slice.chunks_exact(row_len)) {
            if let Some(dst) = start
                .checked_add(row_len)
                .and_then(|end| data.get_mut(start..end))
            {
                dst.copy_from_slice(row);
            }
        }
        true
    }

    /// Rewrite the buffer in the channel order of `schema`. Shared names
    /// keep their values, dropped names disappear, new names read zero.
    pub fn reindex(&mut self, schema: Arc<Schema>) {
        if self.schema.same_fields(schema.fields()) {
            self.schema = schema;
            return;
        }
        let pixels = pixel_count(self.width, self.height);
        let data = reindex_channels(&self.data, self.schema.fields(), &schema, pixels);
        self.data = Arc::new(data);
        self.schema = schema;
    }
}

/// Number of pixels on a `width` x `height` canvas.
pub fn pixel_count(width: u32, height: u32) -> usize {
    usize::try_from(u64::from(width).saturating_mul(u64::from(height))).unwrap_or(usize::MAX)
}

/// Convert `pixels` interleaved pixels from the channel order `from` into
/// the order of `to`.
pub fn reindex_channels(source: &[f32], from: &[String], to: &Schema, pixels: usize) -> Vec<f32> {
    let target_channels = to.channel_count();
    let mut out = vec![0.0; pixels.saturating_mul(target_channels)];
    if from.is_empty() || target_channels == 0 {
        return out;
    }
    // Target channel -> source channel, for names present in both.
    let mapping: Vec<(usize, usize)> = to
        .fields()
        .iter()
        .enumerate()
        .filter_map(|(dst, name)| from.iter().position(|f| f == name).map(|src| (dst, src)))
        .collect();
    for (dst_pixel, src_pixel) in out
        .chunks_exact_mut(target_channels)
        .zip(source.chunks_exact(from.len()))
    {
        for &(dst, src) in &mapping {
            if let (Some(d), Some(s)) = (dst_pixel.get_mut(dst), src_pixel.get(src)) {
                *d = *s;
            }
        }
    }
    out
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::float_cmp,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]
mod tests {
    use stratum_types::ZeroTemplateRecord;

    use super::*;

    fn schema(id: u32, names: &[&str]) -> Arc<Schema> {
        let fields: Vec<String> = names.iter().map(|s| (*s).to_owned()).collect();
        Arc::new(Schema::new(id, &fields))
    }

    #[test]
    fn set_add_and_read() {
        let mut layer = DenseLayer::zeroed(0, 8, 8, schema(1, &["O2", "CO2"]));
        assert_eq!(layer.data().len(), 128);
        layer.set(3, 2, 1, 4.0).unwrap();
        assert_eq!(layer.add(3, 2, 1, 1.5), Some(5.5));
        assert_eq!(layer.pixel(3, 2).unwrap(), &[0.0, 5.5]);
        assert_eq!(layer.pixel_values(3, 2).unwrap()["CO2"], 5.5);
        assert!(layer.set(8, 0, 0, 1.0).is_none());
        assert!(layer.set(0, 0, 2, 1.0).is_none());
    }

    #[test]
    fn snapshots_are_copy_on_write() {
        let mut layer = DenseLayer::zeroed(0, 4, 4, schema(1, &["O2"]));
        let snapshot = layer.clone();
        layer.set(1, 1, 0, 9.0).unwrap();
        assert_eq!(snapshot.pixel(1, 1).unwrap(), &[0.0]);
        assert_eq!(layer.pixel(1, 1).unwrap(), &[9.0]);
        assert_ne!(layer, snapshot);
    }

    #[test]
    fn region_round_trip() {
        let layout = QuadrantLayout::new(10, 10, 4).unwrap();
        let mut layer = DenseLayer::zeroed(0, 10, 10, schema(1, &["O2", "N2"]));
        for py in 0..10 {
            for px in 0..10 {
                layer.set(px, py, 0, f32::from(u8::try_from(px).unwrap())).unwrap();
                layer.set(px, py, 1, f32::from(u8::try_from(py).unwrap())).unwrap();
            }
        }
        let rect = layout.region(3);
        let slice = layer.extract_region(rect);
        assert_eq!(slice.len(), rect.area() * 2);

        let mut blank = DenseLayer::zeroed(0, 10, 10, schema(1, &["O2", "N2"]));
        assert!(blank.insert_region(rect, &slice));
        assert_eq!(blank.pixel(7, 8).unwrap(), &[7.0, 8.0]);
        assert_eq!(blank.pixel(2, 2).unwrap(), &[0.0, 0.0]);
        assert!(!blank.insert_region(rect, &slice[1..]));
    }

    #[test]
    fn template_paint_fills_regions() {
        let s = schema(1, &["O2", "CO2"]);
        let layout = QuadrantLayout::new(4, 4, 4).unwrap();
        let mut quadrants = vec![FieldMap::new(); 4];
        quadrants[3].insert("CO2".to_owned(), 2.0);
        quadrants[0].insert("Ar".to_owned(), 1.0);
        let template = ZeroTemplate::from_record(
            ZeroTemplateRecord {
                schema_id: 1,
                quadrant_count: 4,
                quadrants,
            },
            4,
            4,
        )
        .unwrap();
        let mut layer = DenseLayer::zeroed(0, 4, 4, s);
        layer.paint_template(&layout, &template);
        assert_eq!(layer.pixel(3, 3).unwrap(), &[0.0, 2.0]);
        assert_eq!(layer.pixel(2, 2).unwrap(), &[0.0, 2.0]);
        assert_eq!(layer.pixel(1, 1).unwrap(), &[0.0, 0.0]);
    }

    #[test]
    fn reindex_keeps_shared_names() {
        let mut layer = DenseLayer::zeroed(0, 2, 2, schema(1, &["O2", "CO2", "H2O"]));
        layer.set(1, 0, 0, 5.0).unwrap();
        layer.set(1, 0, 1, 7.0).unwrap();
        layer.reindex(schema(2, &["N2", "O2"]));
        assert_eq!(layer.schema().id(), 2);
        assert_eq!(layer.data().len(), 8);
        assert_eq!(layer.pixel(1, 0).unwrap(), &[0.0, 5.0]);
    }

    #[test]
    fn reindex_from_or_to_empty_schema() {
        let empty: Vec<String> = Vec::new();
        let out = reindex_channels(&[], &empty, &schema(1, &["O2"]), 4);
        assert_eq!(out, vec![0.0; 4]);
        let out = reindex_channels(&[1.0, 2.0], &["O2".to_owned()], &Schema::new(2, &empty), 2);
        assert!(out.is_empty());
    }
}

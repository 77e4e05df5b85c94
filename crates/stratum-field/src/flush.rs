//! Dirty-quadrant flushing.
//!
//! Writes mark quadrants dirty and arm a single debounce timer per grid.
//! When it fires (or when [`FieldGrid::flush`] is called) the whole dirty
//! set is swapped out, each quadrant is sliced from its resident buffer and
//! written with read-back verification, and the layer metadata follows.
//! Writes arriving meanwhile accumulate in the fresh set. The swapped-out
//! quadrants are held as in flight until the writes settle, so their layers
//! are never evicted mid-flush.
//!
//! Quadrants that still fail after the retry bound are put back into the
//! dirty set and the flush returns
//! [`FieldError::PersistenceWriteFailure`]. Nothing re-arms the timer on
//! failure; the quadrants go out with the next explicit flush or the next
//! write's debounce.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use chrono::Utc;
use stratum_db::{Substore, codec, keys};
use stratum_types::LayerMeta;

use crate::dirty::DirtySet;
use crate::error::FieldError;
use crate::grid::FieldGrid;
use crate::persist;

/// What a flush wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Quadrant slices written and verified.
    pub quadrants: usize,
    /// Layer metadata records written.
    pub layers: usize,
    /// Most attempts any single write needed.
    pub max_attempts: u32,
}

impl FlushReport {
    fn record(&mut self, attempts: u32) {
        self.max_attempts = self.max_attempts.max(attempts);
    }
}

struct SliceJob {
    layer: i32,
    quadrant: u32,
    bytes: Vec<u8>,
}

impl FieldGrid {
    /// Persist every pending quadrant now.
    pub async fn flush(&self) -> Result<FlushReport, FieldError> {
        self.check_live()?;
        let _serial = self.inner.flush_lock.lock().await;
        let pending = self.inner.state.lock().await.dirty.take();
        self.persist_pending(pending).await
    }

    /// Arm the debounce timer unless it already is. No-op without a
    /// gateway.
    pub(crate) fn schedule_flush(&self) {
        if self.inner.gateway.is_none() || self.is_disposed() {
            return;
        }
        if self.inner.flush_scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        let delay = self.inner.settings.flush_debounce;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.flush_scheduled.store(false, Ordering::Release);
            let grid = Self { inner };
            if grid.is_disposed() {
                return;
            }
            match grid.flush().await {
                Ok(report) => {
                    tracing::debug!(
                        grid = %grid.id(),
                        quadrants = report.quadrants,
                        layers = report.layers,
                        "debounced flush complete"
                    );
                }
                Err(e) => {
                    tracing::error!(grid = %grid.id(), error = %e, "debounced flush failed");
                }
            }
        });
    }

    /// Write `pending` and re-queue whatever fails. The caller holds the
    /// flush lock.
    pub(crate) async fn persist_pending(&self, pending: DirtySet) -> Result<FlushReport, FieldError> {
        let mut report = FlushReport::default();
        if pending.is_empty() {
            return Ok(report);
        }
        let Some(gw) = self.inner.gateway.as_deref() else {
            return Ok(report);
        };
        let policy = self.inner.policy;

        let revision = self.revision();
        let (jobs, metas) = {
            let mut guard = self.inner.state.lock().await;
            let state = &mut *guard;
            let layout = state.layout;
            state.in_flight.merge(pending.clone());
            let mut jobs = Vec::with_capacity(pending.len());
            let mut metas: BTreeMap<i32, LayerMeta> = BTreeMap::new();
            for (layer, quadrant) in pending.iter() {
                let Some(dense) = state.cache.peek(layer) else {
                    tracing::warn!(
                        grid = %self.inner.id,
                        layer,
                        quadrant,
                        "dirty quadrant has no resident layer, dropping"
                    );
                    continue;
                };
                let slice = dense.extract_region(layout.region(quadrant));
                jobs.push(SliceJob {
                    layer,
                    quadrant,
                    bytes: codec::encode_f32s(&slice),
                });
                metas.entry(layer).or_insert_with(|| LayerMeta {
                    schema_id: dense.schema().id(),
                    field_names: dense.schema().fields().to_vec(),
                    quadrant_count: layout.count(),
                    updated_at: Utc::now(),
                });
            }
            (jobs, metas)
        };

        let mut failed = DirtySet::new();
        let mut failed_keys: Vec<String> = Vec::new();
        for job in &jobs {
            let key = keys::quadrant(job.layer, job.quadrant);
            match persist::write_verified(gw, Substore::Overlay, &key, &job.bytes, policy).await {
                Ok(attempts) => {
                    report.quadrants = report.quadrants.saturating_add(1);
                    report.record(attempts);
                }
                Err(e) => {
                    tracing::error!(
                        grid = %self.inner.id,
                        layer = job.layer,
                        quadrant = job.quadrant,
                        error = %e,
                        "quadrant write failed"
                    );
                    failed.mark(job.layer, job.quadrant);
                    failed_keys.push(persist::describe(Substore::Overlay, &key));
                }
            }
        }

        for (layer, meta) in &metas {
            let key = keys::layer(*layer);
            match persist::write_json(gw, Substore::OverlayMeta, &key, meta, policy).await {
                Ok(attempts) => {
                    report.layers = report.layers.saturating_add(1);
                    report.record(attempts);
                }
                Err(e) => {
                    tracing::error!(grid = %self.inner.id, layer, error = %e, "layer metadata write failed");
                    // Re-send the layer's slices with the metadata next time.
                    failed.mark_all(
                        *layer,
                        jobs.iter().filter(|j| j.layer == *layer).map(|j| j.quadrant),
                    );
                    failed_keys.push(persist::describe(Substore::OverlayMeta, &key));
                }
            }
        }

        if failed.is_empty() {
            self.inner.state.lock().await.in_flight.clear();
            tracing::debug!(
                grid = %self.inner.id,
                quadrants = report.quadrants,
                layers = report.layers,
                max_attempts = report.max_attempts,
                "flush complete"
            );
            return Ok(report);
        }

        let requeued = failed.len();
        {
            let mut state = self.inner.state.lock().await;
            state.in_flight.clear();
            if self.revision() == revision && !self.is_disposed() {
                state.dirty.merge(failed);
            }
        }
        tracing::error!(
            grid = %self.inner.id,
            requeued,
            written = report.quadrants,
            "flush incomplete, failed quadrants re-queued"
        );
        Err(FieldError::PersistenceWriteFailure {
            keys: failed_keys,
            attempts: policy.max_attempts,
        })
    }
}

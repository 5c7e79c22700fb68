use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use kestrel_macros::profile;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use crate::index::entity::{EntityBatch, Tick};
use crate::index::grid::{BufferView, GridBuffer, GridLayout, RegionId};
use crate::index::stats::IndexStats;

/// A region's current snapshot could not be replaced because another update
/// is still in flight. The tick should be skipped, not retried.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UpdateBusy;

impl std::fmt::Display for UpdateBusy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("region update already in progress")
    }
}

/// Double-buffered spatial snapshots for one region.
///
/// Readers clone the active buffer's `Arc` under a read lock held for
/// nanoseconds; the writer fills a shadow buffer with no lock held at all and
/// swaps it in with a single pointer exchange. Neither side ever waits for
/// the other's work.
///
/// # Publish Protocol
///
/// 1. `begin_update` claims the writer slot, failing fast with [`UpdateBusy`]
///    if an update is already in flight
/// 2. [`ShadowWriter::clear_and_fill`] indexes the tick's batch into the
///    shadow buffer, off to the side
/// 3. [`ShadowWriter::publish`] swaps the shadow buffer in as the active one
///
/// Dropping a writer without publishing abandons the update: the shadow
/// buffer returns to the spare slot and the region keeps serving the previous
/// generation.
///
/// # Example
///
/// ```rust,ignore
/// let grid = registry.get_or_create(RegionId(7));
/// if let Ok(mut writer) = grid.begin_update(tick) {
///     writer.clear_and_fill(&batch);
///     writer.publish();
/// }
/// // Readers, on any thread:
/// let view = grid.snapshot();
/// ```
pub struct RegionGrid {
    region: RegionId,
    layout: GridLayout,
    active: RwLock<Arc<GridBuffer>>,
    /// Recycled previous generation, reused by the next update
    spare: Mutex<Option<GridBuffer>>,
    updating: AtomicBool,
    published_tick: AtomicU64,
    stats: Arc<IndexStats>,
}

impl RegionGrid {
    pub(crate) fn new(region: RegionId, layout: GridLayout, stats: Arc<IndexStats>) -> Self {
        debug!(
            "Region {:?} grid initialized: {}x{} cells, cell size {}",
            region,
            layout.cols(),
            layout.rows(),
            layout.cell_size()
        );

        Self {
            region,
            layout,
            active: RwLock::new(Arc::new(GridBuffer::new(layout))),
            spare: Mutex::new(Some(GridBuffer::new(layout))),
            updating: AtomicBool::new(false),
            published_tick: AtomicU64::new(0),
            stats,
        }
    }

    pub fn region(&self) -> RegionId {
        self.region
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    /// Tick of the most recent publish. Zero until the first one lands.
    pub fn published_tick(&self) -> Tick {
        Tick(self.published_tick.load(Ordering::Acquire))
    }

    /// Whether a writer currently holds the update slot.
    pub fn is_updating(&self) -> bool {
        self.updating.load(Ordering::Relaxed)
    }

    /// Latest published buffer. Never blocks on an in-flight update.
    pub fn snapshot(&self) -> BufferView {
        BufferView::new(self.active.read().clone())
    }

    /// Claim the region's single writer slot for this tick.
    ///
    /// Fails fast when an update is already in flight; the caller is expected
    /// to drop the tick and try again next cycle. Never blocks.
    pub fn begin_update(self: &Arc<Self>, tick: Tick) -> Result<ShadowWriter, UpdateBusy> {
        if self.updating.swap(true, Ordering::Acquire) {
            self.stats.record_busy_skip();
            trace!("region {:?} busy at tick {}, skipping", self.region, tick.0);
            return Err(UpdateBusy);
        }

        let buffer = self
            .spare
            .lock()
            .take()
            .unwrap_or_else(|| GridBuffer::new(self.layout));

        Ok(ShadowWriter { grid: Arc::clone(self), buffer: Some(buffer), tick })
    }
}

/// Exclusive fill handle for one region update.
///
/// Holds the only mutable reference to the shadow buffer; the structure makes
/// writes to a published buffer unrepresentable rather than merely forbidden.
pub struct ShadowWriter {
    grid: Arc<RegionGrid>,
    buffer: Option<GridBuffer>,
    tick: Tick,
}

impl ShadowWriter {
    pub fn tick(&self) -> Tick {
        self.tick
    }

    pub fn region(&self) -> RegionId {
        self.grid.region
    }

    /// Replace the shadow buffer's contents with this tick's batch.
    ///
    /// Pure computation on owned data; no lock is held while indexing.
    #[profile]
    pub fn clear_and_fill(&mut self, batch: &EntityBatch) {
        if let Some(buffer) = self.buffer.as_mut() {
            buffer.refill(batch, self.tick);
        }
    }

    /// Swap the filled buffer in as the region's active snapshot.
    ///
    /// The write lock is held only for the pointer exchange. Readers holding
    /// older views keep them; the displaced generation is recycled once the
    /// last such view goes away, or dropped if one is still live.
    pub fn publish(mut self) -> Tick {
        let Some(buffer) = self.buffer.take() else {
            return self.tick;
        };
        let entity_count = buffer.len();

        let displaced = {
            let mut active = self.grid.active.write();
            std::mem::replace(&mut *active, Arc::new(buffer))
        };
        self.grid.published_tick.store(self.tick.0, Ordering::Release);

        if let Ok(old_buffer) = Arc::try_unwrap(displaced) {
            *self.grid.spare.lock() = Some(old_buffer);
        }

        self.grid.stats.record_publish();
        self.grid.updating.store(false, Ordering::Release);
        crate::profile_log!(
            self.tick,
            "[PUBLISH] Region: {:?} | Tick: {} | Entities: {}",
            self.grid.region,
            self.tick.0,
            entity_count
        );
        trace!(
            "region {:?} published tick {} with {} entities",
            self.grid.region,
            self.tick.0,
            entity_count
        );
        self.tick
    }
}

impl Drop for ShadowWriter {
    fn drop(&mut self) {
        // Only reached when publish() was never called
        if let Some(buffer) = self.buffer.take() {
            *self.grid.spare.lock() = Some(buffer);
            self.grid.stats.record_abandoned();
            self.grid.updating.store(false, Ordering::Release);
            warn!(
                "region {:?} update at tick {} abandoned without publish",
                self.grid.region, self.tick.0
            );
        }
    }
}

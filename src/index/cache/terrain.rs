use std::collections::hash_map::Entry;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::index::cache::{CellCoord, Stamped};
use crate::index::grid::RegionId;
use crate::index::host::{HostError, TerrainInfo};
use crate::index::math::WorldPos;
use crate::index::stats::CacheCounters;

/// Cache of terrain samples, keyed by coarse cell.
///
/// Terrain changes rarely (destructible walls, raised platforms), so the TTL
/// is long and explicit invalidation does the real work. Samples inside one
/// cell are treated as interchangeable; the cell size matches the grid.
pub struct TerrainCache {
    entries: RwLock<FxHashMap<(RegionId, CellCoord), Stamped<TerrainInfo>>>,
    ttl: Duration,
    cell_size: f32,
    counters: CacheCounters,
}

impl TerrainCache {
    pub(crate) fn new(ttl: Duration, cell_size: f32) -> Self {
        Self {
            entries: RwLock::new(FxHashMap::default()),
            ttl,
            cell_size,
            counters: CacheCounters::new(),
        }
    }

    pub fn counters(&self) -> &CacheCounters {
        &self.counters
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Terrain at a position, fetching through `fetch` on a miss.
    ///
    /// The fetch runs with no lock held. When two workers miss the same cell
    /// at once both fetch, and the first insert wins; the loser returns the
    /// winner's value so every caller in a cell sees one answer.
    pub fn get_with<F>(
        &self,
        region: RegionId,
        pos: WorldPos,
        fetch: F,
    ) -> Result<TerrainInfo, HostError>
    where
        F: FnOnce() -> Result<TerrainInfo, HostError>,
    {
        self.get_with_at(region, pos, Instant::now(), fetch)
    }

    pub(crate) fn get_with_at<F>(
        &self,
        region: RegionId,
        pos: WorldPos,
        now: Instant,
        fetch: F,
    ) -> Result<TerrainInfo, HostError>
    where
        F: FnOnce() -> Result<TerrainInfo, HostError>,
    {
        let key = (region, CellCoord::quantize(pos, self.cell_size));

        {
            let entries = self.entries.read();
            if let Some(entry) = entries.get(&key) {
                if entry.is_fresh(self.ttl, now) {
                    self.counters.hit();
                    return Ok(entry.value);
                }
            }
        }
        self.counters.miss();

        // Host call with no lock held; a failure is returned as-is and
        // nothing is cached for it.
        let info = fetch()?;

        let mut entries = self.entries.write();
        match entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_fresh(self.ttl, now) {
                    Ok(occupied.get().value)
                } else {
                    occupied.insert(Stamped::at(info, now));
                    Ok(info)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Stamped::at(info, now));
                Ok(info)
            }
        }
    }

    /// Drop the cached sample for the cell containing `pos`.
    pub fn invalidate_cell(&self, region: RegionId, pos: WorldPos) {
        let key = (region, CellCoord::quantize(pos, self.cell_size));
        if self.entries.write().remove(&key).is_some() {
            self.counters.invalidated(1);
        }
    }

    /// Drop every cached sample in every region.
    pub fn invalidate_all(&self) {
        let mut entries = self.entries.write();
        let dropped = entries.len();
        entries.clear();
        self.counters.invalidated(dropped as u64);
    }
}

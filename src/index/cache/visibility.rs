use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::index::cache::{CellCoord, Stamped};
use crate::index::grid::RegionId;
use crate::index::host::HostError;
use crate::index::math::WorldPos;
use crate::index::stats::CacheCounters;

/// Order-independent key for one sight line.
///
/// Both endpoints quantize to coarse cells and the pair is stored sorted, so
/// A-sees-B and B-sees-A share one entry by construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct SightKey {
    region: RegionId,
    a: CellCoord,
    b: CellCoord,
}

impl SightKey {
    fn new(region: RegionId, from: WorldPos, to: WorldPos, precision: f32) -> Self {
        let p = CellCoord::quantize(from, precision);
        let q = CellCoord::quantize(to, precision);
        let (a, b) = if p <= q { (p, q) } else { (q, p) };
        Self { region, a, b }
    }

    fn same_cell(&self) -> bool {
        self.a == self.b
    }
}

/// Cache of line-of-sight answers between coarse cells.
///
/// Visibility goes stale fast (doors, moving occluders), so the TTL is short
/// and the map is capped: when full, expired entries are purged first and the
/// oldest survivor is evicted if that was not enough.
pub struct VisibilityCache {
    entries: RwLock<FxHashMap<SightKey, Stamped<bool>>>,
    ttl: Duration,
    precision: f32,
    capacity: usize,
    counters: CacheCounters,
}

impl VisibilityCache {
    pub(crate) fn new(ttl: Duration, precision: f32, capacity: usize) -> Self {
        Self {
            entries: RwLock::new(FxHashMap::default()),
            ttl,
            precision,
            capacity,
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

    /// Whether `from` can see `to`, fetching through `fetch` on a miss.
    ///
    /// Endpoints in the same coarse cell are near enough that the answer is
    /// always yes; that path touches neither the map nor the host.
    pub fn get_with<F>(
        &self,
        region: RegionId,
        from: WorldPos,
        to: WorldPos,
        fetch: F,
    ) -> Result<bool, HostError>
    where
        F: FnOnce() -> Result<bool, HostError>,
    {
        self.get_with_at(region, from, to, Instant::now(), fetch)
    }

    pub(crate) fn get_with_at<F>(
        &self,
        region: RegionId,
        from: WorldPos,
        to: WorldPos,
        now: Instant,
        fetch: F,
    ) -> Result<bool, HostError>
    where
        F: FnOnce() -> Result<bool, HostError>,
    {
        let key = SightKey::new(region, from, to, self.precision);
        if key.same_cell() {
            self.counters.hit();
            return Ok(true);
        }

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

        let visible = fetch()?;

        let mut entries = self.entries.write();
        if let Some(entry) = entries.get(&key) {
            if entry.is_fresh(self.ttl, now) {
                return Ok(entry.value);
            }
        }
        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            Self::make_room(&mut entries, self.ttl, now, &self.counters);
        }
        entries.insert(key, Stamped::at(visible, now));
        Ok(visible)
    }

    /// Purge expired entries; evict the single oldest survivor if the map is
    /// still at capacity.
    fn make_room(
        entries: &mut FxHashMap<SightKey, Stamped<bool>>,
        ttl: Duration,
        now: Instant,
        counters: &CacheCounters,
    ) {
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh(ttl, now));
        let purged = before - entries.len();
        if purged > 0 {
            counters.evicted(purged as u64);
            return;
        }

        if let Some(oldest) = entries
            .iter()
            .min_by_key(|(_, entry)| entry.stored_at)
            .map(|(key, _)| *key)
        {
            entries.remove(&oldest);
            counters.evicted(1);
        }
    }

    /// Drop every cached sight line with an endpoint inside the circle.
    pub fn invalidate_region(&self, region: RegionId, center: WorldPos, radius: f32) {
        let radius_sq = radius * radius;
        let precision = self.precision;
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|key, _| {
            key.region != region
                || (key.a.center(precision).planar_distance_squared(center) > radius_sq
                    && key.b.center(precision).planar_distance_squared(center) > radius_sq)
        });
        let dropped = before - entries.len();
        if dropped > 0 {
            self.counters.invalidated(dropped as u64);
        }
    }
}

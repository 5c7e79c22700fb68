use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::index::cache::CellCoord;
use crate::index::grid::RegionId;
use crate::index::host::{HostError, MoverProfile, PathResult};
use crate::index::math::WorldPos;
use crate::index::stats::CacheCounters;

/// Key for one planned route. Direction matters (slopes, one-way drops), so
/// unlike sight keys these are not symmetric. The mover profile is part of
/// the key: a swimmer's route must never be served to a walker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct PathKey {
    region: RegionId,
    src: CellCoord,
    dst: CellCoord,
    profile: MoverProfile,
}

struct PathEntry {
    result: PathResult,
    stamp: Instant,
    /// Recency marker; matches the newest queue pair for this key
    seq: u64,
}

/// Map plus recency bookkeeping, kept coherent under one lock.
struct PathCacheInner {
    entries: FxHashMap<PathKey, PathEntry>,
    /// Lazy recency queue: every hit or insert pushes a fresh (key, seq)
    /// pair; pairs whose seq no longer matches their entry are skipped on
    /// pop and swept once the queue outgrows the map
    recency: VecDeque<(PathKey, u64)>,
    next_seq: u64,
}

impl PathCacheInner {
    fn evict_lru(&mut self, counters: &CacheCounters) {
        while let Some((key, seq)) = self.recency.pop_front() {
            let live = self.entries.get(&key).map_or(false, |entry| entry.seq == seq);
            if live {
                self.entries.remove(&key);
                counters.evicted(1);
                return;
            }
        }
    }

    fn maybe_compact(&mut self) {
        if self.recency.len() > self.entries.len() * 4 + 16 {
            let entries = &self.entries;
            self.recency
                .retain(|(key, seq)| entries.get(key).map_or(false, |entry| entry.seq == *seq));
        }
    }
}

/// Bounded LRU cache of planned routes.
///
/// Paths are the most expensive host answer, so entries are reused for a
/// medium TTL, and the strict capacity bound means a worker storm cannot
/// balloon memory: inserting into a full cache evicts exactly the
/// least-recently-used route.
pub struct PathCache {
    inner: Mutex<PathCacheInner>,
    ttl: Duration,
    precision: f32,
    capacity: usize,
    counters: CacheCounters,
}

impl PathCache {
    pub(crate) fn new(ttl: Duration, precision: f32, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(PathCacheInner {
                entries: FxHashMap::default(),
                recency: VecDeque::new(),
                next_seq: 0,
            }),
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
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Route between two points, planning through `fetch` on a miss.
    pub fn get_with<F>(
        &self,
        region: RegionId,
        src: WorldPos,
        dst: WorldPos,
        profile: MoverProfile,
        fetch: F,
    ) -> Result<PathResult, HostError>
    where
        F: FnOnce() -> Result<PathResult, HostError>,
    {
        self.get_with_at(region, src, dst, profile, Instant::now(), fetch)
    }

    pub(crate) fn get_with_at<F>(
        &self,
        region: RegionId,
        src: WorldPos,
        dst: WorldPos,
        profile: MoverProfile,
        now: Instant,
        fetch: F,
    ) -> Result<PathResult, HostError>
    where
        F: FnOnce() -> Result<PathResult, HostError>,
    {
        let key = PathKey {
            region,
            src: CellCoord::quantize(src, self.precision),
            dst: CellCoord::quantize(dst, self.precision),
            profile,
        };

        {
            let mut inner = self.inner.lock();
            let seq = inner.next_seq;
            if let Some(entry) = inner.entries.get_mut(&key) {
                if now.duration_since(entry.stamp) < self.ttl {
                    entry.seq = seq;
                    let result = entry.result.clone();
                    inner.next_seq = seq + 1;
                    inner.recency.push_back((key, seq));
                    inner.maybe_compact();
                    self.counters.hit();
                    return Ok(result);
                }
            }
        }
        self.counters.miss();

        // Plan with no lock held
        let result = fetch()?;

        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq = seq + 1;

        // Another worker may have finished the same plan while we held no
        // lock; the first insert wins
        if let Some(entry) = inner.entries.get_mut(&key) {
            if now.duration_since(entry.stamp) < self.ttl {
                entry.seq = seq;
                let winner = entry.result.clone();
                inner.recency.push_back((key, seq));
                inner.maybe_compact();
                return Ok(winner);
            }
        }

        let replacing = inner.entries.contains_key(&key);
        if !replacing && inner.entries.len() >= self.capacity {
            inner.evict_lru(&self.counters);
        }
        inner
            .entries
            .insert(key, PathEntry { result: result.clone(), stamp: now, seq });
        inner.recency.push_back((key, seq));
        inner.maybe_compact();
        Ok(result)
    }

    /// Drop every cached route that starts in, ends in, or passes through
    /// the circle.
    pub fn invalidate_region(&self, region: RegionId, center: WorldPos, radius: f32) {
        let precision = self.precision;
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|key, entry| {
            key.region != region || !path_touches_circle(key, entry, center, radius, precision)
        });
        let dropped = before - inner.entries.len();
        if dropped > 0 {
            self.counters.invalidated(dropped as u64);
        }
    }
}

fn path_touches_circle(
    key: &PathKey,
    entry: &PathEntry,
    center: WorldPos,
    radius: f32,
    precision: f32,
) -> bool {
    let radius_sq = radius * radius;
    if key.src.center(precision).planar_distance_squared(center) <= radius_sq {
        return true;
    }
    if key.dst.center(precision).planar_distance_squared(center) <= radius_sq {
        return true;
    }
    let waypoints = &entry.result.waypoints;
    match waypoints.len() {
        0 => false,
        1 => waypoints[0].planar_distance_squared(center) <= radius_sq,
        _ => waypoints
            .windows(2)
            .any(|seg| center.planar_distance_to_segment(seg[0], seg[1]) <= radius),
    }
}

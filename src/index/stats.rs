use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Hit/miss accounting for one cache. All counters are monotonic and relaxed;
/// they feed diagnostics, never control flow.
#[derive(Debug, Default)]
pub struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
}

impl CacheCounters {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn evicted(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn invalidated(&self, count: u64) {
        self.invalidations.fetch_add(count, Ordering::Relaxed);
    }

    pub fn summary(&self) -> CacheSummary {
        CacheSummary {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of one cache's counters at a point in time.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct CacheSummary {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub invalidations: u64,
}

impl CacheSummary {
    /// Hit fraction over all lookups, 0.0 when the cache was never consulted.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Index-wide counters shared by the facade and every region grid.
#[derive(Debug, Default)]
pub struct IndexStats {
    updates_published: AtomicU64,
    updates_skipped_busy: AtomicU64,
    updates_abandoned: AtomicU64,
    host_failures: AtomicU64,
    oversized_queries: AtomicU64,
}

impl IndexStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_publish(&self) {
        self.updates_published.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_busy_skip(&self) {
        self.updates_skipped_busy.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_abandoned(&self) {
        self.updates_abandoned.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_host_failure(&self) {
        self.host_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_oversized_query(&self) {
        self.oversized_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn oversized_queries(&self) -> u64 {
        self.oversized_queries.load(Ordering::Relaxed)
    }

    /// Fold the grid counters together with per-cache summaries collected by
    /// the facade.
    pub fn summary(
        &self,
        terrain: CacheSummary,
        visibility: CacheSummary,
        path: CacheSummary,
    ) -> StatsSummary {
        StatsSummary {
            updates_published: self.updates_published.load(Ordering::Relaxed),
            updates_skipped_busy: self.updates_skipped_busy.load(Ordering::Relaxed),
            updates_abandoned: self.updates_abandoned.load(Ordering::Relaxed),
            host_failures: self.host_failures.load(Ordering::Relaxed),
            oversized_queries: self.oversized_queries.load(Ordering::Relaxed),
            terrain,
            visibility,
            path,
        }
    }
}

/// Point-in-time view of every counter the index keeps.
/// Serializable so drivers can log it wholesale.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct StatsSummary {
    pub updates_published: u64,
    pub updates_skipped_busy: u64,
    pub updates_abandoned: u64,
    pub host_failures: u64,
    pub oversized_queries: u64,
    pub terrain: CacheSummary,
    pub visibility: CacheSummary,
    pub path: CacheSummary,
}

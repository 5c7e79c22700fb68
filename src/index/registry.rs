use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use crate::index::grid::{GridLayout, RegionGrid, RegionId};
use crate::index::stats::IndexStats;

/// Tracks which regions currently have a grid.
///
/// Regions appear the first time the host publishes for them and disappear
/// when the host unloads them. Handles are reference-counted: a worker that
/// resolved a region just before removal keeps a working (if stale) grid
/// until it lets go.
pub struct GridRegistry {
    grids: DashMap<RegionId, Arc<RegionGrid>>,
    layout: GridLayout,
    stats: Arc<IndexStats>,
}

impl GridRegistry {
    pub(crate) fn new(layout: GridLayout, stats: Arc<IndexStats>) -> Self {
        Self { grids: DashMap::new(), layout, stats }
    }

    /// Grid for a region, created on first reference.
    pub fn get_or_create(&self, region: RegionId) -> Arc<RegionGrid> {
        self.grids
            .entry(region)
            .or_insert_with(|| {
                info!("Region {:?} registered with the index", region);
                Arc::new(RegionGrid::new(region, self.layout, Arc::clone(&self.stats)))
            })
            .clone()
    }

    /// Grid for a region, or None when the host never published one.
    pub fn get(&self, region: RegionId) -> Option<Arc<RegionGrid>> {
        self.grids.get(&region).map(|entry| entry.value().clone())
    }

    /// Drop a region from the registry.
    ///
    /// Outstanding handles stay valid; new lookups return None.
    pub fn remove(&self, region: RegionId) -> Option<Arc<RegionGrid>> {
        self.grids.remove(&region).map(|(_, grid)| {
            info!("Region {:?} unloaded from the index", region);
            grid
        })
    }

    pub fn len(&self) -> usize {
        self.grids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grids.is_empty()
    }

    pub fn region_ids(&self) -> Vec<RegionId> {
        self.grids.iter().map(|entry| *entry.key()).collect()
    }
}

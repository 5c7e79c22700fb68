use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use kestrel_macros::profile;
use tracing::{debug, warn};

use crate::index::cache::{PathCache, TerrainCache, VisibilityCache};
use crate::index::config::{ConfigError, IndexConfig};
use crate::index::entity::{EntityId, EntityKind, EntitySnapshot, KindMask, Tick};
use crate::index::grid::{BufferView, GridLayout, RegionId, ShadowWriter, UpdateBusy};
use crate::index::host::{HostError, MoverProfile, PathResult, TerrainInfo, WorldHost};
use crate::index::math::WorldPos;
use crate::index::registry::GridRegistry;
use crate::index::stats::{IndexStats, StatsSummary};

/// Shared world state for every agent worker on a host.
///
/// One `WorldIndex` serves a whole process: the host simulation publishes
/// per-region entity snapshots through [`begin_update`](Self::begin_update),
/// and any number of worker threads read through the query methods. Readers
/// never block the writer and never observe a half-built generation; terrain,
/// sight-line and path answers are memoized so that hundreds of workers do
/// not hammer the host with near-identical questions.
///
/// # Concurrency
///
/// Every query method takes `&self` and is safe to call from any thread.
/// Writer methods are fail-fast: a second `begin_update` for a region whose
/// update is still in flight returns [`UpdateBusy`] instead of blocking.
pub struct WorldIndex {
    config: IndexConfig,
    registry: GridRegistry,
    terrain: TerrainCache,
    visibility: VisibilityCache,
    path: PathCache,
    stats: Arc<IndexStats>,
    host: Arc<dyn WorldHost>,
    radius_warned: AtomicBool,
}

impl WorldIndex {
    /// Build the index around a validated configuration and a host backend.
    pub fn new(config: IndexConfig, host: Arc<dyn WorldHost>) -> Result<Self, ConfigError> {
        config.validate()?;

        let layout = GridLayout::new(config.map_width, config.map_height, config.cell_size);
        let stats = Arc::new(IndexStats::new());
        debug!(
            "World index initialized: {}x{} cells per region, cell size {}",
            layout.cols(),
            layout.rows(),
            layout.cell_size()
        );

        Ok(Self {
            registry: GridRegistry::new(layout, Arc::clone(&stats)),
            terrain: TerrainCache::new(
                Duration::from_secs_f32(config.terrain_ttl_secs),
                config.cell_size,
            ),
            visibility: VisibilityCache::new(
                Duration::from_secs_f32(config.visibility_ttl_secs),
                config.visibility_precision,
                config.visibility_cache_capacity,
            ),
            path: PathCache::new(
                Duration::from_secs_f32(config.path_ttl_secs),
                config.path_precision,
                config.path_cache_capacity,
            ),
            stats,
            host,
            config,
            radius_warned: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    // ===== Upstream: host simulation =====

    /// Start rebuilding a region's snapshot for `tick`.
    ///
    /// The region grid is created on first reference. Returns [`UpdateBusy`]
    /// when the previous update for this region has not published yet; the
    /// host should skip the tick and try again on the next one.
    pub fn begin_update(&self, region: RegionId, tick: Tick) -> Result<ShadowWriter, UpdateBusy> {
        self.registry.get_or_create(region).begin_update(tick)
    }

    /// Forget a region's grid. Only call once the host guarantees no further
    /// updates for it; readers holding a view keep their last generation.
    pub fn remove_region(&self, region: RegionId) {
        self.registry.remove(region);
    }

    /// Drop the cached terrain sample covering `pos`.
    pub fn invalidate_terrain_cell(&self, region: RegionId, pos: WorldPos) {
        self.terrain.invalidate_cell(region, pos);
    }

    /// Drop every cached terrain sample, all regions.
    pub fn invalidate_all_terrain(&self) {
        self.terrain.invalidate_all();
    }

    /// Tell the index that geometry changed inside a circle: a door, a
    /// destroyed wall, a spawned obstacle. Sight lines with an endpoint in
    /// the circle and paths crossing it are dropped so the next query asks
    /// the host again.
    pub fn geometry_changed(&self, region: RegionId, center: WorldPos, radius: f32) {
        self.visibility.invalidate_region(region, center, radius);
        self.path.invalidate_region(region, center, radius);
    }

    // ===== Downstream: agent workers =====

    /// The region's current published snapshot, for callers that want several
    /// lookups against one consistent generation. None when the host never
    /// published this region.
    pub fn snapshot(&self, region: RegionId) -> Option<BufferView> {
        self.registry.get(region).map(|grid| grid.snapshot())
    }

    /// Live entities within `radius` of `center`, filtered by kind.
    ///
    /// Unordered. Distance is exact 3-D distance; the grid only pre-filters
    /// by horizontal cell. An unknown region yields an empty vec.
    pub fn query_nearby(
        &self,
        region: RegionId,
        center: WorldPos,
        radius: f32,
        mask: KindMask,
    ) -> Vec<EntitySnapshot> {
        let Some(view) = self.snapshot(region) else {
            return Vec::new();
        };
        self.collect_in_radius(&view, center, radius, mask)
            .into_iter()
            .map(|(_, snapshot)| snapshot)
            .collect()
    }

    /// Like [`query_nearby`](Self::query_nearby), ascending by distance.
    #[profile]
    pub fn query_nearby_sorted(
        &self,
        region: RegionId,
        center: WorldPos,
        radius: f32,
        mask: KindMask,
    ) -> Vec<EntitySnapshot> {
        let Some(view) = self.snapshot(region) else {
            return Vec::new();
        };
        let mut found = self.collect_in_radius(&view, center, radius, mask);
        found.sort_by(|a, b| a.0.total_cmp(&b.0));
        found.into_iter().map(|(_, snapshot)| snapshot).collect()
    }

    /// Distance between two entities resolved against one buffer generation.
    ///
    /// None when either id is absent from the region's current snapshot
    /// (never indexed, despawned, or the region is unknown).
    pub fn distance_between(&self, region: RegionId, a: EntityId, b: EntityId) -> Option<f32> {
        let view = self.snapshot(region)?;
        let pa = view.entity(a)?.pos;
        let pb = view.entity(b)?.pos;
        Some(pa.distance(pb))
    }

    /// Terrain sample at a position, memoized per grid cell.
    pub fn terrain_at(&self, region: RegionId, pos: WorldPos) -> Result<TerrainInfo, HostError> {
        let result = self
            .terrain
            .get_with(region, pos, || self.host.terrain_sample(region, pos));
        if result.is_err() {
            self.stats.record_host_failure();
        }
        result
    }

    /// Whether `a` can see `b`, memoized symmetrically at coarse precision.
    pub fn has_line_of_sight(
        &self,
        region: RegionId,
        a: WorldPos,
        b: WorldPos,
    ) -> Result<bool, HostError> {
        let result = self
            .visibility
            .get_with(region, a, b, || self.host.line_of_sight(region, a, b));
        if result.is_err() {
            self.stats.record_host_failure();
        }
        result
    }

    /// Route from `src` to `dst` for a mover profile, memoized at coarse
    /// precision with strict LRU eviction.
    pub fn find_path(
        &self,
        region: RegionId,
        src: WorldPos,
        dst: WorldPos,
        profile: MoverProfile,
    ) -> Result<PathResult, HostError> {
        let result = self.path.get_with(region, src, dst, profile, || {
            self.host.plan_path(region, src, dst, profile)
        });
        if result.is_err() {
            self.stats.record_host_failure();
        }
        result
    }

    /// Point-in-time copy of every counter the index keeps.
    pub fn stats(&self) -> StatsSummary {
        self.stats.summary(
            self.terrain.counters().summary(),
            self.visibility.counters().summary(),
            self.path.counters().summary(),
        )
    }

    // ===== Internals =====

    /// Walk the cells covered by the query circle and keep matching
    /// snapshots with their squared distance.
    fn collect_in_radius(
        &self,
        view: &BufferView,
        center: WorldPos,
        radius: f32,
        mask: KindMask,
    ) -> Vec<(f32, EntitySnapshot)> {
        if mask.is_empty() {
            return Vec::new();
        }
        let radius = self.clamp_radius(radius);
        let radius_sq = radius * radius;
        let layout = *view.layout();
        let rect = layout.cell_range(center, radius);

        let mut found = Vec::new();
        for row in rect.min_row..=rect.max_row {
            for col in rect.min_col..=rect.max_col {
                let cell = view.cell(row * layout.cols() + col);
                if cell.is_empty() {
                    continue;
                }
                for kind in EntityKind::ALL {
                    if !mask.contains(kind) {
                        continue;
                    }
                    for snapshot in cell.of_kind(kind) {
                        if !snapshot.alive {
                            continue;
                        }
                        let dist_sq = snapshot.pos.distance_squared(center);
                        if dist_sq <= radius_sq {
                            found.push((dist_sq, *snapshot));
                        }
                    }
                }
            }
        }
        found
    }

    /// Cap the radius at the configured maximum. The first clamp is logged;
    /// after that only the counter moves.
    fn clamp_radius(&self, radius: f32) -> f32 {
        let max = self.config.max_query_radius;
        if radius > max {
            self.stats.record_oversized_query();
            if !self.radius_warned.swap(true, Ordering::Relaxed) {
                warn!("Query radius {} clamped to configured maximum {}", radius, max);
            }
            max
        } else {
            radius.max(0.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::entity::{EffectState, EntityBatch, EntityDetail, PropKind, PropState};
    use crate::index::host::PathQuality;
    use smallvec::smallvec;

    /// Host stub answering every query with a constant.
    struct FlatHost;

    impl WorldHost for FlatHost {
        fn terrain_sample(&self, _: RegionId, _: WorldPos) -> Result<TerrainInfo, HostError> {
            Ok(TerrainInfo { height: 0.0, liquid: false })
        }

        fn line_of_sight(&self, _: RegionId, _: WorldPos, _: WorldPos) -> Result<bool, HostError> {
            Ok(true)
        }

        fn plan_path(
            &self,
            _: RegionId,
            src: WorldPos,
            dst: WorldPos,
            _: MoverProfile,
        ) -> Result<PathResult, HostError> {
            Ok(PathResult::from_waypoints(smallvec![src, dst], PathQuality::Complete))
        }
    }

    fn index() -> WorldIndex {
        WorldIndex::new(IndexConfig::default(), Arc::new(FlatHost)).unwrap()
    }

    fn prop_at(id: u64, x: f32, y: f32) -> EntitySnapshot {
        EntitySnapshot {
            id: EntityId(id),
            pos: WorldPos::planar(x, y),
            alive: true,
            seen_tick: Tick(1),
            detail: EntityDetail::Prop(PropState { kind: PropKind::Door, in_use: false }),
        }
    }

    #[test]
    fn unknown_region_is_empty_not_an_error() {
        let index = index();
        let region = RegionId(42);
        let center = WorldPos::ZERO;

        assert!(index.query_nearby(region, center, 50.0, KindMask::ALL).is_empty());
        assert!(index.snapshot(region).is_none());
        assert!(index.distance_between(region, EntityId(1), EntityId(2)).is_none());
    }

    #[test]
    fn empty_mask_short_circuits() {
        let index = index();
        let region = RegionId(1);

        let mut batch = EntityBatch::new();
        batch.push(prop_at(1, 0.0, 0.0));
        let mut writer = index.begin_update(region, Tick(1)).unwrap();
        writer.clear_and_fill(&batch);
        writer.publish();

        let found = index.query_nearby(region, WorldPos::ZERO, 50.0, KindMask::NONE);
        assert!(found.is_empty(), "an empty mask must match nothing");
    }

    #[test]
    fn oversized_radius_is_clamped_and_counted() {
        let index = index();
        let region = RegionId(1);
        let max = index.config().max_query_radius;

        let mut batch = EntityBatch::new();
        batch.push(prop_at(1, 0.0, 0.0));
        batch.push(prop_at(2, max + 100.0, 0.0));
        let mut writer = index.begin_update(region, Tick(1)).unwrap();
        writer.clear_and_fill(&batch);
        writer.publish();

        let found = index.query_nearby(region, WorldPos::ZERO, max * 10.0, KindMask::ALL);
        assert_eq!(found.len(), 1, "entities past the clamp must not appear");
        assert_eq!(index.stats().oversized_queries, 1);

        index.query_nearby_sorted(region, WorldPos::ZERO, max * 10.0, KindMask::ALL);
        assert_eq!(index.stats().oversized_queries, 2);
    }

    #[test]
    fn negative_and_nan_radii_yield_nothing() {
        let index = index();
        let region = RegionId(1);

        let mut batch = EntityBatch::new();
        batch.push(prop_at(1, 10.0, 0.0));
        let mut writer = index.begin_update(region, Tick(1)).unwrap();
        writer.clear_and_fill(&batch);
        writer.publish();

        assert!(index.query_nearby(region, WorldPos::ZERO, -5.0, KindMask::ALL).is_empty());
        assert!(index
            .query_nearby(region, WorldPos::ZERO, f32::NAN, KindMask::ALL)
            .is_empty());
        assert_eq!(index.stats().oversized_queries, 0, "bad radii are not oversized");
    }

    #[test]
    fn kind_mask_narrows_results() {
        let index = index();
        let region = RegionId(1);

        let mut batch = EntityBatch::new();
        batch.push(prop_at(1, 5.0, 0.0));
        batch.push(EntitySnapshot {
            id: EntityId(2),
            pos: WorldPos::planar(-5.0, 0.0),
            alive: true,
            seen_tick: Tick(1),
            detail: EntityDetail::Effect(EffectState { radius: 3.0, source: None }),
        });
        let mut writer = index.begin_update(region, Tick(1)).unwrap();
        writer.clear_and_fill(&batch);
        writer.publish();

        let props = index.query_nearby(region, WorldPos::ZERO, 50.0, EntityKind::Prop.into());
        assert_eq!(props.len(), 1);
        assert_eq!(props[0].id, EntityId(1));

        let both = index.query_nearby(
            region,
            WorldPos::ZERO,
            50.0,
            KindMask::from(EntityKind::Prop) | KindMask::from(EntityKind::Effect),
        );
        assert_eq!(both.len(), 2);
    }
}

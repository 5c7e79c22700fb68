/// Tests for cache behavior observed through the facade
///
/// A counting host records how often the index actually asks it anything:
/// 1. Terrain answers are shared per cell, sight lines are shared per
///    direction-insensitive key, paths per coarse (src, dst, profile) key
/// 2. Host failures surface to the caller once and are never cached
/// 3. Geometry-change notifications force refetches where they should
/// 4. The path cache holds its strict capacity through the facade

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use kestrel::index::{
    HostError, IndexConfig, MoverProfile, PathQuality, PathResult, RegionId, TerrainInfo,
    WorldHost, WorldIndex, WorldPos,
};

#[derive(Default)]
struct CountingHost {
    terrain_calls: AtomicU32,
    los_calls: AtomicU32,
    path_calls: AtomicU32,
    terrain_down: AtomicBool,
}

impl CountingHost {
    fn terrain_calls(&self) -> u32 {
        self.terrain_calls.load(Ordering::SeqCst)
    }
    fn los_calls(&self) -> u32 {
        self.los_calls.load(Ordering::SeqCst)
    }
    fn path_calls(&self) -> u32 {
        self.path_calls.load(Ordering::SeqCst)
    }
}

impl WorldHost for CountingHost {
    fn terrain_sample(&self, _: RegionId, pos: WorldPos) -> Result<TerrainInfo, HostError> {
        self.terrain_calls.fetch_add(1, Ordering::SeqCst);
        if self.terrain_down.load(Ordering::SeqCst) {
            return Err(HostError::Unavailable("terrain service offline"));
        }
        Ok(TerrainInfo { height: pos.x * 0.5, liquid: false })
    }

    fn line_of_sight(&self, _: RegionId, a: WorldPos, b: WorldPos) -> Result<bool, HostError> {
        self.los_calls.fetch_add(1, Ordering::SeqCst);
        Ok(a.planar_distance_squared(b) < 150.0 * 150.0)
    }

    fn plan_path(
        &self,
        _: RegionId,
        src: WorldPos,
        dst: WorldPos,
        _: MoverProfile,
    ) -> Result<PathResult, HostError> {
        self.path_calls.fetch_add(1, Ordering::SeqCst);
        Ok(PathResult::from_waypoints(smallvec::smallvec![src, dst], PathQuality::Complete))
    }
}

fn counting_index(config: IndexConfig) -> (WorldIndex, Arc<CountingHost>) {
    let host = Arc::new(CountingHost::default());
    let index = WorldIndex::new(config, Arc::clone(&host) as Arc<dyn WorldHost>)
        .expect("config is valid");
    (index, host)
}

const REGION: RegionId = RegionId(1);

#[test]
fn test_terrain_is_shared_per_cell() {
    let (index, host) = counting_index(IndexConfig::default());

    let first = index.terrain_at(REGION, WorldPos::planar(1.0, 1.0)).unwrap();
    assert_eq!(host.terrain_calls(), 1);

    // Same 25-unit cell: answered from cache, including the cached height
    let second = index.terrain_at(REGION, WorldPos::planar(20.0, 20.0)).unwrap();
    assert_eq!(host.terrain_calls(), 1, "same cell must not ask the host again");
    assert_eq!(second.height, first.height);

    index.terrain_at(REGION, WorldPos::planar(60.0, 60.0)).unwrap();
    assert_eq!(host.terrain_calls(), 2, "a new cell costs one host call");

    let stats = index.stats();
    assert_eq!(stats.terrain.hits, 1);
    assert_eq!(stats.terrain.misses, 2);
    println!("✓ Terrain: 3 queries, 2 host calls");
}

#[test]
fn test_sight_lines_are_direction_insensitive() {
    let (index, host) = counting_index(IndexConfig::default());
    let a = WorldPos::planar(0.0, 0.0);
    let b = WorldPos::planar(50.0, 0.0);

    let forward = index.has_line_of_sight(REGION, a, b).unwrap();
    assert!(forward, "50 units is inside the stub's sight range");
    assert_eq!(host.los_calls(), 1);

    let reverse = index.has_line_of_sight(REGION, b, a).unwrap();
    assert_eq!(reverse, forward);
    assert_eq!(host.los_calls(), 1, "the reverse direction is the same question");
}

#[test]
fn test_same_cell_positions_skip_the_host() {
    let (index, host) = counting_index(IndexConfig::default());

    // Both inside one 2.5-unit coarse cell
    let visible = index
        .has_line_of_sight(REGION, WorldPos::planar(0.5, 0.5), WorldPos::planar(1.0, 1.0))
        .unwrap();
    assert!(visible);
    assert_eq!(host.los_calls(), 0, "adjacent positions resolve without the host");
}

#[test]
fn test_host_failure_propagates_and_is_not_cached() {
    let (index, host) = counting_index(IndexConfig::default());
    let pos = WorldPos::planar(10.0, 10.0);

    host.terrain_down.store(true, Ordering::SeqCst);
    let err = index.terrain_at(REGION, pos);
    assert!(matches!(err, Err(HostError::Unavailable(_))));
    assert_eq!(host.terrain_calls(), 1);
    assert_eq!(index.stats().host_failures, 1);

    // Service recovers: the next query goes straight back to the host
    host.terrain_down.store(false, Ordering::SeqCst);
    let ok = index.terrain_at(REGION, pos);
    assert!(ok.is_ok(), "a failure must not leave a poisoned entry behind");
    assert_eq!(host.terrain_calls(), 2);

    // And now it is cached like any other answer
    index.terrain_at(REGION, pos).unwrap();
    assert_eq!(host.terrain_calls(), 2);
    assert_eq!(index.stats().host_failures, 1, "only the failing call counted");
    println!("✓ Failure surfaced once, recovery cached normally");
}

#[test]
fn test_geometry_change_drops_affected_answers() {
    let (index, host) = counting_index(IndexConfig::default());
    let a = WorldPos::planar(0.0, 0.0);
    let b = WorldPos::planar(50.0, 0.0);

    index.has_line_of_sight(REGION, a, b).unwrap();
    assert_eq!(host.los_calls(), 1);

    let src = WorldPos::planar(-100.0, 0.0);
    let dst = WorldPos::planar(100.0, 0.0);
    index.find_path(REGION, src, dst, MoverProfile::default()).unwrap();
    // A far-away route that must survive the invalidation below
    let far_src = WorldPos::planar(0.0, 500.0);
    let far_dst = WorldPos::planar(100.0, 500.0);
    index.find_path(REGION, far_src, far_dst, MoverProfile::default()).unwrap();
    assert_eq!(host.path_calls(), 2);

    // A door closed at (25, 0): the sight line and the crossing route go
    index.geometry_changed(REGION, WorldPos::planar(25.0, 0.0), 30.0);

    index.has_line_of_sight(REGION, a, b).unwrap();
    assert_eq!(host.los_calls(), 2, "invalidated sight line must refetch");

    index.find_path(REGION, src, dst, MoverProfile::default()).unwrap();
    assert_eq!(host.path_calls(), 3, "the crossing route must replan");

    index.find_path(REGION, far_src, far_dst, MoverProfile::default()).unwrap();
    assert_eq!(host.path_calls(), 3, "the distant route must survive");

    // A different region is untouched by that region's geometry
    index.has_line_of_sight(RegionId(2), a, b).unwrap();
    assert_eq!(host.los_calls(), 3);
    index.geometry_changed(REGION, WorldPos::planar(25.0, 0.0), 30.0);
    index.has_line_of_sight(RegionId(2), a, b).unwrap();
    assert_eq!(host.los_calls(), 3, "region 2's sight line must stay cached");
}

#[test]
fn test_terrain_invalidation_is_cell_scoped() {
    let (index, host) = counting_index(IndexConfig::default());
    let near = WorldPos::planar(1.0, 1.0);
    let far = WorldPos::planar(200.0, 200.0);

    index.terrain_at(REGION, near).unwrap();
    index.terrain_at(REGION, far).unwrap();
    assert_eq!(host.terrain_calls(), 2);

    index.invalidate_terrain_cell(REGION, near);
    index.terrain_at(REGION, near).unwrap();
    assert_eq!(host.terrain_calls(), 3, "the invalidated cell must refetch");
    index.terrain_at(REGION, far).unwrap();
    assert_eq!(host.terrain_calls(), 3, "other cells keep their samples");

    index.invalidate_all_terrain();
    index.terrain_at(REGION, near).unwrap();
    index.terrain_at(REGION, far).unwrap();
    assert_eq!(host.terrain_calls(), 5, "a full flush refetches everything");
}

#[test]
fn test_path_cache_respects_strict_capacity() {
    let config = IndexConfig { path_cache_capacity: 2, ..IndexConfig::default() };
    let (index, host) = counting_index(config);
    let profile = MoverProfile::default();
    let dst = WorldPos::planar(0.0, 900.0);
    let src = |i: f32| WorldPos::planar(i * 100.0, 0.0);

    index.find_path(REGION, src(0.0), dst, profile).unwrap();
    index.find_path(REGION, src(1.0), dst, profile).unwrap();
    assert_eq!(host.path_calls(), 2);

    // Third distinct route evicts the least recently used (route 0)
    index.find_path(REGION, src(2.0), dst, profile).unwrap();
    assert_eq!(host.path_calls(), 3);

    index.find_path(REGION, src(0.0), dst, profile).unwrap();
    assert_eq!(host.path_calls(), 4, "route 0 was evicted and must replan");

    // Route 2 survived both evictions and is still warm
    index.find_path(REGION, src(2.0), dst, profile).unwrap();
    assert_eq!(host.path_calls(), 4);

    let stats = index.stats();
    assert_eq!(stats.path.evictions, 2);
    println!("✓ Path cache held {} entries through {} requests", 2, 5);
}

#[test]
fn test_profiles_do_not_share_routes() {
    let (index, host) = counting_index(IndexConfig::default());
    let src = WorldPos::planar(0.0, 0.0);
    let dst = WorldPos::planar(300.0, 0.0);
    let walker = MoverProfile::default();
    let flyer = MoverProfile { can_swim: false, can_fly: true };

    index.find_path(REGION, src, dst, walker).unwrap();
    index.find_path(REGION, src, dst, flyer).unwrap();
    assert_eq!(host.path_calls(), 2, "each profile plans its own route");

    index.find_path(REGION, src, dst, walker).unwrap();
    index.find_path(REGION, src, dst, flyer).unwrap();
    assert_eq!(host.path_calls(), 2, "both entries stay warm independently");
}

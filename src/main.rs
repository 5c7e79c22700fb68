use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rand::{rng, Rng};
use smallvec::smallvec;
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use kestrel::index::{
    mobile_flags, CreatureClass, EntityBatch, EntityDetail, EntityId, EntityKind, EntitySnapshot,
    HostError, IndexConfig, KindMask, MobileState, MoverProfile, PathQuality, PathResult, PropKind,
    PropState, RegionId, TerrainInfo, Tick, WorldHost, WorldIndex, WorldPos,
};

const REGION_COUNT: u32 = 4;
const MOBILES_PER_REGION: usize = 1500;
const PROPS_PER_REGION: usize = 200;
const READER_THREADS: usize = 6;
const TICK_INTERVAL: Duration = Duration::from_millis(50);

fn setup_file_logging() -> String {
    // Create logs directory if it doesn't exist
    let log_dir = PathBuf::from("logs");
    if !log_dir.exists() {
        fs::create_dir_all(&log_dir).expect("Failed to create logs directory");
    }

    // Clean up old log files, keeping only the last 25
    cleanup_old_logs(&log_dir, 25);

    // Generate timestamped filename
    let now = chrono::Local::now();
    let log_filename = format!("kestrel_{}.log", now.format("%Y%m%d_%H%M%S"));
    let log_file_path = log_dir.join(&log_filename);
    let log_path_str = log_file_path.to_string_lossy().to_string();

    // Create file appender with timestamped filename
    let file_appender = RollingFileAppender::new(
        Rotation::NEVER, // Don't rotate during a single run
        &log_dir,
        &log_filename,
    );

    // Create a formatting layer for the file
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false); // No ANSI colors in file

    // Create a formatting layer for stdout (minimal)
    let stdout_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(false);

    // Set up the subscriber with both layers
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("kestrel=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    log_path_str
}

fn cleanup_old_logs(log_dir: &PathBuf, keep_count: usize) {
    if let Ok(entries) = fs::read_dir(log_dir) {
        let mut log_files: Vec<_> = entries
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|s| s.starts_with("kestrel") && s.ends_with(".log"))
                    .unwrap_or(false)
            })
            .collect();

        // Sort by modified time (oldest first)
        log_files.sort_by_key(|e| e.metadata().ok().and_then(|m| m.modified().ok()));

        // Delete oldest files if we exceed keep_count
        if log_files.len() > keep_count {
            for file in log_files.iter().take(log_files.len() - keep_count) {
                let _ = fs::remove_file(file.path());
            }
        }
    }
}

// ===== Synthetic host =====

/// Stand-in for the host simulation's expensive lookups: sinusoidal terrain,
/// circular occluders for sight lines, and a one-sidestep pather.
struct SyntheticHost {
    occluders: Vec<(WorldPos, f32)>,
}

impl SyntheticHost {
    fn new(extent: f32) -> Self {
        let mut rng = rng();
        let occluders = (0..48)
            .map(|_| {
                let center = WorldPos::planar(
                    rng.random_range(-extent..extent),
                    rng.random_range(-extent..extent),
                );
                (center, rng.random_range(15.0..70.0))
            })
            .collect();
        Self { occluders }
    }

    fn blocked(&self, a: WorldPos, b: WorldPos) -> bool {
        self.occluders
            .iter()
            .any(|(center, radius)| center.planar_distance_to_segment(a, b) < *radius)
    }
}

impl WorldHost for SyntheticHost {
    fn terrain_sample(&self, _region: RegionId, pos: WorldPos) -> Result<TerrainInfo, HostError> {
        let height = (pos.x * 0.011).sin() * 9.0 + (pos.y * 0.007).cos() * 5.0;
        Ok(TerrainInfo { height, liquid: height < -9.0 })
    }

    fn line_of_sight(
        &self,
        _region: RegionId,
        a: WorldPos,
        b: WorldPos,
    ) -> Result<bool, HostError> {
        Ok(!self.blocked(a, b))
    }

    fn plan_path(
        &self,
        _region: RegionId,
        src: WorldPos,
        dst: WorldPos,
        _profile: MoverProfile,
    ) -> Result<PathResult, HostError> {
        if !self.blocked(src, dst) {
            return Ok(PathResult::from_waypoints(smallvec![src, dst], PathQuality::Complete));
        }
        // Sidestep perpendicular to the direct line and accept the result
        // as partial if that still clips an occluder
        let mid = (src + dst) * 0.5;
        let dir = (dst - src).normalize();
        let sidestep = WorldPos::planar(mid.x - dir.y * 80.0, mid.y + dir.x * 80.0);
        let quality = if self.blocked(src, sidestep) || self.blocked(sidestep, dst) {
            PathQuality::Partial
        } else {
            PathQuality::Complete
        };
        Ok(PathResult::from_waypoints(smallvec![src, sidestep, dst], quality))
    }
}

// ===== Writer side =====

struct Walker {
    id: EntityId,
    pos: WorldPos,
    velocity: WorldPos,
    state: MobileState,
    alive: bool,
}

impl Walker {
    fn step(&mut self, rng: &mut impl Rng, half_w: f32, half_h: f32) {
        // Occasionally pick a new heading
        if rng.random_bool(0.02) {
            let speed = self.state.move_speed * TICK_INTERVAL.as_secs_f32();
            self.velocity = WorldPos::planar(
                rng.random_range(-speed..speed),
                rng.random_range(-speed..speed),
            );
        }
        self.pos = self.pos + self.velocity;

        // Bounce off the region bounds
        if self.pos.x.abs() > half_w {
            self.pos.x = self.pos.x.clamp(-half_w, half_w);
            self.velocity.x = -self.velocity.x;
        }
        if self.pos.y.abs() > half_h {
            self.pos.y = self.pos.y.clamp(-half_h, half_h);
            self.velocity.y = -self.velocity.y;
        }
    }

    fn snapshot(&self, tick: Tick) -> EntitySnapshot {
        EntitySnapshot {
            id: self.id,
            pos: self.pos,
            alive: self.alive,
            seen_tick: tick,
            detail: EntityDetail::Mobile(self.state),
        }
    }
}

fn spawn_population(
    rng: &mut impl Rng,
    region: RegionId,
    half_w: f32,
    half_h: f32,
) -> (Vec<Walker>, Vec<EntitySnapshot>) {
    let id_base = u64::from(region.0) * 1_000_000;

    let walkers = (0..MOBILES_PER_REGION)
        .map(|i| Walker {
            id: EntityId(id_base + i as u64),
            pos: WorldPos::planar(
                rng.random_range(-half_w..half_w),
                rng.random_range(-half_h..half_h),
            ),
            velocity: WorldPos::ZERO,
            state: MobileState {
                hostile: i % 4 != 0,
                in_combat: false,
                move_speed: rng.random_range(3.0..9.0),
                class: CreatureClass::Beast,
                flags: if i % 16 == 0 { mobile_flags::ELITE } else { mobile_flags::NONE },
            },
            // A few corpses so reader-side filtering has something to skip
            alive: i % 50 != 0,
        })
        .collect();

    let props = (0..PROPS_PER_REGION)
        .map(|i| EntitySnapshot {
            id: EntityId(id_base + 500_000 + i as u64),
            pos: WorldPos::planar(
                rng.random_range(-half_w..half_w),
                rng.random_range(-half_h..half_h),
            ),
            alive: true,
            seen_tick: Tick(0),
            detail: EntityDetail::Prop(PropState {
                kind: PropKind::ResourceNode,
                in_use: false,
            }),
        })
        .collect();

    (walkers, props)
}

fn run_writer(index: Arc<WorldIndex>, stop: Arc<AtomicBool>, run_time: Duration) {
    let mut rng = rng();
    let half_w = index.config().map_width / 2.0 - 10.0;
    let half_h = index.config().map_height / 2.0 - 10.0;

    let mut regions: Vec<(RegionId, Vec<Walker>, Vec<EntitySnapshot>)> = (0..REGION_COUNT)
        .map(|r| {
            let region = RegionId(r);
            let (walkers, props) = spawn_population(&mut rng, region, half_w, half_h);
            (region, walkers, props)
        })
        .collect();

    let started = Instant::now();
    let mut tick = Tick(1);
    let mut tail_region_dropped = false;
    let mut batch = EntityBatch::new();

    while !stop.load(Ordering::Relaxed) {
        let frame_started = Instant::now();

        // Halfway through the run, unload the last region to exercise
        // removal while readers are still asking about it
        if !tail_region_dropped && started.elapsed() > run_time / 2 {
            let dropped = RegionId(REGION_COUNT - 1);
            regions.retain(|(region, _, _)| *region != dropped);
            index.remove_region(dropped);
            tail_region_dropped = true;
        }

        for (region, walkers, props) in &mut regions {
            batch.clear();
            for walker in walkers.iter_mut() {
                walker.step(&mut rng, half_w, half_h);
                batch.push(walker.snapshot(tick));
            }
            for prop in props.iter() {
                let mut snapshot = *prop;
                snapshot.seen_tick = tick;
                batch.push(snapshot);
            }

            // Busy skips are counted by the index; next tick retries
            if let Ok(mut writer) = index.begin_update(*region, tick) {
                writer.clear_and_fill(&batch);
                writer.publish();
            }
        }

        // Periodic geometry churn: drop sight lines and paths near a point
        if tick.0 % 100 == 0 && !regions.is_empty() {
            let region = regions[rng.random_range(0..regions.len())].0;
            let center = WorldPos::planar(
                rng.random_range(-half_w..half_w),
                rng.random_range(-half_h..half_h),
            );
            index.geometry_changed(region, center, rng.random_range(40.0..120.0));
        }

        tick = Tick(tick.0 + 1);
        let elapsed = frame_started.elapsed();
        if elapsed < TICK_INTERVAL {
            thread::sleep(TICK_INTERVAL - elapsed);
        }
    }

    info!("Writer stopped after {} ticks", tick.0 - 1);
}

// ===== Reader side =====

fn run_reader(index: Arc<WorldIndex>, stop: Arc<AtomicBool>, queries: Arc<AtomicU64>) {
    let mut rng = rng();
    let half_w = index.config().map_width / 2.0 - 10.0;
    let half_h = index.config().map_height / 2.0 - 10.0;
    let mobiles = KindMask::from(EntityKind::Mobile);

    while !stop.load(Ordering::Relaxed) {
        let region = RegionId(rng.random_range(0..REGION_COUNT));
        let center = WorldPos::planar(
            rng.random_range(-half_w..half_w),
            rng.random_range(-half_h..half_h),
        );

        match rng.random_range(0u32..100) {
            0..=39 => {
                let radius = rng.random_range(30.0..150.0);
                let found = index.query_nearby_sorted(region, center, radius, mobiles);
                if found.len() >= 2 {
                    debug_assert!(
                        found[0].pos.distance_squared(center)
                            <= found[1].pos.distance_squared(center),
                        "nearest-first ordering"
                    );
                }
            }
            40..=54 => {
                let radius = rng.random_range(30.0..150.0);
                index.query_nearby(region, center, radius, KindMask::ALL);
            }
            55..=64 => {
                let id_base = u64::from(region.0) * 1_000_000;
                let a = EntityId(id_base + rng.random_range(0..MOBILES_PER_REGION as u64));
                let b = EntityId(id_base + rng.random_range(0..MOBILES_PER_REGION as u64));
                index.distance_between(region, a, b);
            }
            65..=79 => {
                let _ = index.terrain_at(region, center);
            }
            80..=91 => {
                let target = WorldPos::planar(
                    center.x + rng.random_range(-80.0..80.0),
                    center.y + rng.random_range(-80.0..80.0),
                );
                let _ = index.has_line_of_sight(region, center, target);
            }
            _ => {
                let dst = WorldPos::planar(
                    rng.random_range(-half_w..half_w),
                    rng.random_range(-half_h..half_h),
                );
                let profile = MoverProfile { can_swim: rng.random_bool(0.3), can_fly: false };
                let _ = index.find_path(region, center, dst, profile);
            }
        }
        queries.fetch_add(1, Ordering::Relaxed);
    }
}

fn main() {
    // Set up file logging and get the log file path
    let log_file = setup_file_logging();

    println!("╔══════════════════════════════════════════════════════════╗");
    println!("║  Kestrel world index - stress driver                     ║");
    println!("╠══════════════════════════════════════════════════════════╣");
    println!("║  Log file: {:<44}  ║", log_file);
    println!("╚══════════════════════════════════════════════════════════╝");

    let seconds = env::args()
        .nth(1)
        .and_then(|arg| arg.parse::<u64>().ok())
        .unwrap_or(10);
    let run_time = Duration::from_secs(seconds);

    let config = IndexConfig::load_from_path("assets/index_config.ron");
    let host = Arc::new(SyntheticHost::new(config.map_width / 2.0 - 100.0));
    let index = match WorldIndex::new(config, host) {
        Ok(index) => Arc::new(index),
        Err(e) => {
            error!("Refusing to start: {}", e);
            return;
        }
    };

    info!(
        "Stress run: {} regions x {} mobiles, {} readers, {} seconds",
        REGION_COUNT, MOBILES_PER_REGION, READER_THREADS, seconds
    );

    let stop = Arc::new(AtomicBool::new(false));
    let queries = Arc::new(AtomicU64::new(0));

    let writer = {
        let index = Arc::clone(&index);
        let stop = Arc::clone(&stop);
        thread::spawn(move || run_writer(index, stop, run_time))
    };
    let readers: Vec<_> = (0..READER_THREADS)
        .map(|_| {
            let index = Arc::clone(&index);
            let stop = Arc::clone(&stop);
            let queries = Arc::clone(&queries);
            thread::spawn(move || run_reader(index, stop, queries))
        })
        .collect();

    thread::sleep(run_time);
    stop.store(true, Ordering::Relaxed);

    if writer.join().is_err() {
        error!("Writer thread panicked");
    }
    for reader in readers {
        if reader.join().is_err() {
            error!("Reader thread panicked");
        }
    }

    let summary = index.stats();
    let total_queries = queries.load(Ordering::Relaxed);
    info!("Stress run finished: {} queries, {:?}", total_queries, summary);

    println!();
    println!("Ran {} readers for {}s against {} regions:", READER_THREADS, seconds, REGION_COUNT);
    println!("  queries issued      {:>10}", total_queries);
    println!(
        "  updates published   {:>10}  (busy skips {}, abandoned {})",
        summary.updates_published, summary.updates_skipped_busy, summary.updates_abandoned
    );
    println!("  oversized queries   {:>10}", summary.oversized_queries);
    println!("  host failures       {:>10}", summary.host_failures);
    println!(
        "  terrain cache       {:>10} hits {:>8} misses  {:>5.1}% hit rate",
        summary.terrain.hits,
        summary.terrain.misses,
        summary.terrain.hit_rate() * 100.0
    );
    println!(
        "  visibility cache    {:>10} hits {:>8} misses  {:>5.1}% hit rate  ({} evicted)",
        summary.visibility.hits,
        summary.visibility.misses,
        summary.visibility.hit_rate() * 100.0,
        summary.visibility.evictions
    );
    println!(
        "  path cache          {:>10} hits {:>8} misses  {:>5.1}% hit rate  ({} evicted)",
        summary.path.hits,
        summary.path.misses,
        summary.path.hit_rate() * 100.0,
        summary.path.evictions
    );
}

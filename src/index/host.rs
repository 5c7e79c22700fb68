use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use thiserror::Error;

use crate::index::grid::RegionId;
use crate::index::math::WorldPos;

/// Terrain properties at one sampled point.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TerrainInfo {
    /// Ground height at the sample point
    pub height: f32,
    /// Whether the point is underwater or in another liquid volume
    pub liquid: bool,
}

/// How trustworthy a planned path is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathQuality {
    /// Path reaches the requested destination
    Complete,
    /// Planner gave up early; path ends short of the destination
    Partial,
    /// Destination cannot be reached at all
    Unreachable,
}

/// Planned route between two points, as returned by the host planner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PathResult {
    /// Polyline from source to destination. Most routes are a handful of
    /// points, so these stay inline.
    pub waypoints: SmallVec<[WorldPos; 8]>,
    pub quality: PathQuality,
    /// Total polyline length in world units
    pub length: f32,
}

impl PathResult {
    /// Build a result with the length computed from the waypoint polyline.
    pub fn from_waypoints(waypoints: SmallVec<[WorldPos; 8]>, quality: PathQuality) -> Self {
        let length = waypoints
            .windows(2)
            .map(|pair| pair[0].distance(pair[1]))
            .sum();
        Self { waypoints, quality, length }
    }
}

/// Movement capabilities that change which routes are valid.
///
/// Part of the path cache key: a swimmer's route across a lake must never be
/// served to a walker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MoverProfile {
    pub can_swim: bool,
    pub can_fly: bool,
}

/// Failure surfaced by a host call.
///
/// Scoped to the single failing query; nothing is cached for a failed call
/// and no other query is affected.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("host subsystem unavailable: {0}")]
    Unavailable(&'static str),
    #[error("host call timed out")]
    Timeout,
    #[error("host call failed: {0}")]
    Failed(String),
}

/// Boundary to the authoritative simulation.
///
/// The index never computes terrain, visibility, or routes itself; it
/// memoizes what these calls return. Implementations must be callable from
/// any worker thread. The index holds none of its own locks while calling
/// in, so implementations are free to block.
pub trait WorldHost: Send + Sync {
    /// Sample terrain properties at a world position.
    fn terrain_sample(&self, region: RegionId, pos: WorldPos) -> Result<TerrainInfo, HostError>;

    /// True when an unobstructed sight line exists between two points.
    fn line_of_sight(
        &self,
        region: RegionId,
        from: WorldPos,
        to: WorldPos,
    ) -> Result<bool, HostError>;

    /// Plan a route between two points for the given movement profile.
    fn plan_path(
        &self,
        region: RegionId,
        src: WorldPos,
        dst: WorldPos,
        profile: MoverProfile,
    ) -> Result<PathResult, HostError>;
}

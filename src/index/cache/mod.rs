//! TTL caches for host-computed answers.
//!
//! All three caches follow the same lock discipline: lookups happen under a
//! short lock, host calls happen with no lock held, and results are inserted
//! with a check-again so the first worker to finish wins. A miss in one cache
//! never blocks lookups in the others.

use std::time::{Duration, Instant};

use crate::index::math::WorldPos;

mod path;
mod terrain;
mod visibility;

pub use path::PathCache;
pub use terrain::TerrainCache;
pub use visibility::VisibilityCache;

/// Planar coordinate quantized to a coarse cell, used in cache keys.
///
/// Unlike grid cell indices this is unbounded; positions outside the map
/// still key consistently.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellCoord {
    pub x: i32,
    pub y: i32,
}

impl CellCoord {
    pub fn quantize(pos: WorldPos, scale: f32) -> Self {
        Self {
            x: (pos.x / scale).floor() as i32,
            y: (pos.y / scale).floor() as i32,
        }
    }

    /// World-space center of this coarse cell, for invalidation geometry.
    pub fn center(self, scale: f32) -> WorldPos {
        WorldPos::planar((self.x as f32 + 0.5) * scale, (self.y as f32 + 0.5) * scale)
    }
}

/// A cached value plus the instant it was stored.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Stamped<T> {
    pub value: T,
    pub stored_at: Instant,
}

impl<T> Stamped<T> {
    pub fn at(value: T, now: Instant) -> Self {
        Self { value, stored_at: now }
    }

    pub fn is_fresh(&self, ttl: Duration, now: Instant) -> bool {
        now.duration_since(self.stored_at) < ttl
    }
}

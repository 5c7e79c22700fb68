//! Shared world index for concurrent game-agent queries.
//!
//! The index mirrors the authoritative simulation as immutable, double-buffered
//! spatial snapshots plus a set of TTL caches for expensive host lookups
//! (terrain, line of sight, paths). The owning simulation publishes one snapshot
//! per region per tick; any number of worker threads read the latest published
//! snapshot without taking locks that block the writer.

pub mod cache;
pub mod config;
pub mod entity;
pub mod grid;
pub mod host;
pub mod math;
pub mod query;
pub mod registry;
pub mod stats;

pub use config::{ConfigError, IndexConfig};
pub use entity::{
    kind_mask, mobile_flags, ActorRole, ActorState, CreatureClass, EffectState, EntityBatch,
    EntityDetail, EntityId, EntityKind, EntitySnapshot, KindMask, MobileState, PropKind, PropState,
    Tick, TriggerShape,
};
pub use grid::{BufferView, GridLayout, RegionGrid, RegionId, ShadowWriter, UpdateBusy};
pub use host::{HostError, MoverProfile, PathQuality, PathResult, TerrainInfo, WorldHost};
pub use math::WorldPos;
pub use query::WorldIndex;
pub use registry::GridRegistry;
pub use stats::{CacheSummary, IndexStats, StatsSummary};

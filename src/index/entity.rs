//! Snapshot types for entities mirrored out of the host simulation.
//!
//! Snapshots are plain values: no references back into live simulation state,
//! no interior mutability. Whatever the host publishes for a tick is what every
//! reader sees until the next publish.

use serde::{Deserialize, Serialize};

use crate::index::math::WorldPos;

/// Stable entity identifier assigned by the host simulation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

/// Simulation tick counter. Monotonically increasing per region.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tick(pub u64);

// ============================================================================
// Entity Kinds & Masks
// ============================================================================

/// Number of entity kinds. Sized for per-kind arrays.
pub const KIND_COUNT: usize = 5;

/// Broad classification of everything the index tracks.
///
/// The repr(u8) ensures zero-cost conversion to array indices.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Mobile = 0,
    Actor = 1,
    Prop = 2,
    Effect = 3,
    Trigger = 4,
}

impl EntityKind {
    /// Convert to array index for per-kind storage lookups
    #[inline]
    pub fn as_index(self) -> usize {
        self as usize
    }

    /// Bit for this kind in a [`KindMask`]
    #[inline]
    pub fn mask_bit(self) -> u8 {
        1 << (self as u8)
    }

    /// All five kinds, in index order
    pub const ALL: [EntityKind; KIND_COUNT] = [
        EntityKind::Mobile,
        EntityKind::Actor,
        EntityKind::Prop,
        EntityKind::Effect,
        EntityKind::Trigger,
    ];
}

/// Kind bits for query filtering
pub mod kind_mask {
    pub const NONE: u8 = 0;
    pub const MOBILE: u8 = 1 << 0;
    pub const ACTOR: u8 = 1 << 1;
    pub const PROP: u8 = 1 << 2;
    pub const EFFECT: u8 = 1 << 3;
    pub const TRIGGER: u8 = 1 << 4;
    pub const ALL: u8 = MOBILE | ACTOR | PROP | EFFECT | TRIGGER;
}

/// Filter over entity kinds for proximity queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KindMask(pub u8);

impl KindMask {
    pub const NONE: Self = Self(kind_mask::NONE);
    pub const ALL: Self = Self(kind_mask::ALL);

    #[inline]
    pub fn contains(self, kind: EntityKind) -> bool {
        self.0 & kind.mask_bit() != 0
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 & kind_mask::ALL == 0
    }
}

impl From<EntityKind> for KindMask {
    fn from(kind: EntityKind) -> Self {
        Self(kind.mask_bit())
    }
}

impl std::ops::BitOr for KindMask {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl Default for KindMask {
    fn default() -> Self {
        Self::ALL
    }
}

// ============================================================================
// Kind-Specific Payloads
// ============================================================================

/// Coarse creature classification for mobiles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CreatureClass {
    Beast,
    Humanoid,
    Undead,
    Elemental,
    Construct,
    Other,
}

/// Static capability flags for mobiles
pub mod mobile_flags {
    pub const NONE: u8 = 0;
    /// Yields a secondary resource when harvested after death
    pub const SKINNABLE: u8 = 1 << 0;
    pub const ELITE: u8 = 1 << 1;
    pub const BOSS: u8 = 1 << 2;
}

/// AI-driven creature state.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MobileState {
    pub hostile: bool,
    pub in_combat: bool,
    pub move_speed: f32,
    pub class: CreatureClass,
    /// Bits from [`mobile_flags`]
    pub flags: u8,
}

/// Combat role a player character advertises to agents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActorRole {
    Tank,
    Healer,
    Melee,
    Ranged,
    Caster,
}

/// Player-controlled character state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorState {
    pub role: ActorRole,
    /// Host-assigned party grouping, if any
    pub party: Option<u32>,
}

/// What a stationary interactive object is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropKind {
    Door,
    Chest,
    ResourceNode,
    Portal,
    Other,
}

/// Stationary interactive object state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropState {
    pub kind: PropKind,
    pub in_use: bool,
}

/// Transient area effect (ground AoE, aura).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EffectState {
    pub radius: f32,
    /// Entity that created the effect, when known
    pub source: Option<EntityId>,
}

/// Volume of an invisible scripted trigger.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum TriggerShape {
    Sphere { radius: f32 },
    Box { extents: [f32; 3], yaw: f32 },
}

// ============================================================================
// Snapshot & Batch
// ============================================================================

/// Kind-specific portion of a snapshot. Closed set: adding a kind means
/// touching every match below.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum EntityDetail {
    Mobile(MobileState),
    Actor(ActorState),
    Prop(PropState),
    Effect(EffectState),
    Trigger(TriggerShape),
}

impl EntityDetail {
    #[inline]
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityDetail::Mobile(_) => EntityKind::Mobile,
            EntityDetail::Actor(_) => EntityKind::Actor,
            EntityDetail::Prop(_) => EntityKind::Prop,
            EntityDetail::Effect(_) => EntityKind::Effect,
            EntityDetail::Trigger(_) => EntityKind::Trigger,
        }
    }
}

/// One entity as the host last reported it.
///
/// `seen_tick` is the tick the host sampled this entity on, which can lag the
/// buffer's publish tick for entities the host updates at a slower cadence.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: EntityId,
    pub pos: WorldPos,
    pub alive: bool,
    pub seen_tick: Tick,
    pub detail: EntityDetail,
}

impl EntitySnapshot {
    #[inline]
    pub fn kind(&self) -> EntityKind {
        self.detail.kind()
    }
}

/// Everything the host hands over for one region update, grouped by kind.
///
/// Grouping at the boundary keeps the fill loop branch-free: each kind's
/// snapshots land in per-kind cell storage without re-inspecting details.
#[derive(Clone, Debug, Default)]
pub struct EntityBatch {
    per_kind: [Vec<EntitySnapshot>; KIND_COUNT],
}

impl EntityBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route a snapshot to its kind bucket.
    pub fn push(&mut self, snapshot: EntitySnapshot) {
        self.per_kind[snapshot.kind().as_index()].push(snapshot);
    }

    pub fn of_kind(&self, kind: EntityKind) -> &[EntitySnapshot] {
        &self.per_kind[kind.as_index()]
    }

    pub fn len(&self) -> usize {
        self.per_kind.iter().map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.per_kind.iter().all(|v| v.is_empty())
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntitySnapshot> {
        self.per_kind.iter().flatten()
    }

    pub fn clear(&mut self) {
        for bucket in &mut self.per_kind {
            bucket.clear();
        }
    }
}

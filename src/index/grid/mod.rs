use fixedbitset::FixedBitSet;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::index::entity::{EntityBatch, EntityId, EntityKind, EntitySnapshot, Tick, KIND_COUNT};
use crate::index::math::WorldPos;

mod writer;

pub use writer::{RegionGrid, ShadowWriter, UpdateBusy};

/// Identifier of one region (zone, map instance) the host simulates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegionId(pub u32);

/// Geometry of a region's grid: how world positions map to cells.
///
/// Regions are centered at the world origin, so coordinates run
/// [-width/2, width/2] on each axis. The grid quantizes the horizontal plane
/// only; height never changes which cell an entity lands in.
#[derive(Clone, Copy, Debug)]
pub struct GridLayout {
    cell_size: f32,
    map_width: f32,
    map_height: f32,
    cols: usize,
    rows: usize,
}

/// Inclusive rectangle of grid cells covered by a query circle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CellRect {
    pub min_col: usize,
    pub max_col: usize,
    pub min_row: usize,
    pub max_row: usize,
}

impl GridLayout {
    pub fn new(map_width: f32, map_height: f32, cell_size: f32) -> Self {
        let cols = (map_width / cell_size).ceil() as usize + 1;
        let rows = (map_height / cell_size).ceil() as usize + 1;

        Self { cell_size, map_width, map_height, cols, rows }
    }

    pub fn cell_size(&self) -> f32 { self.cell_size }
    pub fn map_width(&self) -> f32 { self.map_width }
    pub fn map_height(&self) -> f32 { self.map_height }
    pub fn cols(&self) -> usize { self.cols }
    pub fn rows(&self) -> usize { self.rows }
    pub fn cell_count(&self) -> usize { self.cols * self.rows }

    /// Flat cell index for a position, or None when it lies outside the map.
    pub fn cell_index(&self, pos: WorldPos) -> Option<usize> {
        // Map is centered at 0,0. Coordinates are [-half_w, half_w].
        // Shift to [0, w]
        let half_w = self.map_width / 2.0;
        let half_h = self.map_height / 2.0;

        let x = pos.x + half_w;
        let y = pos.y + half_h;

        if x < 0.0 || x >= self.map_width || y < 0.0 || y >= self.map_height {
            return None;
        }

        let col = (x / self.cell_size) as usize;
        let row = (y / self.cell_size) as usize;

        if col >= self.cols || row >= self.rows {
            return None;
        }

        Some(row * self.cols + col)
    }

    /// Cells overlapped by a circle, clamped to the grid.
    ///
    /// A center outside the map still yields the nearest border cells; the
    /// exact distance filter downstream discards anything spurious.
    pub fn cell_range(&self, center: WorldPos, radius: f32) -> CellRect {
        let half_w = self.map_width / 2.0;
        let half_h = self.map_height / 2.0;

        let min_x = center.x - radius + half_w;
        let max_x = center.x + radius + half_w;
        let min_y = center.y - radius + half_h;
        let max_y = center.y + radius + half_h;

        // Convert to grid coordinates, clamped to valid range.
        // Clamp to 0 AFTER min() to avoid usize underflow.
        let min_col = ((min_x / self.cell_size).floor() as isize).max(0) as usize;
        let max_col = ((max_x / self.cell_size).floor() as isize)
            .min(self.cols as isize - 1)
            .max(0) as usize;
        let min_row = ((min_y / self.cell_size).floor() as isize).max(0) as usize;
        let max_row = ((max_y / self.cell_size).floor() as isize)
            .min(self.rows as isize - 1)
            .max(0) as usize;

        CellRect { min_col, max_col, min_row, max_row }
    }
}

/// One grid cell: the snapshots positioned inside it, grouped by kind.
#[derive(Clone, Debug, Default)]
pub struct Cell {
    by_kind: [Vec<EntitySnapshot>; KIND_COUNT],
}

impl Cell {
    pub fn of_kind(&self, kind: EntityKind) -> &[EntitySnapshot] {
        &self.by_kind[kind.as_index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntitySnapshot> {
        self.by_kind.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.by_kind.iter().map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_kind.iter().all(|v| v.is_empty())
    }

    fn clear(&mut self) {
        for bucket in &mut self.by_kind {
            bucket.clear();
        }
    }

    fn push(&mut self, snapshot: EntitySnapshot) {
        self.by_kind[snapshot.kind().as_index()].push(snapshot);
    }
}

/// Snapshot of one region's entities, quantized onto the grid.
///
/// A buffer is filled once by the region's [`ShadowWriter`] and never mutated
/// after publish; every reader that obtains it through a [`BufferView`] sees
/// the identical state. Lookups by position go through the cells; lookups by
/// id go through `id_index`.
///
/// # Performance
///
/// - **Fill:** O(n) over the batch, no locks held
/// - **Cell query:** O(k) where k = entities in the covered cells
/// - **Id lookup:** O(1) hash probe + scan of one cell
/// - **Refill:** reuses cell vectors, occupancy bits, and the id table of a
///   recycled buffer, so steady-state updates allocate only when the entity
///   population grows
#[derive(Debug)]
pub struct GridBuffer {
    layout: GridLayout,
    cells: Vec<Cell>,
    /// One bit per cell; set when the cell holds at least one snapshot
    occupancy: FixedBitSet,
    /// Entity id to flat cell index, for O(1) position lookups by id
    id_index: FxHashMap<EntityId, u32>,
    populated_at: Tick,
    entity_count: usize,
}

impl GridBuffer {
    pub(crate) fn new(layout: GridLayout) -> Self {
        let cell_count = layout.cell_count();
        Self {
            layout,
            cells: vec![Cell::default(); cell_count],
            occupancy: FixedBitSet::with_capacity(cell_count),
            id_index: FxHashMap::default(),
            populated_at: Tick(0),
            entity_count: 0,
        }
    }

    /// Throw away the previous generation's contents and index the batch.
    ///
    /// Out-of-bounds snapshots are skipped. Duplicate ids are a host bug:
    /// rejected loudly in debug builds, kept last-wins in the id index
    /// otherwise.
    pub(crate) fn refill(&mut self, batch: &EntityBatch, tick: Tick) {
        for cell in &mut self.cells {
            cell.clear();
        }
        self.occupancy.clear();
        self.id_index.clear();
        self.entity_count = 0;
        self.populated_at = tick;

        let mut out_of_bounds = 0usize;
        let mut duplicates = 0usize;
        for snapshot in batch.iter() {
            let Some(idx) = self.layout.cell_index(snapshot.pos) else {
                out_of_bounds += 1;
                continue;
            };
            self.cells[idx].push(*snapshot);
            self.occupancy.insert(idx);
            let prev = self.id_index.insert(snapshot.id, idx as u32);
            debug_assert!(
                prev.is_none(),
                "duplicate entity id {:?} in one batch",
                snapshot.id
            );
            if prev.is_some() {
                duplicates += 1;
            }
            self.entity_count += 1;
        }

        if out_of_bounds > 0 {
            warn!(
                "refill at tick {} skipped {} out-of-bounds snapshots",
                tick.0, out_of_bounds
            );
        }
        if duplicates > 0 {
            warn!(
                "refill at tick {} saw {} duplicate entity ids",
                tick.0, duplicates
            );
        }
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    /// Cell at a flat index. An out-of-range index is a caller bug:
    /// rejected loudly in debug builds, clamped to the last cell otherwise.
    pub fn cell(&self, idx: usize) -> &Cell {
        debug_assert!(idx < self.cells.len(), "cell index {} past the cell table", idx);
        &self.cells[idx.min(self.cells.len() - 1)]
    }

    /// Tick the buffer was filled on.
    pub fn tick(&self) -> Tick {
        self.populated_at
    }

    /// Number of snapshots stored in the buffer.
    pub fn len(&self) -> usize {
        self.entity_count
    }

    pub fn is_empty(&self) -> bool {
        self.entity_count == 0
    }

    /// Cell index an entity was filed under, if it is in this buffer.
    pub fn cell_of(&self, id: EntityId) -> Option<usize> {
        self.id_index.get(&id).map(|&idx| idx as usize)
    }

    /// Snapshot for an entity id, if it is in this buffer.
    pub fn entity(&self, id: EntityId) -> Option<&EntitySnapshot> {
        let idx = self.cell_of(id)?;
        debug_assert!(idx < self.cells.len(), "id index points past the cell table");
        self.cells.get(idx)?.iter().find(|s| s.id == id)
    }

    /// Count the total number of entries across all cells.
    /// Useful for debugging and diagnostics.
    pub fn total_entries(&self) -> usize {
        self.cells.iter().map(|cell| cell.len()).sum()
    }

    /// Count the number of non-empty cells.
    /// Useful for debugging and diagnostics.
    pub fn non_empty_cells(&self) -> usize {
        self.occupancy.count_ones(..)
    }
}

/// Read-only handle to a published [`GridBuffer`].
///
/// Cloning is one atomic refcount bump. Holding a view keeps its generation
/// alive even after later publishes or region removal; it just goes stale.
#[derive(Clone, Debug)]
pub struct BufferView {
    buffer: std::sync::Arc<GridBuffer>,
}

impl BufferView {
    pub(crate) fn new(buffer: std::sync::Arc<GridBuffer>) -> Self {
        Self { buffer }
    }
}

impl std::ops::Deref for BufferView {
    type Target = GridBuffer;

    fn deref(&self) -> &Self::Target {
        &self.buffer
    }
}

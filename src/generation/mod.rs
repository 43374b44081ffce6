//! Generation buffers: one complete snapshot of the tile-sorted index.
//!
//! Every array is allocated once, at session start, from the worst-case
//! primitive count and tile count. Builds and merges write in place and
//! never grow the allocations.

pub mod arena;

pub use arena::{GenerationArena, SlotId};

use crate::splats::ProjectionRecord;
use crate::tiles::{ScreenRect, TileGrid, TileRange};

/// Split borrow of a generation while its sorted index is rewritten.
pub(crate) struct SortTarget<'a> {
    pub records: &'a [ProjectionRecord],
    pub rects: &'a [ScreenRect],
    pub keys: &'a mut [u64],
    pub values: &'a mut [u32],
    pub ranges: &'a mut [TileRange],
}

pub struct GenerationBuffer {
    records: Vec<ProjectionRecord>,
    rects: Vec<ScreenRect>,
    keys: Vec<u64>,
    values: Vec<u32>,
    ranges: Vec<TileRange>,
    entry_capacity: usize,
    max_element_of_tile: usize,
    built_from: Option<u64>,
}

impl GenerationBuffer {
    pub fn new(primitives: usize, grid: &TileGrid, max_element_of_tile: usize) -> Self {
        let tile_count = grid.tile_count();
        // A primitive lands in a tile at most once, so neither bound alone
        // is tighter in general.
        let entry_capacity = tile_count
            .saturating_mul(max_element_of_tile)
            .min(primitives.saturating_mul(tile_count));
        Self {
            records: vec![ProjectionRecord::default(); primitives],
            rects: vec![ScreenRect::EMPTY; primitives],
            keys: Vec::with_capacity(entry_capacity),
            values: Vec::with_capacity(entry_capacity),
            ranges: vec![TileRange::default(); tile_count],
            entry_capacity,
            max_element_of_tile,
            built_from: None,
        }
    }

    pub fn records(&self) -> &[ProjectionRecord] {
        &self.records
    }

    pub fn rects(&self) -> &[ScreenRect] {
        &self.rects
    }

    pub fn keys(&self) -> &[u64] {
        &self.keys
    }

    pub fn values(&self) -> &[u32] {
        &self.values
    }

    pub fn ranges(&self) -> &[TileRange] {
        &self.ranges
    }

    pub fn tile_range(&self, tile: u32) -> TileRange {
        self.ranges[tile as usize]
    }

    pub fn tile_keys(&self, tile: u32) -> &[u64] {
        &self.keys[self.tile_range(tile).as_range()]
    }

    /// Primitive ids overlapping `tile`, in compositing order.
    pub fn tile_values(&self, tile: u32) -> &[u32] {
        &self.values[self.tile_range(tile).as_range()]
    }

    pub fn primitive_count(&self) -> usize {
        self.records.len()
    }

    pub fn tile_count(&self) -> usize {
        self.ranges.len()
    }

    pub fn entry_count(&self) -> usize {
        self.keys.len()
    }

    pub fn entry_capacity(&self) -> usize {
        self.entry_capacity
    }

    pub fn max_element_of_tile(&self) -> usize {
        self.max_element_of_tile
    }

    /// Frame index whose camera the sorted index reflects, `None` until the
    /// first successful build.
    pub fn built_from(&self) -> Option<u64> {
        self.built_from
    }

    pub fn is_built(&self) -> bool {
        self.built_from.is_some()
    }

    pub(crate) fn projection_mut(&mut self) -> (&mut [ProjectionRecord], &mut [ScreenRect]) {
        (&mut self.records, &mut self.rects)
    }

    /// Resizes the key/value arrays to `len` entries inside the reserved
    /// allocation and hands out the projection (read-only) next to the
    /// writable sort arrays.
    pub(crate) fn sort_target(&mut self, len: usize) -> SortTarget<'_> {
        assert!(
            len <= self.entry_capacity,
            "entry count {} exceeds reserved capacity {}",
            len,
            self.entry_capacity
        );
        self.keys.resize(len, 0);
        self.values.resize(len, 0);
        debug_assert!(self.keys.capacity() >= self.entry_capacity);
        SortTarget {
            records: &self.records,
            rects: &self.rects,
            keys: &mut self.keys,
            values: &mut self.values,
            ranges: &mut self.ranges,
        }
    }

    pub(crate) fn mark_built(&mut self, frame: u64) {
        self.built_from = Some(frame);
    }

    /// Drops the sorted index after a failed write so it is never reused.
    pub(crate) fn invalidate(&mut self) {
        self.keys.clear();
        self.values.clear();
        self.ranges.fill(TileRange::default());
        self.built_from = None;
    }

    pub(crate) fn same_shape(&self, other: &GenerationBuffer) -> bool {
        self.records.len() == other.records.len()
            && self.ranges.len() == other.ranges.len()
            && self.entry_capacity == other.entry_capacity
            && self.max_element_of_tile == other.max_element_of_tile
    }
}

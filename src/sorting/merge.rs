//! Reuse merge: derives the current generation from the previous one.
//!
//! Tiles no changed primitive touches are copied verbatim from the
//! previous generation. Touched tiles, and any tiles forced by a partial
//! refresh, are rebuilt locally from the previous entries that are still
//! valid plus the changed primitives that now cover them, and re-sorted
//! within the tile. With a zero depth tolerance the result is identical
//! to a full rebuild from the current camera.

use std::sync::Arc;

use super::kernels::SortKernel;
use super::TileSortBuilder;
use crate::error::{SortError, SortResult};
use crate::generation::GenerationBuffer;
use crate::splats::ChangeSet;
use crate::tiles::{key, TileGrid, TileRange};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergeParams {
    /// Fraction of tiles above which merging is abandoned for a rebuild.
    pub max_touched_fraction: f32,
    /// Depth moves at or below this are not treated as changes.
    pub depth_tolerance: f32,
}

impl Default for MergeParams {
    fn default() -> Self {
        Self {
            max_touched_fraction: 0.5,
            depth_tolerance: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Merged,
    /// Too much of the screen changed; the caller should rebuild instead.
    PreferRebuild,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeReport {
    pub outcome: MergeOutcome,
    pub changed_primitives: usize,
    pub touched_tiles: usize,
    pub forced_tiles: usize,
    pub reused_entries: usize,
    pub entries: usize,
}

impl MergeReport {
    fn prefer_rebuild(changed_primitives: usize, touched_tiles: usize) -> Self {
        Self {
            outcome: MergeOutcome::PreferRebuild,
            changed_primitives,
            touched_tiles,
            forced_tiles: 0,
            reused_entries: 0,
            entries: 0,
        }
    }
}

pub struct MergeStep {
    grid: TileGrid,
    max_element_of_tile: usize,
    params: MergeParams,
    sort: Arc<dyn SortKernel>,
    changes: ChangeSet,
    touched: Vec<bool>,
    addition_offsets: Vec<u32>,
    addition_ids: Vec<u32>,
    addition_cursor: Vec<u32>,
    counts: Vec<u32>,
}

impl MergeStep {
    pub fn new(
        grid: TileGrid,
        max_element_of_tile: usize,
        params: MergeParams,
        sort: Arc<dyn SortKernel>,
    ) -> Self {
        let tiles = grid.tile_count();
        Self {
            grid,
            max_element_of_tile,
            params,
            sort,
            changes: ChangeSet::default(),
            touched: vec![false; tiles],
            addition_offsets: vec![0; tiles + 1],
            addition_ids: Vec::new(),
            addition_cursor: vec![0; tiles],
            counts: vec![0; tiles],
        }
    }

    /// Merge step sharing the builder's grid, capacity and sort kernel.
    pub fn for_builder(
        builder: &TileSortBuilder,
        max_element_of_tile: usize,
        params: MergeParams,
    ) -> Self {
        Self::new(
            *builder.grid(),
            max_element_of_tile,
            params,
            builder.sort_kernel(),
        )
    }

    /// Writes the sorted index of `current` from `previous`.
    ///
    /// `current` must already hold this frame's projection. `forced_tiles`
    /// are rebuilt locally even if nothing changed in them; they do not
    /// count toward the rebuild threshold.
    pub fn merge(
        &mut self,
        frame: u64,
        previous: &GenerationBuffer,
        current: &mut GenerationBuffer,
        forced_tiles: &[u32],
    ) -> SortResult<MergeReport> {
        if previous.primitive_count() != current.primitive_count() {
            return Err(SortError::PrimitiveCountMismatch {
                expected: previous.primitive_count(),
                actual: current.primitive_count(),
            });
        }
        current.invalidate();
        if !previous.is_built() {
            return Ok(MergeReport::prefer_rebuild(0, 0));
        }

        self.changes.detect(
            previous.records(),
            previous.rects(),
            current.records(),
            current.rects(),
            self.params.depth_tolerance,
        );

        self.touched.fill(false);
        let mut touched_tiles = 0;
        for &id in self.changes.ids() {
            let id = id as usize;
            for rect in [previous.rects()[id], current.rects()[id]] {
                for tile in rect.tiles(&self.grid) {
                    let slot = &mut self.touched[tile as usize];
                    if !*slot {
                        *slot = true;
                        touched_tiles += 1;
                    }
                }
            }
        }

        let tile_count = self.grid.tile_count();
        if touched_tiles as f32 > self.params.max_touched_fraction * tile_count as f32 {
            log::debug!(
                "Frame {}: {} of {} tiles touched, preferring rebuild",
                frame,
                touched_tiles,
                tile_count
            );
            return Ok(MergeReport::prefer_rebuild(self.changes.len(), touched_tiles));
        }

        let mut forced = 0;
        for &tile in forced_tiles {
            let slot = &mut self.touched[tile as usize];
            if !*slot {
                *slot = true;
                forced += 1;
            }
        }

        self.collect_additions(current);
        self.count_entries(previous)?;
        let total: usize = self.counts.iter().map(|&c| c as usize).sum();

        let target = current.sort_target(total);
        let mut cursor = 0usize;
        let mut reused = 0usize;
        for tile in 0..tile_count {
            let len = self.counts[tile] as usize;
            let out = cursor..cursor + len;
            target.ranges[tile] = TileRange::new(cursor as u32, (cursor + len) as u32);
            let prev = previous.ranges()[tile].as_range();

            if !self.touched[tile] {
                target.keys[out.clone()].copy_from_slice(&previous.keys()[prev.clone()]);
                target.values[out].copy_from_slice(&previous.values()[prev]);
                reused += len;
                cursor += len;
                continue;
            }

            let mut write = cursor;
            for &id in &previous.values()[prev] {
                if self.changes.is_changed(id) {
                    continue;
                }
                target.keys[write] = key::encode(tile as u32, target.records[id as usize].depth);
                target.values[write] = id;
                write += 1;
            }
            reused += write - cursor;
            let additions = self.addition_offsets[tile] as usize
                ..self.addition_offsets[tile + 1] as usize;
            for &id in &self.addition_ids[additions] {
                target.keys[write] = key::encode(tile as u32, target.records[id as usize].depth);
                target.values[write] = id;
                write += 1;
            }
            debug_assert_eq!(write, cursor + len);

            self.sort
                .sort_pairs(&mut target.keys[out.clone()], &mut target.values[out]);
            cursor += len;
        }
        debug_assert_eq!(cursor, total);
        current.mark_built(frame);

        Ok(MergeReport {
            outcome: MergeOutcome::Merged,
            changed_primitives: self.changes.len(),
            touched_tiles,
            forced_tiles: forced,
            reused_entries: reused,
            entries: total,
        })
    }

    /// Bucket the changed primitives by the tiles their current rect covers.
    fn collect_additions(&mut self, current: &GenerationBuffer) {
        self.addition_offsets.fill(0);
        for &id in self.changes.ids() {
            for tile in current.rects()[id as usize].tiles(&self.grid) {
                self.addition_offsets[tile as usize + 1] += 1;
            }
        }
        for tile in 0..self.grid.tile_count() {
            self.addition_offsets[tile + 1] += self.addition_offsets[tile];
        }

        let tiles = self.grid.tile_count();
        let total = self.addition_offsets[tiles] as usize;
        self.addition_ids.clear();
        self.addition_ids.resize(total, 0);
        self.addition_cursor
            .copy_from_slice(&self.addition_offsets[..tiles]);
        // Ids are visited ascending, so each bucket stays sorted.
        for &id in self.changes.ids() {
            for tile in current.rects()[id as usize].tiles(&self.grid) {
                let at = &mut self.addition_cursor[tile as usize];
                self.addition_ids[*at as usize] = id;
                *at += 1;
            }
        }
    }

    fn count_entries(&mut self, previous: &GenerationBuffer) -> SortResult<()> {
        for tile in 0..self.grid.tile_count() {
            let prev = previous.ranges()[tile];
            let count = if self.touched[tile] {
                let kept = previous.values()[prev.as_range()]
                    .iter()
                    .filter(|&&id| !self.changes.is_changed(id))
                    .count();
                kept + (self.addition_offsets[tile + 1] - self.addition_offsets[tile]) as usize
            } else {
                prev.len()
            };
            if count > self.max_element_of_tile {
                log::warn!(
                    "Tile {} overflows during merge: {} entries, capacity {}",
                    tile,
                    count,
                    self.max_element_of_tile
                );
                return Err(SortError::CapacityViolation {
                    tile: tile as u32,
                    count,
                    capacity: self.max_element_of_tile,
                });
            }
            self.counts[tile] = count as u32;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sorting::verify::verify_generation;
    use crate::splats::ProjectionRecord;
    use crate::tiles::ScreenRect;

    const W: u32 = 64;
    const H: u32 = 32;

    fn grid() -> TileGrid {
        TileGrid::new(W, H, 16)
    }

    fn rect(min_x: u16, min_y: u16, max_x: u16, max_y: u16) -> ScreenRect {
        ScreenRect {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    fn project(generation: &mut GenerationBuffer, prims: &[(f32, ScreenRect)]) {
        let (records, rects) = generation.projection_mut();
        for (i, &(depth, r)) in prims.iter().enumerate() {
            records[i] = ProjectionRecord {
                depth,
                visible: u32::from(!r.is_empty()),
                ..ProjectionRecord::default()
            };
            rects[i] = r;
        }
    }

    fn scene() -> Vec<(f32, ScreenRect)> {
        vec![
            (1.0, rect(0, 0, 2, 1)),
            (2.0, rect(1, 0, 3, 2)),
            (3.0, rect(3, 1, 4, 2)),
            (0.5, rect(0, 1, 1, 2)),
        ]
    }

    fn built(prims: &[(f32, ScreenRect)], capacity: usize) -> GenerationBuffer {
        let mut generation = GenerationBuffer::new(prims.len(), &grid(), capacity);
        project(&mut generation, prims);
        TileSortBuilder::new(grid(), capacity)
            .build(0, &mut generation)
            .unwrap();
        generation
    }

    fn merge_step(capacity: usize, params: MergeParams) -> MergeStep {
        MergeStep::for_builder(&TileSortBuilder::new(grid(), capacity), capacity, params)
    }

    #[test]
    fn small_change_matches_full_rebuild() {
        let previous = built(&scene(), 8);
        let mut next = scene();
        next[2] = (0.25, rect(2, 1, 4, 2));
        next[0].0 = 1.5;

        let mut current = GenerationBuffer::new(4, &grid(), 8);
        project(&mut current, &next);
        let report = merge_step(8, MergeParams::default())
            .merge(1, &previous, &mut current, &[])
            .unwrap();
        assert_eq!(report.outcome, MergeOutcome::Merged);
        assert_eq!(report.changed_primitives, 2);
        verify_generation(&current).unwrap();

        let reference = built(&next, 8);
        assert_eq!(current.keys(), reference.keys());
        assert_eq!(current.values(), reference.values());
        assert_eq!(current.ranges(), reference.ranges());
        assert_eq!(current.built_from(), Some(1));
    }

    #[test]
    fn untouched_tiles_are_copied() {
        let previous = built(&scene(), 8);
        let mut current = GenerationBuffer::new(4, &grid(), 8);
        project(&mut current, &scene());

        let report = merge_step(8, MergeParams::default())
            .merge(1, &previous, &mut current, &[])
            .unwrap();
        assert_eq!(report.touched_tiles, 0);
        assert_eq!(report.reused_entries, previous.entry_count());
        assert_eq!(current.keys(), previous.keys());
    }

    #[test]
    fn widespread_change_prefers_rebuild() {
        let previous = built(&scene(), 8);
        let moved: Vec<_> = scene()
            .into_iter()
            .map(|(d, _)| (d, rect(0, 0, 4, 2)))
            .collect();
        let mut current = GenerationBuffer::new(4, &grid(), 8);
        project(&mut current, &moved);

        let report = merge_step(8, MergeParams::default())
            .merge(1, &previous, &mut current, &[])
            .unwrap();
        assert_eq!(report.outcome, MergeOutcome::PreferRebuild);
        assert!(!current.is_built());
    }

    #[test]
    fn unbuilt_previous_prefers_rebuild() {
        let previous = GenerationBuffer::new(4, &grid(), 8);
        let mut current = GenerationBuffer::new(4, &grid(), 8);
        project(&mut current, &scene());
        let report = merge_step(8, MergeParams::default())
            .merge(0, &previous, &mut current, &[])
            .unwrap();
        assert_eq!(report.outcome, MergeOutcome::PreferRebuild);
    }

    #[test]
    fn forced_tiles_refresh_drifted_depths() {
        let previous = built(&scene(), 8);
        let mut next = scene();
        // Below the tolerance: not a change, so the copied key keeps depth 3.0.
        next[2].0 = 3.05;
        let params = MergeParams {
            depth_tolerance: 0.1,
            ..MergeParams::default()
        };
        let tile = grid().tile_id(3, 1);

        let mut current = GenerationBuffer::new(4, &grid(), 8);
        project(&mut current, &next);
        let mut step = merge_step(8, params);
        step.merge(1, &previous, &mut current, &[]).unwrap();
        assert_eq!(key::TileKey::from_raw(current.tile_keys(tile)[0]).depth(), 3.0);

        let report = step.merge(2, &previous, &mut current, &[tile]).unwrap();
        assert_eq!(report.forced_tiles, 1);
        assert_eq!(report.touched_tiles, 0);
        assert_eq!(key::TileKey::from_raw(current.tile_keys(tile)[0]).depth(), 3.05);
    }

    #[test]
    fn merge_overflow_is_reported() {
        let previous = built(&scene(), 2);
        let mut next = scene();
        // Tile 1 would hold primitives 0, 1 and 2.
        next[2] = (3.0, rect(1, 0, 2, 1));
        let mut current = GenerationBuffer::new(4, &grid(), 2);
        project(&mut current, &next);

        let err = merge_step(2, MergeParams::default())
            .merge(1, &previous, &mut current, &[])
            .unwrap_err();
        assert!(err.is_capacity_violation());
        assert!(!current.is_built());
    }
}

//! Full rebuild of a generation's sorted tile index.
//!
//! Duplicates one key/value entry per (primitive, overlapped tile) pair,
//! sorts the entries tile-major, depth-minor and derives the per-tile
//! ranges. Invoked only for INITIAL frames, forced refreshes and
//! escalations.

use std::sync::Arc;

use super::kernels::{CpuRangeScan, CpuSortKernel, RangeScanKernel, SortKernel};
use crate::camera::Camera;
use crate::error::{SortError, SortResult};
use crate::generation::GenerationBuffer;
use crate::splats::ProjectionProvider;
use crate::tiles::{key, TileGrid, TileRange};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub entries: usize,
    pub populated_tiles: usize,
    pub max_tile_len: usize,
}

#[derive(Clone)]
pub struct TileSortBuilder {
    grid: TileGrid,
    max_element_of_tile: usize,
    sort: Arc<dyn SortKernel>,
    scan: Arc<dyn RangeScanKernel>,
}

impl TileSortBuilder {
    pub fn new(grid: TileGrid, max_element_of_tile: usize) -> Self {
        Self::with_kernels(
            grid,
            max_element_of_tile,
            Arc::new(CpuSortKernel),
            Arc::new(CpuRangeScan),
        )
    }

    pub fn with_kernels(
        grid: TileGrid,
        max_element_of_tile: usize,
        sort: Arc<dyn SortKernel>,
        scan: Arc<dyn RangeScanKernel>,
    ) -> Self {
        Self {
            grid,
            max_element_of_tile,
            sort,
            scan,
        }
    }

    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    pub fn sort_kernel(&self) -> Arc<dyn SortKernel> {
        Arc::clone(&self.sort)
    }

    /// Projects the primitives for `camera` into `generation` and rebuilds
    /// its sorted index.
    pub fn rebuild(
        &self,
        provider: &dyn ProjectionProvider,
        camera: &Camera,
        frame: u64,
        generation: &mut GenerationBuffer,
    ) -> SortResult<BuildReport> {
        let (records, rects) = generation.projection_mut();
        if let Err(err) = provider.project(camera, &self.grid, records, rects) {
            generation.invalidate();
            return Err(err);
        }
        self.build(frame, generation)
    }

    /// Rebuilds the sorted index from the projection already stored in
    /// `generation`.
    pub fn build(&self, frame: u64, generation: &mut GenerationBuffer) -> SortResult<BuildReport> {
        debug_assert_eq!(generation.tile_count(), self.grid.tile_count());

        // Count overlaps per tile, using the range array as scratch.
        let overflow = {
            let target = generation.sort_target(0);
            target.ranges.fill(TileRange::default());
            for rect in target.rects {
                for tile in rect.tiles(&self.grid) {
                    target.ranges[tile as usize].end += 1;
                }
            }
            find_overflow(target.ranges, self.max_element_of_tile)
        };
        if let Some((tile, count)) = overflow {
            generation.invalidate();
            log::warn!(
                "Tile {} overflows during rebuild: {} entries, capacity {}",
                tile,
                count,
                self.max_element_of_tile
            );
            return Err(SortError::CapacityViolation {
                tile,
                count,
                capacity: self.max_element_of_tile,
            });
        }
        let total: usize = generation.ranges().iter().map(|r| r.end as usize).sum();

        let target = generation.sort_target(total);
        let mut cursor = 0;
        for (id, (record, rect)) in target.records.iter().zip(target.rects).enumerate() {
            for tile in rect.tiles(&self.grid) {
                target.keys[cursor] = key::encode(tile, record.depth);
                target.values[cursor] = id as u32;
                cursor += 1;
            }
        }
        debug_assert_eq!(cursor, total);

        self.sort.sort_pairs(target.keys, target.values);
        self.scan.scan_ranges(target.keys, target.ranges);

        let report = BuildReport {
            entries: total,
            populated_tiles: target.ranges.iter().filter(|r| !r.is_empty()).count(),
            max_tile_len: target.ranges.iter().map(TileRange::len).max().unwrap_or(0),
        };
        generation.mark_built(frame);
        Ok(report)
    }
}

/// First tile whose count (stored in `end`) exceeds `capacity`.
fn find_overflow(counts: &[TileRange], capacity: usize) -> Option<(u32, usize)> {
    counts
        .iter()
        .enumerate()
        .find(|(_, r)| r.end as usize > capacity)
        .map(|(tile, r)| (tile as u32, r.end as usize))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sorting::verify::verify_generation;
    use crate::splats::ProjectionRecord;
    use crate::tiles::ScreenRect;

    fn write_projection(generation: &mut GenerationBuffer, prims: &[(f32, ScreenRect)]) {
        let (records, rects) = generation.projection_mut();
        for (i, &(depth, rect)) in prims.iter().enumerate() {
            records[i] = ProjectionRecord {
                depth,
                visible: 1,
                ..ProjectionRecord::default()
            };
            rects[i] = rect;
        }
    }

    fn rect(min_x: u16, min_y: u16, max_x: u16, max_y: u16) -> ScreenRect {
        ScreenRect {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    #[test]
    fn duplicates_and_orders_by_depth() {
        let grid = TileGrid::new(32, 16, 16);
        let builder = TileSortBuilder::new(grid, 8);
        let mut generation = GenerationBuffer::new(3, &grid, 8);
        write_projection(
            &mut generation,
            &[
                (5.0, rect(0, 0, 2, 1)),
                (1.0, rect(1, 0, 2, 1)),
                (3.0, rect(0, 0, 1, 1)),
            ],
        );

        let report = builder.build(4, &mut generation).unwrap();
        assert_eq!(report.entries, 4);
        assert_eq!(report.populated_tiles, 2);
        assert_eq!(report.max_tile_len, 2);
        assert_eq!(generation.tile_values(0), &[2, 0]);
        assert_eq!(generation.tile_values(1), &[1, 0]);
        assert_eq!(generation.built_from(), Some(4));
        verify_generation(&generation).unwrap();
    }

    #[test]
    fn equal_depths_break_ties_by_id() {
        let grid = TileGrid::new(16, 16, 16);
        let builder = TileSortBuilder::new(grid, 8);
        let mut generation = GenerationBuffer::new(3, &grid, 8);
        let whole = rect(0, 0, 1, 1);
        write_projection(&mut generation, &[(2.0, whole), (2.0, whole), (1.0, whole)]);

        builder.build(0, &mut generation).unwrap();
        assert_eq!(generation.tile_values(0), &[2, 0, 1]);
    }

    #[test]
    fn overflowing_tile_is_reported_not_truncated() {
        let grid = TileGrid::new(32, 16, 16);
        let builder = TileSortBuilder::new(grid, 2);
        let mut generation = GenerationBuffer::new(3, &grid, 2);
        let right = rect(1, 0, 2, 1);
        write_projection(&mut generation, &[(1.0, right), (2.0, right), (3.0, right)]);

        let err = builder.build(0, &mut generation).unwrap_err();
        assert_eq!(
            err,
            SortError::CapacityViolation {
                tile: 1,
                count: 3,
                capacity: 2
            }
        );
        assert!(!generation.is_built());
        assert_eq!(generation.entry_count(), 0);
    }

    #[test]
    fn culled_primitives_produce_no_entries() {
        let grid = TileGrid::new(32, 32, 16);
        let builder = TileSortBuilder::new(grid, 4);
        let mut generation = GenerationBuffer::new(2, &grid, 4);
        write_projection(
            &mut generation,
            &[(1.0, ScreenRect::EMPTY), (2.0, rect(1, 1, 2, 2))],
        );

        let report = builder.build(0, &mut generation).unwrap();
        assert_eq!(report.entries, 1);
        assert_eq!(generation.tile_values(3), &[1]);
        assert!(generation.tile_range(0).is_empty());
    }
}

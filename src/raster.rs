//! Downstream consumer of a finished generation.
//!
//! Compositing itself lives on the device. [`TileDigestRasterizer`] walks
//! the sorted index the same way a tile rasterizer would and condenses it
//! into a [`FrameDigest`], which is enough to compare frames for
//! equivalence.

use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;

use crate::camera::Camera;
use crate::generation::GenerationBuffer;

/// Accumulated opacity at which a tile stops blending further splats.
const SATURATION: f32 = 0.9999;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameDigest {
    pub populated_tiles: usize,
    pub entries: usize,
    pub max_tile_len: usize,
    /// Tiles whose front-to-back blend saturated before the last entry.
    pub saturated_tiles: usize,
    /// Order-sensitive hash over every tile's primitive sequence.
    pub digest: u64,
}

pub trait Rasterizer: Send {
    fn rasterize(&mut self, generation: &GenerationBuffer, camera: &Camera) -> FrameDigest;
}

#[derive(Debug, Default)]
pub struct TileDigestRasterizer;

impl Rasterizer for TileDigestRasterizer {
    fn rasterize(&mut self, generation: &GenerationBuffer, _camera: &Camera) -> FrameDigest {
        let records = generation.records();
        let mut hasher = DefaultHasher::new();
        let mut out = FrameDigest::default();

        for (tile, range) in generation.ranges().iter().enumerate() {
            if range.is_empty() {
                continue;
            }
            out.populated_tiles += 1;
            out.entries += range.len();
            out.max_tile_len = out.max_tile_len.max(range.len());

            hasher.write_u32(tile as u32);
            let mut transmittance = 1.0f32;
            let mut saturated_at = None;
            for (i, &id) in generation.tile_values(tile as u32).iter().enumerate() {
                hasher.write_u32(id);
                let alpha = records[id as usize].conic_opacity[3].clamp(0.0, 0.99);
                transmittance *= 1.0 - alpha;
                if saturated_at.is_none() && 1.0 - transmittance >= SATURATION {
                    saturated_at = Some(i);
                }
            }
            if matches!(saturated_at, Some(i) if i + 1 < range.len()) {
                out.saturated_tiles += 1;
            }
        }

        out.digest = hasher.finish();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sorting::TileSortBuilder;
    use crate::splats::ProjectionRecord;
    use crate::tiles::{ScreenRect, TileGrid};

    fn generation(order: &[(f32, f32)]) -> GenerationBuffer {
        let grid = TileGrid::new(32, 16, 16);
        let mut generation = GenerationBuffer::new(order.len(), &grid, 16);
        let (records, rects) = generation.projection_mut();
        for (i, &(depth, opacity)) in order.iter().enumerate() {
            records[i] = ProjectionRecord {
                depth,
                conic_opacity: [1.0, 0.0, 1.0, opacity],
                visible: 1,
                ..ProjectionRecord::default()
            };
            rects[i] = ScreenRect {
                min_x: 0,
                min_y: 0,
                max_x: 1,
                max_y: 1,
            };
        }
        TileSortBuilder::new(grid, 16).build(0, &mut generation).unwrap();
        generation
    }

    #[test]
    fn digest_depends_on_order() {
        let camera = Camera::default();
        let a = TileDigestRasterizer.rasterize(&generation(&[(1.0, 0.5), (2.0, 0.5)]), &camera);
        let b = TileDigestRasterizer.rasterize(&generation(&[(2.0, 0.5), (1.0, 0.5)]), &camera);
        assert_eq!(a.entries, 2);
        assert_eq!(a.populated_tiles, 1);
        assert_ne!(a.digest, b.digest);

        let again = TileDigestRasterizer.rasterize(&generation(&[(1.0, 0.5), (2.0, 0.5)]), &camera);
        assert_eq!(a, again);
    }

    #[test]
    fn opaque_front_splats_saturate_the_tile() {
        let order: Vec<(f32, f32)> = (0..8).map(|i| (i as f32 + 1.0, 0.99)).collect();
        let digest = TileDigestRasterizer.rasterize(&generation(&order), &Camera::default());
        assert_eq!(digest.saturated_tiles, 1);
        assert_eq!(digest.max_tile_len, 8);
    }
}

//! Screen partitioning into fixed-size tiles.
//!
//! Tile ids are row-major: `id = y * tiles_x + x`. The tile size is fixed
//! for the lifetime of a session; everything sized from a [`TileGrid`]
//! (range index, per-tile capacity) assumes it never changes.

pub mod key;
pub mod morton;
pub mod rect;

pub use key::TileKey;
pub use rect::ScreenRect;

use bytemuck::{Pod, Zeroable};
use glam::Vec2;

use crate::error::{SortError, SortResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    width: u32,
    height: u32,
    tile_size: u32,
    tiles_x: u32,
    tiles_y: u32,
}

impl TileGrid {
    /// Panics on a zero dimension or a grid too large for packed rects; see
    /// [`TileGrid::try_new`].
    pub fn new(width: u32, height: u32, tile_size: u32) -> Self {
        match Self::try_new(width, height, tile_size) {
            Ok(grid) => grid,
            Err(err) => panic!("{}", err),
        }
    }

    pub fn try_new(width: u32, height: u32, tile_size: u32) -> SortResult<Self> {
        if tile_size == 0 {
            return Err(SortError::InvalidConfig(
                "tile_size must be at least 1".into(),
            ));
        }
        if width == 0 || height == 0 {
            return Err(SortError::InvalidConfig(format!(
                "resolution {}x{} must be non-zero",
                width, height
            )));
        }
        let tiles_x = width.div_ceil(tile_size);
        let tiles_y = height.div_ceil(tile_size);
        if tiles_x > u16::MAX as u32 || tiles_y > u16::MAX as u32 {
            return Err(SortError::InvalidConfig(format!(
                "tile grid {}x{} does not fit 16-bit screen rects",
                tiles_x, tiles_y
            )));
        }
        Ok(Self {
            width,
            height,
            tile_size,
            tiles_x,
            tiles_y,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    pub fn tiles_x(&self) -> u32 {
        self.tiles_x
    }

    pub fn tiles_y(&self) -> u32 {
        self.tiles_y
    }

    pub fn tile_count(&self) -> usize {
        self.tiles_x as usize * self.tiles_y as usize
    }

    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height as f32
    }

    pub fn tile_id(&self, x: u32, y: u32) -> u32 {
        debug_assert!(x < self.tiles_x && y < self.tiles_y);
        y * self.tiles_x + x
    }

    pub fn tile_coords(&self, tile: u32) -> (u32, u32) {
        (tile % self.tiles_x, tile / self.tiles_x)
    }

    /// Tile-space bounding rect of a disc of `radius` pixels around `center`.
    /// The max corner is exclusive; discs entirely off screen give an empty
    /// rect.
    pub fn rect_for_disc(&self, center: Vec2, radius: f32) -> ScreenRect {
        let ts = self.tile_size as f32;
        let clamp_x = |v: f32| v.clamp(0.0, self.tiles_x as f32) as u16;
        let clamp_y = |v: f32| v.clamp(0.0, self.tiles_y as f32) as u16;
        let rect = ScreenRect {
            min_x: clamp_x(((center.x - radius) / ts).floor()),
            min_y: clamp_y(((center.y - radius) / ts).floor()),
            max_x: clamp_x(((center.x + radius + ts - 1.0) / ts).floor()),
            max_y: clamp_y(((center.y + radius + ts - 1.0) / ts).floor()),
        };
        if rect.is_empty() {
            ScreenRect::EMPTY
        } else {
            rect
        }
    }
}

/// Half-open `[start, end)` interval into the sorted key/value arrays.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct TileRange {
    pub start: u32,
    pub end: u32,
}

impl TileRange {
    pub fn new(start: u32, end: u32) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        (self.end - self.start) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn as_range(&self) -> std::ops::Range<usize> {
        self.start as usize..self.end as usize
    }
}

use bytemuck::{Pod, Zeroable};

use super::TileGrid;

/// Per-primitive bounding box in tile coordinates, max corner exclusive.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct ScreenRect {
    pub min_x: u16,
    pub min_y: u16,
    pub max_x: u16,
    pub max_y: u16,
}

impl ScreenRect {
    pub const EMPTY: ScreenRect = ScreenRect {
        min_x: 0,
        min_y: 0,
        max_x: 0,
        max_y: 0,
    };

    pub fn is_empty(&self) -> bool {
        self.max_x <= self.min_x || self.max_y <= self.min_y
    }

    /// Number of tiles the rect overlaps.
    pub fn area(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        (self.max_x - self.min_x) as usize * (self.max_y - self.min_y) as usize
    }

    /// Overlapped tile ids in row-major order.
    pub fn tiles<'a>(&self, grid: &'a TileGrid) -> impl Iterator<Item = u32> + 'a {
        let rect = if self.is_empty() { Self::EMPTY } else { *self };
        (rect.min_y as u32..rect.max_y as u32).flat_map(move |y| {
            (rect.min_x as u32..rect.max_x as u32).map(move |x| grid.tile_id(x, y))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_is_eight_bytes() {
        assert_eq!(std::mem::size_of::<ScreenRect>(), 8);
    }

    #[test]
    fn tiles_walk_rows() {
        let grid = TileGrid::new(64, 64, 16);
        let rect = ScreenRect {
            min_x: 1,
            min_y: 2,
            max_x: 3,
            max_y: 4,
        };
        let tiles: Vec<u32> = rect.tiles(&grid).collect();
        assert_eq!(tiles, vec![9, 10, 13, 14]);
        assert_eq!(rect.area(), 4);
    }

    #[test]
    fn empty_rect_has_no_tiles() {
        let grid = TileGrid::new(64, 64, 16);
        let inverted = ScreenRect {
            min_x: 3,
            min_y: 0,
            max_x: 1,
            max_y: 2,
        };
        assert_eq!(inverted.tiles(&grid).count(), 0);
        assert_eq!(inverted.area(), 0);
    }
}

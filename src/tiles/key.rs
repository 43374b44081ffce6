//! Duplicated-entry sort keys.
//!
//! A key packs the tile id into the high 32 bits and the IEEE bits of the
//! (non-negative) view depth into the low 32 bits. For non-negative floats
//! the bit pattern is monotonic, so sorting the raw `u64` orders entries
//! tile-major, depth-minor (front to back).

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TileKey(u64);

impl TileKey {
    pub fn new(tile: u32, depth: f32) -> Self {
        Self(((tile as u64) << 32) | depth_bits(depth) as u64)
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn tile(self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn depth(self) -> f32 {
        f32::from_bits(self.0 as u32)
    }
}

/// Raw key for `(tile, depth)`.
#[inline]
pub fn encode(tile: u32, depth: f32) -> u64 {
    TileKey::new(tile, depth).raw()
}

#[inline]
pub fn tile_of(raw: u64) -> u32 {
    (raw >> 32) as u32
}

#[inline]
fn depth_bits(depth: f32) -> u32 {
    // -0.0 and NaN would break the integer ordering.
    if depth > 0.0 {
        depth.to_bits()
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_tile_major_depth_minor() {
        let near_in_tile_1 = encode(1, 0.5);
        let far_in_tile_0 = encode(0, 90.0);
        let far_in_tile_1 = encode(1, 3.0);
        assert!(far_in_tile_0 < near_in_tile_1);
        assert!(near_in_tile_1 < far_in_tile_1);
    }

    #[test]
    fn decodes_fields() {
        let key = TileKey::new(3599, 12.25);
        assert_eq!(key.tile(), 3599);
        assert_eq!(key.depth(), 12.25);
        assert_eq!(tile_of(key.raw()), 3599);
    }

    #[test]
    fn negative_zero_sorts_first() {
        assert_eq!(encode(2, -0.0), encode(2, 0.0));
        assert!(encode(2, -0.0) < encode(2, f32::MIN_POSITIVE));
    }
}

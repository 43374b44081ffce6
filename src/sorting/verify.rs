//! Structural checks on a generation's sorted index.

use crate::error::{SortError, SortResult};
use crate::generation::GenerationBuffer;
use crate::tiles::key;

/// Checks that `generation` is a valid sorted index:
///
/// * tile ranges partition the entry arrays in tile order with no gaps,
/// * no tile holds more than `max_element_of_tile` entries,
/// * every key inside a tile's range encodes that tile,
/// * `(key, value)` pairs are strictly increasing within a tile,
/// * every value is a valid primitive id.
pub fn verify_generation(generation: &GenerationBuffer) -> SortResult<()> {
    let keys = generation.keys();
    let values = generation.values();
    let primitives = generation.primitive_count();
    let mut cursor = 0usize;

    for (tile, range) in generation.ranges().iter().enumerate() {
        let tile = tile as u32;
        let violation = |position: usize, reason: String| SortError::OrderingViolation {
            tile,
            position,
            reason,
        };

        if range.start as usize != cursor || range.end < range.start {
            return Err(violation(
                range.start as usize,
                format!(
                    "range [{}, {}) does not continue from entry {}",
                    range.start, range.end, cursor
                ),
            ));
        }
        if range.end as usize > keys.len() {
            return Err(violation(
                range.end as usize,
                format!("range ends past {} entries", keys.len()),
            ));
        }
        if range.len() > generation.max_element_of_tile() {
            return Err(SortError::CapacityViolation {
                tile,
                count: range.len(),
                capacity: generation.max_element_of_tile(),
            });
        }

        for position in range.as_range() {
            if key::tile_of(keys[position]) != tile {
                return Err(violation(
                    position,
                    format!("key belongs to tile {}", key::tile_of(keys[position])),
                ));
            }
            if values[position] as usize >= primitives {
                return Err(violation(
                    position,
                    format!("primitive id {} out of range", values[position]),
                ));
            }
            if position > range.start as usize
                && (keys[position - 1], values[position - 1]) >= (keys[position], values[position])
            {
                return Err(violation(position, "entries out of order".into()));
            }
        }
        cursor = range.end as usize;
    }

    if cursor != keys.len() {
        return Err(SortError::OrderingViolation {
            tile: generation.tile_count() as u32,
            position: cursor,
            reason: format!("{} entries lie outside every tile range", keys.len() - cursor),
        });
    }
    Ok(())
}

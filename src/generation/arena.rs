//! Two-slot storage for the "previous" and "current" generations.
//!
//! The arena owns the buffers; which slot plays which role is decided by
//! the scheduler's slot flag. A frame borrows the previous slot shared and
//! the current slot exclusively, so the two can never alias.

use std::mem;

use super::GenerationBuffer;
use crate::tiles::TileGrid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotId {
    A,
    B,
}

impl SlotId {
    pub fn other(self) -> Self {
        match self {
            SlotId::A => SlotId::B,
            SlotId::B => SlotId::A,
        }
    }

    fn index(self) -> usize {
        match self {
            SlotId::A => 0,
            SlotId::B => 1,
        }
    }
}

pub struct GenerationArena {
    slots: [GenerationBuffer; 2],
}

impl GenerationArena {
    pub fn new(primitives: usize, grid: &TileGrid, max_element_of_tile: usize) -> Self {
        Self {
            slots: [
                GenerationBuffer::new(primitives, grid, max_element_of_tile),
                GenerationBuffer::new(primitives, grid, max_element_of_tile),
            ],
        }
    }

    pub fn slot(&self, id: SlotId) -> &GenerationBuffer {
        &self.slots[id.index()]
    }

    pub fn slot_mut(&mut self, id: SlotId) -> &mut GenerationBuffer {
        &mut self.slots[id.index()]
    }

    /// Shared borrow of `previous` alongside an exclusive borrow of
    /// `current`.
    pub fn pair_mut(
        &mut self,
        previous: SlotId,
        current: SlotId,
    ) -> (&GenerationBuffer, &mut GenerationBuffer) {
        assert_ne!(previous, current, "previous and current slots must differ");
        let (first, second) = self.slots.split_at_mut(1);
        match current {
            SlotId::A => (&second[0], &mut first[0]),
            SlotId::B => (&first[0], &mut second[0]),
        }
    }

    /// Exchanges the buffer in `id` with `buffer`. Used to install a
    /// generation produced off the critical path.
    pub fn exchange(&mut self, id: SlotId, buffer: &mut GenerationBuffer) {
        let slot = &mut self.slots[id.index()];
        assert!(
            slot.same_shape(buffer),
            "exchanged generation was sized for a different session"
        );
        mem::swap(slot, buffer);
    }
}

//! Error types for the tile sort engine.

use thiserror::Error;

/// Result type for build, merge and scheduling operations.
pub type SortResult<T> = Result<T, SortError>;

/// Errors that can occur while producing a generation for a frame.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SortError {
    /// A tile's duplicated-entry count exceeds `max_element_of_tile`.
    /// Truncating the tile would drop an arbitrary subset of primitives,
    /// so the frame is never produced from a partial tile.
    #[error("tile {tile} holds {count} entries, capacity is {capacity}")]
    CapacityViolation {
        tile: u32,
        count: usize,
        capacity: usize,
    },

    /// Camera parameters are missing, non-finite or degenerate.
    #[error("invalid camera: {0}")]
    InvalidCamera(String),

    /// A generation breaks the (tile, depth, id) ordering or the range
    /// partition. Only produced by verification.
    #[error("ordering violation in tile {tile} at entry {position}: {reason}")]
    OrderingViolation {
        tile: u32,
        position: usize,
        reason: String,
    },

    /// The projection provider produced a different primitive count than the
    /// session was sized for.
    #[error("projection produced {actual} primitives, session holds {expected}")]
    PrimitiveCountMismatch { expected: usize, actual: usize },

    /// Session configuration that no frame could be produced from.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The background refresh worker is gone.
    #[error("background refresh worker: {0}")]
    BackgroundWorker(String),
}

impl SortError {
    /// Capacity violations during a reuse merge are recovered by escalating
    /// the frame to a full rebuild.
    pub fn is_capacity_violation(&self) -> bool {
        matches!(self, SortError::CapacityViolation { .. })
    }
}

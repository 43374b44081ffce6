//! Tile binning, sorting and the incremental reuse merge.

pub mod builder;
pub mod kernels;
pub mod merge;
pub mod verify;

pub use builder::{BuildReport, TileSortBuilder};
pub use kernels::{CpuRangeScan, CpuSortKernel, RangeScanKernel, SortKernel};
pub use merge::{MergeOutcome, MergeParams, MergeReport, MergeStep};
pub use verify::verify_generation;

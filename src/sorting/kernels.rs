//! Sort and range-scan capabilities.
//!
//! On a device these are radix-sort and boundary-scan kernels. The core
//! only relies on the contracts below, so the CPU versions here double as
//! deterministic stand-ins for tests.

use std::cell::RefCell;

use rayon::prelude::*;

use crate::tiles::{key, TileRange};

/// Below this many entries a sequential sort beats the rayon fan-out.
const PARALLEL_SORT_THRESHOLD: usize = 1 << 14;

thread_local! {
    // Packed (key, value) pairs. Grows to the largest sort seen on the
    // thread and is reused, so per-tile merge sorts do not allocate.
    static SORT_SCRATCH: RefCell<Vec<u128>> = const { RefCell::new(Vec::new()) };
}

pub trait SortKernel: Send + Sync {
    /// Sorts `keys` ascending, permuting `values` alongside. Equal keys are
    /// ordered by value, so the output is fully determined by the input
    /// multiset.
    fn sort_pairs(&self, keys: &mut [u64], values: &mut [u32]);
}

pub trait RangeScanKernel: Send + Sync {
    /// Writes the `[start, end)` interval of every tile in sorted `keys`.
    /// Empty tiles get an empty interval positioned where the tile would
    /// start, keeping the ranges monotonic.
    fn scan_ranges(&self, keys: &[u64], ranges: &mut [TileRange]);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CpuSortKernel;

impl SortKernel for CpuSortKernel {
    fn sort_pairs(&self, keys: &mut [u64], values: &mut [u32]) {
        assert_eq!(keys.len(), values.len(), "key/value length mismatch");
        if keys.len() < 2 {
            return;
        }

        SORT_SCRATCH.with(|scratch| match scratch.try_borrow_mut() {
            Ok(mut packed) => sort_packed(&mut packed, keys, values),
            // Re-entered from a task stolen during a parallel sort.
            Err(_) => sort_packed(&mut Vec::new(), keys, values),
        });
    }
}

fn sort_packed(packed: &mut Vec<u128>, keys: &mut [u64], values: &mut [u32]) {
    packed.clear();
    packed.extend(
        keys.iter()
            .zip(values.iter())
            .map(|(&k, &v)| ((k as u128) << 32) | v as u128),
    );
    if packed.len() >= PARALLEL_SORT_THRESHOLD {
        packed.par_sort_unstable();
    } else {
        packed.sort_unstable();
    }

    for ((k, v), &pair) in keys.iter_mut().zip(values.iter_mut()).zip(packed.iter()) {
        *k = (pair >> 32) as u64;
        *v = pair as u32;
    }
}

/// Capacity of the calling thread's sort scratch.
#[cfg(test)]
fn scratch_capacity() -> usize {
    SORT_SCRATCH.with(|scratch| scratch.borrow().capacity())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CpuRangeScan;

impl RangeScanKernel for CpuRangeScan {
    fn scan_ranges(&self, keys: &[u64], ranges: &mut [TileRange]) {
        ranges.par_iter_mut().enumerate().for_each(|(tile, range)| {
            let tile = tile as u32;
            let start = keys.partition_point(|&k| key::tile_of(k) < tile);
            let end = keys.partition_point(|&k| key::tile_of(k) <= tile);
            *range = TileRange::new(start as u32, end as u32);
        });
    }
}

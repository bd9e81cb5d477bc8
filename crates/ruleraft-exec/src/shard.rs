//! # shard
//!
//! why: cut an input into contiguous, balanced pieces for parallel work
//! relations: output fed to engine.rs
//! what: DataShard, plan, shard_bounds, worker count resolution
//!
//! Boundaries depend only on `(len, workers)`, so the same input always
//! splits the same way and parallel output stays reproducible.

use std::num::NonZeroUsize;
use std::ops::Range;
use std::thread;

/// A contiguous slice of the input, owned by one worker task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataShard<T> {
    data: Vec<T>,
    shard_id: u32,
    total_shards: u32,
}

impl<T> DataShard<T> {
    pub fn new(data: Vec<T>, shard_id: u32, total_shards: u32) -> Self {
        Self {
            data,
            shard_id,
            total_shards,
        }
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn shard_id(&self) -> u32 {
        self.shard_id
    }

    pub fn total_shards(&self) -> u32 {
        self.total_shards
    }

    pub fn is_last(&self) -> bool {
        self.shard_id + 1 == self.total_shards
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// `0` means one worker per available core, never fewer than one.
pub fn resolve_workers(workers: usize) -> usize {
    if workers > 0 {
        return workers;
    }
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Index ranges of each shard for an input of `len` items.
pub fn shard_bounds(len: usize, workers: usize) -> Vec<Range<usize>> {
    if len == 0 {
        return vec![0..0];
    }
    let shard_size = len.div_ceil(resolve_workers(workers)).max(1);
    (0..len)
        .step_by(shard_size)
        .map(|start| start..(start + shard_size).min(len))
        .collect()
}

/// Split `data` into shards sized for `workers` parallel tasks.
pub fn plan<T>(data: Vec<T>, workers: usize) -> Vec<DataShard<T>> {
    let bounds = shard_bounds(data.len(), workers);
    let total = bounds.len() as u32;

    let mut items = data.into_iter();
    bounds
        .into_iter()
        .enumerate()
        .map(|(id, range)| DataShard::new(items.by_ref().take(range.len()).collect(), id as u32, total))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_one_empty_shard() {
        let shards = plan(Vec::<u32>::new(), 4);
        assert_eq!(shards.len(), 1);
        assert!(shards[0].is_empty());
        assert!(shards[0].is_last());
    }

    #[test]
    fn more_workers_than_items_gives_unit_shards() {
        let shards = plan(vec![1, 2, 3], 8);
        assert_eq!(shards.len(), 3);
        assert!(shards.iter().all(|s| s.len() == 1));
    }

    #[test]
    fn final_shard_absorbs_remainder() {
        let bounds = shard_bounds(10, 4);
        assert_eq!(bounds, vec![0..3, 3..6, 6..9, 9..10]);
    }

    #[test]
    fn zero_workers_picks_at_least_one() {
        assert!(resolve_workers(0) >= 1);
        assert_eq!(resolve_workers(3), 3);
    }
}

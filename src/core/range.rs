// Copyright 2024-2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Distribution of positions `0..len` among the workers of a round.

use crate::macros::log_debug;
#[cfg(feature = "log_parallelism")]
use crate::macros::{log_info, log_trace};
use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
#[cfg(feature = "log_parallelism")]
use std::sync::Mutex;

/// A factory for handing out ranges of positions to various workers.
///
/// Given a factory created by `RangeFactory::new(num_workers)`, the ranges
/// `(0..num_workers).map(|i| factory.range(i))` and the orchestrator
/// `factory.orchestrator()`: after `orchestrator.reset_ranges(len)`, iterating
/// over all the ranges yields each position of `0..len` exactly once.
pub trait RangeFactory {
    type Range: Range;
    type Orchestrator: RangeOrchestrator;

    /// Creates a new factory for a range split across the given number of
    /// workers.
    fn new(num_workers: usize) -> Self;

    /// Returns the orchestrator object for all the ranges created by this
    /// factory.
    fn orchestrator(self) -> Self::Orchestrator;

    /// Returns the range for the given worker.
    fn range(&self, worker_id: usize) -> Self::Range;
}

/// An orchestrator for the ranges given to all the workers.
pub trait RangeOrchestrator {
    /// Resets all the ranges to prepare a new round over `0..num_elements`.
    fn reset_ranges(&self, num_elements: usize);

    /// Hook to display various debugging statistics.
    #[cfg(feature = "log_parallelism")]
    fn print_statistics(&self) {}
}

/// The range of positions of one worker.
pub trait Range {
    /// Type of iterator returned by [`iter()`](Self::iter).
    type Iter<'a>: Iterator<Item = usize>
    where
        Self: 'a;

    /// Returns an iterator over the positions of this range. Positions may be
    /// dynamically stolen from/by other workers.
    fn iter(&self) -> Self::Iter<'_>;
}

/// A factory that hands out a fixed range to each worker, without any stealing.
pub struct FixedRangeFactory {
    /// Number of workers.
    num_workers: usize,
    /// Total number of elements in the current round.
    num_elements: Arc<AtomicUsize>,
}

impl RangeFactory for FixedRangeFactory {
    type Range = FixedRange;
    type Orchestrator = FixedRangeOrchestrator;

    fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            num_elements: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn orchestrator(self) -> FixedRangeOrchestrator {
        FixedRangeOrchestrator {
            num_elements: self.num_elements,
        }
    }

    fn range(&self, worker_id: usize) -> FixedRange {
        FixedRange {
            id: worker_id,
            num_workers: self.num_workers,
            num_elements: self.num_elements.clone(),
        }
    }
}

/// An orchestrator for the [`FixedRangeFactory`].
pub struct FixedRangeOrchestrator {
    /// Total number of elements.
    num_elements: Arc<AtomicUsize>,
}

impl RangeOrchestrator for FixedRangeOrchestrator {
    fn reset_ranges(&self, num_elements: usize) {
        // Relaxed is enough: lending the round to the workers synchronizes with them.
        self.num_elements.store(num_elements, Ordering::Relaxed);
    }
}

/// A fixed range: worker `i` out of `n` gets `i*len/n..(i+1)*len/n`.
pub struct FixedRange {
    /// Index of the worker that owns this range.
    id: usize,
    /// Total number of workers.
    num_workers: usize,
    /// Total number of elements.
    num_elements: Arc<AtomicUsize>,
}

impl Range for FixedRange {
    type Iter<'a> = std::ops::Range<usize>;

    fn iter(&self) -> Self::Iter<'_> {
        let num_elements = self.num_elements.load(Ordering::Relaxed);
        // The products don't overflow: `num_elements` fits in u32 (checked by the
        // executors) and so does the number of workers.
        let start = ((self.id as u64 * num_elements as u64) / self.num_workers as u64) as usize;
        let end =
            (((self.id as u64 + 1) * num_elements as u64) / self.num_workers as u64) as usize;
        start..end
    }
}

/// A factory for ranges that implement work stealing among workers.
///
/// Whenever a worker finishes processing its range, it looks for the largest
/// range of another worker, splits it in two and steals the second half.
pub struct WorkStealingRangeFactory {
    /// Handle to the ranges of all the workers.
    ranges: Arc<[AtomicRange]>,
    /// Handle to the work-stealing statistics.
    #[cfg(feature = "log_parallelism")]
    stats: Arc<Mutex<WorkStealingStats>>,
}

impl RangeFactory for WorkStealingRangeFactory {
    type Range = WorkStealingRange;
    type Orchestrator = WorkStealingRangeOrchestrator;

    fn new(num_workers: usize) -> Self {
        if u32::try_from(num_workers).is_err() {
            panic!(
                "cannot spawn {num_workers} workers: only up to {} workers (2^32 - 1) are supported",
                u32::MAX
            );
        }
        Self {
            ranges: (0..num_workers).map(|_| AtomicRange::default()).collect(),
            #[cfg(feature = "log_parallelism")]
            stats: Arc::new(Mutex::new(WorkStealingStats::default())),
        }
    }

    fn orchestrator(self) -> WorkStealingRangeOrchestrator {
        WorkStealingRangeOrchestrator {
            ranges: self.ranges,
            #[cfg(feature = "log_parallelism")]
            stats: self.stats,
        }
    }

    fn range(&self, worker_id: usize) -> WorkStealingRange {
        WorkStealingRange {
            id: worker_id,
            ranges: self.ranges.clone(),
            #[cfg(feature = "log_parallelism")]
            stats: self.stats.clone(),
        }
    }
}

/// An orchestrator for the [`WorkStealingRangeFactory`].
pub struct WorkStealingRangeOrchestrator {
    /// Handle to the ranges of all the workers.
    ranges: Arc<[AtomicRange]>,
    /// Handle to the work-stealing statistics.
    #[cfg(feature = "log_parallelism")]
    stats: Arc<Mutex<WorkStealingStats>>,
}

impl RangeOrchestrator for WorkStealingRangeOrchestrator {
    fn reset_ranges(&self, num_elements: usize) {
        log_debug!("Resetting work-stealing ranges to {num_elements} elements");
        let num_workers = self.ranges.len() as u64;
        let num_elements = u32::try_from(num_elements).unwrap_or_else(|_| {
            panic!(
                "cannot process range of {num_elements} elements: only ranges of up to {} elements (2^32 - 1) are supported",
                u32::MAX
            );
        }) as u64;
        for (i, range) in self.ranges.iter().enumerate() {
            let i = i as u64;
            // Both bounds fit in u32 because `i < num_workers` and `num_elements`
            // fits in u32.
            let start = (i * num_elements) / num_workers;
            let end = ((i + 1) * num_elements) / num_workers;
            range.store(PackedRange::new(start as u32, end as u32));
        }
    }

    #[cfg(feature = "log_parallelism")]
    fn print_statistics(&self) {
        let stats = self.stats.lock().unwrap();
        log_info!("Work-stealing statistics:");
        log_info!("- increments: {}", stats.increments);
        log_info!("- thefts: {}", stats.thefts);
        log_info!("- failed_thefts: {}", stats.failed_thefts);
    }
}

/// A range that implements work stealing.
pub struct WorkStealingRange {
    /// Index of the worker that owns this range.
    id: usize,
    /// Handle to the ranges of all the workers.
    ranges: Arc<[AtomicRange]>,
    /// Handle to the work-stealing statistics.
    #[cfg(feature = "log_parallelism")]
    stats: Arc<Mutex<WorkStealingStats>>,
}

impl Range for WorkStealingRange {
    type Iter<'a> = WorkStealingRangeIterator<'a>;

    fn iter(&self) -> Self::Iter<'_> {
        WorkStealingRangeIterator {
            id: self.id,
            ranges: &self.ranges,
            #[cfg(feature = "log_parallelism")]
            stats: WorkStealingStats::default(),
            #[cfg(feature = "log_parallelism")]
            global_stats: &self.stats,
        }
    }
}

/// A [start, end) pair that can atomically be modified.
struct AtomicRange(CachePadded<AtomicU64>);

impl Default for AtomicRange {
    fn default() -> Self {
        AtomicRange(CachePadded::new(AtomicU64::new(PackedRange::default().0)))
    }
}

impl AtomicRange {
    #[inline(always)]
    fn load(&self) -> PackedRange {
        PackedRange(self.0.load(Ordering::SeqCst))
    }

    #[inline(always)]
    fn store(&self, range: PackedRange) {
        self.0.store(range.0, Ordering::SeqCst)
    }

    /// Atomically compares and exchanges the range. In case of failure, the
    /// range currently stored is returned.
    #[inline(always)]
    fn compare_exchange(&self, before: PackedRange, after: PackedRange) -> Result<(), PackedRange> {
        self.0
            .compare_exchange(before.0, after.0, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(PackedRange)
    }
}

/// A [start, end) range packed into a `u64`, so that it can be loaded/stored
/// atomically.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
struct PackedRange(u64);

impl PackedRange {
    #[inline(always)]
    fn new(start: u32, end: u32) -> Self {
        Self((start as u64) | ((end as u64) << 32))
    }

    #[inline(always)]
    fn start(self) -> u32 {
        self.0 as u32
    }

    #[inline(always)]
    fn end(self) -> u32 {
        (self.0 >> 32) as u32
    }

    #[inline(always)]
    fn len(self) -> u32 {
        self.end() - self.start()
    }

    #[inline(always)]
    fn is_empty(self) -> bool {
        self.start() == self.end()
    }

    /// Pops the first position of a non-empty range.
    #[inline(always)]
    fn increment_start(self) -> (u32, Self) {
        debug_assert!(self.start() < self.end());
        (self.start(), PackedRange::new(self.start() + 1, self.end()))
    }

    /// Splits the range into two halves. If the input range is non-empty, the
    /// second half is non-empty.
    #[inline(always)]
    fn split(self) -> (Self, Self) {
        let start = self.start();
        let end = self.end();
        let middle = ((start as u64 + end as u64) / 2) as u32;
        (Self::new(start, middle), Self::new(middle, end))
    }
}

/// Work-stealing counters, accumulated over all the rounds of a thread pool.
#[cfg(feature = "log_parallelism")]
#[derive(Default)]
struct WorkStealingStats {
    /// Number of positions popped from the worker's own range.
    increments: u64,
    /// Number of ranges stolen from other workers.
    thefts: u64,
    /// Number of thefts that raced with another modification of the target.
    failed_thefts: u64,
}

/// An iterator for the [`WorkStealingRange`].
pub struct WorkStealingRangeIterator<'a> {
    /// Index of the worker that owns this range.
    id: usize,
    /// Handle to the ranges of all the workers.
    ranges: &'a [AtomicRange],
    /// Local work-stealing statistics.
    #[cfg(feature = "log_parallelism")]
    stats: WorkStealingStats,
    /// Handle to the global work-stealing statistics.
    #[cfg(feature = "log_parallelism")]
    global_stats: &'a Mutex<WorkStealingStats>,
}

#[cfg(feature = "log_parallelism")]
impl Drop for WorkStealingRangeIterator<'_> {
    fn drop(&mut self) {
        let mut global = self.global_stats.lock().unwrap();
        global.increments += self.stats.increments;
        global.thefts += self.stats.thefts;
        global.failed_thefts += self.stats.failed_thefts;
    }
}

impl Iterator for WorkStealingRangeIterator<'_> {
    type Item = usize;

    #[inline(always)]
    fn next(&mut self) -> Option<usize> {
        let my_atomic_range: &AtomicRange = &self.ranges[self.id];
        let mut my_range: PackedRange = my_atomic_range.load();

        // Pop from this worker's own range, retrying if a thief modified it.
        while !my_range.is_empty() {
            let (taken, my_new_range) = my_range.increment_start();
            match my_atomic_range.compare_exchange(my_range, my_new_range) {
                Ok(()) => {
                    #[cfg(feature = "log_parallelism")]
                    {
                        self.stats.increments += 1;
                    }
                    return Some(taken as usize);
                }
                Err(range) => my_range = range,
            }
        }

        self.steal()
    }
}

impl WorkStealingRangeIterator<'_> {
    /// Steals half of the largest range of the other workers, once this worker's
    /// range is empty.
    #[cold]
    fn steal(&mut self) -> Option<usize> {
        // The snapshot is only a hint: other workers keep modifying their ranges.
        let mut snapshot: Vec<PackedRange> = self
            .ranges
            .iter()
            .enumerate()
            .map(|(i, range)| {
                if i == self.id {
                    PackedRange::default()
                } else {
                    range.load()
                }
            })
            .collect();

        loop {
            let (max_index, max_range) = snapshot
                .iter()
                .copied()
                .enumerate()
                .max_by_key(|(_, range)| range.len())?;
            if max_range.is_empty() {
                #[cfg(feature = "log_parallelism")]
                log_debug!("[worker {}] Didn't find anything to steal", self.id);
                return None;
            }

            let (remaining, stolen) = max_range.split();
            match self.ranges[max_index].compare_exchange(max_range, remaining) {
                Ok(()) => {
                    let (taken, my_new_range) = stolen.increment_start();
                    self.ranges[self.id].store(my_new_range);
                    #[cfg(feature = "log_parallelism")]
                    {
                        self.stats.thefts += 1;
                        log_trace!(
                            "[worker {}] Stole range {}:{:?} from worker {}",
                            self.id,
                            taken,
                            my_new_range,
                            max_index
                        );
                    }
                    return Some(taken as usize);
                }
                Err(range) => {
                    #[cfg(feature = "log_parallelism")]
                    {
                        self.stats.failed_thefts += 1;
                    }
                    snapshot[max_index] = range;
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_fixed_range_factory_splits_evenly() {
        let factory = FixedRangeFactory::new(4);
        let ranges: [_; 4] = std::array::from_fn(|i| factory.range(i));
        factory.orchestrator().reset_ranges(200);
        assert_eq!(ranges[0].iter(), 0..50);
        assert_eq!(ranges[1].iter(), 50..100);
        assert_eq!(ranges[2].iter(), 100..150);
        assert_eq!(ranges[3].iter(), 150..200);

        let factory = FixedRangeFactory::new(7);
        let ranges: [_; 7] = std::array::from_fn(|i| factory.range(i));
        factory.orchestrator().reset_ranges(100);
        let bounds = ranges
            .iter()
            .map(|range| {
                let r = range.iter();
                (r.start, r.end)
            })
            .collect::<Vec<_>>();
        assert_eq!(
            bounds,
            [(0, 14), (14, 28), (28, 42), (42, 57), (57, 71), (71, 85), (85, 100)]
        );
    }

    #[test]
    fn test_fixed_range_fewer_elements_than_workers() {
        let factory = FixedRangeFactory::new(8);
        let ranges: [_; 8] = std::array::from_fn(|i| factory.range(i));
        factory.orchestrator().reset_ranges(3);
        let all = ranges.iter().flat_map(|r| r.iter()).collect::<Vec<_>>();
        assert_eq!(all, [0, 1, 2]);
    }

    #[test]
    fn test_work_stealing_range_multi_threaded() {
        const NUM_WORKERS: usize = 4;
        #[cfg(not(miri))]
        const NUM_ELEMENTS: usize = 10000;
        #[cfg(miri)]
        const NUM_ELEMENTS: usize = 100;

        let factory = WorkStealingRangeFactory::new(NUM_WORKERS);
        let ranges: [_; NUM_WORKERS] = std::array::from_fn(|i| factory.range(i));
        let orchestrator = factory.orchestrator();

        std::thread::scope(|s| {
            for _ in 0..10 {
                orchestrator.reset_ranges(NUM_ELEMENTS);
                let handles = ranges
                    .each_ref()
                    .map(|range| s.spawn(move || range.iter().collect::<Vec<_>>()));
                let values: [Vec<usize>; NUM_WORKERS] =
                    handles.map(|handle| handle.join().unwrap());

                // Every position is yielded once and only once.
                let mut seen = vec![false; NUM_ELEMENTS];
                for set in values {
                    for x in set {
                        assert!(!seen[x]);
                        seen[x] = true;
                    }
                }
                assert!(seen.iter().all(|x| *x));
            }
        });
    }

    #[test]
    fn test_work_stealing_range_single_worker_steals_nothing() {
        let factory = WorkStealingRangeFactory::new(1);
        let range = factory.range(0);
        let orchestrator = factory.orchestrator();
        orchestrator.reset_ranges(5);
        assert_eq!(range.iter().collect::<Vec<_>>(), [0, 1, 2, 3, 4]);
        // The range is exhausted until the next reset.
        assert_eq!(range.iter().next(), None);
    }

    #[cfg(feature = "log_parallelism")]
    #[test]
    fn test_work_stealing_stats_count_every_position() {
        let factory = WorkStealingRangeFactory::new(2);
        let range = factory.range(0);
        let orchestrator = factory.orchestrator();
        orchestrator.reset_ranges(10);
        // Worker 0 drains its own half, then steals all of worker 1's half.
        assert_eq!(range.iter().count(), 10);

        let stats = orchestrator.stats.lock().unwrap();
        assert_eq!(stats.increments + stats.thefts, 10);
        assert_eq!(stats.thefts, 3);
        assert_eq!(stats.failed_thefts, 0);
    }

    #[test]
    #[should_panic(
        expected = "cannot process range of 10000000000 elements: only ranges of up to 4294967295 elements (2^32 - 1) are supported"
    )]
    fn test_work_stealing_range_too_many_items() {
        let factory = WorkStealingRangeFactory::new(4);
        let orchestrator = factory.orchestrator();
        orchestrator.reset_ranges(10_000_000_000);
    }

    #[test]
    fn test_packed_range_is_consistent() {
        assert!(PackedRange::default().is_empty());
        for i in 0..30 {
            for j in i..30 {
                let range = PackedRange::new(i, j);
                assert_eq!((range.start(), range.end(), range.len()), (i, j, j - i));
            }
        }
    }

    #[test]
    fn test_packed_range_increment_start() {
        let mut range = PackedRange::new(0, 10);
        for i in 1..=10 {
            let (j, new_range) = range.increment_start();
            range = new_range;
            assert_eq!(j, i - 1);
            assert_eq!((range.start(), range.end()), (i, 10));
        }
        assert!(range.is_empty());
    }

    #[test]
    fn test_packed_range_split_is_exhaustive_and_fair() {
        for i in 0..100 {
            for j in i..100 {
                let (left, right) = PackedRange::new(i, j).split();
                assert_eq!(left.start(), i);
                assert_eq!(left.end(), right.start());
                assert_eq!(right.end(), j);
                assert!(left.len() <= right.len());
                assert!(right.len() <= left.len() + 1);
                if i != j {
                    assert!(!right.is_empty());
                }
            }
        }
    }

    #[test]
    fn test_packed_range_split_overflow() {
        let (left, right) = PackedRange::new(u32::MAX - 2, u32::MAX).split();
        assert_eq!((left.start(), left.end()), (u32::MAX - 2, u32::MAX - 1));
        assert_eq!((right.start(), right.end()), (u32::MAX - 1, u32::MAX));
    }
}

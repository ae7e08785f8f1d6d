// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Executor backends.

#[cfg(feature = "rayon")]
mod rayon;
mod thread_pool;

#[cfg(feature = "rayon")]
pub use rayon::RayonThreadPool;
use std::num::NonZeroUsize;
pub use thread_pool::{CpuPinningPolicy, ThreadPool, ThreadPoolBuilder};

/// Number of workers of an executor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadCount {
    /// Use the number of threads returned by
    /// [`std::thread::available_parallelism()`].
    AvailableParallelism,
    /// Use the given number of threads.
    Count(NonZeroUsize),
}

impl ThreadCount {
    /// Resolves the number of workers.
    ///
    /// Falls back to a single worker if the available parallelism can't be
    /// queried on this platform.
    pub fn count(self) -> NonZeroUsize {
        match self {
            ThreadCount::AvailableParallelism => {
                std::thread::available_parallelism().unwrap_or(NonZeroUsize::MIN)
            }
            ThreadCount::Count(count) => count,
        }
    }
}

impl TryFrom<usize> for ThreadCount {
    type Error = <NonZeroUsize as TryFrom<usize>>::Error;

    fn try_from(thread_count: usize) -> Result<Self, Self::Error> {
        let count = NonZeroUsize::try_from(thread_count)?;
        Ok(ThreadCount::Count(count))
    }
}

/// Strategy to distribute the positions of a round among workers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RangeStrategy {
    /// Each worker processes a fixed contiguous range of positions.
    Fixed,
    /// Workers that run out of positions steal half of the largest remaining
    /// range of another worker.
    WorkStealing,
}

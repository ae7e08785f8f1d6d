// Copyright 2025-2026 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Executor backed by a Rayon thread pool.

use super::{RangeStrategy, ThreadCount};
use crate::core::job::{BroadcastJob, Job, PositionAction, PositionsJob, WorkerAction};
use crate::core::range::{
    FixedRangeFactory, RangeFactory, RangeOrchestrator, WorkStealingRangeFactory,
};
use crate::error::Error;
use crate::executor::{check_len, Executor};
use rayon_core::{Scope, ThreadPool};
use std::num::NonZeroUsize;

/// Adaptor to run work over a thread pool provided by the
/// [Rayon](https://docs.rs/rayon) crate.
///
/// Each round spawns one task per range in a fork-join scope, and returns once
/// the scope completes. Tasks may be executed by any thread of the Rayon pool,
/// so there is no one-to-one match between tasks and threads (for that, use
/// the built-in [`ThreadPool`](crate::ThreadPool)).
///
/// ```
/// # // TODO: Enable Miri once supported by Rayon and its dependencies: https://github.com/crossbeam-rs/crossbeam/issues/1181.
/// # #[cfg(not(miri))]
/// # {
/// # use paranum::{Executor, RangeStrategy, RayonThreadPool, ThreadCount};
/// # use std::sync::atomic::{AtomicUsize, Ordering};
/// let mut thread_pool = RayonThreadPool::new_global(
///     ThreadCount::try_from(rayon_core::current_num_threads())
///         .expect("Rayon cannot operate with 0 threads"),
///     RangeStrategy::WorkStealing,
/// );
///
/// let count = AtomicUsize::new(0);
/// thread_pool
///     .for_each_index(100, 0, -3, |_| {
///         count.fetch_add(1, Ordering::Relaxed);
///     })
///     .unwrap();
/// assert_eq!(count.into_inner(), 34);
/// # }
/// ```
pub struct RayonThreadPool<'a> {
    /// Handle to the Rayon thread pool, or [`None`] if using the global Rayon
    /// thread pool.
    thread_pool: Option<&'a ThreadPool>,
    /// Number of parallel tasks to spawn for each round.
    num_tasks: ThreadCount,
    /// Strategy to distribute positions among tasks.
    range_strategy: RangeStrategy,
}

impl RayonThreadPool<'static> {
    /// Wraps [Rayon](https://docs.rs/rayon)'s global thread pool, spawning the
    /// given number of tasks per round and using the given range strategy.
    ///
    /// As a guiding principle, the number of tasks should match the number of
    /// threads in Rayon's pool. Spawning fewer tasks limits the amount of
    /// parallelism, and spawning more tasks than available threads is likely
    /// not beneficial, especially with [`RangeStrategy::WorkStealing`].
    pub fn new_global(num_tasks: ThreadCount, range_strategy: RangeStrategy) -> Self {
        Self {
            thread_pool: None,
            num_tasks,
            range_strategy,
        }
    }
}

impl<'a> RayonThreadPool<'a> {
    /// Wraps a user-created [Rayon](https://docs.rs/rayon) thread pool,
    /// spawning the given number of tasks per round and using the given range
    /// strategy.
    ///
    /// ```
    /// # // TODO: Enable Miri once supported by Rayon and its dependencies: https://github.com/crossbeam-rs/crossbeam/issues/1181.
    /// # #[cfg(not(miri))]
    /// # {
    /// # use paranum::{Executor, Fill, Matrix, RangeStrategy, RayonThreadPool, ThreadCount};
    /// let thread_pool = rayon_core::ThreadPoolBuilder::new()
    ///     .num_threads(4)
    ///     .build()
    ///     .unwrap();
    /// let mut executor = RayonThreadPool::new(
    ///     &thread_pool,
    ///     ThreadCount::try_from(4).unwrap(),
    ///     RangeStrategy::Fixed,
    /// );
    ///
    /// let a = Matrix::new(3, 3, Fill::Uniform { seed: 42 }).unwrap();
    /// let id = Matrix::new(3, 3, Fill::Identity).unwrap();
    /// assert_eq!(a.multiply(&id, &mut executor).unwrap(), a);
    /// # }
    /// ```
    pub fn new(
        thread_pool: &'a ThreadPool,
        num_tasks: ThreadCount,
        range_strategy: RangeStrategy,
    ) -> Self {
        Self {
            thread_pool: Some(thread_pool),
            num_tasks,
            range_strategy,
        }
    }
}

impl RayonThreadPool<'_> {
    /// Returns the number of tasks that are spawned for each round.
    pub fn num_tasks(&self) -> NonZeroUsize {
        self.num_tasks.count()
    }
}

impl Executor for RayonThreadPool<'_> {
    fn num_workers(&self) -> usize {
        self.num_tasks().get()
    }

    fn run_positions(&mut self, len: usize, action: &PositionAction<'_>) -> Result<(), Error> {
        check_len(len)?;
        if len == 0 {
            return Ok(());
        }
        match RayonThreadPoolEnum::new(self.thread_pool, self.num_tasks, self.range_strategy) {
            RayonThreadPoolEnum::Fixed(inner) => inner.run_positions(len, action),
            RayonThreadPoolEnum::WorkStealing(inner) => inner.run_positions(len, action),
        }
    }

    fn broadcast(&mut self, action: &WorkerAction<'_>) -> Result<(), Error> {
        match RayonThreadPoolEnum::new(self.thread_pool, self.num_tasks, self.range_strategy) {
            RayonThreadPoolEnum::Fixed(inner) => inner.broadcast(action),
            RayonThreadPoolEnum::WorkStealing(inner) => inner.broadcast(action),
        }
    }
}

/// Underlying [`RayonThreadPool`] implementation, dispatching over the
/// [`RangeStrategy`].
enum RayonThreadPoolEnum<'a> {
    Fixed(RayonThreadPoolImpl<'a, FixedRangeFactory>),
    WorkStealing(RayonThreadPoolImpl<'a, WorkStealingRangeFactory>),
}

impl<'a> RayonThreadPoolEnum<'a> {
    /// Creates the ranges of one round using the given parameters.
    fn new(
        thread_pool: Option<&'a ThreadPool>,
        num_tasks: ThreadCount,
        range_strategy: RangeStrategy,
    ) -> Self {
        let num_tasks: usize = num_tasks.count().into();
        match range_strategy {
            RangeStrategy::Fixed => RayonThreadPoolEnum::Fixed(RayonThreadPoolImpl::new(
                thread_pool,
                num_tasks,
                FixedRangeFactory::new(num_tasks),
            )),
            RangeStrategy::WorkStealing => {
                RayonThreadPoolEnum::WorkStealing(RayonThreadPoolImpl::new(
                    thread_pool,
                    num_tasks,
                    WorkStealingRangeFactory::new(num_tasks),
                ))
            }
        }
    }
}

/// Underlying [`RayonThreadPool`] implementation, specialized to a
/// [`RangeStrategy`].
struct RayonThreadPoolImpl<'a, F: RangeFactory> {
    /// Handle to the Rayon thread pool, or [`None`] if using the global Rayon
    /// thread pool.
    thread_pool: Option<&'a ThreadPool>,
    /// Orchestrator for the ranges distributed to the tasks.
    range_orchestrator: F::Orchestrator,
    /// Range of positions that each task needs to process.
    ranges: Box<[F::Range]>,
}

impl<'a, F: RangeFactory> RayonThreadPoolImpl<'a, F> {
    /// Creates the ranges of one round using the given parameters.
    fn new(thread_pool: Option<&'a ThreadPool>, num_tasks: usize, range_factory: F) -> Self {
        let ranges = (0..num_tasks).map(|id| range_factory.range(id)).collect();
        Self {
            thread_pool,
            range_orchestrator: range_factory.orchestrator(),
            ranges,
        }
    }
}

impl<F: RangeFactory> RayonThreadPoolImpl<'_, F> {
    /// Creates a fork-join scope on the underlying Rayon thread pool and
    /// invokes the closure with a reference to the scope.
    fn scope<'scope, OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce(&Scope<'scope>) -> R + Send,
        R: Send,
    {
        match self.thread_pool {
            None => rayon_core::scope(op),
            Some(thread_pool) => thread_pool.scope(op),
        }
    }
}

impl<F: RangeFactory> RayonThreadPoolImpl<'_, F>
where
    F::Range: Sync,
{
    /// Spawns one task per range running the given job, and waits for all of
    /// them.
    fn spawn_all(&self, job: &(dyn Job<F::Range> + Sync)) {
        let ranges = &self.ranges;
        self.scope(|scope| {
            for (id, range) in ranges.iter().enumerate() {
                scope.spawn(move |_| {
                    job.run(id, range);
                });
            }
        });
    }

    /// Runs the action on every position of `0..len`, as one round.
    fn run_positions(self, len: usize, action: &PositionAction<'_>) -> Result<(), Error> {
        self.range_orchestrator.reset_ranges(len);
        let job = PositionsJob::new(self.ranges.len(), action);
        self.spawn_all(&job);
        job.into_result()
    }

    /// Runs the action once on every task, as one round.
    fn broadcast(self, action: &WorkerAction<'_>) -> Result<(), Error> {
        self.range_orchestrator.reset_ranges(0);
        let job = BroadcastJob::new(self.ranges.len(), action);
        self.spawn_all(&job);
        job.into_result()
    }
}

// Copyright 2024-2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A thread pool of persistent workers, receiving work one round at a time.

use super::{RangeStrategy, ThreadCount};
use crate::core::job::{
    BroadcastJob, DynLifetimeSyncJob, PositionAction, PositionsJob, WorkerAction,
};
use crate::core::range::{
    FixedRangeFactory, Range, RangeFactory, RangeOrchestrator, WorkStealingRangeFactory,
};
use crate::core::sync::{make_lending_group, Borrower, Lender, WorkerState};
use crate::error::Error;
use crate::executor::{check_len, Executor};
use crate::macros::{log_debug, log_error, log_warn};
// Platforms that support `libc::sched_setaffinity()`.
#[cfg(all(
    not(miri),
    any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux"
    )
))]
use nix::{
    sched::{sched_setaffinity, CpuSet},
    unistd::Pid,
};
use std::num::NonZeroUsize;
use std::thread::JoinHandle;

/// Policy to pin worker threads to CPUs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CpuPinningPolicy {
    /// Don't pin worker threads to CPUs.
    No,
    /// Pin each worker thread to a CPU, if CPU pinning is supported and
    /// implemented on this platform.
    IfSupported,
    /// Pin each worker thread to a CPU. If CPU pinning isn't supported on this
    /// platform (or not implemented), building a thread pool will panic.
    Always,
}

/// A builder for [`ThreadPool`].
#[derive(Clone, Copy, Debug)]
pub struct ThreadPoolBuilder {
    /// Number of worker threads to spawn in the pool.
    pub num_threads: ThreadCount,
    /// Strategy to distribute the positions of each round among threads.
    pub range_strategy: RangeStrategy,
    /// Policy to pin worker threads to CPUs.
    pub cpu_pinning: CpuPinningPolicy,
}

impl Default for ThreadPoolBuilder {
    fn default() -> Self {
        Self {
            num_threads: ThreadCount::AvailableParallelism,
            range_strategy: RangeStrategy::WorkStealing,
            cpu_pinning: CpuPinningPolicy::No,
        }
    }
}

impl ThreadPoolBuilder {
    /// Spawns a thread pool.
    ///
    /// ```
    /// # use paranum::{CpuPinningPolicy, Executor, RangeStrategy, ThreadCount, ThreadPoolBuilder};
    /// # use std::sync::atomic::{AtomicI64, Ordering};
    /// let pool_builder = ThreadPoolBuilder {
    ///     num_threads: ThreadCount::AvailableParallelism,
    ///     range_strategy: RangeStrategy::WorkStealing,
    ///     cpu_pinning: CpuPinningPolicy::No,
    /// };
    /// let mut thread_pool = pool_builder.build();
    ///
    /// let sum = AtomicI64::new(0);
    /// thread_pool
    ///     .for_each_index(1, 11, 1, |i| {
    ///         sum.fetch_add(i as i64, Ordering::Relaxed);
    ///     })
    ///     .unwrap();
    /// assert_eq!(sum.into_inner(), 5 * 11);
    /// ```
    pub fn build(&self) -> ThreadPool {
        ThreadPool::new(self)
    }
}

/// A thread pool of persistent worker threads.
///
/// Work is submitted via the [`Executor`] trait. Each call is one round: every
/// worker thread receives the round, processes its share of positions and the
/// call returns once all of them are done.
pub struct ThreadPool {
    inner: ThreadPoolEnum,
}

impl ThreadPool {
    /// Creates a new thread pool using the given parameters.
    fn new(builder: &ThreadPoolBuilder) -> Self {
        Self {
            inner: ThreadPoolEnum::new(builder),
        }
    }

    /// Returns the number of worker threads that have been spawned in this
    /// thread pool.
    pub fn num_threads(&self) -> NonZeroUsize {
        self.inner.num_threads()
    }
}

impl Executor for ThreadPool {
    fn num_workers(&self) -> usize {
        self.num_threads().get()
    }

    fn run_positions(&mut self, len: usize, action: &PositionAction<'_>) -> Result<(), Error> {
        check_len(len)?;
        if len == 0 {
            return Ok(());
        }
        match &mut self.inner {
            ThreadPoolEnum::Fixed(inner) => inner.run_positions(len, action),
            ThreadPoolEnum::WorkStealing(inner) => inner.run_positions(len, action),
        }
    }

    fn broadcast(&mut self, action: &WorkerAction<'_>) -> Result<(), Error> {
        match &mut self.inner {
            ThreadPoolEnum::Fixed(inner) => inner.broadcast(action),
            ThreadPoolEnum::WorkStealing(inner) => inner.broadcast(action),
        }
    }
}

/// Underlying [`ThreadPool`] implementation, dispatching over the
/// [`RangeStrategy`].
enum ThreadPoolEnum {
    Fixed(ThreadPoolImpl<FixedRangeFactory>),
    WorkStealing(ThreadPoolImpl<WorkStealingRangeFactory>),
}

impl ThreadPoolEnum {
    /// Creates a new thread pool using the given parameters.
    fn new(builder: &ThreadPoolBuilder) -> Self {
        let num_threads: usize = builder.num_threads.count().into();
        match builder.range_strategy {
            RangeStrategy::Fixed => ThreadPoolEnum::Fixed(ThreadPoolImpl::new(
                num_threads,
                FixedRangeFactory::new(num_threads),
                builder.cpu_pinning,
            )),
            RangeStrategy::WorkStealing => ThreadPoolEnum::WorkStealing(ThreadPoolImpl::new(
                num_threads,
                WorkStealingRangeFactory::new(num_threads),
                builder.cpu_pinning,
            )),
        }
    }

    /// Returns the number of worker threads that have been spawned in this
    /// thread pool.
    fn num_threads(&self) -> NonZeroUsize {
        match self {
            ThreadPoolEnum::Fixed(inner) => inner.num_threads(),
            ThreadPoolEnum::WorkStealing(inner) => inner.num_threads(),
        }
    }
}

/// Underlying [`ThreadPool`] implementation, specialized to a
/// [`RangeStrategy`].
struct ThreadPoolImpl<F: RangeFactory> {
    /// Handles to all the worker threads in the pool.
    threads: Vec<WorkerThreadHandle>,
    /// Orchestrator for the ranges distributed to the threads.
    range_orchestrator: F::Orchestrator,
    /// Lender of the job of each round.
    job: Lender<DynLifetimeSyncJob<F::Range>>,
}

/// Handle to a worker thread in a thread pool.
struct WorkerThreadHandle {
    /// Thread handle object.
    handle: JoinHandle<()>,
}

impl<F: RangeFactory> ThreadPoolImpl<F> {
    /// Creates a new thread pool using the given parameters.
    fn new(num_threads: usize, range_factory: F, cpu_pinning: CpuPinningPolicy) -> Self
    where
        F::Range: Send + 'static,
    {
        let (lender, borrowers) = make_lending_group(num_threads);

        #[cfg(any(
            miri,
            not(any(
                target_os = "android",
                target_os = "dragonfly",
                target_os = "freebsd",
                target_os = "linux"
            ))
        ))]
        match cpu_pinning {
            CpuPinningPolicy::No => (),
            CpuPinningPolicy::IfSupported => {
                log_warn!("Pinning threads to CPUs is not implemented on this platform.")
            }
            CpuPinningPolicy::Always => {
                panic!("Pinning threads to CPUs is not implemented on this platform.")
            }
        }

        let threads = borrowers
            .into_iter()
            .enumerate()
            .map(|(id, borrower)| {
                let mut context = ThreadContext {
                    id,
                    range: range_factory.range(id),
                    job: borrower,
                };
                WorkerThreadHandle {
                    handle: std::thread::spawn(move || {
                        #[cfg(all(
                            not(miri),
                            any(
                                target_os = "android",
                                target_os = "dragonfly",
                                target_os = "freebsd",
                                target_os = "linux"
                            )
                        ))]
                        pin_current_thread(id, cpu_pinning);
                        context.run()
                    }),
                }
            })
            .collect();
        log_debug!("[main thread] Spawned {num_threads} threads");

        Self {
            threads,
            range_orchestrator: range_factory.orchestrator(),
            job: lender,
        }
    }

    /// Returns the number of worker threads that have been spawned in this
    /// thread pool.
    fn num_threads(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.threads.len()).unwrap_or(NonZeroUsize::MIN)
    }

    /// Runs the action on every position of `0..len`, as one round.
    fn run_positions(&mut self, len: usize, action: &PositionAction<'_>) -> Result<(), Error> {
        self.range_orchestrator.reset_ranges(len);
        let job = PositionsJob::new(self.threads.len(), action);
        self.job.lend(&job);
        job.into_result()
    }

    /// Runs the action once on every worker thread, as one round.
    fn broadcast(&mut self, action: &WorkerAction<'_>) -> Result<(), Error> {
        // Ranges aren't consumed by broadcast jobs, but they must be in a
        // consistent state for all workers.
        self.range_orchestrator.reset_ranges(0);
        let job = BroadcastJob::new(self.threads.len(), action);
        self.job.lend(&job);
        job.into_result()
    }
}

/// Pins the current thread to the given CPU, according to the policy.
#[cfg(all(
    not(miri),
    any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux"
    )
))]
fn pin_current_thread(id: usize, cpu_pinning: CpuPinningPolicy) {
    let pin = || -> nix::Result<()> {
        let mut cpu_set = CpuSet::new();
        cpu_set.set(id)?;
        sched_setaffinity(Pid::from_raw(0), &cpu_set)
    };
    match cpu_pinning {
        CpuPinningPolicy::No => (),
        CpuPinningPolicy::IfSupported => match pin() {
            Ok(()) => log_debug!("Pinned thread #{id} to CPU #{id}"),
            Err(_e) => log_warn!("Failed to set CPU affinity for thread #{id}: {_e}"),
        },
        CpuPinningPolicy::Always => match pin() {
            Ok(()) => log_debug!("Pinned thread #{id} to CPU #{id}"),
            Err(e) => panic!("Failed to set CPU affinity for thread #{id}: {e}"),
        },
    }
}

impl<F: RangeFactory> Drop for ThreadPoolImpl<F> {
    /// Joins all the threads in the pool.
    #[allow(clippy::single_match, clippy::unused_enumerate_index)]
    fn drop(&mut self) {
        self.job.finish_workers();

        log_debug!("[main thread] Joining threads in the pool...");
        for (_i, t) in self.threads.drain(..).enumerate() {
            let result = t.handle.join();
            match result {
                Ok(_) => log_debug!("[main thread] Thread {_i} joined with result: {result:?}"),
                Err(_) => log_error!("[main thread] Thread {_i} joined with result: {result:?}"),
            }
        }
        log_debug!("[main thread] Joined threads.");

        #[cfg(feature = "log_parallelism")]
        self.range_orchestrator.print_statistics();
    }
}

/// Context object owned by a worker thread.
struct ThreadContext<R: Range> {
    /// Thread index.
    id: usize,
    /// Range of positions that this worker thread needs to process.
    range: R,
    /// Job of the current round.
    job: Borrower<DynLifetimeSyncJob<R>>,
}

impl<R: Range> ThreadContext<R> {
    /// Main function run by this thread.
    fn run(&mut self) {
        loop {
            match self.job.borrow(|job| {
                job.run(self.id, &self.range);
            }) {
                WorkerState::Finished => break,
                WorkerState::Ready => continue,
            }
        }
    }
}

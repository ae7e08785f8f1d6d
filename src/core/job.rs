// Copyright 2024-2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Jobs to execute on worker threads.

use super::range::Range;
use super::util::LifetimeParameterized;
use crate::error::{Error, FailureCause, WorkUnit, WorkerFailure};
use crate::macros::log_debug;
use crossbeam_utils::CachePadded;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// A fallible unit of work, addressed by its position in `0..len`.
pub type PositionAction<'a> = dyn Fn(usize) -> Result<(), FailureCause> + Sync + 'a;

/// A job broadcast to every worker, taking the worker index.
pub type WorkerAction<'a> = dyn Fn(usize) + Sync + 'a;

/// A job is a task to run on a worker thread, taking as input a range of
/// positions to process.
pub trait Job<R: Range> {
    /// Runs this job for the given worker index, processing the positions
    /// produced by the given range.
    fn run(&self, worker_id: usize, range: &R);
}

/// An intermediate struct representing a `dyn Job<R> + Sync` with variable
/// lifetime, to lend jobs to worker threads.
pub struct DynLifetimeSyncJob<R: Range>(PhantomData<R>);

impl<R: Range> LifetimeParameterized for DynLifetimeSyncJob<R> {
    type T<'a> = dyn Job<R> + Sync + 'a;
}

/// Failure recorded by one worker: the position and its cause.
type FailureSlot = Mutex<Option<(usize, FailureCause)>>;

/// A job running an action on each position of the range, stopping early at
/// the first failure.
///
/// Whenever a position fails, the shared bound is lowered to that position and
/// positions above the bound are skipped. Positions below it keep running, so
/// that the failure reported at the end is the one at the lowest position.
pub struct PositionsJob<'a> {
    /// Dynamic upper bound of positions to process.
    bound: CachePadded<AtomicUsize>,
    /// Lowest failure observed by each worker.
    failures: Box<[FailureSlot]>,
    /// Action to run on each position.
    action: &'a PositionAction<'a>,
}

impl<'a> PositionsJob<'a> {
    /// Creates a job for the given number of workers.
    pub fn new(num_workers: usize, action: &'a PositionAction<'a>) -> Self {
        Self {
            bound: CachePadded::new(AtomicUsize::new(usize::MAX)),
            failures: (0..num_workers).map(|_| Mutex::new(None)).collect(),
            action,
        }
    }

    /// Consumes the job after the round, returning the failure at the lowest
    /// position if any.
    pub fn into_result(self) -> Result<(), Error> {
        let first = self
            .failures
            .into_vec()
            .into_iter()
            .filter_map(|slot| slot.into_inner().unwrap())
            .min_by_key(|(position, _)| *position);
        match first {
            None => Ok(()),
            Some((position, cause)) => {
                log_debug!("Round failed at position {position}: {cause}");
                Err(WorkerFailure {
                    unit: WorkUnit::Position(position),
                    cause,
                }
                .into())
            }
        }
    }
}

impl<R: Range> Job<R> for PositionsJob<'_> {
    fn run(&self, worker_id: usize, range: &R) {
        let mut first_failure: Option<(usize, FailureCause)> = None;
        // Positions aren't monotonic across thefts, so skip rather than break.
        for i in range.iter() {
            if i >= self.bound.load(Ordering::Relaxed) {
                continue;
            }
            if let Err(cause) = invoke(|| (self.action)(i)) {
                self.bound.fetch_min(i, Ordering::Relaxed);
                match &first_failure {
                    Some((position, _)) if *position < i => (),
                    _ => first_failure = Some((i, cause)),
                }
            }
        }
        if first_failure.is_some() {
            *self.failures[worker_id].lock().unwrap() = first_failure;
        }
    }
}

/// A job running an action once on every worker.
pub struct BroadcastJob<'a> {
    /// Failure of each worker.
    failures: Box<[Mutex<Option<FailureCause>>]>,
    /// Action to run on each worker.
    action: &'a WorkerAction<'a>,
}

impl<'a> BroadcastJob<'a> {
    /// Creates a job for the given number of workers.
    pub fn new(num_workers: usize, action: &'a WorkerAction<'a>) -> Self {
        Self {
            failures: (0..num_workers).map(|_| Mutex::new(None)).collect(),
            action,
        }
    }

    /// Consumes the job after the round, returning the failure of the worker
    /// with the lowest index if any.
    pub fn into_result(self) -> Result<(), Error> {
        let first = self
            .failures
            .into_vec()
            .into_iter()
            .enumerate()
            .find_map(|(id, slot)| slot.into_inner().unwrap().map(|cause| (id, cause)));
        match first {
            None => Ok(()),
            Some((id, cause)) => Err(WorkerFailure {
                unit: WorkUnit::Worker(id),
                cause,
            }
            .into()),
        }
    }
}

impl<R: Range> Job<R> for BroadcastJob<'_> {
    fn run(&self, worker_id: usize, _range: &R) {
        if let Err(cause) = invoke(|| {
            (self.action)(worker_id);
            Ok(())
        }) {
            *self.failures[worker_id].lock().unwrap() = Some(cause);
        }
    }
}

/// Invokes a unit of work, converting a panic into a [`FailureCause`].
pub fn invoke<R>(f: impl FnOnce() -> Result<R, FailureCause>) -> Result<R, FailureCause> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(FailureCause::from_panic(payload)),
    }
}

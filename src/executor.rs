// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The [`Executor`] abstraction, running independent units of work to
//! completion.

use crate::error::{relabel_failure, BoxError, Error, FailureCause, WorkUnit};

/// A backend that runs independent, index-addressed units of work to
/// completion.
///
/// Every operation is a single round: it returns only once all of its units
/// have completed (or have been skipped after a failure).
///
/// # Failure policy
///
/// A unit fails when it returns an error (for the fallible variants) or when it
/// panics. Panics are caught and never tear down the executor. When a unit
/// fails, units at higher positions that haven't started yet are skipped,
/// while units at lower positions still run. Once the round has drained, the
/// failure at the lowest position is returned as an
/// [`Error::WorkerFailure`]. This makes the reported failure deterministic
/// regardless of scheduling. The executor can be reused afterwards.
///
/// Implementors only provide [`num_workers()`](Self::num_workers),
/// [`run_positions()`](Self::run_positions) and
/// [`broadcast()`](Self::broadcast).
pub trait Executor {
    /// Returns the number of workers that process each round.
    fn num_workers(&self) -> usize;

    /// Runs `action` on every position of `0..len` and returns the failure at
    /// the lowest position, if any, as a [`WorkUnit::Position`].
    ///
    /// Fails with [`Error::RangeTooLarge`] if `len` exceeds `u32::MAX`.
    fn run_positions(
        &mut self,
        len: usize,
        action: &(dyn Fn(usize) -> Result<(), FailureCause> + Sync),
    ) -> Result<(), Error>;

    /// Runs `action` once on every worker, passing the worker index in
    /// `0..num_workers()`. Invocations run concurrently with one another.
    ///
    /// A panic is returned as a [`WorkUnit::Worker`] failure, for the worker
    /// with the lowest index.
    fn broadcast(&mut self, action: &(dyn Fn(usize) + Sync)) -> Result<(), Error>;

    /// Invokes `action(i)` for every `i` of the arithmetic progression `start,
    /// start + step, ...` strictly before `end`. The progression is ascending
    /// if `step > 0` and descending if `step < 0`. Invocations may run in any
    /// order.
    ///
    /// - Fails with [`Error::InvalidStep`] if `step == 0`.
    /// - Returns `Ok(())` immediately if the progression is empty.
    /// - Fails with [`Error::RangeTooLarge`] if the progression has more than
    ///   `u32::MAX` items.
    ///
    /// ```
    /// # use paranum::{Executor, ThreadPoolBuilder};
    /// # use std::sync::Mutex;
    /// let mut thread_pool = ThreadPoolBuilder::default().build();
    ///
    /// let visited = Mutex::new(Vec::new());
    /// thread_pool
    ///     .for_each_index(10, -2, -4, |i| visited.lock().unwrap().push(i))
    ///     .unwrap();
    ///
    /// let mut visited = visited.into_inner().unwrap();
    /// visited.sort();
    /// assert_eq!(visited, [2, 6, 10]);
    /// ```
    fn for_each_index(
        &mut self,
        start: isize,
        end: isize,
        step: isize,
        action: impl Fn(isize) + Sync,
    ) -> Result<(), Error> {
        self.try_for_each_index(start, end, step, |i| -> Result<(), BoxError> {
            action(i);
            Ok(())
        })
    }

    /// Like [`for_each_index()`](Self::for_each_index), but with a fallible
    /// action. The error of the lowest failing index is returned.
    ///
    /// ```
    /// # use paranum::{Error, Executor, ThreadPoolBuilder, WorkUnit};
    /// let mut thread_pool = ThreadPoolBuilder::default().build();
    ///
    /// let result = thread_pool.try_for_each_index(0, 100, 1, |i| {
    ///     if i % 30 == 29 {
    ///         Err(format!("cannot process {i}"))
    ///     } else {
    ///         Ok(())
    ///     }
    /// });
    /// match result {
    ///     Err(Error::WorkerFailure(failure)) => {
    ///         assert_eq!(failure.unit, WorkUnit::Index(29));
    ///         assert_eq!(failure.cause.to_string(), "cannot process 29");
    ///     }
    ///     _ => unreachable!(),
    /// }
    /// ```
    fn try_for_each_index<E: Into<BoxError>>(
        &mut self,
        start: isize,
        end: isize,
        step: isize,
        action: impl Fn(isize) -> Result<(), E> + Sync,
    ) -> Result<(), Error> {
        let range = IndexRange::new(start, end, step)?;
        if range.len == 0 {
            return Ok(());
        }
        self.run_positions(range.len, &|position| {
            action(range.nth(position)).map_err(|e| FailureCause::Action(e.into()))
        })
        .map_err(|e| {
            relabel_failure(e, |unit| match unit {
                WorkUnit::Position(position) => WorkUnit::Index(range.nth(position)),
                unit => unit,
            })
        })
    }

    /// Runs `action(chunk_index, chunk)` on each of the disjoint chunks of
    /// `chunk_len` elements of `data`, in parallel. If `chunk_len` doesn't
    /// divide the length of `data`, the last chunk is shorter.
    ///
    /// A failure is returned as a [`WorkUnit::Chunk`].
    ///
    /// # Panics
    ///
    /// Panics if `chunk_len` is zero.
    ///
    /// ```
    /// # use paranum::{Executor, ThreadPoolBuilder};
    /// let mut thread_pool = ThreadPoolBuilder::default().build();
    ///
    /// let mut data = vec![0; 10];
    /// thread_pool
    ///     .for_each_chunk_mut(&mut data, 4, |i, chunk| chunk.fill(i))
    ///     .unwrap();
    /// assert_eq!(data, [0, 0, 0, 0, 1, 1, 1, 1, 2, 2]);
    /// ```
    fn for_each_chunk_mut<T: Send>(
        &mut self,
        data: &mut [T],
        chunk_len: usize,
        action: impl Fn(usize, &mut [T]) + Sync,
    ) -> Result<(), Error> {
        assert!(chunk_len != 0, "chunk size must be non-zero");
        let len = data.len();
        let num_chunks = len.div_ceil(chunk_len);
        let ptr = MutPtrWrapper(data.as_mut_ptr());
        self.run_positions(num_chunks, &|chunk_index| {
            assert!(chunk_index < num_chunks);
            let start = chunk_index * chunk_len;
            let chunk_size = chunk_len.min(len - start);
            // SAFETY:
            // - `start` and `start + chunk_size` are within `0..=len`, because
            //   `chunk_index < num_chunks`. So `base_ptr.add(start)` stays in bounds of
            //   the input slice, and the chunk covers initialized elements of it.
            // - Chunks of distinct indices are disjoint, and each index is passed at
            //   most once to this closure by `run_positions()`. The input slice is
            //   exclusively borrowed for the duration of the round. Therefore no other
            //   reference to these elements exists while the chunk is alive.
            // - Materializing a `&mut [T]` on another thread amounts to sending it,
            //   which is sound because `T` is `Send`.
            let chunk: &mut [T] = unsafe {
                let chunk_ptr = ptr.get().add(start);
                std::slice::from_raw_parts_mut(chunk_ptr, chunk_size)
            };
            action(chunk_index, chunk);
            Ok(())
        })
        .map_err(|e| {
            relabel_failure(e, |unit| match unit {
                WorkUnit::Position(position) => WorkUnit::Chunk(position),
                unit => unit,
            })
        })
    }
}

/// Checks that a round of `len` positions can be distributed among workers.
pub(crate) fn check_len(len: usize) -> Result<(), Error> {
    if u32::try_from(len).is_err() {
        return Err(Error::RangeTooLarge { len });
    }
    Ok(())
}

/// The arithmetic progression `start, start + step, ...` strictly before `end`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct IndexRange {
    start: isize,
    step: isize,
    len: usize,
}

impl IndexRange {
    fn new(start: isize, end: isize, step: isize) -> Result<Self, Error> {
        if step == 0 {
            return Err(Error::InvalidStep);
        }
        // Computed in 128 bits, as `end - start` may overflow an `isize`.
        let (start_wide, end_wide, step_wide) = (start as i128, end as i128, step as i128);
        let distance = if step > 0 {
            end_wide - start_wide
        } else {
            start_wide - end_wide
        };
        let step_abs = step_wide.abs();
        let len = if distance <= 0 {
            0
        } else {
            (distance + step_abs - 1) / step_abs
        };
        // The distance between two `isize` always fits in a `usize`.
        Ok(Self {
            start,
            step,
            len: len as usize,
        })
    }

    /// Returns the index at the given position of the progression.
    fn nth(&self, position: usize) -> isize {
        debug_assert!(position < self.len);
        // Doesn't overflow: the result is between `start` and `end`.
        (self.start as i128 + position as i128 * self.step as i128) as isize
    }
}

/// A wrapper around a [`*mut T`](pointer), to hand out mutable chunks derived
/// from a [`&mut [T]`](slice) to other threads.
struct MutPtrWrapper<T>(*mut T);

impl<T> MutPtrWrapper<T> {
    fn get(&self) -> *mut T {
        self.0
    }
}

/// SAFETY:
///
/// A [`MutPtrWrapper`] is shared among threads as a way to send disjoint
/// [`&mut [T]`](slice) chunks to other threads (see the safety comments in
/// [`Executor::for_each_chunk_mut()`]). Therefore it is [`Sync`] if and only if
/// [`&mut [T]`](slice) is [`Send`], which is when `T` is [`Send`].
unsafe impl<T: Send> Sync for MutPtrWrapper<T> {}

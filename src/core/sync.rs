// Copyright 2024-2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Synchronization primitives to lend a job to a group of worker threads, one
//! round at a time.

use super::util::{DynLifetimeView, LifetimeParameterized, Status};
use crate::macros::{log_debug, log_error};
use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

/// State of a worker thread after waiting for the next round.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    /// The thread ran the lent job and is ready for the next round.
    Ready,
    /// The thread has been notified by the main thread to exit.
    Finished,
}

/// Signal broadcast to the worker threads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Signal {
    /// Run the round of the given parity. Successive rounds alternate parities
    /// so that a fast worker never runs the same round twice.
    Round(bool),
    /// Exit.
    Shutdown,
}

/// Create a [`Lender`] paired with `num_workers` [`Borrower`]s.
pub fn make_lending_group<T: LifetimeParameterized>(
    num_workers: usize,
) -> (Lender<T>, Vec<Borrower<T>>) {
    let shared = Arc::new(Shared {
        pending: CachePadded::new(AtomicUsize::new(0)),
        crashed: CachePadded::new(AtomicUsize::new(0)),
        signal: Status::new(Signal::Round(false)),
        round_done: Status::new(false),
        job: RwLock::new(DynLifetimeView::empty()),
    });

    let borrowers = (0..num_workers)
        .map(|id| Borrower {
            id,
            parity: false,
            shared: shared.clone(),
        })
        .collect();

    let lender = Lender {
        num_workers,
        parity: false,
        shared,
    };

    (lender, borrowers)
}

/// Context shared between the main thread and the worker threads.
struct Shared<T: LifetimeParameterized> {
    /// Number of worker threads still running the current round.
    pending: CachePadded<AtomicUsize>,
    /// Number of worker threads that unwound out of the current round.
    crashed: CachePadded<AtomicUsize>,
    /// Signal from the main thread to the workers.
    signal: Status<Signal>,
    /// Whether the last worker has finished the current round.
    round_done: Status<bool>,
    /// Job lent to the workers for the current round.
    job: RwLock<DynLifetimeView<T>>,
}

/// Handle for the main thread to lend jobs of type `T` to the worker threads.
pub struct Lender<T: LifetimeParameterized> {
    /// Number of worker threads in the group.
    num_workers: usize,
    /// Parity of the last round.
    parity: bool,
    /// Context shared with the worker threads.
    shared: Arc<Shared<T>>,
}

impl<T: LifetimeParameterized> Lender<T> {
    /// Lends the given job to all the worker threads, and waits until every one
    /// of them has returned from it.
    ///
    /// # Panics
    ///
    /// Panics if a worker thread unwound out of the job. Jobs are expected to
    /// catch panics of user code themselves, so this indicates a broken
    /// internal invariant and the group can't be used anymore.
    pub fn lend(&mut self, job: &T::T<'_>) {
        self.shared
            .pending
            .store(self.num_workers, Ordering::SeqCst);
        self.parity = !self.parity;
        let parity = self.parity;

        // Safety note: the reference set here stays valid until the `clear()` below,
        // which only happens once all the workers are done with it (as synchronized
        // with `round_done`).
        self.shared.job.write().unwrap().set(job);
        log_debug!("[main thread, round {parity}] Lending a job to the workers.");
        self.shared.signal.notify_all(Signal::Round(parity));

        let mut done = self.shared.round_done.wait_while(|done| !*done);
        *done = false;
        drop(done);

        self.shared.job.write().unwrap().clear();

        let crashed = self.shared.crashed.swap(0, Ordering::SeqCst);
        if crashed != 0 {
            log_error!("[main thread, round {parity}] {crashed} worker thread(s) panicked!");
            panic!("{crashed} worker thread(s) panicked!");
        }
        log_debug!("[main thread, round {parity}] All workers returned the job.");
    }

    /// Notifies the worker threads to exit.
    pub fn finish_workers(&mut self) {
        log_debug!("[main thread] Notifying workers to exit...");
        self.shared.signal.notify_all(Signal::Shutdown);
    }
}

/// Handle for a worker thread to borrow jobs of type `T` from the main thread.
pub struct Borrower<T: LifetimeParameterized> {
    /// Worker index.
    #[cfg_attr(not(feature = "log"), allow(dead_code))]
    id: usize,
    /// Parity of the last round this worker ran.
    parity: bool,
    /// Context shared with the main thread.
    shared: Arc<Shared<T>>,
}

impl<T: LifetimeParameterized> Borrower<T> {
    /// Waits for the main thread to lend a job, and runs `f` on it.
    ///
    /// - If the main thread calls [`Lender::lend()`], this returns
    ///   [`WorkerState::Ready`] after running `f`.
    /// - If the main thread calls [`Lender::finish_workers()`], this returns
    ///   [`WorkerState::Finished`] without running `f`.
    pub fn borrow(&mut self, f: impl FnOnce(&T::T<'_>)) -> WorkerState {
        let expected = Signal::Round(!self.parity);
        let signal = *self
            .shared
            .signal
            .wait_while(|signal| *signal != Signal::Shutdown && *signal != expected);
        if signal == Signal::Shutdown {
            log_debug!("[worker {}] Received shutdown signal", self.id);
            return WorkerState::Finished;
        }
        self.parity = !self.parity;

        // Whether the job returns or unwinds, the main thread must learn that this
        // worker is done with the borrowed reference.
        let _guard = RoundGuard {
            id: self.id,
            shared: &self.shared,
        };

        let view = self.shared.job.read().unwrap();
        // SAFETY:
        // - The job outlives this scope, as the main thread doesn't return from
        //   `lend()` before the `RoundGuard` of every worker is dropped.
        // - The job isn't mutated meanwhile: all the threads only hold shared
        //   references to it.
        let job = unsafe { view.get().unwrap() };
        f(job);
        drop(view);

        WorkerState::Ready
    }
}

/// Object whose destructor notifies the main thread that a worker thread has
/// finished its round (or has unwound out of it).
struct RoundGuard<'a, T: LifetimeParameterized> {
    /// Worker index.
    #[cfg_attr(not(feature = "log"), allow(dead_code))]
    id: usize,
    /// Context shared with the main thread.
    shared: &'a Shared<T>,
}

impl<T: LifetimeParameterized> Drop for RoundGuard<'_, T> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            log_error!("[worker {}] Unwinding out of a round", self.id);
            self.shared.crashed.fetch_add(1, Ordering::SeqCst);
        }

        let pending = self.shared.pending.fetch_sub(1, Ordering::SeqCst);
        assert!(pending > 0);
        if pending == 1 {
            log_debug!("[worker {}] Last worker of the round, waking the main thread", self.id);
            if let Err(e) = self.shared.round_done.try_notify_one(true) {
                log_error!(
                    "[worker {}] Failed to notify the main thread, the mutex was poisoned: {e:?}",
                    self.id
                );
                panic!("Failed to notify the main thread, the mutex was poisoned: {e:?}");
            }
        }
    }
}

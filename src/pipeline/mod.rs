// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Bounded multi-line pipelines, streaming tokens through a sequence of
//! stages.

mod schedule;

use crate::core::job::invoke;
use crate::core::util::Status;
use crate::error::{Error, FailureCause};
use crate::executor::Executor;
use crate::macros::{log_debug, log_trace};
use schedule::{Outcome, Schedule, WorkItem};
use std::ops::ControlFlow;
use std::sync::{Mutex, PoisonError};

/// Ordering discipline of a pipeline stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageOrdering {
    /// One invocation at a time, processing tokens in strictly increasing
    /// index order.
    SerialInOrder,
    /// One invocation at a time, processing tokens in any order.
    SerialOutOfOrder,
    /// Concurrent invocations across lines, in any order.
    Parallel,
}

/// The view of a line given to a stage invocation.
///
/// Each line holds one cell of type `T` per stage, stage 0 being the
/// generator. A stage writes its own cell via [`output()`](Self::output) and
/// may read the cells of the previous stages of the same line.
pub struct Flow<'a, T> {
    token: u64,
    line: usize,
    stage: usize,
    previous: &'a [T],
    output: &'a mut T,
}

impl<T> Flow<'_, T> {
    /// Index of the token being processed, starting from 0 for each run.
    pub fn token(&self) -> u64 {
        self.token
    }

    /// Index of the line carrying the token.
    pub fn line(&self) -> usize {
        self.line
    }

    /// Index of the current stage, 0 being the generator.
    pub fn stage(&self) -> usize {
        self.stage
    }

    /// Returns the cell written by the previous stage.
    ///
    /// # Panics
    ///
    /// Panics if called from the generator.
    pub fn input(&self) -> &T {
        self.previous
            .last()
            .expect("the generator doesn't have an input")
    }

    /// Returns the cell written by stage `k` for this token, which must be a
    /// previous stage.
    ///
    /// # Panics
    ///
    /// Panics if `k` isn't smaller than the current stage.
    pub fn slot(&self, k: usize) -> &T {
        assert!(
            k < self.stage,
            "stage {} cannot read the cell of stage {k}",
            self.stage
        );
        &self.previous[k]
    }

    /// Returns the cell of the current stage.
    pub fn output(&mut self) -> &mut T {
        self.output
    }
}

type GeneratorFn<'a, T> = dyn FnMut(&mut Flow<'_, T>) -> ControlFlow<()> + Send + 'a;
type SerialFn<'a, T> = dyn FnMut(&mut Flow<'_, T>) + Send + 'a;
type ParallelFn<'a, T> = dyn Fn(&mut Flow<'_, T>) + Send + Sync + 'a;

enum StageAction<'a, T> {
    Serial(Mutex<Box<SerialFn<'a, T>>>),
    Parallel(Box<ParallelFn<'a, T>>),
}

/// A stage of a [`Pipeline`], after the generator.
pub struct Stage<'a, T> {
    ordering: StageOrdering,
    action: StageAction<'a, T>,
}

impl<'a, T> Stage<'a, T> {
    /// A stage running one token at a time, in increasing token order.
    ///
    /// As invocations never overlap, the action can mutate captured state
    /// without further synchronization.
    pub fn serial_in_order(action: impl FnMut(&mut Flow<'_, T>) + Send + 'a) -> Self {
        Self {
            ordering: StageOrdering::SerialInOrder,
            action: StageAction::Serial(Mutex::new(Box::new(action))),
        }
    }

    /// A stage running one token at a time, in any order.
    ///
    /// As invocations never overlap, the action can mutate captured state
    /// without further synchronization.
    pub fn serial_out_of_order(action: impl FnMut(&mut Flow<'_, T>) + Send + 'a) -> Self {
        Self {
            ordering: StageOrdering::SerialOutOfOrder,
            action: StageAction::Serial(Mutex::new(Box::new(action))),
        }
    }

    /// A stage running concurrently on all the lines.
    pub fn parallel(action: impl Fn(&mut Flow<'_, T>) + Send + Sync + 'a) -> Self {
        Self {
            ordering: StageOrdering::Parallel,
            action: StageAction::Parallel(Box::new(action)),
        }
    }

    /// Ordering discipline of this stage.
    pub fn ordering(&self) -> StageOrdering {
        self.ordering
    }
}

/// A builder for [`Pipeline`].
pub struct PipelineBuilder<'a, T> {
    num_lines: usize,
    generator: Box<GeneratorFn<'a, T>>,
    stages: Vec<Stage<'a, T>>,
}

impl<'a, T: Default + Send> PipelineBuilder<'a, T> {
    /// Starts a pipeline with the given number of lines, i.e. the maximum
    /// number of tokens in flight, and the given generator.
    ///
    /// The generator is stage 0. It runs one token at a time in order, and
    /// either admits the token by returning [`ControlFlow::Continue`] or
    /// signals exhaustion by returning [`ControlFlow::Break`].
    pub fn new(
        num_lines: usize,
        generator: impl FnMut(&mut Flow<'_, T>) -> ControlFlow<()> + Send + 'a,
    ) -> Self {
        Self {
            num_lines,
            generator: Box::new(generator),
            stages: Vec::new(),
        }
    }

    /// Appends a stage.
    pub fn stage(mut self, stage: Stage<'a, T>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Builds the pipeline.
    ///
    /// Fails with [`Error::InvalidLineCount`] if the number of lines is zero.
    pub fn build(self) -> Result<Pipeline<'a, T>, Error> {
        if self.num_lines == 0 {
            return Err(Error::InvalidLineCount);
        }
        let num_cells = self.stages.len() + 1;
        let lines = (0..self.num_lines)
            .map(|_| Mutex::new((0..num_cells).map(|_| T::default()).collect()))
            .collect();
        Ok(Pipeline {
            generator: Mutex::new(self.generator),
            stages: self.stages,
            lines,
        })
    }
}

/// A bounded pipeline, streaming tokens from a generator through a sequence of
/// stages.
///
/// At most one token is in flight per line. A token moves to the next stage
/// only once the action of its current stage has returned. All the workers of
/// the executor cooperatively run the stage invocations.
///
/// ```
/// # use paranum::{Executor, PipelineBuilder, Stage, ThreadPoolBuilder};
/// # use std::ops::ControlFlow;
/// let mut thread_pool = ThreadPoolBuilder::default().build();
///
/// let inputs = [3.0, 4.0, 12.0];
/// let mut sum = 0.0;
/// let mut pipeline = PipelineBuilder::new(2, |flow| match inputs.get(flow.token() as usize) {
///     Some(x) => {
///         *flow.output() = *x;
///         ControlFlow::Continue(())
///     }
///     None => ControlFlow::Break(()),
/// })
/// .stage(Stage::parallel(|flow| *flow.output() = flow.input() * flow.input()))
/// .stage(Stage::serial_in_order(|flow| sum += flow.input()))
/// .build()
/// .unwrap();
///
/// assert_eq!(pipeline.run(&mut thread_pool).unwrap(), 3);
/// drop(pipeline);
/// assert_eq!(sum, 169.0);
/// ```
pub struct Pipeline<'a, T> {
    generator: Mutex<Box<GeneratorFn<'a, T>>>,
    stages: Vec<Stage<'a, T>>,
    /// Cells of each line, one per stage.
    lines: Vec<Mutex<Box<[T]>>>,
}

impl<T: Send> Pipeline<'_, T> {
    /// Number of lines, i.e. the maximum number of tokens in flight.
    pub fn num_lines(&self) -> usize {
        self.lines.len()
    }

    /// Number of stages, including the generator.
    pub fn num_stages(&self) -> usize {
        self.stages.len() + 1
    }

    /// Runs the pipeline on the given executor until the generator is
    /// exhausted and every admitted token went through the last stage.
    /// Returns the number of tokens that went through.
    ///
    /// Token indices restart from 0 at each run, while the cells of each line
    /// persist.
    ///
    /// If a stage action panics, no more tokens are admitted, running actions
    /// complete, and the remaining in-flight tokens are abandoned. The failure
    /// is returned as a [`WorkUnit::Stage`](crate::WorkUnit::Stage).
    pub fn run(&mut self, executor: &mut impl Executor) -> Result<u64, Error> {
        let schedule = Status::new(Schedule::new(
            self.lines.len(),
            self.stages.iter().map(|stage| stage.ordering),
        ));
        log_debug!(
            "Running a pipeline of {} stages on {} lines with {} workers",
            self.num_stages(),
            self.num_lines(),
            executor.num_workers()
        );

        let this = &*self;
        executor.broadcast(&|_worker_id| this.work(&schedule))?;

        let mut schedule = schedule.lock();
        match schedule.take_failure() {
            Some(failure) => {
                log_debug!("Pipeline failed: {failure}");
                Err(failure.into())
            }
            None => {
                log_debug!("Pipeline drained {} tokens", schedule.drained());
                Ok(schedule.drained())
            }
        }
    }

    /// Main loop of a worker: runs ready invocations until the run is
    /// finished.
    fn work(&self, schedule: &Status<Schedule>) {
        let mut guard = schedule.lock();
        loop {
            guard = schedule.wait_guard_while(guard, |s| !s.finished() && s.next_ready().is_none());
            if guard.finished() {
                break;
            }
            let Some(item) = guard.pick() else {
                continue;
            };
            drop(guard);

            log_trace!(
                "[line {}] Running stage {} of token {}",
                item.line,
                item.stage,
                item.token
            );
            let outcome = self.execute(item);

            guard = schedule.lock();
            guard.complete(item, outcome);
            schedule.wake_all();
        }
    }

    /// Runs a stage invocation, outside of the schedule lock.
    fn execute(&self, item: WorkItem) -> Outcome {
        // A line is only used by one invocation at a time. A previous panic may
        // have poisoned it, but the cells remain valid values.
        let mut cells = self.lines[item.line]
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (previous, rest) = cells.split_at_mut(item.stage);
        let mut flow = Flow {
            token: item.token,
            line: item.line,
            stage: item.stage,
            previous,
            output: &mut rest[0],
        };

        let result = invoke(|| -> Result<ControlFlow<()>, FailureCause> {
            if item.stage == 0 {
                let mut generator = self
                    .generator
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                return Ok(generator(&mut flow));
            }
            match &self.stages[item.stage - 1].action {
                StageAction::Serial(action) => {
                    let mut action = action.lock().unwrap_or_else(PoisonError::into_inner);
                    action(&mut flow);
                }
                StageAction::Parallel(action) => action(&mut flow),
            }
            Ok(ControlFlow::Continue(()))
        });

        match result {
            Ok(ControlFlow::Continue(())) => Outcome::Done,
            Ok(ControlFlow::Break(())) => Outcome::Exhausted,
            Err(cause) => Outcome::Failed(cause),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::WorkUnit;
    use crate::{CpuPinningPolicy, RangeStrategy, ThreadCount, ThreadPoolBuilder};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn thread_pool() -> crate::ThreadPool {
        ThreadPoolBuilder {
            num_threads: ThreadCount::try_from(4).unwrap(),
            range_strategy: RangeStrategy::Fixed,
            cpu_pinning: CpuPinningPolicy::No,
        }
        .build()
    }

    fn count_to(n: u64) -> impl FnMut(&mut Flow<'_, u64>) -> ControlFlow<()> + Send {
        move |flow| {
            if flow.token() < n {
                *flow.output() = flow.token();
                ControlFlow::Continue(())
            } else {
                ControlFlow::Break(())
            }
        }
    }

    #[test]
    fn test_invalid_line_count() {
        let result = PipelineBuilder::<u64>::new(0, count_to(1)).build();
        assert!(matches!(result, Err(Error::InvalidLineCount)));
    }

    #[test]
    fn test_generator_only() {
        let mut thread_pool = thread_pool();
        let mut pipeline = PipelineBuilder::new(3, count_to(10)).build().unwrap();
        assert_eq!(pipeline.num_stages(), 1);
        assert_eq!(pipeline.run(&mut thread_pool).unwrap(), 10);
    }

    #[test]
    fn test_immediate_exhaustion() {
        let mut thread_pool = thread_pool();
        let mut pipeline = PipelineBuilder::new(3, count_to(0))
            .stage(Stage::parallel(|_| panic!("never called")))
            .build()
            .unwrap();
        assert_eq!(pipeline.run(&mut thread_pool).unwrap(), 0);
    }

    #[test]
    fn test_serial_in_order_sees_increasing_tokens() {
        let mut thread_pool = thread_pool();
        let mut seen = Vec::new();
        let mut pipeline = PipelineBuilder::new(4, count_to(5))
            .stage(Stage::parallel(|flow| {
                // Later tokens finish this stage first.
                std::thread::sleep(std::time::Duration::from_millis(5 * (5 - flow.token())));
                *flow.output() = *flow.input();
            }))
            .stage(Stage::serial_in_order(|flow| seen.push(*flow.input())))
            .build()
            .unwrap();
        assert_eq!(pipeline.run(&mut thread_pool).unwrap(), 5);
        drop(pipeline);
        assert_eq!(seen, [0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_lines_bound_tokens_in_flight() {
        const NUM_LINES: usize = 3;
        let mut thread_pool = thread_pool();
        let in_flight = AtomicUsize::new(0);
        let max_in_flight = AtomicUsize::new(0);
        let mut generate = count_to(200);
        let mut pipeline = PipelineBuilder::new(NUM_LINES, |flow| {
            let result = generate(flow);
            if result.is_continue() {
                let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_in_flight.fetch_max(current, Ordering::SeqCst);
            }
            result
        })
        .stage(Stage::parallel(|flow| *flow.output() = flow.input() * 2))
        .stage(Stage::parallel(|flow| {
            *flow.output() = *flow.input();
            in_flight.fetch_sub(1, Ordering::SeqCst);
        }))
        .build()
        .unwrap();
        assert_eq!(pipeline.run(&mut thread_pool).unwrap(), 200);
        drop(pipeline);
        assert!(max_in_flight.into_inner() <= NUM_LINES);
        assert_eq!(in_flight.into_inner(), 0);
    }

    #[test]
    fn test_serial_stages_never_overlap() {
        let mut thread_pool = thread_pool();
        let running = AtomicBool::new(false);
        let mut count = 0;
        let mut pipeline = PipelineBuilder::new(4, count_to(100))
            .stage(Stage::parallel(|flow| *flow.output() = *flow.input()))
            .stage(Stage::serial_out_of_order(|flow| {
                assert!(!running.swap(true, Ordering::SeqCst));
                count += 1;
                *flow.output() = *flow.slot(0);
                running.store(false, Ordering::SeqCst);
            }))
            .build()
            .unwrap();
        assert_eq!(pipeline.run(&mut thread_pool).unwrap(), 100);
        drop(pipeline);
        assert_eq!(count, 100);
    }

    #[test]
    fn test_stage_cells_flow_along_the_line() {
        let mut thread_pool = thread_pool();
        let results = Mutex::new(Vec::new());
        let mut pipeline = PipelineBuilder::new(2, count_to(20))
            .stage(Stage::parallel(|flow| *flow.output() = flow.input() + 100))
            .stage(Stage::parallel(|flow| {
                assert_eq!(flow.stage(), 2);
                assert!(flow.line() < 2);
                *flow.output() = flow.slot(0) * 1000 + flow.slot(1);
                results.lock().unwrap().push(*flow.output());
            }))
            .build()
            .unwrap();
        assert_eq!(pipeline.run(&mut thread_pool).unwrap(), 20);
        drop(pipeline);
        let mut results = results.into_inner().unwrap();
        results.sort();
        assert_eq!(results, (0..20).map(|i| i * 1000 + i + 100).collect::<Vec<_>>());
    }

    #[test]
    fn test_panic_in_stage() {
        let mut thread_pool = thread_pool();
        let mut pipeline = PipelineBuilder::new(2, count_to(1000))
            .stage(Stage::serial_in_order(|flow| {
                if flow.token() == 7 {
                    panic!("bad token");
                }
                *flow.output() = *flow.input();
            }))
            .build()
            .unwrap();
        match pipeline.run(&mut thread_pool) {
            Err(Error::WorkerFailure(failure)) => {
                assert_eq!(failure.unit, WorkUnit::Stage { token: 7, stage: 1 });
                assert_eq!(failure.cause.to_string(), "panicked: bad token");
            }
            r => panic!("unexpected result: {r:?}"),
        }

        // Both the pipeline and the thread pool can run again. The generator
        // restarts from token 0 and the stage fails again at token 7.
        assert!(pipeline.run(&mut thread_pool).is_err());
        let mut other = PipelineBuilder::new(2, count_to(3)).build().unwrap();
        assert_eq!(other.run(&mut thread_pool).unwrap(), 3);
    }

    #[test]
    #[should_panic = "the generator doesn't have an input"]
    fn test_generator_input_panics() {
        let (mut cells, previous) = ([0u64], [0u64; 0]);
        let flow = Flow {
            token: 0,
            line: 0,
            stage: 0,
            previous: &previous,
            output: &mut cells[0],
        };
        flow.input();
    }
}

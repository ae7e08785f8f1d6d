// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Scheduling state of a pipeline run, shared by all the workers under one
//! lock.
//!
//! Stage 0 is the generator, and stages `1..num_stages` are the user stages.
//!
//! The scheduler never deadlocks: the smallest in-flight token has already
//! been processed by every serial in-order stage for all smaller tokens, so
//! the stage it waits for is either ready or busy with another invocation.

use super::StageOrdering;
use crate::error::{FailureCause, WorkUnit, WorkerFailure};

/// A stage invocation to execute outside the lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkItem {
    /// Line carrying the token.
    pub line: usize,
    /// Token index.
    pub token: u64,
    /// Stage index, 0 being the generator.
    pub stage: usize,
}

/// Result of a stage invocation.
#[derive(Debug)]
pub enum Outcome {
    /// The invocation returned normally. For the generator, this admits the
    /// token.
    Done,
    /// The generator has no more tokens.
    Exhausted,
    /// The invocation failed.
    Failed(FailureCause),
}

/// State of a line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LineState {
    /// The line doesn't carry any token.
    Free,
    /// The token is waiting to run the given stage.
    Waiting { token: u64, stage: usize },
    /// The token is running the given stage.
    Running { token: u64, stage: usize },
}

/// State of a stage.
#[derive(Debug)]
struct StageState {
    /// Ordering discipline of the stage.
    ordering: StageOrdering,
    /// Whether an invocation of this (serial) stage is running.
    busy: bool,
    /// Next token to process, for in-order stages.
    next_in_order: u64,
}

impl StageState {
    fn is_ready_for(&self, token: u64) -> bool {
        match self.ordering {
            StageOrdering::Parallel => true,
            StageOrdering::SerialOutOfOrder => !self.busy,
            StageOrdering::SerialInOrder => !self.busy && token == self.next_in_order,
        }
    }
}

/// Scheduling state of a pipeline run.
#[derive(Debug)]
pub struct Schedule {
    lines: Vec<LineState>,
    stages: Vec<StageState>,
    /// Index of the next token to generate.
    next_token: u64,
    /// Whether admission of new tokens has stopped.
    stopped: bool,
    /// Number of lines that aren't free.
    in_flight: usize,
    /// Number of invocations currently running.
    running: usize,
    /// Number of tokens that went through the last stage.
    drained: u64,
    /// First failure observed, after which the run winds down.
    failure: Option<WorkerFailure>,
}

impl Schedule {
    /// Creates the initial state of a run with the given number of lines, and
    /// the orderings of the stages after the generator.
    pub fn new(num_lines: usize, orderings: impl IntoIterator<Item = StageOrdering>) -> Self {
        let generator = StageState {
            ordering: StageOrdering::SerialInOrder,
            busy: false,
            next_in_order: 0,
        };
        let stages = std::iter::once(generator)
            .chain(orderings.into_iter().map(|ordering| StageState {
                ordering,
                busy: false,
                next_in_order: 0,
            }))
            .collect();
        Self {
            lines: vec![LineState::Free; num_lines],
            stages,
            next_token: 0,
            stopped: false,
            in_flight: 0,
            running: 0,
            drained: 0,
            failure: None,
        }
    }

    /// Whether the run is over: no invocation is running and either a failure
    /// occurred or all the admitted tokens have drained after the generator
    /// stopped.
    pub fn finished(&self) -> bool {
        self.running == 0 && (self.failure.is_some() || (self.stopped && self.in_flight == 0))
    }

    /// Number of tokens that went through every stage.
    pub fn drained(&self) -> u64 {
        self.drained
    }

    /// Number of lines carrying a token.
    #[cfg(test)]
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Takes the first failure of the run, if any.
    pub fn take_failure(&mut self) -> Option<WorkerFailure> {
        self.failure.take()
    }

    /// Returns the next invocation that may start, without starting it.
    ///
    /// Waiting tokens are preferred over generating new ones, smallest token
    /// first.
    pub fn next_ready(&self) -> Option<WorkItem> {
        if self.failure.is_some() {
            return None;
        }
        let waiting = self
            .lines
            .iter()
            .enumerate()
            .filter_map(|(line, state)| match *state {
                LineState::Waiting { token, stage } if self.stages[stage].is_ready_for(token) => {
                    Some(WorkItem { line, token, stage })
                }
                _ => None,
            })
            .min_by_key(|item| item.token);
        if waiting.is_some() {
            return waiting;
        }
        if self.stopped || self.stages[0].busy {
            return None;
        }
        let line = self.lines.iter().position(|state| *state == LineState::Free)?;
        Some(WorkItem {
            line,
            token: self.next_token,
            stage: 0,
        })
    }

    /// Marks the given invocation as running.
    pub fn start(&mut self, item: WorkItem) {
        debug_assert_eq!(self.next_ready_for_line(item.line), Some(item));
        if item.stage == 0 {
            self.in_flight += 1;
        }
        let stage = &mut self.stages[item.stage];
        if stage.ordering != StageOrdering::Parallel {
            stage.busy = true;
        }
        self.lines[item.line] = LineState::Running {
            token: item.token,
            stage: item.stage,
        };
        self.running += 1;
    }

    /// Starts and returns the next invocation that may start, if any.
    pub fn pick(&mut self) -> Option<WorkItem> {
        let item = self.next_ready()?;
        self.start(item);
        Some(item)
    }

    /// Records the outcome of a running invocation.
    pub fn complete(&mut self, item: WorkItem, outcome: Outcome) {
        debug_assert_eq!(
            self.lines[item.line],
            LineState::Running {
                token: item.token,
                stage: item.stage
            }
        );
        self.running -= 1;
        let last_stage = self.stages.len() - 1;
        let stage = &mut self.stages[item.stage];
        stage.busy = false;

        match outcome {
            Outcome::Failed(cause) => {
                if self.failure.is_none() {
                    self.failure = Some(WorkerFailure {
                        unit: WorkUnit::Stage {
                            token: item.token,
                            stage: item.stage,
                        },
                        cause,
                    });
                }
                self.stopped = true;
                self.free_line(item.line);
            }
            Outcome::Exhausted => {
                debug_assert_eq!(item.stage, 0);
                self.stopped = true;
                self.free_line(item.line);
            }
            Outcome::Done => {
                if stage.ordering == StageOrdering::SerialInOrder {
                    stage.next_in_order += 1;
                }
                if item.stage == 0 {
                    self.next_token += 1;
                }
                if item.stage == last_stage {
                    self.drained += 1;
                    self.free_line(item.line);
                } else {
                    self.lines[item.line] = LineState::Waiting {
                        token: item.token,
                        stage: item.stage + 1,
                    };
                }
            }
        }
    }

    fn free_line(&mut self, line: usize) {
        self.lines[line] = LineState::Free;
        self.in_flight -= 1;
    }

    /// Returns whether the given line may start its next invocation, for
    /// consistency checks.
    fn next_ready_for_line(&self, line: usize) -> Option<WorkItem> {
        if self.failure.is_some() {
            return None;
        }
        match self.lines[line] {
            LineState::Waiting { token, stage } if self.stages[stage].is_ready_for(token) => {
                Some(WorkItem { line, token, stage })
            }
            LineState::Free if !self.stopped && !self.stages[0].busy => Some(WorkItem {
                line,
                token: self.next_token,
                stage: 0,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn work_item(line: usize, token: u64, stage: usize) -> WorkItem {
        WorkItem { line, token, stage }
    }

    #[test]
    fn test_generator_only() {
        let mut schedule = Schedule::new(2, std::iter::empty());
        for token in 0..3 {
            let item = schedule.pick().unwrap();
            assert_eq!(item.token, token);
            assert_eq!(item.stage, 0);
            // The generator is serial.
            assert_eq!(schedule.pick(), None);
            schedule.complete(item, Outcome::Done);
        }
        let item = schedule.pick().unwrap();
        assert!(!schedule.finished());
        schedule.complete(item, Outcome::Exhausted);
        assert!(schedule.finished());
        assert_eq!(schedule.drained(), 3);
        assert_eq!(schedule.in_flight(), 0);
    }

    #[test]
    fn test_line_limit() {
        let mut schedule = Schedule::new(2, [StageOrdering::Parallel]);
        let gen0 = schedule.pick().unwrap();
        schedule.complete(gen0, Outcome::Done);
        // Waiting tokens are preferred over generating new ones.
        let stage0 = schedule.pick().unwrap();
        assert_eq!(stage0, work_item(0, 0, 1));
        let gen1 = schedule.pick().unwrap();
        assert_eq!(gen1, work_item(1, 1, 0));
        schedule.complete(gen1, Outcome::Done);
        assert_eq!(schedule.in_flight(), 2);

        // Token 1 can run the parallel stage concurrently with token 0.
        let stage1 = schedule.pick().unwrap();
        assert_eq!(stage1, work_item(1, 1, 1));
        // No free line for token 2.
        assert_eq!(schedule.pick(), None);

        schedule.complete(stage1, Outcome::Done);
        assert_eq!(schedule.in_flight(), 1);
        let gen2 = schedule.pick().unwrap();
        assert_eq!(gen2, work_item(1, 2, 0));
        schedule.complete(stage0, Outcome::Done);
        schedule.complete(gen2, Outcome::Exhausted);
        assert!(schedule.finished());
        assert_eq!(schedule.drained(), 2);
    }

    #[test]
    fn test_serial_in_order_waits_for_smaller_token() {
        let mut schedule =
            Schedule::new(3, [StageOrdering::Parallel, StageOrdering::SerialInOrder]);
        let mut parallel = Vec::new();
        // Admit tokens 0, 1, 2 and start their parallel stage.
        for _ in 0..3 {
            let generated = schedule.pick().unwrap();
            schedule.complete(generated, Outcome::Done);
            let item = schedule.pick().unwrap();
            assert_eq!(item.stage, 1);
            parallel.push(item);
        }
        // Tokens 2 and 1 finish the parallel stage first.
        schedule.complete(parallel[2], Outcome::Done);
        schedule.complete(parallel[1], Outcome::Done);
        assert_eq!(schedule.pick(), None);

        schedule.complete(parallel[0], Outcome::Done);
        let mut order = Vec::new();
        while let Some(item) = schedule.pick() {
            assert_eq!(item.stage, 2);
            // Serial: no other invocation of this stage can start.
            assert_ne!(schedule.next_ready().map(|i| i.stage), Some(2));
            order.push(item.token);
            schedule.complete(item, Outcome::Done);
            if order.len() == 3 {
                break;
            }
        }
        assert_eq!(order, [0, 1, 2]);
    }

    #[test]
    fn test_serial_out_of_order_is_exclusive() {
        let mut schedule = Schedule::new(
            2,
            [StageOrdering::Parallel, StageOrdering::SerialOutOfOrder],
        );
        let gen0 = schedule.pick().unwrap();
        schedule.complete(gen0, Outcome::Done);
        let par0 = schedule.pick().unwrap();
        let gen1 = schedule.pick().unwrap();
        schedule.complete(gen1, Outcome::Done);
        let par1 = schedule.pick().unwrap();

        // Token 1 reaches the serial stage first and may run before token 0.
        schedule.complete(par1, Outcome::Done);
        let serial1 = schedule.pick().unwrap();
        assert_eq!(serial1, work_item(1, 1, 2));
        schedule.complete(par0, Outcome::Done);
        assert_eq!(schedule.pick(), None);
        schedule.complete(serial1, Outcome::Done);
        let serial0 = schedule.pick().unwrap();
        assert_eq!(serial0, work_item(0, 0, 2));
    }

    #[test]
    fn test_failure_stops_everything() {
        let mut schedule = Schedule::new(2, [StageOrdering::Parallel, StageOrdering::Parallel]);
        let gen0 = schedule.pick().unwrap();
        schedule.complete(gen0, Outcome::Done);
        let par0 = schedule.pick().unwrap();
        let gen1 = schedule.pick().unwrap();

        let cause = FailureCause::Panic("boom".to_owned());
        schedule.complete(par0, Outcome::Failed(cause));
        // No new invocation after a failure, but running ones must finish.
        assert_eq!(schedule.pick(), None);
        assert!(!schedule.finished());
        schedule.complete(gen1, Outcome::Done);
        assert_eq!(schedule.pick(), None);
        assert!(schedule.finished());

        let failure = schedule.take_failure().unwrap();
        assert_eq!(failure.unit, WorkUnit::Stage { token: 0, stage: 1 });
        assert_eq!(schedule.drained(), 0);
    }
}

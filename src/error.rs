// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Error types.

use std::any::Any;
use std::fmt;
use thiserror::Error;

/// A type-erased error returned by a fallible work unit.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors reported by matrices, executors and pipelines.
#[derive(Debug, Error)]
pub enum Error {
    /// A matrix shape is not representable: exactly one dimension is zero, the
    /// element count overflows, or a buffer doesn't match the shape.
    #[error("invalid matrix dimensions {rows}x{cols}")]
    InvalidDimension {
        /// Requested number of rows.
        rows: usize,
        /// Requested number of columns.
        cols: usize,
    },

    /// The operands of a multiplication have incompatible shapes.
    #[error(
        "cannot multiply a {}x{} matrix by a {}x{} matrix",
        .lhs.0,
        .lhs.1,
        .rhs.0,
        .rhs.1
    )]
    DimensionMismatch {
        /// Shape `(rows, cols)` of the left operand.
        lhs: (usize, usize),
        /// Shape `(rows, cols)` of the right operand.
        rhs: (usize, usize),
    },

    /// An index progression was given a step of zero.
    #[error("the step of an index range must be non-zero")]
    InvalidStep,

    /// An index progression has more items than the executors support.
    #[error(
        "cannot process a range of {len} items: only ranges of up to {} items (2^32 - 1) are supported",
        u32::MAX
    )]
    RangeTooLarge {
        /// Number of items in the progression.
        len: usize,
    },

    /// A pipeline was built with zero lines.
    #[error("a pipeline needs at least one line")]
    InvalidLineCount,

    /// A unit of work failed during a parallel round.
    #[error(transparent)]
    WorkerFailure(#[from] WorkerFailure),
}

/// The first failure observed in a parallel round, reported once the round has
/// drained.
#[derive(Debug, Error)]
#[error("{unit} failed: {cause}")]
pub struct WorkerFailure {
    /// The unit of work that failed.
    pub unit: WorkUnit,
    /// Why it failed.
    pub cause: FailureCause,
}

/// Identifies a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkUnit {
    /// A position in `0..len` of a raw round of work.
    Position(usize),
    /// An index of the progression passed to
    /// [`for_each_index()`](crate::Executor::for_each_index).
    Index(isize),
    /// A chunk of a slice, e.g. an output row of a matrix.
    Chunk(usize),
    /// A stage invocation of a pipeline token.
    Stage {
        /// Token index.
        token: u64,
        /// Stage index, 0 being the generator.
        stage: usize,
    },
    /// A job broadcast to a worker.
    Worker(usize),
}

impl fmt::Display for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkUnit::Position(position) => write!(f, "work item at position {position}"),
            WorkUnit::Index(index) => write!(f, "work item at index {index}"),
            WorkUnit::Chunk(chunk) => write!(f, "chunk #{chunk}"),
            WorkUnit::Stage { token, stage } => write!(f, "stage #{stage} of token #{token}"),
            WorkUnit::Worker(id) => write!(f, "job on worker #{id}"),
        }
    }
}

/// The reason a unit of work failed.
#[derive(Debug, Error)]
pub enum FailureCause {
    /// The unit panicked, with the given panic message.
    #[error("panicked: {0}")]
    Panic(String),
    /// The unit returned an error.
    #[error("{0}")]
    Action(BoxError),
}

impl FailureCause {
    /// Converts a payload caught by [`std::panic::catch_unwind()`].
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "<non-string panic payload>".to_owned()
        };
        FailureCause::Panic(message)
    }
}

impl WorkerFailure {
    /// Returns the same failure attributed to another unit.
    pub(crate) fn relabel(self, f: impl FnOnce(WorkUnit) -> WorkUnit) -> Self {
        WorkerFailure {
            unit: f(self.unit),
            cause: self.cause,
        }
    }
}

/// Relabels the unit of a [`Error::WorkerFailure`], leaving other errors as is.
pub(crate) fn relabel_failure(error: Error, f: impl FnOnce(WorkUnit) -> WorkUnit) -> Error {
    match error {
        Error::WorkerFailure(failure) => Error::WorkerFailure(failure.relabel(f)),
        e => e,
    }
}

// Copyright 2024-2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

#![doc = include_str!("../README.md")]
#![forbid(missing_docs)]

mod core;
mod error;
mod executor;
mod macros;
mod matrix;
mod pipeline;
mod threads;

pub use error::{BoxError, Error, FailureCause, WorkUnit, WorkerFailure};
pub use executor::Executor;
pub use matrix::{Fill, Matrix};
pub use pipeline::{Flow, Pipeline, PipelineBuilder, Stage, StageOrdering};
#[cfg(feature = "rayon")]
pub use threads::RayonThreadPool;
pub use threads::{CpuPinningPolicy, RangeStrategy, ThreadCount, ThreadPool, ThreadPoolBuilder};

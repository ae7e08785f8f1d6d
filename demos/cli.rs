// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! CLI tool to run matrix multiplications and pipelines in parallel.

use clap::{Parser, ValueEnum};
use paranum::{
    CpuPinningPolicy, Error, Executor, Fill, Matrix, PipelineBuilder, RangeStrategy,
    RayonThreadPool, Stage, ThreadCount, ThreadPoolBuilder,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::hint::black_box;
use std::num::NonZeroUsize;
use std::ops::ControlFlow;
use std::process::ExitCode;
use std::time::Instant;

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let num_threads = match cli.num_threads {
        Some(num_threads) => ThreadCount::Count(num_threads),
        None => ThreadCount::AvailableParallelism,
    };
    let range_strategy = match cli.range_strategy {
        RangeStrategyCli::Fixed => RangeStrategy::Fixed,
        RangeStrategyCli::WorkStealing => RangeStrategy::WorkStealing,
    };

    let result = match cli.backend {
        Backend::ThreadPool => {
            let mut thread_pool = ThreadPoolBuilder {
                num_threads,
                range_strategy,
                cpu_pinning: CpuPinningPolicy::IfSupported,
            }
            .build();
            run(&cli, &mut thread_pool)
        }
        Backend::Rayon => {
            let mut thread_pool = RayonThreadPool::new_global(num_threads, range_strategy);
            run(&cli, &mut thread_pool)
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli, executor: &mut impl Executor) -> Result<(), Error> {
    match cli.scenario {
        Scenario::Multiply => {
            let factors = (0..=cli.iterations)
                .map(|i| {
                    let fill = Fill::Uniform {
                        seed: cli.seed.wrapping_add(i as u64),
                    };
                    Matrix::par_new(cli.size, cli.size, fill, executor)
                })
                .collect::<Result<Vec<_>, _>>()?;

            let start = Instant::now();
            let c = Matrix::product(black_box(&factors), executor)?;
            let elapsed = start.elapsed();
            println!(
                "{count} multiplications of {n}x{n} matrices in {elapsed:?}, trace = {trace}",
                count = cli.iterations,
                n = cli.size,
                trace = (0..c.rows()).map(|i| c[(i, i)]).sum::<f64>()
            );

            if cli.check {
                let mut serial = factors[0].clone();
                for factor in &factors[1..] {
                    serial = serial.multiply_serial(factor)?;
                }
                if serial == c {
                    println!("matches the serial product");
                } else {
                    println!("differs from the serial product");
                }
            }
        }
        Scenario::RootMeanSquare => {
            let mut rng = ChaCha8Rng::seed_from_u64(cli.seed);
            let inputs = (0..cli.size)
                .map(|_| rng.random_range(-1.0..=1.0))
                .collect::<Vec<f64>>();

            let mut sum = 0.0;
            let mut pipeline = PipelineBuilder::new(cli.num_lines, |flow| {
                match inputs.get(flow.token() as usize) {
                    Some(x) => {
                        *flow.output() = *x;
                        ControlFlow::Continue(())
                    }
                    None => ControlFlow::Break(()),
                }
            })
            .stage(Stage::parallel(|flow| *flow.output() = flow.input() * flow.input()))
            .stage(Stage::serial_in_order(|flow| sum += flow.input()))
            .build()?;

            let start = Instant::now();
            let count = pipeline.run(executor)?;
            let elapsed = start.elapsed();
            drop(pipeline);

            let rms = if count == 0 {
                0.0
            } else {
                (sum / count as f64).sqrt()
            };
            println!("root mean square of {count} values = {rms} in {elapsed:?}");
        }
    }
    Ok(())
}

/// CLI tool to run matrix multiplications and pipelines in parallel.
#[derive(Parser, Debug, PartialEq, Eq)]
#[command(version)]
struct Cli {
    /// Number of worker threads. Default to the available parallelism.
    #[arg(long)]
    num_threads: Option<NonZeroUsize>,

    /// Policy to split work among threads.
    #[arg(long, value_enum, default_value_t = RangeStrategyCli::WorkStealing)]
    range_strategy: RangeStrategyCli,

    /// Executor that runs the work.
    #[arg(long, value_enum, default_value_t = Backend::ThreadPool)]
    backend: Backend,

    /// Scenario to run in parallel.
    #[arg(long, value_enum)]
    scenario: Scenario,

    /// Matrix dimension, or number of values of the pipeline.
    #[arg(long, default_value_t = 512)]
    size: usize,

    /// Number of chained matrix multiplications.
    #[arg(long, default_value_t = 1)]
    iterations: usize,

    /// Number of lines of the pipeline.
    #[arg(long, default_value_t = 8)]
    num_lines: usize,

    /// Seed of the random inputs.
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Whether to compare the parallel product with the serial one.
    #[arg(long, default_value_t = false)]
    check: bool,
}

/// Policy to split work among threads.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum RangeStrategyCli {
    /// Each worker thread processes a fixed sequential chunk of items.
    Fixed,
    /// Work threads can steal items from each other.
    WorkStealing,
}

/// Executor that runs the work.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Backend {
    /// A dedicated pool of worker threads.
    ThreadPool,
    /// Tasks spawned on the global Rayon thread pool.
    Rayon,
}

/// Scenario to run.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Scenario {
    /// Multiply a chain of random square matrices.
    Multiply,
    /// Compute the root mean square of random values with a pipeline.
    RootMeanSquare,
}

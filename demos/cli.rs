// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! CLI tool to run examples of parallel tasks.
//!
//! Run with `RUST_LOG=debug` and the `log` feature enabled to follow the
//! lifecycle of the worker threads.

use clap::{Parser, ValueEnum};
use parastage::{CpuPinningPolicy, ThreadCount, WorkerConfig};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha12Rng;
use std::hint::black_box;
use std::num::NonZeroUsize;
use std::ops::ControlFlow;
use std::process::ExitCode;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let config = WorkerConfig {
        num_threads: match cli.num_threads {
            Some(num_threads) => ThreadCount::Count(num_threads),
            None => ThreadCount::AvailableParallelism,
        },
        cpu_pinning: match cli.cpu_pinning {
            CpuPinningCli::No => CpuPinningPolicy::No,
            CpuPinningCli::IfSupported => CpuPinningPolicy::IfSupported,
            CpuPinningCli::Always => CpuPinningPolicy::Always,
        },
    };

    let result = match cli.scenario {
        Scenario::Sum => {
            let input = black_box((0..cli.input_size).collect::<Vec<u64>>());
            let sum = AtomicU64::new(0);
            config
                .parallel_for(input.len(), |i, _| {
                    sum.fetch_add(input[i], Ordering::Relaxed);
                })
                .map(|()| println!("sum = {}", sum.into_inner()))
        }
        Scenario::FindAny => {
            let needle = cli.input_size / 2;
            let input = black_box((0..cli.input_size).collect::<Vec<u64>>());
            let found = Mutex::new(None);
            let result = config.try_parallel_for(input.len(), |i, _| {
                if input[i] == needle {
                    *found.lock().unwrap() = Some(i);
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            });
            println!("found = {:?}", found.into_inner().unwrap());
            match result {
                Err(parastage::Error::Aborted) => Ok(()),
                result => result,
            }
        }
        Scenario::Pipeline => {
            let mut rng = ChaCha12Rng::seed_from_u64(cli.seed);
            let input = (0..cli.input_size)
                .map(|_| rng.random_range(0..1000))
                .collect::<Vec<u64>>();
            let next = AtomicU64::new(0);
            let checksum = AtomicU64::new(0);
            config
                .run_pipeline(3, |step, item: Option<(u64, u64)>| match step {
                    0 => {
                        let i = next.fetch_add(1, Ordering::Relaxed);
                        input.get(i as usize).map(|&x| (i, x))
                    }
                    1 => item.map(|(i, x)| (i, x * x)),
                    _ => {
                        let (i, x) = item?;
                        // Only order-preserving stages compute the same checksum
                        // on every run.
                        let prev = checksum.load(Ordering::Relaxed);
                        checksum.store(prev.rotate_left(5) ^ x ^ i, Ordering::Relaxed);
                        None
                    }
                })
                .map(|()| println!("checksum = {:016x}", checksum.into_inner()))
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

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Number of worker threads. Default to the available parallelism.
    #[arg(long)]
    num_threads: Option<NonZeroUsize>,

    /// Policy to pin worker threads to CPUs.
    #[arg(long, value_enum, default_value_t = CpuPinningCli::IfSupported)]
    cpu_pinning: CpuPinningCli,

    /// Scenario to run in parallel.
    #[arg(long, value_enum)]
    scenario: Scenario,

    /// Number of items in the input.
    #[arg(long, default_value_t = 1_000_000)]
    input_size: u64,

    /// Seed of the random input. Used only for the pipeline scenario.
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

/// Policy to pin worker threads to CPUs.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum CpuPinningCli {
    /// Don't pin worker threads.
    No,
    /// Pin worker threads if the platform supports it.
    IfSupported,
    /// Pin worker threads, or fail.
    Always,
}

/// Scenario to run.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Scenario {
    /// Sum all the integers of a slice.
    Sum,
    /// Find an integer in a slice, stopping early once found.
    FindAny,
    /// Square random integers in a 3-stage pipeline and fold them in order.
    Pipeline,
}

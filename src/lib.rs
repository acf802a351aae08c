// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

#![doc = include_str!("../README.md")]
#![forbid(missing_docs, unsafe_code)]

mod core;
mod error;
mod macros;

pub use self::core::{CpuPinningPolicy, ThreadCount, WorkerConfig};
pub use error::Error;

/// Calls `f(index, worker_id)` exactly once for every index in
/// `0..item_count`, on `num_threads` worker threads.
///
/// With `num_threads <= 1`, the indices are processed in increasing order on
/// the calling thread, with worker id 0. See
/// [`WorkerConfig::parallel_for()`] for more control over the threads.
///
/// ```
/// # use std::sync::atomic::{AtomicUsize, Ordering};
/// let counts: Vec<AtomicUsize> = (0..100).map(|_| AtomicUsize::new(0)).collect();
/// parastage::parallel_for(4, counts.len(), |index, _worker_id| {
///     counts[index].fetch_add(1, Ordering::Relaxed);
/// })
/// .unwrap();
/// assert!(counts.iter().all(|count| count.load(Ordering::Relaxed) == 1));
/// ```
pub fn parallel_for(
    num_threads: usize,
    item_count: usize,
    f: impl Fn(usize, usize) + Sync,
) -> Result<(), Error> {
    WorkerConfig::with_threads(num_threads).parallel_for(item_count, f)
}

/// Runs a pipeline of `num_steps` stages on `num_threads` worker threads,
/// until stage 0 signals the end of the stream by returning [`None`].
///
/// A `num_threads` of zero is treated as one. See
/// [`WorkerConfig::run_pipeline()`] for the detailed semantics.
pub fn run_pipeline<T>(
    num_threads: usize,
    num_steps: usize,
    stage: impl Fn(usize, Option<T>) -> Option<T> + Sync,
) -> Result<(), Error> {
    WorkerConfig::with_threads(num_threads).run_pipeline(num_steps, stage)
}

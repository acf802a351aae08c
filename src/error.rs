// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Errors reported by the parallel entry points.

use std::io;
use thiserror::Error;

/// Failure of a [`parallel_for()`](crate::parallel_for) or
/// [`run_pipeline()`](crate::run_pipeline) call.
///
/// All failures are local to the call: by the time an error is returned,
/// every worker thread spawned by the call has been joined.
#[derive(Debug, Error)]
pub enum Error {
    /// Querying [`std::thread::available_parallelism()`] failed.
    #[error("getting the available parallelism failed: {0}")]
    AvailableParallelism(#[source] io::Error),

    /// The operating system refused to spawn a worker thread.
    #[error("failed to spawn worker thread #{id}: {source}")]
    Spawn {
        /// Index of the worker that couldn't be spawned.
        id: usize,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// A worker thread couldn't be pinned to its CPU, under
    /// [`CpuPinningPolicy::Always`](crate::CpuPinningPolicy::Always).
    #[error("failed to pin worker thread #{id} to a CPU: {reason}")]
    CpuPinning {
        /// Index of the worker that couldn't be pinned.
        id: usize,
        /// Description of the failure.
        reason: String,
    },

    /// One or more callbacks panicked.
    #[error("{count} worker thread(s) panicked")]
    WorkerPanicked {
        /// Number of worker threads that panicked.
        count: usize,
    },

    /// A callback requested to stop processing by returning
    /// [`ControlFlow::Break`](std::ops::ControlFlow::Break).
    #[error("processing was aborted by a callback")]
    Aborted,

    /// The number of items is too close to [`usize::MAX`] for the claim
    /// counters of the given number of threads.
    #[error("cannot process {item_count} items on {num_threads} threads: claim counters would overflow")]
    TooManyItems {
        /// Requested number of items.
        item_count: usize,
        /// Number of worker threads.
        num_threads: usize,
    },
}

// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Configuration of the worker threads spawned by each call.

use super::order::ordered_pipeline;
use super::stride::strided_for;
use crate::Error;
use std::num::NonZeroUsize;
use std::ops::ControlFlow;

/// Number of worker threads to spawn for a call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadCount {
    /// Spawn the number of threads returned by
    /// [`std::thread::available_parallelism()`].
    AvailableParallelism,
    /// Spawn the given number of threads.
    Count(NonZeroUsize),
}

impl TryFrom<usize> for ThreadCount {
    type Error = <NonZeroUsize as TryFrom<usize>>::Error;

    fn try_from(thread_count: usize) -> Result<Self, Self::Error> {
        let count = NonZeroUsize::try_from(thread_count)?;
        Ok(ThreadCount::Count(count))
    }
}

/// Policy to pin worker threads to CPUs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CpuPinningPolicy {
    /// Don't pin worker threads to CPUs.
    No,
    /// Pin each worker thread to a CPU, if CPU pinning is supported and
    /// implemented on this platform.
    IfSupported,
    /// Pin each worker thread to a CPU. If CPU pinning isn't supported on this
    /// platform (or fails), the call returns [`Error::CpuPinning`].
    Always,
}

/// Parameters of the worker threads spawned by a parallel call.
///
/// Threads are spawned when a call starts and joined before it returns:
/// nothing is shared between two calls made with the same configuration.
///
/// ```
/// # use parastage::{CpuPinningPolicy, ThreadCount, WorkerConfig};
/// # use std::sync::atomic::{AtomicU64, Ordering};
/// let config = WorkerConfig {
///     num_threads: ThreadCount::try_from(4).unwrap(),
///     cpu_pinning: CpuPinningPolicy::No,
/// };
///
/// let sum = AtomicU64::new(0);
/// config
///     .parallel_for(100, |index, _worker_id| {
///         sum.fetch_add(index as u64, Ordering::Relaxed);
///     })
///     .unwrap();
/// assert_eq!(sum.into_inner(), 99 * 100 / 2);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Number of worker threads to spawn.
    pub num_threads: ThreadCount,
    /// Policy to pin worker threads to CPUs.
    pub cpu_pinning: CpuPinningPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            num_threads: ThreadCount::AvailableParallelism,
            cpu_pinning: CpuPinningPolicy::No,
        }
    }
}

impl WorkerConfig {
    /// Returns a configuration with the given number of threads and no CPU
    /// pinning. A count of zero is treated as one.
    pub fn with_threads(num_threads: usize) -> Self {
        Self {
            num_threads: ThreadCount::Count(
                NonZeroUsize::new(num_threads).unwrap_or(NonZeroUsize::MIN),
            ),
            cpu_pinning: CpuPinningPolicy::No,
        }
    }

    /// Returns the number of worker threads that calls with this configuration
    /// use.
    pub fn resolve_num_threads(&self) -> Result<NonZeroUsize, Error> {
        match self.num_threads {
            ThreadCount::AvailableParallelism => {
                std::thread::available_parallelism().map_err(Error::AvailableParallelism)
            }
            ThreadCount::Count(count) => Ok(count),
        }
    }

    /// Calls `f(index, worker_id)` exactly once for every index in
    /// `0..item_count`, distributing the indices among the worker threads.
    ///
    /// Each worker first claims the indices of its own stride (`worker_id`,
    /// `worker_id + num_threads`, ...), then steals from the stride of the
    /// worker that is the most behind. With a single thread, the indices are
    /// processed in increasing order on the calling thread, with worker id 0.
    pub fn parallel_for(
        &self,
        item_count: usize,
        f: impl Fn(usize, usize) + Sync,
    ) -> Result<(), Error> {
        self.try_parallel_for(item_count, |index, worker_id| {
            f(index, worker_id);
            ControlFlow::Continue(())
        })
    }

    /// Same as [`parallel_for()`](Self::parallel_for), but the callback can
    /// request to stop processing by returning [`ControlFlow::Break`].
    ///
    /// Once a callback breaks, no new index is handed out and the call
    /// returns [`Error::Aborted`] after the callbacks already running have
    /// finished.
    pub fn try_parallel_for(
        &self,
        item_count: usize,
        f: impl Fn(usize, usize) -> ControlFlow<()> + Sync,
    ) -> Result<(), Error> {
        let num_threads = self.resolve_num_threads()?;
        strided_for(num_threads.get(), self.cpu_pinning, item_count, f)
    }

    /// Runs a pipeline of `num_steps` stages on a stream of items, until the
    /// stream ends.
    ///
    /// The stage callback is invoked as `stage(step, input)`:
    /// - step 0 produces a new item from a [`None`] input, and returns [`None`]
    ///   once the stream is exhausted,
    /// - each step in `1..num_steps` receives the output of the previous step,
    /// - the output of the last step is discarded.
    ///
    /// Every step observes the items in the order in which step 0 produced
    /// them, even though the workers run different steps concurrently.
    ///
    /// Returning [`None`] from any step other than the last one permanently
    /// retires the worker that ran it: this is how the end of the stream is
    /// detected. The call returns once all workers have retired.
    pub fn run_pipeline<T>(
        &self,
        num_steps: usize,
        stage: impl Fn(usize, Option<T>) -> Option<T> + Sync,
    ) -> Result<(), Error> {
        self.try_run_pipeline(num_steps, |step, input| {
            ControlFlow::Continue(stage(step, input))
        })
    }

    /// Same as [`run_pipeline()`](Self::run_pipeline), but the stage callback
    /// can request to stop the whole pipeline by returning
    /// [`ControlFlow::Break`].
    ///
    /// Once a stage breaks, the other workers exit at their next ordering check
    /// (after finishing the stage they may be running), their in-flight items
    /// are dropped, and the call returns [`Error::Aborted`].
    pub fn try_run_pipeline<T>(
        &self,
        num_steps: usize,
        stage: impl Fn(usize, Option<T>) -> ControlFlow<(), Option<T>> + Sync,
    ) -> Result<(), Error> {
        let num_threads = self.resolve_num_threads()?;
        ordered_pipeline(num_threads.get(), self.cpu_pinning, num_steps, stage)
    }
}

// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Parallel-for over strided claim counters, with work stealing.

use super::config::CpuPinningPolicy;
use super::sync::{PanicNotifier, StopFlag};
use super::workers::run_workers;
use crate::macros::log_debug;
#[cfg(feature = "log_parallelism")]
use crate::macros::{log_info, log_trace};
use crate::Error;
use crossbeam_utils::CachePadded;
#[cfg(feature = "log_parallelism")]
use std::ops::AddAssign;
use std::ops::ControlFlow;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
#[cfg(feature = "log_parallelism")]
use std::sync::Mutex;

/// Calls `f(index, worker_id)` once for every index in `0..item_count`, on
/// `num_threads` worker threads.
pub fn strided_for(
    num_threads: usize,
    cpu_pinning: CpuPinningPolicy,
    item_count: usize,
    f: impl Fn(usize, usize) -> ControlFlow<()> + Sync,
) -> Result<(), Error> {
    if num_threads <= 1 {
        return serial_for(item_count, f);
    }

    log_debug!("[main thread] Processing {item_count} items on {num_threads} threads");
    let job = ForJob {
        counters: StridedCounters::new(num_threads, item_count)?,
        stop: StopFlag::default(),
        broken: AtomicBool::new(false),
        f,
        #[cfg(feature = "log_parallelism")]
        stats: Mutex::new(StridedStats::default()),
    };

    let result = run_workers(
        num_threads,
        cpu_pinning,
        |id| job.run(id),
        |_id| job.stop.raise(),
    );

    #[cfg(feature = "log_parallelism")]
    job.print_statistics();

    result?;
    if job.broken.load(Ordering::Relaxed) {
        return Err(Error::Aborted);
    }
    Ok(())
}

/// Sequential fallback: processes all the indices in increasing order on the
/// calling thread, as worker 0.
fn serial_for(
    item_count: usize,
    f: impl Fn(usize, usize) -> ControlFlow<()>,
) -> Result<(), Error> {
    log_debug!("[main thread] Processing {item_count} items serially");
    match catch_unwind(AssertUnwindSafe(|| {
        (0..item_count).try_for_each(|index| f(index, 0))
    })) {
        Ok(ControlFlow::Continue(())) => Ok(()),
        Ok(ControlFlow::Break(())) => Err(Error::Aborted),
        Err(_) => Err(Error::WorkerPanicked { count: 1 }),
    }
}

/// State of a parallel-for, shared by all the worker threads.
struct ForJob<F> {
    /// Claim counters of all the workers.
    counters: StridedCounters,
    /// Raised to stop handing out indices.
    stop: StopFlag,
    /// Whether a callback returned [`ControlFlow::Break`].
    broken: AtomicBool,
    /// Function to run on each index.
    f: F,
    /// Aggregated statistics of all the workers.
    #[cfg(feature = "log_parallelism")]
    stats: Mutex<StridedStats>,
}

impl<F: Fn(usize, usize) -> ControlFlow<()>> ForJob<F> {
    /// Main function of the given worker.
    fn run(&self, id: usize) {
        // A panicking callback stops the other workers rather than letting them
        // finish the whole range.
        let _notifier = PanicNotifier::new(|| self.stop.raise());

        let mut iter = self.counters.iter(id, &self.stop);
        for index in iter.by_ref() {
            if (self.f)(index, id).is_break() {
                log_debug!("[thread {id}] Callback requested to stop at index {index}");
                self.broken.store(true, Ordering::Relaxed);
                self.stop.raise();
                break;
            }
        }

        #[cfg(feature = "log_parallelism")]
        {
            *self.stats.lock().unwrap() += &iter.stats;
        }
    }

    #[cfg(feature = "log_parallelism")]
    fn print_statistics(&self) {
        let stats = self.stats.lock().unwrap();
        log_info!("Work-stealing statistics:");
        log_info!("- claims: {}", stats.claims);
        log_info!("- thefts: {}", stats.thefts);
        log_info!("- failed_thefts: {}", stats.failed_thefts);
        log_info!("- claims + thefts: {}", stats.claims + stats.thefts);
    }
}

/// One claim counter per worker. Worker `w` starts at index `w`, and every
/// claim (by the worker itself or by a thief) advances the counter by the
/// number of workers. Counters therefore partition `0..item_count` into
/// residue classes, and the atomic fetch-and-add hands out each index of a
/// class exactly once.
pub struct StridedCounters {
    /// Next index to hand out, for each worker's stride.
    counters: Box<[CachePadded<AtomicUsize>]>,
    /// Total number of items.
    item_count: usize,
}

impl StridedCounters {
    /// Creates the counters for the given number of workers and items.
    ///
    /// Fails if the counters could overflow. Each counter only advances past
    /// `item_count` by a bounded amount: one failed own claim plus one failed
    /// theft per worker on top of the last successful claim.
    pub fn new(num_threads: usize, item_count: usize) -> Result<Self, Error> {
        let overshoot = num_threads
            .checked_mul(num_threads)
            .and_then(|x| x.checked_mul(3));
        if overshoot.and_then(|x| x.checked_add(item_count)).is_none() {
            return Err(Error::TooManyItems {
                item_count,
                num_threads,
            });
        }
        Ok(Self {
            counters: (0..num_threads)
                .map(|id| CachePadded::new(AtomicUsize::new(id)))
                .collect(),
            item_count,
        })
    }

    /// Number of workers sharing these counters.
    fn num_threads(&self) -> usize {
        self.counters.len()
    }

    /// Claims the next index of the given worker's own stride.
    #[inline(always)]
    fn claim(&self, id: usize) -> Option<usize> {
        // Relaxed is enough: read-modify-write operations on a single counter are
        // totally ordered, which is all that uniqueness requires. Results of the
        // callbacks are synchronized by joining the threads.
        let index = self.counters[id].fetch_add(self.num_threads(), Ordering::Relaxed);
        (index < self.item_count).then_some(index)
    }

    /// Steals the next index of the worker that is the most behind, i.e. whose
    /// counter is the smallest. Ties go to the lowest worker id.
    ///
    /// Returns [`Result::Err`] if all counters are exhausted, and
    /// `Ok(None)` if the chosen counter got exhausted concurrently.
    #[cold]
    fn steal(&self) -> Result<Option<usize>, ()> {
        let (victim, lowest) = self
            .counters
            .iter()
            .map(|counter| counter.load(Ordering::Relaxed))
            .enumerate()
            .min_by_key(|&(_, value)| value)
            .ok_or(())?;
        if lowest >= self.item_count {
            return Err(());
        }
        let index = self.counters[victim].fetch_add(self.num_threads(), Ordering::Relaxed);
        Ok((index < self.item_count).then_some(index))
    }

    /// Returns an iterator over the indices processed by the given worker:
    /// first its own stride, then whatever it manages to steal.
    pub fn iter<'a>(&'a self, id: usize, stop: &'a StopFlag) -> StridedIter<'a> {
        StridedIter {
            id,
            counters: self,
            stop,
            phase: Phase::Own,
            #[cfg(feature = "log_parallelism")]
            stats: StridedStats::default(),
        }
    }
}

/// Progress of a [`StridedIter`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    /// Claiming from the worker's own stride.
    Own,
    /// The own stride is exhausted, stealing from other strides.
    Stealing,
    /// Nothing is left to claim.
    Done,
}

/// Iterator over the indices claimed by one worker.
pub struct StridedIter<'a> {
    /// Index of the worker that claims.
    id: usize,
    /// Claim counters of all the workers.
    counters: &'a StridedCounters,
    /// Flag to stop claiming.
    stop: &'a StopFlag,
    /// Current phase.
    phase: Phase,
    /// Local work-stealing statistics.
    #[cfg(feature = "log_parallelism")]
    stats: StridedStats,
}

impl Iterator for StridedIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.stop.is_raised() {
            self.phase = Phase::Done;
        }
        loop {
            match self.phase {
                Phase::Own => match self.counters.claim(self.id) {
                    Some(index) => {
                        #[cfg(feature = "log_parallelism")]
                        {
                            self.stats.claims += 1;
                        }
                        return Some(index);
                    }
                    None => {
                        #[cfg(feature = "log_parallelism")]
                        log_debug!(
                            "[thread {}] Own stride is exhausted, stealing from other threads",
                            self.id
                        );
                        self.phase = Phase::Stealing;
                    }
                },
                Phase::Stealing => match self.counters.steal() {
                    Ok(Some(index)) => {
                        #[cfg(feature = "log_parallelism")]
                        {
                            self.stats.thefts += 1;
                            log_trace!("[thread {}] Stole index {index}", self.id);
                        }
                        return Some(index);
                    }
                    Ok(None) => {
                        #[cfg(feature = "log_parallelism")]
                        {
                            self.stats.failed_thefts += 1;
                        }
                        self.phase = Phase::Done;
                    }
                    Err(()) => self.phase = Phase::Done,
                },
                Phase::Done => return None,
            }
        }
    }
}

#[cfg(feature = "log_parallelism")]
#[derive(Default)]
struct StridedStats {
    /// Number of indices claimed from the worker's own stride.
    claims: u64,
    /// Number of indices stolen from other strides.
    thefts: u64,
    /// Number of thefts that lost the race for the last index of a stride.
    failed_thefts: u64,
}

#[cfg(feature = "log_parallelism")]
impl AddAssign<&StridedStats> for StridedStats {
    fn add_assign(&mut self, other: &StridedStats) {
        self.claims += other.claims;
        self.thefts += other.thefts;
        self.failed_thefts += other.failed_thefts;
    }
}

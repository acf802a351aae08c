// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Multi-stage pipeline whose stages observe items in production order.
//!
//! Each worker carries one item at a time through all the stages. Items are
//! numbered by a shared counter when a worker (re)starts at stage 0, and a
//! worker may only run a stage once every worker holding an earlier item has
//! moved past that stage. The check and the bookkeeping happen under a single
//! lock, while the stages themselves run outside of it.

use super::config::CpuPinningPolicy;
use super::sync::{PanicNotifier, Status};
use super::workers::run_workers;
use crate::macros::log_debug;
#[cfg(feature = "log_parallelism")]
use crate::macros::{log_info, log_trace};
use crate::Error;
use std::marker::PhantomData;
use std::ops::ControlFlow;
#[cfg(feature = "log_parallelism")]
use std::sync::Mutex;

/// Runs a pipeline of `num_steps` stages on `num_threads` worker threads,
/// until every worker has retired.
pub fn ordered_pipeline<T>(
    num_threads: usize,
    cpu_pinning: CpuPinningPolicy,
    num_steps: usize,
    stage: impl Fn(usize, Option<T>) -> ControlFlow<(), Option<T>> + Sync,
) -> Result<(), Error> {
    if num_steps == 0 {
        log_debug!("[main thread] Pipeline without any stage, nothing to do");
        return Ok(());
    }

    let num_threads = num_threads.max(1);
    log_debug!("[main thread] Running a {num_steps}-stage pipeline on {num_threads} threads");
    let pipeline = OrderedPipeline {
        schedule: Status::new(Schedule::new(num_threads, num_steps)),
        stage,
        #[cfg(feature = "log_parallelism")]
        stats: (0..num_threads)
            .map(|_| Mutex::new(PipelineStats::default()))
            .collect(),
        _phantom: PhantomData,
    };

    let result = run_workers(
        num_threads,
        cpu_pinning,
        |id| pipeline.run(id),
        |id| pipeline.schedule.update(|s| s.halt(id)),
    );

    #[cfg(feature = "log_parallelism")]
    pipeline.print_statistics();

    result?;
    let schedule = pipeline.schedule.into_inner();
    log_debug!(
        "[main thread] Pipeline finished, {} item ranks were handed out",
        schedule.next_index
    );
    if schedule.broken {
        return Err(Error::Aborted);
    }
    Ok(())
}

/// Position of a worker in the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Slot {
    /// Stage that the worker runs next, or the number of stages once the
    /// worker has retired.
    step: usize,
    /// Rank of the item that the worker carries, in production order.
    index: u64,
}

/// Positions of all the workers, guarded by the pipeline's monitor.
#[derive(Debug)]
struct Schedule {
    /// Number of stages. Also the step of retired workers.
    num_steps: usize,
    /// Position of each worker.
    slots: Vec<Slot>,
    /// Rank of the next item to start at stage 0.
    next_index: u64,
    /// Whether the workers must exit without running any further stage.
    halted: bool,
    /// Whether a stage returned [`ControlFlow::Break`].
    broken: bool,
}

impl Schedule {
    /// Creates the initial schedule, where worker `i` carries item `i` at
    /// stage 0.
    fn new(num_threads: usize, num_steps: usize) -> Self {
        Self {
            num_steps,
            slots: (0..num_threads as u64)
                .map(|index| Slot { step: 0, index })
                .collect(),
            next_index: num_threads as u64,
            halted: false,
            broken: false,
        }
    }

    /// Whether the given worker has retired.
    fn is_retired(&self, id: usize) -> bool {
        self.slots[id].step == self.num_steps
    }

    /// Whether the given worker may run its current step, i.e. no other
    /// worker carrying an earlier item is at the same or at an earlier step.
    ///
    /// Retired workers are at step `num_steps` and never hold anyone back.
    fn may_run(&self, id: usize) -> bool {
        let me = self.slots[id];
        !self
            .slots
            .iter()
            .enumerate()
            .any(|(i, other)| i != id && other.step <= me.step && other.index < me.index)
    }

    /// Moves the given worker past the step it just ran, and returns its new
    /// step.
    ///
    /// The last step always cycles back to stage 0. Any other step cycles to
    /// the next one if it produced an output, and retires the worker
    /// otherwise. A worker cycling back to stage 0 takes the next item rank.
    fn advance(&mut self, id: usize, produced: bool) -> usize {
        let num_steps = self.num_steps;
        let slot = &mut self.slots[id];
        slot.step = if slot.step == num_steps - 1 || produced {
            (slot.step + 1) % num_steps
        } else {
            num_steps
        };
        if slot.step == 0 {
            slot.index = self.next_index;
            self.next_index += 1;
        }
        slot.step
    }

    /// Retires the given worker.
    fn retire(&mut self, id: usize) {
        self.slots[id].step = self.num_steps;
    }

    /// Retires the given worker and tells all the others to exit.
    fn halt(&mut self, id: usize) {
        self.retire(id);
        self.halted = true;
    }
}

/// State of a pipeline, shared by all the worker threads.
struct OrderedPipeline<T, Stage> {
    /// Monitor guarding the positions of the workers.
    schedule: Status<Schedule>,
    /// Stage callback.
    stage: Stage,
    /// Statistics of each worker.
    #[cfg(feature = "log_parallelism")]
    stats: Box<[Mutex<PipelineStats>]>,
    _phantom: PhantomData<fn(Option<T>) -> Option<T>>,
}

impl<T, Stage> OrderedPipeline<T, Stage>
where
    Stage: Fn(usize, Option<T>) -> ControlFlow<(), Option<T>>,
{
    /// Main function of the given worker.
    fn run(&self, id: usize) {
        // If a stage panics, the item it was processing is lost: retire and make
        // everyone exit rather than letting later items wait for it forever.
        let _notifier = PanicNotifier::new(|| {
            log_debug!("[thread {id}] Detected panic in this thread, halting the pipeline");
            self.schedule.update(|s| s.halt(id));
        });

        #[cfg(feature = "log_parallelism")]
        let mut stats = PipelineStats::default();

        let mut payload: Option<T> = None;
        loop {
            let step = {
                #[cfg(feature = "log_parallelism")]
                let mut checks = 0;
                let schedule = self.schedule.wait_until(|s| {
                    #[cfg(feature = "log_parallelism")]
                    {
                        checks += 1;
                    }
                    s.halted || s.is_retired(id) || s.may_run(id)
                });
                #[cfg(feature = "log_parallelism")]
                {
                    stats.waits += checks - 1;
                }
                if schedule.halted || schedule.is_retired(id) {
                    break;
                }
                schedule.slots[id].step
            };

            // Stage 0 starts a new item. Whatever the last stage returned for
            // the previous item is dropped here.
            let input = if step == 0 { None } else { payload.take() };
            #[cfg(feature = "log_parallelism")]
            log_trace!("[thread {id}] Running step {step}");
            let output = (self.stage)(step, input);
            #[cfg(feature = "log_parallelism")]
            {
                stats.stages += 1;
                log_trace!("[thread {id}] Done with step {step}");
            }

            match output {
                ControlFlow::Continue(output) => {
                    let produced = output.is_some();
                    payload = output;
                    let next_step = self.schedule.update(|s| s.advance(id, produced));
                    if next_step == 0 {
                        #[cfg(feature = "log_parallelism")]
                        {
                            stats.items += 1;
                        }
                    }
                }
                ControlFlow::Break(()) => {
                    log_debug!("[thread {id}] Step {step} requested to stop the pipeline");
                    self.schedule.update(|s| {
                        s.broken = true;
                        s.halt(id);
                    });
                    break;
                }
            }
        }

        // On a halt, this worker may still hold a slot that others look at.
        self.schedule.update(|s| s.retire(id));
        log_debug!("[thread {id}] Retired from the pipeline");

        #[cfg(feature = "log_parallelism")]
        {
            *self.stats[id].lock().unwrap() = stats;
        }
    }

    #[cfg(feature = "log_parallelism")]
    fn print_statistics(&self) {
        log_info!("Pipeline statistics:");
        for (id, stats) in self.stats.iter().enumerate() {
            let stats = stats.lock().unwrap();
            log_info!(
                "- thread {id}: {} items completed, {} stages run, {} waits",
                stats.items,
                stats.stages,
                stats.waits
            );
        }
    }
}

#[cfg(feature = "log_parallelism")]
#[derive(Default)]
struct PipelineStats {
    /// Number of items that went through the last stage.
    items: u64,
    /// Number of stage callbacks run.
    stages: u64,
    /// Number of times the worker blocked on the ordering condition.
    waits: u64,
}

// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Spawning and joining the worker threads of a single call.

use super::config::CpuPinningPolicy;
use crate::macros::{log_debug, log_error, log_warn};
use crate::Error;
// Platforms that support `libc::sched_setaffinity()`.
#[cfg(all(
    not(miri),
    any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux"
    )
))]
use nix::{
    sched::{sched_setaffinity, CpuSet},
    unistd::Pid,
};
use std::sync::{Mutex, PoisonError};
use std::thread::{Builder, ScopedJoinHandle};

/// Runs `work(id)` on `num_threads` scoped worker threads, and joins them all
/// before returning.
///
/// Whenever a worker can't start (its thread failed to spawn, or to be pinned
/// to a CPU), `abandon(id)` is called in its stead, so that the job can tell
/// the running workers to stop and not wait for the missing one.
///
/// Failing to start a worker takes precedence over panics in the reported
/// error.
pub fn run_workers(
    num_threads: usize,
    cpu_pinning: CpuPinningPolicy,
    work: impl Fn(usize) + Sync,
    abandon: impl Fn(usize) + Sync,
) -> Result<(), Error> {
    let failure: Mutex<Option<Error>> = Mutex::new(None);

    let num_panics = std::thread::scope(|scope| {
        let work = &work;
        let abandon = &abandon;
        let failure = &failure;

        let mut handles: Vec<ScopedJoinHandle<'_, ()>> = Vec::with_capacity(num_threads);
        for id in 0..num_threads {
            let spawned = Builder::new()
                .name(format!("parastage-worker-{id}"))
                .spawn_scoped(scope, move || match pin_current_thread(id, cpu_pinning) {
                    Ok(()) => work(id),
                    Err(e) => {
                        log_error!("[thread {id}] {e}");
                        record_failure(failure, e);
                        abandon(id);
                    }
                });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(source) => {
                    log_error!("[main thread] Failed to spawn worker thread #{id}: {source}");
                    record_failure(failure, Error::Spawn { id, source });
                    (id..num_threads).for_each(abandon);
                    break;
                }
            }
        }
        log_debug!("[main thread] Spawned {} worker threads", handles.len());

        let mut num_panics = 0;
        for (_id, handle) in handles.into_iter().enumerate() {
            match handle.join() {
                Ok(()) => log_debug!("[main thread] Worker thread #{_id} joined"),
                Err(_) => {
                    log_error!("[main thread] Worker thread #{_id} panicked");
                    num_panics += 1;
                }
            }
        }
        log_debug!("[main thread] Joined worker threads");
        num_panics
    });

    if let Some(error) = failure
        .into_inner()
        .unwrap_or_else(PoisonError::into_inner)
    {
        return Err(error);
    }
    if num_panics != 0 {
        return Err(Error::WorkerPanicked { count: num_panics });
    }
    Ok(())
}

/// Keeps the first failure reported by a worker.
fn record_failure(failure: &Mutex<Option<Error>>, error: Error) {
    failure
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get_or_insert(error);
}

/// Pins the calling thread to the CPU of the same index as the worker.
#[cfg(all(
    not(miri),
    any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux"
    )
))]
fn pin_current_thread(id: usize, cpu_pinning: CpuPinningPolicy) -> Result<(), Error> {
    if cpu_pinning == CpuPinningPolicy::No {
        return Ok(());
    }

    let mut cpu_set = CpuSet::new();
    let pinned = cpu_set
        .set(id)
        .and_then(|()| sched_setaffinity(Pid::from_raw(0), &cpu_set));
    match pinned {
        Ok(()) => {
            log_debug!("Pinned thread #{id} to CPU #{id}");
            Ok(())
        }
        Err(e) if cpu_pinning == CpuPinningPolicy::Always => Err(Error::CpuPinning {
            id,
            reason: e.to_string(),
        }),
        Err(_e) => {
            log_warn!("Failed to set CPU affinity for thread #{id}: {_e}");
            Ok(())
        }
    }
}

/// Pins the calling thread to the CPU of the same index as the worker.
#[cfg(any(
    miri,
    not(any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux"
    ))
))]
fn pin_current_thread(id: usize, cpu_pinning: CpuPinningPolicy) -> Result<(), Error> {
    match cpu_pinning {
        CpuPinningPolicy::No => Ok(()),
        CpuPinningPolicy::IfSupported => {
            log_warn!("Pinning thread #{id} to a CPU is not implemented on this platform.");
            Ok(())
        }
        CpuPinningPolicy::Always => Err(Error::CpuPinning {
            id,
            reason: "pinning threads to CPUs is not implemented on this platform".to_owned(),
        }),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_run_workers_runs_each_id_once() {
        let seen: [AtomicUsize; 8] = Default::default();
        run_workers(
            8,
            CpuPinningPolicy::No,
            |id| {
                seen[id].fetch_add(1, Ordering::Relaxed);
            },
            |_| unreachable!(),
        )
        .unwrap();
        assert!(seen.iter().all(|x| x.load(Ordering::Relaxed) == 1));
    }

    #[test]
    fn test_run_workers_names_threads() {
        let names = Mutex::new(Vec::new());
        run_workers(
            2,
            CpuPinningPolicy::No,
            |_| {
                let name = std::thread::current().name().map(str::to_owned);
                names.lock().unwrap().push(name);
            },
            |_| unreachable!(),
        )
        .unwrap();
        let mut names = names.into_inner().unwrap();
        names.sort();
        assert_eq!(
            names,
            vec![
                Some("parastage-worker-0".to_owned()),
                Some("parastage-worker-1".to_owned())
            ]
        );
    }

    #[test]
    fn test_run_workers_counts_panics() {
        let result = run_workers(
            4,
            CpuPinningPolicy::No,
            |id| {
                if id % 2 == 1 {
                    panic!("worker failure");
                }
            },
            |_| unreachable!(),
        );
        assert!(matches!(result, Err(Error::WorkerPanicked { count: 2 })));
    }

    #[test]
    fn test_run_workers_pinning_if_supported() {
        let count = AtomicUsize::new(0);
        run_workers(
            2,
            CpuPinningPolicy::IfSupported,
            |_| {
                count.fetch_add(1, Ordering::Relaxed);
            },
            |_| unreachable!(),
        )
        .unwrap();
        assert_eq!(count.into_inner(), 2);
    }

    #[cfg(any(
        miri,
        not(any(
            target_os = "android",
            target_os = "dragonfly",
            target_os = "freebsd",
            target_os = "linux"
        ))
    ))]
    #[test]
    fn test_run_workers_pinning_always_not_supported() {
        let abandoned = AtomicUsize::new(0);
        let result = run_workers(
            2,
            CpuPinningPolicy::Always,
            |_| unreachable!(),
            |_| {
                abandoned.fetch_add(1, Ordering::Relaxed);
            },
        );
        assert!(matches!(result, Err(Error::CpuPinning { .. })));
        assert_eq!(abandoned.into_inner(), 2);
    }
}

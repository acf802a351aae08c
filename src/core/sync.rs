// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Synchronization primitives

use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// An ergonomic wrapper around a [`Mutex`]-[`Condvar`] pair, implementing the
/// monitor pattern: every update is broadcast to all the waiting threads,
/// which then re-evaluate their own condition.
///
/// User callbacks never run while the lock is held, so a poisoned mutex can
/// only come from a panic in this crate's own bookkeeping. The state is still
/// consistent in that case and the poison is ignored, which lets the unwinding
/// path of a panicking worker retire itself and wake up its peers.
pub struct Status<T> {
    mutex: Mutex<T>,
    condvar: Condvar,
}

impl<T> Status<T> {
    /// Creates a new status initialized with the given value.
    pub fn new(t: T) -> Self {
        Self {
            mutex: Mutex::new(t),
            condvar: Condvar::new(),
        }
    }

    /// Locks the status, without waiting on any condition.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies the given update to the status and notifies all waiting
    /// threads.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let result = f(&mut self.lock());
        self.condvar.notify_all();
        result
    }

    /// Waits until the given condition holds on this status.
    ///
    /// This returns a [`MutexGuard`], allowing to further inspect or modify the
    /// status.
    pub fn wait_until(&self, mut ready: impl FnMut(&mut T) -> bool) -> MutexGuard<'_, T> {
        self.condvar
            .wait_while(self.lock(), |t| !ready(t))
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Consumes the status, returning the underlying value.
    pub fn into_inner(self) -> T {
        self.mutex.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A flag telling worker threads to stop picking up new work.
#[derive(Default)]
pub struct StopFlag(CachePadded<AtomicBool>);

impl StopFlag {
    /// Raises the flag.
    pub fn raise(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Checks whether the flag has been raised.
    #[inline(always)]
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Object whose destructor runs the given function if the current thread is
/// unwinding, i.e. if the worker owning it panicked.
pub struct PanicNotifier<F: FnMut()> {
    on_panic: F,
}

impl<F: FnMut()> PanicNotifier<F> {
    /// Creates a notifier that will call `on_panic` if dropped during a panic.
    pub fn new(on_panic: F) -> Self {
        Self { on_panic }
    }
}

impl<F: FnMut()> Drop for PanicNotifier<F> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            (self.on_panic)();
        }
    }
}

//! Lock primitives.
//!
//! `keos::sync::SpinLock` is a non-RAII spinlock whose guard panics if
//! dropped without an explicit `.unlock()` call — a design forced by the
//! need to pair the lock with `InterruptGuard` on bare metal. Hosted on
//! `std`, there is no interrupt state to restore and no busy-wait to
//! avoid, so `SpinLock` here is a thin, ordinary RAII wrapper over
//! [`std::sync::Mutex`]; the name and `.lock()` call shape are kept so the
//! subsystem code below reads the same as the teacher's.
//!
//! `ConditionVariable` keeps the `wait_while(&mutex, predicate)` /
//! `signal(guard)` / `broadcast(guard)` shape from
//! `keos-project4::sync::condition_variable`, backed by
//! [`std::sync::Condvar`].

use std::sync::{Condvar, Mutex as StdMutex, MutexGuard as StdMutexGuard, PoisonError};

/// A mutual-exclusion lock protecting `T`.
///
/// Unlike the teacher's spinlock, a poisoned lock (a panic while the guard
/// was held) is recovered rather than propagated: kernel-subsystem code is
/// expected to keep the rest of the system consistent via its own
/// invariants, not via poison propagation designed for application code.
pub struct SpinLock<T: ?Sized> {
    inner: StdMutex<T>,
}

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> Self {
        SpinLock {
            inner: StdMutex::new(value),
        }
    }

    pub fn into_inner(self) -> T {
        self.inner
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: ?Sized> SpinLock<T> {
    /// Acquires the lock, blocking the current thread until it is free.
    pub fn lock(&self) -> StdMutexGuard<'_, T> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> Self {
        SpinLock::new(T::default())
    }
}

/// A condition variable paired with a [`SpinLock`], following
/// `keos-project4`'s check-and-sleep API: [`ConditionVariable::wait_while`]
/// folds the lock/check/block/recheck loop into one call.
#[derive(Default)]
pub struct ConditionVariable {
    inner: Condvar,
}

impl ConditionVariable {
    pub fn new() -> Self {
        ConditionVariable {
            inner: Condvar::new(),
        }
    }

    /// Blocks the current thread, releasing `lock`'s guard while parked,
    /// until `predicate` returns `false`. Returns the guard reacquired with
    /// the predicate holding `false`.
    pub fn wait_while<'a, T>(
        &self,
        lock: &'a SpinLock<T>,
        mut predicate: impl FnMut(&mut T) -> bool,
    ) -> StdMutexGuard<'a, T> {
        let guard = lock.lock();
        self.inner
            .wait_while(guard, |state| predicate(state))
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Wakes one thread parked in [`wait_while`](Self::wait_while).
    pub fn signal<T>(&self, _guard: &StdMutexGuard<'_, T>) {
        self.inner.notify_one();
    }

    /// Wakes every thread parked in [`wait_while`](Self::wait_while).
    pub fn broadcast<T>(&self, _guard: &StdMutexGuard<'_, T>) {
        self.inner.notify_all();
    }
}

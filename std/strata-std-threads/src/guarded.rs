//!
//! Mutex-Guarded Value
//!
//! A value that is only ever touched with its mutex held.
//!
//! - `with_lock` runs a closure inside the critical section
//! - `snapshot` copies the value out
//! - `same_value` compares two guarded values by copying each out
//! - `swap` exchanges two guarded values holding both locks, without
//!   deadlocking against a concurrent swap in the opposite direction
//!
//! ## Trust boundary
//!
//! The closure given to `with_lock` is caller code running with the lock held.
//! The borrow it receives cannot outlive the call in safe Rust, but a closure
//! that converts it to a raw pointer and stores it defeats the lock entirely.
//! That is a bug in the caller, and nothing here can detect it.
//!

use std::sync::{Mutex, MutexGuard, PoisonError};

pub struct Guarded<T> {
    value: Mutex<T>,
}

impl<T> Guarded<T> {
    pub fn new(value: T) -> Self {
        Self { value: Mutex::new(value) }
    }

    fn lock(&self) -> MutexGuard<'_, T> {
        self.value.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_lock<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&mut T) -> R,
    {
        let mut guard = self.lock();
        f(&mut *guard)
    }

    pub fn snapshot(&self) -> T
    where
        T: Clone,
    {
        self.lock().clone()
    }

    /// True when the two values compared equal.
    ///
    /// Each side is copied under its own lock and the locks are never held
    /// together, so the two copies may come from different instants: a
    /// `true` does not prove both values were ever equal at the same time.
    pub fn same_value(&self, other: &Guarded<T>) -> bool
    where
        T: Clone + PartialEq,
    {
        if std::ptr::eq(self, other) {
            return true;
        }
        let lhs = self.snapshot();
        let rhs = other.snapshot();
        lhs == rhs
    }

    /// Exchange contents with `other`, holding both locks.
    ///
    /// Locks are taken in address order, so `a.swap(&b)` on one thread and
    /// `b.swap(&a)` on another always contend for the same lock first.
    pub fn swap(&self, other: &Guarded<T>) {
        if std::ptr::eq(self, other) {
            return;
        }
        let self_first = (self as *const Self) < (other as *const Self);
        let (first, second) = if self_first { (self, other) } else { (other, self) };

        let mut a = first.lock();
        let mut b = second.lock();
        std::mem::swap(&mut *a, &mut *b);
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Default> Default for Guarded<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> std::fmt::Debug for Guarded<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Guarded").finish_non_exhaustive()
    }
}

//!
//! Concurrent LIFO Stack
//!
//! A stack whose only way to read the top is to remove it. Separate
//! "is empty", "peek" and "remove" calls race under concurrency: two threads
//! can peek the same element, or one can remove an element nobody read. Here
//! every pop looks at the top and takes it in one locked step.
//!
//! - `pop` / `pop_into` fail with `SyncError::EmptyCollection` on an empty stack
//! - `pop_with` builds the caller's result from the top *before* removing it;
//!   if the build fails, the element stays on the stack
//! - `is_empty` is a snapshot and must not be used to decide whether to pop
//!

use std::sync::{Mutex, MutexGuard, PoisonError};

use strata_std_core::{PopError, Result, SyncError, ToolkitConfig};

pub struct ConcurrentStack<T> {
    items: Mutex<Vec<T>>,
}

impl<T> ConcurrentStack<T> {
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::from_vec(Vec::with_capacity(capacity))
    }

    pub fn from_config(config: &ToolkitConfig) -> Self {
        Self::with_capacity(config.stack.initial_capacity)
    }

    fn from_vec(items: Vec<T>) -> Self {
        Self { items: Mutex::new(items) }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, value: T) -> Result<()> {
        let mut items = self.lock();
        Self::reserve(&mut items, 1)?;
        items.push(value);
        Ok(())
    }

    /// Make room for `additional` more values ahead of time. On failure the
    /// stack is unchanged.
    pub fn try_reserve(&self, additional: usize) -> Result<()> {
        Self::reserve(&mut self.lock(), additional)
    }

    fn reserve(items: &mut Vec<T>, additional: usize) -> Result<()> {
        items.try_reserve(additional).map_err(|e| {
            tracing::warn!(len = items.len(), additional, "concurrent stack could not reserve storage");
            SyncError::from(e)
        })
    }

    pub fn pop(&self) -> Result<T> {
        self.lock().pop().ok_or(SyncError::EmptyCollection)
    }

    /// Move the top into `out`. On an empty stack `out` and the stack are
    /// both left as they were.
    pub fn pop_into(&self, out: &mut T) -> Result<()> {
        *out = self.pop()?;
        Ok(())
    }

    /// Build a result from the top element, removing it only if the build
    /// succeeds.
    ///
    /// `build` runs while the stack is locked. It must not block on this
    /// stack and must not smuggle the reference out (the signature already
    /// prevents that for safe code).
    pub fn pop_with<R, E, F>(&self, build: F) -> std::result::Result<R, PopError<E>>
    where
        F: FnOnce(&T) -> std::result::Result<R, E>,
    {
        let mut items = self.lock();
        let Some(top) = items.last() else {
            return Err(PopError::Empty);
        };
        let result = build(top).map_err(PopError::Build)?;
        items.pop();
        Ok(result)
    }

    /// Snapshot only; the answer may be stale as soon as this returns.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn into_inner(self) -> Vec<T> {
        self.items.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Default for ConcurrentStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Clone for ConcurrentStack<T> {
    /// Deep copy taken with the source locked throughout.
    fn clone(&self) -> Self {
        let items = self.lock().clone();
        Self::from_vec(items)
    }
}

impl<T> From<Vec<T>> for ConcurrentStack<T> {
    fn from(items: Vec<T>) -> Self {
        Self::from_vec(items)
    }
}

impl<T> std::fmt::Debug for ConcurrentStack<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrentStack").field("len", &self.len()).finish()
    }
}

//!
//! Blocking FIFO Queue
//!
//! Hands values from producer threads to consumer threads. Consumers can poll
//! (`try_pop`) or sleep until a value arrives (`wait_and_pop`).
//!
//! - One mutex guards the storage, one condition variable signals arrivals
//! - `push` wakes exactly one sleeping consumer; a value satisfies one pop
//! - Sleeping consumers re-check for data after every wake, so spurious
//!   wakeups are harmless
//! - Values leave the queue by move; nothing hands out a reference into it
//!
//! Usage:
//! ```rust
//! use strata_std_threads::BlockingQueue;
//!
//! let queue = BlockingQueue::new();
//! queue.push(1).unwrap();
//! assert_eq!(queue.wait_and_pop(), 1);
//! assert_eq!(queue.try_pop(), None);
//! ```
//!

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use strata_std_core::{Result, SyncError, ToolkitConfig};

pub struct BlockingQueue<T> {
    items: Mutex<VecDeque<T>>,
    available: Condvar,
}

impl<T> BlockingQueue<T> {
    pub fn new() -> Self {
        Self::from_deque(VecDeque::new())
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::from_deque(VecDeque::with_capacity(capacity))
    }

    pub fn from_config(config: &ToolkitConfig) -> Self {
        Self::with_capacity(config.queue.initial_capacity)
    }

    fn from_deque(items: VecDeque<T>) -> Self {
        Self {
            items: Mutex::new(items),
            available: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a value and wake one waiting consumer.
    ///
    /// Storage is reserved before anything is touched, so on
    /// `SyncError::ResourceExhausted` the queue is exactly as it was.
    pub fn push(&self, value: T) -> Result<()> {
        let mut items = self.lock();
        Self::reserve(&mut items, 1)?;
        items.push_back(value);
        self.available.notify_one();
        Ok(())
    }

    /// Make room for `additional` more values ahead of time. On failure the
    /// queue is unchanged.
    pub fn try_reserve(&self, additional: usize) -> Result<()> {
        Self::reserve(&mut self.lock(), additional)
    }

    fn reserve(items: &mut VecDeque<T>, additional: usize) -> Result<()> {
        items.try_reserve(additional).map_err(|e| {
            tracing::warn!(len = items.len(), additional, "blocking queue could not reserve storage");
            SyncError::from(e)
        })
    }

    /// Move the front value into `out`. Returns false and leaves `out` alone
    /// when the queue is empty.
    pub fn try_pop_into(&self, out: &mut T) -> bool {
        match self.lock().pop_front() {
            Some(value) => {
                *out = value;
                true
            }
            None => false,
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Sleep until the queue has a value, then move the front into `out`.
    pub fn wait_and_pop_into(&self, out: &mut T) {
        *out = self.wait_and_pop();
    }

    /// Sleep until the queue has a value, then return the front.
    ///
    /// The value is removed and handed over while the lock is still held, so
    /// no other consumer can observe it in between.
    pub fn wait_and_pop(&self) -> T {
        let mut items = self.lock();
        loop {
            if let Some(value) = items.pop_front() {
                return value;
            }
            tracing::trace!("queue empty, waiting for a producer");
            items = self
                .available
                .wait(items)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Snapshot only; another thread may push or pop right after this returns.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Move the stored values into a brand-new queue, leaving this one empty.
    ///
    /// Only the storage travels; the new queue gets its own mutex and
    /// condition variable. Consumers sleeping on `self` keep sleeping on `self`.
    pub fn take(&self) -> Self {
        let items = std::mem::take(&mut *self.lock());
        Self::from_deque(items)
    }

    pub fn into_inner(self) -> VecDeque<T> {
        self.items.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Clone for BlockingQueue<T> {
    /// The source stays locked for the whole copy. The copy is not visible to
    /// any other thread yet, so it needs no locking of its own.
    fn clone(&self) -> Self {
        let items = self.lock().clone();
        Self::from_deque(items)
    }
}

impl<T> From<VecDeque<T>> for BlockingQueue<T> {
    fn from(items: VecDeque<T>) -> Self {
        Self::from_deque(items)
    }
}

impl<T> std::fmt::Debug for BlockingQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingQueue").field("len", &self.len()).finish()
    }
}

//!
//! Read-Mostly Shared Cache
//!
//! A keyed store for data that is read far more often than it changes (the
//! classic example is a DNS cache). Any number of readers run at once; a
//! writer runs alone.
//!
//! ## Fairness: writer preference
//!
//! A plain reader/writer lock may let a steady stream of readers keep a writer
//! waiting forever. `SharedCache` puts an admission gate in front of the lock:
//!
//! - a writer takes the gate, then waits for exclusive mode, then lets the gate go
//! - a reader passes through the gate before asking for shared mode
//!
//! So once a writer is queued, readers that arrive after it wait behind it.
//! Readers admitted before the writer finish normally and still run in
//! parallel with each other.
//!
//! ## Callbacks
//!
//! `read_with` runs the caller's closure while shared mode is held. The
//! closure sees a borrowed value it cannot keep, and it must not call back
//! into the same cache at all: `read`, `read_with`, `len`, `is_empty`,
//! `write` and `remove` can all deadlock from there. A nested write waits for
//! its own outer reader. A nested read waits on the admission gate, which a
//! queued writer holds while it waits for that same outer reader.
//!

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use strata_std_core::{Result, SyncError, ToolkitConfig};

pub struct SharedCache<K, V> {
    entries: RwLock<HashMap<K, V>>,
    gate: Mutex<()>,
    queued_writers: AtomicUsize,
}

impl<K: Eq + Hash, V> SharedCache<K, V> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::with_capacity(capacity)),
            gate: Mutex::new(()),
            queued_writers: AtomicUsize::new(0),
        }
    }

    pub fn from_config(config: &ToolkitConfig) -> Self {
        Self::with_capacity(config.cache.initial_capacity)
    }

    fn pass_gate(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn shared(&self) -> RwLockReadGuard<'_, HashMap<K, V>> {
        drop(self.pass_gate());
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn reserve(entries: &mut HashMap<K, V>, additional: usize) -> Result<()> {
        entries.try_reserve(additional).map_err(|e| {
            tracing::warn!(len = entries.len(), additional, "shared cache could not reserve storage");
            SyncError::from(e)
        })
    }

    fn exclusive(&self) -> RwLockWriteGuard<'_, HashMap<K, V>> {
        let gate = self.pass_gate();
        self.queued_writers.fetch_add(1, Ordering::SeqCst);
        tracing::trace!("writer holds admission gate, waiting for readers to drain");
        let entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        self.queued_writers.fetch_sub(1, Ordering::SeqCst);
        drop(gate);
        entries
    }

    /// Copy of the value for `key`, or `None` if it has never been written.
    pub fn read<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        self.shared().get(key).cloned()
    }

    /// Run `f` on the value for `key` without copying it out.
    ///
    /// `f` must not touch this cache; see the module docs.
    pub fn read_with<Q, R, F>(&self, key: &Q, f: F) -> R
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        F: FnOnce(Option<&V>) -> R,
    {
        let entries = self.shared();
        f(entries.get(key))
    }

    /// Insert or overwrite `key`, returning the value it replaced.
    ///
    /// Readers never see a half-applied write: the whole update happens in
    /// exclusive mode. If the map cannot grow, nothing changes and
    /// `SyncError::ResourceExhausted` is returned.
    pub fn write(&self, key: K, value: V) -> Result<Option<V>> {
        let mut entries = self.exclusive();
        if !entries.contains_key(&key) {
            Self::reserve(&mut entries, 1)?;
        }
        Ok(entries.insert(key, value))
    }

    /// Make room for `additional` more keys ahead of time. On failure the
    /// cache is unchanged.
    pub fn try_reserve(&self, additional: usize) -> Result<()> {
        Self::reserve(&mut self.exclusive(), additional)
    }

    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.exclusive().remove(key)
    }

    pub fn len(&self) -> usize {
        self.shared().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared().is_empty()
    }

    /// Writers currently holding the admission gate and waiting for readers
    /// to leave (0 or 1).
    pub fn queued_writers(&self) -> usize {
        self.queued_writers.load(Ordering::SeqCst)
    }
}

impl<K: Eq + Hash, V> Default for SharedCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> std::fmt::Debug for SharedCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedCache")
            .field("queued_writers", &self.queued_writers.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

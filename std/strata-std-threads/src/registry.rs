//!
//! Ranked Registry
//!
//! A named collection of independently lockable entries, owned by whoever
//! creates it and passed around by reference. Two ranked locks protect it:
//!
//! - the *directory* lock (default rank 10 000) guards the name -> entry map
//! - each *entry* lock (default rank 5 000) guards one value
//!
//! The directory rank is higher, so the only legal order is directory first,
//! entry second. Taking an entry lock and then asking for the directory is
//! reported as a hierarchy violation instead of deadlocking against a thread
//! doing the opposite.
//!
//! Usage:
//! ```rust
//! use strata_std_threads::Registry;
//!
//! let balances = Registry::new();
//! balances.insert("alejandro", 100).unwrap();
//! balances.update("alejandro", |b| *b += 100).unwrap();
//! assert_eq!(balances.get("alejandro").unwrap(), Some(200));
//! ```
//!

use std::collections::HashMap;
use std::sync::Arc;

use strata_std_core::{Rank, RankTable, Result, ToolkitConfig};

use crate::ranked::RankedLock;

type Directory<V> = HashMap<String, Arc<RankedLock<V>>>;

pub struct Registry<V> {
    directory: RankedLock<Directory<V>>,
    entry_rank: Rank,
}

impl<V> Registry<V> {
    pub fn new() -> Self {
        Self::build(RankTable::default())
    }

    pub fn with_ranks(ranks: RankTable) -> Result<Self> {
        ranks.validate()?;
        Ok(Self::build(ranks))
    }

    pub fn from_config(config: &ToolkitConfig) -> Result<Self> {
        Self::with_ranks(config.ranks)
    }

    fn build(ranks: RankTable) -> Self {
        Self {
            directory: RankedLock::new(ranks.directory, HashMap::new()),
            entry_rank: ranks.entry,
        }
    }

    pub fn directory_rank(&self) -> Rank {
        self.directory.rank()
    }

    pub fn entry_rank(&self) -> Rank {
        self.entry_rank
    }

    /// Add or replace an entry. Returns true when an existing entry was
    /// replaced; handles obtained earlier through `entry` keep the old value.
    pub fn insert(&self, name: impl Into<String>, value: V) -> Result<bool> {
        let mut directory = self.directory.lock()?;
        directory.try_reserve(1)?;
        let entry = Arc::new(RankedLock::new(self.entry_rank, value));
        Ok(directory.insert(name.into(), entry).is_some())
    }

    pub fn remove(&self, name: &str) -> Result<Option<Arc<RankedLock<V>>>> {
        Ok(self.directory.lock()?.remove(name))
    }

    /// Shared handle to one entry. Locking it later needs only the entry
    /// rank, so a thread can work on one entry without blocking the directory.
    pub fn entry(&self, name: &str) -> Result<Option<Arc<RankedLock<V>>>> {
        Ok(self.directory.lock()?.get(name).cloned())
    }

    /// Run `f` on the named entry with the directory and the entry both locked.
    /// Returns `Ok(None)` for an unknown name.
    ///
    /// `f` runs inside both critical sections. Touching this registry again
    /// from `f` is reported as a hierarchy violation.
    pub fn update<R, F>(&self, name: &str, f: F) -> Result<Option<R>>
    where
        F: FnOnce(&mut V) -> R,
    {
        let directory = self.directory.lock()?;
        let Some(entry) = directory.get(name) else {
            return Ok(None);
        };
        let mut value = entry.lock()?;
        Ok(Some(f(&mut *value)))
    }

    pub fn get(&self, name: &str) -> Result<Option<V>>
    where
        V: Clone,
    {
        self.update(name, |v| v.clone())
    }

    pub fn contains(&self, name: &str) -> Result<bool> {
        Ok(self.directory.lock()?.contains_key(name))
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.directory.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl<V> Default for Registry<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> std::fmt::Debug for Registry<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("directory_rank", &self.directory.rank())
            .field("entry_rank", &self.entry_rank)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use strata_std_core::SyncError;

    #[derive(Debug, Clone, PartialEq)]
    struct Account {
        owner: String,
        balance: i64,
    }

    fn account(owner: &str, balance: i64) -> Account {
        Account { owner: owner.to_string(), balance }
    }

    #[test]
    fn test_insert_get_update() {
        let registry = Registry::new();
        assert!(!registry.insert("alejandro", account("alejandro", 100)).unwrap());
        registry.insert("andromeda", account("andromeda", 10)).unwrap();

        let new_balance = registry.update("andromeda", |a| {
            a.balance += 8;
            a.balance
        }).unwrap();
        assert_eq!(new_balance, Some(18));
        assert_eq!(registry.get("alejandro").unwrap(), Some(account("alejandro", 100)));
        assert_eq!(registry.len().unwrap(), 2);
        assert!(registry.contains("andromeda").unwrap());
    }

    #[test]
    fn test_unknown_name_is_none() {
        let registry: Registry<u32> = Registry::new();
        assert_eq!(registry.update("ghost", |v| *v).unwrap(), None);
        assert!(registry.is_empty().unwrap());
    }

    #[test]
    fn test_insert_replaces_entry() {
        let registry = Registry::new();
        assert!(!registry.insert("k", 1).unwrap());
        let old = registry.entry("k").unwrap().unwrap();

        assert!(registry.insert("k", 2).unwrap());
        assert_eq!(registry.get("k").unwrap(), Some(2));
        assert_eq!(*old.lock().unwrap(), 1);

        let removed = registry.remove("k").unwrap().unwrap();
        assert_eq!(removed.rank(), registry.entry_rank());
        assert!(!registry.contains("k").unwrap());
    }

    #[test]
    fn test_entry_handle_locks_without_directory() {
        let registry = Registry::new();
        registry.insert("counter", 0u32).unwrap();
        let counter = registry.entry("counter").unwrap().unwrap();

        let mut value = counter.lock().unwrap();
        *value += 1;
        // Directory rank is above the held entry rank: taking it now is out of order.
        assert!(registry.len().unwrap_err().is_hierarchy_violation());
        value.unlock().unwrap();

        assert_eq!(registry.get("counter").unwrap(), Some(1));
        assert!(registry.entry("missing").unwrap().is_none());
    }

    #[test]
    fn test_registry_while_holding_inner_lock_is_violation() {
        let registry = Registry::new();
        registry.insert("k", 0).unwrap();

        let inner = RankedLock::new(1, ());
        let guard = inner.lock().unwrap();
        assert!(registry.update("k", |v| *v += 1).unwrap_err().is_hierarchy_violation());
        guard.unlock().unwrap();

        assert_eq!(registry.get("k").unwrap(), Some(0));
    }

    #[test]
    fn test_nested_registry_access_from_callback_is_violation() {
        let registry = Registry::new();
        registry.insert("k", 0).unwrap();

        let nested = registry.update("k", |_| registry.len()).unwrap();
        assert!(matches!(nested, Some(Err(SyncError::HierarchyViolation { .. }))));
    }

    #[test]
    fn test_custom_ranks_validated() {
        let err = Registry::<u8>::with_ranks(RankTable { directory: 1, entry: 2 }).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));

        let registry = Registry::<u8>::with_ranks(RankTable { directory: 50, entry: 40 }).unwrap();
        assert_eq!(registry.directory_rank(), 50);
        assert_eq!(registry.entry_rank(), 40);
    }

    #[test]
    fn test_concurrent_updates() {
        let registry = Registry::new();
        registry.insert("alejandro", 100i64).unwrap();
        registry.insert("andromeda", 10i64).unwrap();

        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..250 {
                        registry.update("alejandro", |b| *b += 1).unwrap();
                        registry.update("andromeda", |b| *b -= 1).unwrap();
                    }
                });
            }
        });

        assert_eq!(registry.get("alejandro").unwrap(), Some(1100));
        assert_eq!(registry.get("andromeda").unwrap(), Some(-990));
    }
}

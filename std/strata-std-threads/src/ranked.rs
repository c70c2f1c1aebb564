//!
//! Ranked (Hierarchical) Mutex
//!
//! Every `RankedLock` carries an immutable rank. A thread may only acquire a
//! lock whose rank is strictly below the rank of the last lock it still holds
//! (its *ceiling*), and must release locks in exactly the reverse order. A
//! program whose locks are all ranked and which obeys this rule cannot form a
//! circular wait, so it cannot deadlock on these locks.
//!
//! Breaking the rule is reported immediately as `SyncError::HierarchyViolation`
//! instead of hanging some time later. A violation is a bug in the caller's
//! locking discipline; propagate it, never retry.
//!
//! Usage:
//! ```rust
//! use strata_std_threads::RankedLock;
//!
//! let accounts = RankedLock::new(10_000, vec![100]);
//! let audit = RankedLock::new(5_000, 0u32);
//!
//! let a = accounts.lock().unwrap();
//! let mut b = audit.lock().unwrap();
//! *b += a.len() as u32;
//! assert!(accounts.lock().is_err());
//! b.unlock().unwrap();
//! a.unlock().unwrap();
//! ```
//!
//! ## Ceiling bookkeeping
//!
//! The ceiling lives in a thread-local cell, starting at `Rank::MAX` ("nothing
//! held"). Each guard remembers the ceiling it displaced and puts it back on
//! release. Guards are `!Send`, so a ceiling is never restored on the wrong
//! thread.
//!
//! ## Dropping out of order
//!
//! `Drop` cannot return an error, so a guard dropped out of order panics
//! (after logging the violation). Use `RankedGuard::unlock` to get the
//! violation back as a value together with the still-held guard.
//!
//! Like a rejected `unlock`, a rejected drop releases nothing: the mutex stays
//! locked for good and the ceiling keeps naming a lock this thread holds. A
//! thread that survives the panic therefore sees a consistent ceiling, and
//! other threads waiting on that lock stay blocked.
//!

use std::cell::Cell;
use std::fmt;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};

use strata_std_core::{LockOperation, Rank, Result, SyncError};

thread_local! {
    static CEILING: Cell<Rank> = const { Cell::new(Rank::MAX) };
}

/// Rank of the most recently acquired, still-held ranked lock on this thread,
/// or `Rank::MAX` when none is held.
pub fn current_ceiling() -> Rank {
    CEILING.with(|c| c.get())
}

fn set_ceiling(rank: Rank) {
    CEILING.with(|c| c.set(rank));
}

fn violation(operation: LockOperation, rank: Rank, ceiling: Rank) -> SyncError {
    let err = SyncError::HierarchyViolation { operation, rank, ceiling };
    tracing::error!(%operation, rank, ceiling, "lock hierarchy violated");
    err
}

pub struct RankedLock<T> {
    rank: Rank,
    inner: Mutex<T>,
}

impl<T> RankedLock<T> {
    /// A lock ranked `Rank::MAX` can never be acquired: that value is the
    /// "nothing held" ceiling.
    pub fn new(rank: Rank, value: T) -> Self {
        Self {
            rank,
            inner: Mutex::new(value),
        }
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    fn check_acquire(&self) -> Result<Rank> {
        let ceiling = current_ceiling();
        if ceiling <= self.rank {
            return Err(violation(LockOperation::Acquire, self.rank, ceiling));
        }
        Ok(ceiling)
    }

    fn admit<'a>(&'a self, guard: MutexGuard<'a, T>, previous: Rank) -> RankedGuard<'a, T> {
        set_ceiling(self.rank);
        RankedGuard {
            lock: self,
            guard: ManuallyDrop::new(guard),
            previous,
        }
    }

    /// Block until the lock is held.
    ///
    /// Fails without blocking when this thread already holds a lock of equal
    /// or lower rank.
    pub fn lock(&self) -> Result<RankedGuard<'_, T>> {
        let previous = self.check_acquire()?;
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.admit(guard, previous))
    }

    /// Same ordering rule as `lock`, then a single non-blocking attempt.
    /// `Ok(None)` means another thread holds the lock; the ceiling is untouched.
    pub fn try_lock(&self) -> Result<Option<RankedGuard<'_, T>>> {
        let previous = self.check_acquire()?;
        let guard = match self.inner.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return Ok(None),
        };
        Ok(Some(self.admit(guard, previous)))
    }

    /// Exclusive borrow means no other thread can hold the lock, so no
    /// ordering check applies.
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> fmt::Debug for RankedLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RankedLock").field("rank", &self.rank).finish_non_exhaustive()
    }
}

#[must_use = "dropping the guard releases the lock immediately"]
pub struct RankedGuard<'a, T> {
    lock: &'a RankedLock<T>,
    // Released only when the drop is in order.
    guard: ManuallyDrop<MutexGuard<'a, T>>,
    previous: Rank,
}

impl<'a, T> RankedGuard<'a, T> {
    pub fn rank(&self) -> Rank {
        self.lock.rank
    }

    /// Release the lock, checking that it is the most recently acquired one.
    ///
    /// On a violation nothing is released: the error hands the guard back so
    /// the caller can release the inner locks first.
    pub fn unlock(self) -> std::result::Result<(), UnlockError<'a, T>> {
        let ceiling = current_ceiling();
        if ceiling != self.lock.rank {
            let violation = violation(LockOperation::Release, self.lock.rank, ceiling);
            return Err(UnlockError { violation, guard: self });
        }
        drop(self);
        Ok(())
    }
}

impl<T> Deref for RankedGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &**self.guard
    }
}

impl<T> DerefMut for RankedGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut **self.guard
    }
}

impl<T> Drop for RankedGuard<'_, T> {
    fn drop(&mut self) {
        let ceiling = current_ceiling();
        if ceiling != self.lock.rank {
            let err = violation(LockOperation::Release, self.lock.rank, ceiling);
            if !std::thread::panicking() {
                panic!("{}", err);
            }
            return;
        }
        // SAFETY: `guard` is never touched again after this point.
        unsafe { ManuallyDrop::drop(&mut self.guard) };
        set_ceiling(self.previous);
    }
}

impl<T> fmt::Debug for RankedGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RankedGuard")
            .field("rank", &self.lock.rank)
            .field("previous", &self.previous)
            .finish_non_exhaustive()
    }
}

/// An out-of-order `unlock`. The lock is still held by `guard`.
pub struct UnlockError<'a, T> {
    violation: SyncError,
    guard: RankedGuard<'a, T>,
}

impl<'a, T> UnlockError<'a, T> {
    pub fn violation(&self) -> &SyncError {
        &self.violation
    }

    pub fn into_guard(self) -> RankedGuard<'a, T> {
        self.guard
    }
}

impl<T> fmt::Debug for UnlockError<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnlockError")
            .field("violation", &self.violation)
            .field("guard", &self.guard)
            .finish()
    }
}

impl<T> fmt::Display for UnlockError<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.violation, f)
    }
}

impl<T> std::error::Error for UnlockError<'_, T> {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// Associated with a lock but not holding it.
    Unlocked,
    /// Holding a lock it acquired itself.
    Locked,
    /// Holding a lock that was already acquired when the handle took it over.
    Adopted,
}

/// A movable lock handle that may or may not currently hold its lock.
///
/// Whatever state the handle is in when it goes out of scope, a held lock is
/// released exactly once. Returning a handle from a function transfers lock
/// ownership to the caller.
pub struct RankedHandle<'a, T> {
    lock: &'a RankedLock<T>,
    guard: Option<RankedGuard<'a, T>>,
    state: HandleState,
}

impl<'a, T> RankedHandle<'a, T> {
    /// Associate without locking.
    pub fn deferred(lock: &'a RankedLock<T>) -> Self {
        Self {
            lock,
            guard: None,
            state: HandleState::Unlocked,
        }
    }

    /// Lock immediately.
    pub fn acquire(lock: &'a RankedLock<T>) -> Result<Self> {
        let guard = lock.lock()?;
        Ok(Self {
            lock,
            guard: Some(guard),
            state: HandleState::Locked,
        })
    }

    /// Take over a lock this thread already holds.
    pub fn adopt(guard: RankedGuard<'a, T>) -> Self {
        Self {
            lock: guard.lock,
            guard: Some(guard),
            state: HandleState::Adopted,
        }
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    pub fn is_locked(&self) -> bool {
        self.guard.is_some()
    }

    pub fn rank(&self) -> Rank {
        self.lock.rank
    }

    /// Locking a handle that already holds its lock is itself a hierarchy
    /// violation, since the ceiling is at or below this rank.
    pub fn lock(&mut self) -> Result<()> {
        let guard = self.lock.lock()?;
        self.guard = Some(guard);
        self.state = HandleState::Locked;
        Ok(())
    }

    pub fn try_lock(&mut self) -> Result<bool> {
        match self.lock.try_lock()? {
            Some(guard) => {
                self.guard = Some(guard);
                self.state = HandleState::Locked;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Release if held. Out of order releases keep the lock held and report
    /// the violation.
    pub fn unlock(&mut self) -> Result<()> {
        let Some(guard) = self.guard.take() else {
            return Ok(());
        };
        match guard.unlock() {
            Ok(()) => {
                self.state = HandleState::Unlocked;
                Ok(())
            }
            Err(err) => {
                let UnlockError { violation, guard } = err;
                self.guard = Some(guard);
                Err(violation)
            }
        }
    }

    pub fn get(&self) -> Option<&T> {
        self.guard.as_deref()
    }

    pub fn get_mut(&mut self) -> Option<&mut T> {
        self.guard.as_deref_mut()
    }

    /// Detach the held guard (if any) from the handle.
    pub fn into_guard(self) -> Option<RankedGuard<'a, T>> {
        self.guard
    }
}

impl<T> fmt::Debug for RankedHandle<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RankedHandle")
            .field("rank", &self.lock.rank)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_ceiling_starts_unbounded() {
        thread::spawn(|| assert_eq!(current_ceiling(), Rank::MAX)).join().unwrap();
    }

    #[test]
    fn test_decreasing_ranks_succeed() {
        let high = RankedLock::new(10_000, 1);
        let mid = RankedLock::new(7_500, 2);
        let low = RankedLock::new(5_000, 3);

        let h = high.lock().unwrap();
        assert_eq!(current_ceiling(), 10_000);
        let m = mid.lock().unwrap();
        let l = low.lock().unwrap();
        assert_eq!(current_ceiling(), 5_000);
        assert_eq!(*h + *m + *l, 6);

        l.unlock().unwrap();
        assert_eq!(current_ceiling(), 7_500);
        m.unlock().unwrap();
        h.unlock().unwrap();
        assert_eq!(current_ceiling(), Rank::MAX);
    }

    #[test]
    fn test_equal_or_higher_rank_rejected() {
        let low = RankedLock::new(5, ());
        let same = RankedLock::new(5, ());
        let high = RankedLock::new(10, ());

        let guard = low.lock().unwrap();
        let err = same.lock().unwrap_err();
        assert!(matches!(
            err,
            SyncError::HierarchyViolation { operation: LockOperation::Acquire, rank: 5, ceiling: 5 }
        ));
        assert!(high.lock().unwrap_err().is_hierarchy_violation());
        assert!(high.try_lock().unwrap_err().is_hierarchy_violation());
        assert_eq!(current_ceiling(), 5);
        guard.unlock().unwrap();

        let guard = high.lock().unwrap();
        guard.unlock().unwrap();
    }

    #[test]
    fn test_relock_same_lock_is_violation() {
        let lock = RankedLock::new(3, 0);
        let guard = lock.lock().unwrap();
        assert!(lock.lock().unwrap_err().is_hierarchy_violation());
        drop(guard);
    }

    #[test]
    fn test_out_of_order_unlock_returns_guard() {
        let outer = RankedLock::new(10, "outer");
        let inner = RankedLock::new(5, "inner");

        let a = outer.lock().unwrap();
        let b = inner.lock().unwrap();

        let err = a.unlock().unwrap_err();
        assert!(matches!(
            err.violation(),
            SyncError::HierarchyViolation { operation: LockOperation::Release, rank: 10, ceiling: 5 }
        ));
        assert!(err.to_string().contains("cannot release"));

        b.unlock().unwrap();
        let a = err.into_guard();
        assert_eq!(*a, "outer");
        a.unlock().unwrap();
        assert_eq!(current_ceiling(), Rank::MAX);
    }

    #[test]
    #[should_panic(expected = "Lock hierarchy violated")]
    fn test_out_of_order_drop_panics() {
        let outer = RankedLock::new(10, ());
        let inner = RankedLock::new(5, ());

        let a = outer.lock().unwrap();
        let _b = inner.lock().unwrap();
        drop(a);
    }

    #[test]
    fn test_caught_out_of_order_drop_keeps_lock_held() {
        let outer = Arc::new(RankedLock::new(10, ()));
        let inner = RankedLock::new(5, ());

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let a = outer.lock().unwrap();
            let _b = inner.lock().unwrap();
            drop(a);
        }));
        assert!(result.is_err());

        // `inner` was released in order during the unwind; `outer` never was.
        assert_eq!(current_ceiling(), 10);
        assert!(outer.lock().unwrap_err().is_hierarchy_violation());
        let other = Arc::clone(&outer);
        thread::spawn(move || assert!(other.try_lock().unwrap().is_none())).join().unwrap();

        let again = inner.lock().unwrap();
        assert_eq!(current_ceiling(), 5);
        again.unlock().unwrap();
        assert_eq!(current_ceiling(), 10);
    }

    #[test]
    fn test_try_lock_busy_leaves_ceiling() {
        let lock = Arc::new(RankedLock::new(50, 0));
        let held = lock.lock().unwrap();

        let other = Arc::clone(&lock);
        thread::spawn(move || {
            assert!(other.try_lock().unwrap().is_none());
            assert_eq!(current_ceiling(), Rank::MAX);
        }).join().unwrap();

        held.unlock().unwrap();

        let mut guard = lock.try_lock().unwrap().expect("lock should be free");
        *guard += 1;
        assert_eq!(current_ceiling(), 50);
        guard.unlock().unwrap();
        assert_eq!(lock.lock().map(|g| *g).unwrap(), 1);
    }

    #[test]
    fn test_ceilings_are_per_thread() {
        let lock = Arc::new(RankedLock::new(100, 0u64));

        let handles: Vec<_> = (0..8).map(|_| {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                for _ in 0..100 {
                    let mut g = lock.lock().unwrap();
                    *g += 1;
                    g.unlock().unwrap();
                }
                current_ceiling()
            })
        }).collect();

        for h in handles {
            assert_eq!(h.join().unwrap(), Rank::MAX);
        }
        assert_eq!(Arc::try_unwrap(lock).unwrap().into_inner(), 800);
    }

    #[test]
    fn test_handle_deferred_then_locked() {
        let lock = RankedLock::new(20, vec![1, 2]);
        let mut handle = RankedHandle::deferred(&lock);
        assert_eq!(handle.state(), HandleState::Unlocked);
        assert!(handle.get().is_none());
        assert_eq!(current_ceiling(), Rank::MAX);

        handle.lock().unwrap();
        assert_eq!(handle.state(), HandleState::Locked);
        handle.get_mut().unwrap().push(3);
        assert!(handle.lock().unwrap_err().is_hierarchy_violation());

        handle.unlock().unwrap();
        assert!(!handle.is_locked());
        handle.unlock().unwrap();

        assert!(handle.try_lock().unwrap());
        assert_eq!(handle.get(), Some(&vec![1, 2, 3]));
    }

    #[test]
    fn test_handle_adopt_releases_on_drop() {
        let lock = RankedLock::new(8, 0);
        {
            let guard = lock.lock().unwrap();
            let handle = RankedHandle::adopt(guard);
            assert_eq!(handle.state(), HandleState::Adopted);
            assert_eq!(current_ceiling(), 8);
        }
        assert_eq!(current_ceiling(), Rank::MAX);
        assert!(lock.try_lock().unwrap().is_some());
    }

    #[test]
    fn test_handle_out_of_order_unlock_keeps_lock() {
        let outer = RankedLock::new(10, ());
        let inner = RankedLock::new(5, ());

        let mut a = RankedHandle::acquire(&outer).unwrap();
        let mut b = RankedHandle::acquire(&inner).unwrap();

        assert!(a.unlock().unwrap_err().is_hierarchy_violation());
        assert!(a.is_locked());

        b.unlock().unwrap();
        a.unlock().unwrap();
        assert_eq!(current_ceiling(), Rank::MAX);
    }

    fn prepare_and_hand_over<'a>(lock: &'a RankedLock<Vec<&'static str>>) -> RankedHandle<'a, Vec<&'static str>> {
        let mut handle = RankedHandle::acquire(lock).unwrap();
        handle.get_mut().unwrap().push("prepared");
        handle
    }

    #[test]
    fn test_handle_transfers_ownership_to_caller() {
        let lock = RankedLock::new(30, Vec::new());
        let mut handle = prepare_and_hand_over(&lock);
        assert!(handle.is_locked());
        assert_eq!(current_ceiling(), 30);

        handle.get_mut().unwrap().push("processed");
        let guard = handle.into_guard().unwrap();
        assert_eq!(*guard, vec!["prepared", "processed"]);
        guard.unlock().unwrap();
    }
}

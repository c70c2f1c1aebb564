//!
//! strata-std-threads - Thread-Safety Primitives
//!
//! Building blocks for sharing data between application threads. None of them
//! spawns threads of its own; callers bring their own `std::thread`s.
//!
//! ## Queue and Stack
//!
//! - `BlockingQueue<T>` - FIFO hand-off; `wait_and_pop` sleeps until data arrives
//! - `ConcurrentStack<T>` - LIFO; every pop observes and removes the top in one step
//!
//! ## Locks
//!
//! - `RankedLock<T>` - mutex with a rank; out-of-order acquisition is an error,
//!   not a deadlock
//! - `RankedHandle` - deferred / locked / adopted handle over a ranked lock
//! - `Guarded<T>` - plain mutex-protected value with deadlock-free `swap`
//!
//! ## Keyed Stores
//!
//! - `SharedCache<K, V>` - read-mostly map, concurrent readers, writer preference
//! - `Registry<V>` - directory + per-entry ranked locks at fixed ranks
//!
//! ## Protected state never escapes
//!
//! Values come out as copies or owned hand-offs. Callback APIs (`with_lock`,
//! `read_with`, `pop_with`, `Registry::update`) run inside the critical
//! section; the closure must not stash what it is given.
//!

pub mod cache;
pub mod guarded;
pub mod queue;
pub mod ranked;
pub mod registry;
pub mod stack;

pub use cache::*;
pub use guarded::*;
pub use queue::*;
pub use ranked::*;
pub use registry::*;
pub use stack::*;

pub use strata_std_core::{LockOperation, PopError, Rank, RankTable, Result, SyncError, ToolkitConfig};

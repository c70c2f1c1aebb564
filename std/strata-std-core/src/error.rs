///
/// Error types shared by every strata primitive.
///
/// Three very different conditions are kept apart on purpose:
/// - `EmptyCollection` - a mandatory pop found nothing (recoverable)
/// - `ResourceExhausted` - storage could not be reserved (recoverable, state unchanged)
/// - `HierarchyViolation` - a ranked lock was taken or released out of order
///   (a defect in the caller's locking discipline; never retried)
///
/// A missing key is not an error anywhere in strata; lookups return `Option`.
///

use std::collections::TryReserveError;
use std::fmt;
use thiserror::Error;

use crate::config::Rank;

/// Which half of a ranked lock's protocol detected the violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOperation {
    Acquire,
    Release,
}

impl fmt::Display for LockOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockOperation::Acquire => f.write_str("acquire"),
            LockOperation::Release => f.write_str("release"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Pop attempted on an empty collection")]
    EmptyCollection,

    #[error(
        "Lock hierarchy violated: cannot {operation} lock of rank {rank} while thread ceiling is {}",
        format_rank(*ceiling)
    )]
    HierarchyViolation {
        operation: LockOperation,
        rank: Rank,
        ceiling: Rank,
    },

    #[error("Storage exhausted: {0}")]
    ResourceExhausted(#[from] TryReserveError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl SyncError {
    pub fn is_hierarchy_violation(&self) -> bool {
        matches!(self, SyncError::HierarchyViolation { .. })
    }
}

/// Failure of a construct-before-remove pop: either nothing to pop, or the
/// caller's builder refused the element (which then stays where it was).
#[derive(Debug, Error)]
pub enum PopError<E> {
    #[error("Pop attempted on an empty collection")]
    Empty,

    #[error("Failed to build pop result: {0}")]
    Build(E),
}

pub type Result<T> = std::result::Result<T, SyncError>;

fn format_rank(rank: Rank) -> String {
    if rank == Rank::MAX {
        "unbounded".to_string()
    } else {
        rank.to_string()
    }
}

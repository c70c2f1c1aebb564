///
/// # Toolkit Configuration
///
/// Optional tuning for the strata primitives, loadable from TOML. Every section
/// and every field may be omitted; missing values fall back to the defaults below.
///
/// ## Example strata.toml
///
/// ```toml
/// [queue]
/// initial_capacity = 64
///
/// [stack]
/// initial_capacity = 64
///
/// [cache]
/// initial_capacity = 128
///
/// [ranks]
/// directory = 10000
/// entry = 5000
/// ```
///
/// ## Ranks
///
/// The `[ranks]` table fixes the two lock ranks a registry uses. A thread must
/// always take the directory lock before an entry lock, so the directory rank
/// has to be strictly greater. `Rank::MAX` is reserved as the "nothing held"
/// ceiling and can never be acquired, so it is rejected as well.
///

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, SyncError};

/// Position of a lock in the global acquisition order. Smaller ranks are inner
/// (more specific) resources and must be taken after larger ones.
pub type Rank = u64;

pub const DEFAULT_DIRECTORY_RANK: Rank = 10_000;
pub const DEFAULT_ENTRY_RANK: Rank = 5_000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ToolkitConfig {
    #[serde(default)]
    pub queue: CapacityConfig,
    #[serde(default)]
    pub stack: CapacityConfig,
    #[serde(default)]
    pub cache: CapacityConfig,
    #[serde(default)]
    pub ranks: RankTable,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct CapacityConfig {
    #[serde(default)]
    pub initial_capacity: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct RankTable {
    #[serde(default = "default_directory_rank")]
    pub directory: Rank,
    #[serde(default = "default_entry_rank")]
    pub entry: Rank,
}

fn default_directory_rank() -> Rank {
    DEFAULT_DIRECTORY_RANK
}

fn default_entry_rank() -> Rank {
    DEFAULT_ENTRY_RANK
}

impl Default for RankTable {
    fn default() -> Self {
        Self {
            directory: DEFAULT_DIRECTORY_RANK,
            entry: DEFAULT_ENTRY_RANK,
        }
    }
}

impl RankTable {
    pub fn validate(&self) -> Result<()> {
        if self.directory == Rank::MAX || self.entry == Rank::MAX {
            return Err(SyncError::Config(format!(
                "rank {} is reserved for the empty ceiling",
                Rank::MAX
            )));
        }
        if self.directory <= self.entry {
            return Err(SyncError::Config(format!(
                "directory rank {} must be greater than entry rank {}",
                self.directory, self.entry
            )));
        }
        Ok(())
    }
}

impl ToolkitConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ToolkitConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), ?config, "loaded toolkit configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.ranks.validate()
    }
}

//! Store and sync configuration.
//!
//! # Responsibility
//! - Describe where the cache database lives and how it is opened.
//! - Hold orchestrator tunables (search page size, executor naming).
//!
//! # Invariants
//! - `Default` values are usable as-is for an in-memory cache.
//! - `search_page_size` is always at least 1 once normalized.

use std::path::PathBuf;
use std::time::Duration;

/// Default number of accounts requested per search call.
///
/// Five keeps an unauthenticated client below the remote rate limit when
/// every result is enriched with two follow-up requests.
pub const DEFAULT_SEARCH_PAGE_SIZE: u32 = 5;
const SEARCH_PAGE_SIZE_MAX: u32 = 100;
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Backing location for the persistent store.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StoreLocation {
    /// Private in-memory database, dropped with the store.
    #[default]
    InMemory,
    /// SQLite database file, created on first open.
    File(PathBuf),
}

/// Persistent store configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub location: StoreLocation,
    /// SQLite busy timeout applied to the shared connection.
    pub busy_timeout: Duration,
    /// Thread name prefix for the main and write executors.
    pub executor_prefix: String,
}

impl StoreConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            location: StoreLocation::File(path.into()),
            ..Self::default()
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            location: StoreLocation::InMemory,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            executor_prefix: "repocache".to_string(),
        }
    }
}

/// Orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub search_page_size: u32,
    /// Relationship key paths the orchestrator's live query watches.
    pub watched_key_paths: Vec<String>,
    /// Thread name for the remote fetch executor.
    pub fetch_executor_name: String,
}

impl SyncConfig {
    /// Returns the page size clamped into `1..=100`.
    pub fn normalized_page_size(&self) -> u32 {
        self.search_page_size.clamp(1, SEARCH_PAGE_SIZE_MAX)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            search_page_size: DEFAULT_SEARCH_PAGE_SIZE,
            watched_key_paths: vec!["repos.repository_name".to_string()],
            fetch_executor_name: "repocache.fetch".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{StoreConfig, StoreLocation, SyncConfig};

    #[test]
    fn defaults_are_in_memory_with_five_results() {
        assert_eq!(StoreConfig::default().location, StoreLocation::InMemory);
        assert_eq!(SyncConfig::default().normalized_page_size(), 5);
    }

    #[test]
    fn page_size_is_clamped() {
        let config = SyncConfig {
            search_page_size: 0,
            ..SyncConfig::default()
        };
        assert_eq!(config.normalized_page_size(), 1);

        let config = SyncConfig {
            search_page_size: 1_000,
            ..SyncConfig::default()
        };
        assert_eq!(config.normalized_page_size(), 100);
    }
}

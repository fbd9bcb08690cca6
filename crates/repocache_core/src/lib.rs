//! Core of the repocache read-through cache.
//! This crate is the single source of truth for cache invariants: task
//! composition, the SQLite-backed store, upserts and live queries.

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod model;
pub mod remote;
pub mod repo;
pub mod service;
pub mod store;
pub mod task;

pub use config::{StoreConfig, StoreLocation, SyncConfig, DEFAULT_SEARCH_PAGE_SIZE};
pub use error::{FetchError, SyncError};
pub use logging::{
    default_log_level, init_logging, init_logging_with, logging_status, LoggingConfig,
    LoggingError,
};
pub use model::record::{Owner, OwnerId, Repo, Scalar, UserDetails};
pub use remote::{Completion, RemoteSource, SearchRequest};
pub use service::storage_service::{
    upsert_owner, upsert_owners, upsert_repos_replace_all, StorageService,
};
pub use service::sync_service::{SyncReport, SyncService};
pub use store::{
    CompareOp, FetchRequest, LiveQuery, Predicate, SaveSummary, SortDescriptor, Store,
    StoreError, StoreResult, ViewStorage, WriteContext, WriteStorage,
};
pub use task::executor::{ConcurrentExecutor, Executor, SerialExecutor};
pub use task::{Controller, Task, TaskResult};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}

//! Remote fetch collaborator contract.
//!
//! # Responsibility
//! - Describe the three logical requests the orchestrator issues.
//! - Keep transport, URL building and payload decoding outside the core.
//!
//! # Invariants
//! - Every request calls its completion exactly once, on any thread.
//! - Failures are `SyncError` values (network, decode or server status).

use crate::config::DEFAULT_SEARCH_PAGE_SIZE;
use crate::error::SyncError;
use crate::model::record::{Owner, Repo, UserDetails};

/// Completion invoked with a decoded payload or a typed failure.
pub type Completion<T> = Box<dyn FnOnce(Result<T, SyncError>) + Send + 'static>;

/// Account search request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub term: String,
    pub per_page: u32,
}

impl SearchRequest {
    pub fn new(term: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            per_page: DEFAULT_SEARCH_PAGE_SIZE,
        }
    }

    pub fn with_per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page;
        self
    }
}

/// Remote source of owners, owner details and owned repos.
pub trait RemoteSource: Send + Sync {
    /// Owners matching `request.term`, carrying identity and login only.
    fn search_users(&self, request: SearchRequest, completion: Completion<Vec<Owner>>);
    fn user_details(&self, account_name: &str, completion: Completion<UserDetails>);
    /// Repos owned by `account_name`, in display order.
    fn user_repos(&self, account_name: &str, completion: Completion<Vec<Repo>>);
}

//! Failure taxonomy for fetch, task and sync flows.
//!
//! # Responsibility
//! - Classify remote failures (network, decode, server status).
//! - Wrap the first failure surfaced by a task group.
//! - Carry persistence failures as recoverable values.
//!
//! # Invariants
//! - Errors are returned through completion callbacks, never panicked
//!   across executor boundaries.
//! - An aggregate never wraps another aggregate.

use crate::store::StoreError;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Network-class failure reported by the remote collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    ConnectionLost,
    Timeout,
    Cancelled,
    Unknown,
    Other(String),
}

impl Display for FetchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionLost => write!(f, "network connection lost"),
            Self::Timeout => write!(f, "timeout"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Unknown => write!(f, "unknown"),
            Self::Other(message) => write!(f, "{message}"),
        }
    }
}

impl Error for FetchError {}

/// Failure propagated through tasks, combinators and the orchestrator.
#[derive(Debug)]
pub enum SyncError {
    Fetch(FetchError),
    Decode(String),
    Server { status_code: u16 },
    /// First failure observed by a `group`.
    Aggregate(Box<SyncError>),
    Persistence(StoreError),
}

impl SyncError {
    /// Wraps `error` as a group failure unless it already is one.
    pub fn aggregate(error: SyncError) -> Self {
        match error {
            Self::Aggregate(_) => error,
            other => Self::Aggregate(Box::new(other)),
        }
    }

    /// Returns the innermost non-aggregate failure.
    pub fn root_cause(&self) -> &SyncError {
        match self {
            Self::Aggregate(inner) => inner.root_cause(),
            other => other,
        }
    }
}

impl Display for SyncError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fetch(err) => write!(f, "network error: {err}"),
            Self::Decode(message) => write!(f, "parsing error: {message}"),
            Self::Server { status_code: 403 } => write!(
                f,
                "server error 403; unauthenticated requests are rate limited to 60 per hour"
            ),
            Self::Server { status_code } => write!(f, "server error {status_code}"),
            Self::Aggregate(inner) => write!(f, "{inner}"),
            Self::Persistence(err) => write!(f, "persistence error: {err}"),
        }
    }
}

impl Error for SyncError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Fetch(err) => Some(err),
            Self::Decode(_) => None,
            Self::Server { .. } => None,
            Self::Aggregate(inner) => Some(inner.as_ref()),
            Self::Persistence(err) => Some(err),
        }
    }
}

impl From<FetchError> for SyncError {
    fn from(value: FetchError) -> Self {
        Self::Fetch(value)
    }
}

impl From<StoreError> for SyncError {
    fn from(value: StoreError) -> Self {
        Self::Persistence(value)
    }
}

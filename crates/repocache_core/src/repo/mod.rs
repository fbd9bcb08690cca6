//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define owner/repo data access contracts.
//! - Isolate SQLite query details from store and service orchestration.
//!
//! # Invariants
//! - Writes are applied in one transaction per batch.
//! - Read paths reject invalid persisted state instead of masking it.

pub mod owner_repo;

//! Owner/repo domain model.
//!
//! # Responsibility
//! - Define the read-only record values exchanged with collaborators.
//! - Define the persisted entity shapes and the static entity model.
//!
//! # Invariants
//! - Every owner is identified by a stable, externally assigned `OwnerId`.
//! - Repos belong to exactly one owner and have no independent lifecycle.

pub mod entity;
pub mod record;

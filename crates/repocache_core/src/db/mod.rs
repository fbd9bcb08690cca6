//! Cache database: connection setup and the schema contract the store
//! relies on.
//!
//! # Responsibility
//! - Open the SQLite file (or in-memory database) behind a `Store`.
//! - Migrate it to the owners/repos schema.
//! - Answer whether a connection is ready for cache reads and writes.
//!
//! # Invariants
//! - `owners` is keyed by `owner_id`; `repos` rows reference it with
//!   `ON DELETE CASCADE` and keep collection order in `position`.
//! - The schema version lives in `PRAGMA user_version`.
//! - A connection is ready only at the latest version with every
//!   required table present.

use rusqlite::{Connection, OptionalExtension};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory, open_with_config};

/// Tables every cache read or write touches.
pub const REQUIRED_TABLES: &[&str] = &["owners", "repos"];

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    /// The file was written by a newer build of the cache.
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    /// `user_version` claims a migrated schema but a cache table is gone.
    MissingTable(&'static str),
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "cache schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::MissingTable(table) => write!(f, "cache table missing: {table}"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. } | Self::MissingTable(_) => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// Schema version recorded in the database file.
pub fn schema_version(conn: &Connection) -> DbResult<u32> {
    let version = conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?;
    Ok(version)
}

/// Checks that every table in [`REQUIRED_TABLES`] exists.
pub fn verify_schema(conn: &Connection) -> DbResult<()> {
    for &table in REQUIRED_TABLES {
        let found = conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1;",
                [table],
                |_| Ok(()),
            )
            .optional()?;
        if found.is_none() {
            return Err(DbError::MissingTable(table));
        }
    }
    Ok(())
}

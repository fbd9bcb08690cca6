//! Owner/repo repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide read APIs over canonical `owners`/`repos` storage.
//! - Apply staged owner writes and repo collection replacements atomically.
//! - Keep SQL details inside the persistence boundary.
//!
//! # Invariants
//! - At most one `owners` row exists per `owner_id` (primary key + upsert).
//! - Only attributes present in a write are touched on an existing row.
//! - After a collection write, an owner's repo rows equal exactly the staged
//!   collection, ordered by `position`.

use crate::db::migrations::latest_version;
use crate::db::{schema_version, verify_schema, DbError};
use crate::model::entity::{OwnerEntity, RepoEntity, RepoObjectId};
use crate::model::record::{
    AttributeMap, Owner, OwnerId, Repo, Scalar, OWNER_ATTRIBUTES, REPO_ATTRIBUTES,
};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row, TransactionBehavior};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for owner/repo persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// A repo collection targets an owner row that does not exist.
    OwnerNotFound(OwnerId),
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "owner repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::OwnerNotFound(id) => write!(f, "owner not found: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted owner data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::UninitializedConnection { .. } => None,
            Self::OwnerNotFound(_) => None,
            Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Staged attribute write for one owner.
///
/// `attributes` holds only the attributes the writer changed; an empty map
/// still guarantees the row exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerWrite {
    pub owner_id: OwnerId,
    pub attributes: AttributeMap,
}

/// Staged full replacement of one owner's repo collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoCollectionWrite {
    pub owner_id: OwnerId,
    pub repos: Vec<RepoEntity>,
}

/// Summary of one applied write batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedWrites {
    pub owners_written: Vec<OwnerId>,
    pub collections_written: Vec<OwnerId>,
    pub repos_deleted: usize,
    pub repos_inserted: usize,
}

/// Repository interface for owner/repo reads.
pub trait OwnerRepository {
    fn get_owner(&self, owner_id: OwnerId) -> RepoResult<Option<OwnerEntity>>;
    fn list_owned_repos(&self, owner_id: OwnerId) -> RepoResult<Vec<RepoEntity>>;
    /// Loads one owner with its ordered repos.
    fn load_owner_record(&self, owner_id: OwnerId) -> RepoResult<Option<Owner>>;
    /// Loads every owner with repos, ordered by `owner_id`.
    fn load_all_records(&self) -> RepoResult<Vec<Owner>>;
}

/// SQLite-backed owner repository.
pub struct SqliteOwnerRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteOwnerRepository<'conn> {
    /// Creates repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn })
    }

    /// Wraps a connection already validated by the store.
    pub(crate) fn new_unchecked(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl OwnerRepository for SqliteOwnerRepository<'_> {
    fn get_owner(&self, owner_id: OwnerId) -> RepoResult<Option<OwnerEntity>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT owner_id, {} FROM owners WHERE owner_id = ?1;",
            OWNER_ATTRIBUTES.join(", ")
        ))?;
        let mut rows = stmt.query([owner_id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(OwnerEntity {
                owner_id,
                attributes: parse_attributes(row, OWNER_ATTRIBUTES, "owners")?,
            }));
        }

        Ok(None)
    }

    fn list_owned_repos(&self, owner_id: OwnerId) -> RepoResult<Vec<RepoEntity>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT repo_id, owner_id, {}
             FROM repos
             WHERE owner_id = ?1
             ORDER BY position ASC, repo_id ASC;",
            REPO_ATTRIBUTES.join(", ")
        ))?;
        let mut rows = stmt.query([owner_id])?;
        let mut repos = Vec::new();
        while let Some(row) = rows.next()? {
            repos.push(parse_repo_row(row)?);
        }

        Ok(repos)
    }

    fn load_owner_record(&self, owner_id: OwnerId) -> RepoResult<Option<Owner>> {
        let Some(entity) = self.get_owner(owner_id)? else {
            return Ok(None);
        };
        let repos = self
            .list_owned_repos(owner_id)?
            .iter()
            .map(RepoEntity::to_record)
            .collect();
        Ok(Some(entity.to_record(repos)))
    }

    fn load_all_records(&self) -> RepoResult<Vec<Owner>> {
        let mut repos_by_owner: BTreeMap<OwnerId, Vec<Repo>> = BTreeMap::new();
        {
            let mut stmt = self.conn.prepare(&format!(
                "SELECT repo_id, owner_id, {}
                 FROM repos
                 ORDER BY owner_id ASC, position ASC, repo_id ASC;",
                REPO_ATTRIBUTES.join(", ")
            ))?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let repo = parse_repo_row(row)?;
                repos_by_owner
                    .entry(repo.owner_id)
                    .or_default()
                    .push(repo.to_record());
            }
        }

        let mut stmt = self.conn.prepare(&format!(
            "SELECT owner_id, {} FROM owners ORDER BY owner_id ASC;",
            OWNER_ATTRIBUTES.join(", ")
        ))?;
        let mut rows = stmt.query([])?;
        let mut owners = Vec::new();
        while let Some(row) = rows.next()? {
            let owner_id: OwnerId = row.get("owner_id")?;
            let attributes = parse_attributes(row, OWNER_ATTRIBUTES, "owners")?;
            let repos = repos_by_owner.remove(&owner_id).unwrap_or_default();
            owners.push(Owner::from_attributes(owner_id, &attributes, repos));
        }

        Ok(owners)
    }
}

/// Applies owner writes, then repo collection replacements, in one
/// immediate transaction.
///
/// Either every write lands or none does.
pub fn apply_writes(
    conn: &mut Connection,
    owners: &[OwnerWrite],
    collections: &[RepoCollectionWrite],
) -> RepoResult<AppliedWrites> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let mut applied = AppliedWrites::default();

    for write in owners {
        upsert_owner_row(&tx, write)?;
        applied.owners_written.push(write.owner_id);
    }

    for collection in collections {
        let (deleted, inserted) = replace_repo_rows(&tx, collection)?;
        applied.repos_deleted += deleted;
        applied.repos_inserted += inserted;
        applied.collections_written.push(collection.owner_id);
    }

    tx.commit()?;
    Ok(applied)
}

fn upsert_owner_row(conn: &Connection, write: &OwnerWrite) -> RepoResult<()> {
    for name in write.attributes.keys() {
        if !OWNER_ATTRIBUTES.contains(name) {
            return Err(RepoError::InvalidData(format!(
                "unknown owner attribute `{name}`"
            )));
        }
    }

    if write.attributes.is_empty() {
        conn.execute(
            "INSERT INTO owners (owner_id) VALUES (?1)
             ON CONFLICT (owner_id) DO NOTHING;",
            [write.owner_id],
        )?;
        return Ok(());
    }

    let columns: Vec<&str> = write.attributes.keys().copied().collect();
    let placeholders: Vec<String> = (0..columns.len())
        .map(|index| format!("?{}", index + 2))
        .collect();
    let assignments: Vec<String> = columns
        .iter()
        .map(|column| format!("{column} = excluded.{column}"))
        .collect();
    let sql = format!(
        "INSERT INTO owners (owner_id, {}) VALUES (?1, {})
         ON CONFLICT (owner_id) DO UPDATE SET
            {},
            updated_at = (strftime('%s', 'now') * 1000);",
        columns.join(", "),
        placeholders.join(", "),
        assignments.join(", ")
    );

    let mut bind_values = vec![Value::Integer(write.owner_id)];
    bind_values.extend(write.attributes.values().map(scalar_to_value));
    conn.execute(&sql, params_from_iter(bind_values))?;
    Ok(())
}

fn replace_repo_rows(conn: &Connection, collection: &RepoCollectionWrite) -> RepoResult<(usize, usize)> {
    let owner_exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM owners WHERE owner_id = ?1);",
        [collection.owner_id],
        |row| row.get(0),
    )?;
    if owner_exists != 1 {
        return Err(RepoError::OwnerNotFound(collection.owner_id));
    }

    let retained: Vec<i64> = collection
        .repos
        .iter()
        .filter_map(|repo| match repo.object_id {
            RepoObjectId::Persisted(repo_id) => Some(repo_id),
            RepoObjectId::Temporary(_) => None,
        })
        .collect();

    let mut delete_sql = String::from("DELETE FROM repos WHERE owner_id = ?1");
    let mut bind_values = vec![Value::Integer(collection.owner_id)];
    if !retained.is_empty() {
        let placeholders: Vec<String> = (0..retained.len())
            .map(|index| format!("?{}", index + 2))
            .collect();
        delete_sql.push_str(&format!(" AND repo_id NOT IN ({})", placeholders.join(", ")));
        bind_values.extend(retained.iter().copied().map(Value::Integer));
    }
    delete_sql.push(';');
    let deleted = conn.execute(&delete_sql, params_from_iter(bind_values))?;

    let insert_sql = format!(
        "INSERT INTO repos (owner_id, position, {}) VALUES (?1, ?2, {});",
        REPO_ATTRIBUTES.join(", "),
        (0..REPO_ATTRIBUTES.len())
            .map(|index| format!("?{}", index + 3))
            .collect::<Vec<_>>()
            .join(", ")
    );
    let update_sql = format!(
        "UPDATE repos SET position = ?2, {} WHERE repo_id = ?1;",
        REPO_ATTRIBUTES
            .iter()
            .enumerate()
            .map(|(index, column)| format!("{column} = ?{}", index + 3))
            .collect::<Vec<_>>()
            .join(", ")
    );

    let mut inserted = 0;
    for (position, repo) in collection.repos.iter().enumerate() {
        let position = i64::try_from(position)
            .map_err(|_| RepoError::InvalidData("repo position overflow".to_string()))?;
        let mut values: Vec<Value> = REPO_ATTRIBUTES
            .iter()
            .map(|column| {
                repo.attributes
                    .get(column)
                    .map(scalar_to_value)
                    .unwrap_or_else(|| default_value(column))
            })
            .collect();

        match repo.object_id {
            RepoObjectId::Persisted(repo_id) => {
                let mut bind_values = vec![Value::Integer(repo_id), Value::Integer(position)];
                bind_values.append(&mut values);
                conn.execute(&update_sql, params_from_iter(bind_values))?;
            }
            RepoObjectId::Temporary(_) => {
                let mut bind_values =
                    vec![Value::Integer(collection.owner_id), Value::Integer(position)];
                bind_values.append(&mut values);
                conn.execute(&insert_sql, params_from_iter(bind_values))?;
                inserted += 1;
            }
        }
    }

    conn.execute(
        "UPDATE owners
         SET updated_at = (strftime('%s', 'now') * 1000)
         WHERE owner_id = ?1;",
        params![collection.owner_id],
    )?;

    Ok((deleted, inserted))
}

fn parse_repo_row(row: &Row<'_>) -> RepoResult<RepoEntity> {
    Ok(RepoEntity {
        object_id: RepoObjectId::Persisted(row.get("repo_id")?),
        owner_id: row.get("owner_id")?,
        attributes: parse_attributes(row, REPO_ATTRIBUTES, "repos")?,
    })
}

fn parse_attributes(
    row: &Row<'_>,
    names: &'static [&'static str],
    table: &str,
) -> RepoResult<AttributeMap> {
    let mut attributes = AttributeMap::new();
    for name in names {
        let value = match row.get::<_, Value>(*name)? {
            Value::Integer(value) => Scalar::Int(value),
            Value::Text(value) => Scalar::Text(value),
            Value::Null => continue,
            other => {
                return Err(RepoError::InvalidData(format!(
                    "unsupported value {other:?} in {table}.{name}"
                )));
            }
        };
        attributes.insert(*name, value);
    }
    Ok(attributes)
}

fn scalar_to_value(value: &Scalar) -> Value {
    match value {
        Scalar::Int(value) => Value::Integer(*value),
        Scalar::Text(value) => Value::Text(value.clone()),
    }
}

fn default_value(column: &str) -> Value {
    if column.ends_with("_count") {
        Value::Integer(0)
    } else {
        Value::Text(String::new())
    }
}

pub(crate) fn ensure_connection_ready(conn: &Connection) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version = schema_version(conn)?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }
    verify_schema(conn)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{apply_writes, OwnerRepository, OwnerWrite, RepoCollectionWrite, SqliteOwnerRepository};
    use crate::db::open_db_in_memory;
    use crate::model::entity::{RepoEntity, RepoObjectId};
    use crate::model::record::{AttributeMap, Repo, Scalar};

    fn temp_repo(owner_id: i64, seq: u64, name: &str) -> RepoEntity {
        RepoEntity {
            object_id: RepoObjectId::Temporary(seq),
            owner_id,
            attributes: Repo::new(owner_id, name).attributes(),
        }
    }

    #[test]
    fn partial_owner_write_keeps_other_columns() {
        let mut conn = open_db_in_memory().unwrap();
        let mut full = AttributeMap::new();
        full.insert("account_name", Scalar::from("octocat"));
        full.insert("followers_count", Scalar::Int(5));
        apply_writes(&mut conn, &[OwnerWrite { owner_id: 1, attributes: full }], &[]).unwrap();

        let mut partial = AttributeMap::new();
        partial.insert("followers_count", Scalar::Int(9));
        apply_writes(&mut conn, &[OwnerWrite { owner_id: 1, attributes: partial }], &[]).unwrap();

        let repo = SqliteOwnerRepository::try_new(&conn).unwrap();
        let owner = repo.load_owner_record(1).unwrap().unwrap();
        assert_eq!(owner.account_name, "octocat");
        assert_eq!(owner.followers_count, 9);
    }

    #[test]
    fn reapplying_collection_does_not_duplicate_rows() {
        let mut conn = open_db_in_memory().unwrap();
        let owner = OwnerWrite {
            owner_id: 2,
            attributes: AttributeMap::new(),
        };
        let collection = RepoCollectionWrite {
            owner_id: 2,
            repos: vec![temp_repo(2, 1, "a"), temp_repo(2, 2, "b")],
        };
        apply_writes(&mut conn, &[owner], &[collection.clone()]).unwrap();
        apply_writes(&mut conn, &[], &[collection]).unwrap();

        let repo = SqliteOwnerRepository::try_new(&conn).unwrap();
        let names: Vec<String> = repo
            .load_owner_record(2)
            .unwrap()
            .unwrap()
            .repos
            .into_iter()
            .map(|repo| repo.repository_name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn collection_for_missing_owner_is_rejected_atomically() {
        let mut conn = open_db_in_memory().unwrap();
        let owner = OwnerWrite {
            owner_id: 3,
            attributes: AttributeMap::new(),
        };
        let orphan = RepoCollectionWrite {
            owner_id: 404,
            repos: vec![temp_repo(404, 1, "lost")],
        };

        assert!(apply_writes(&mut conn, &[owner], &[orphan]).is_err());
        let repo = SqliteOwnerRepository::try_new(&conn).unwrap();
        assert!(repo.get_owner(3).unwrap().is_none());
    }
}

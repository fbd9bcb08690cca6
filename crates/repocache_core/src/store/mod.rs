//! Persistent store with one read context and many write contexts.
//!
//! # Responsibility
//! - Own the SQLite connection and the `main` serial executor.
//! - Hand out isolated write contexts (`WriteStorage`) with private executors.
//! - Run the save cycle: freeze staged changes, apply them atomically, merge
//!   into the read context (`ViewStorage`), then notify observers.
//!
//! # Invariants
//! - Every save completion runs on the `main` executor, after the database
//!   transaction committed and the view absorbed the result.
//! - Only dirty attributes are written; the last committed value of an
//!   attribute wins.
//! - Persistence failures are returned, never panicked.

pub mod live_query;
pub mod query;
mod view;
mod write;

use crate::config::StoreConfig;
use crate::db::{open_with_config, DbError};
use crate::model::entity::RepoObjectId;
use crate::model::record::OwnerId;
use crate::repo::owner_repo::{apply_writes, ensure_connection_ready, AppliedWrites, RepoError};
use crate::task::executor::{Executor, SerialExecutor};
use log::{error, info};
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use uuid::Uuid;

pub use live_query::{LiveQuery, RelationshipKeyPath};
pub use query::{CompareOp, FetchRequest, Predicate, SortDescriptor};
pub use view::{ViewObserver, ViewStorage};
pub use write::{
    ChangeKind, ChangeSet, ChangedObject, ContextObserver, InverseLink, WriteContext,
    WriteStorage,
};

pub type StoreResult<T> = Result<T, StoreError>;

/// Store-level error covering persistence, staging and query validation.
#[derive(Debug)]
pub enum StoreError {
    Repo(RepoError),
    /// A named executor thread could not be spawned.
    Executor(io::Error),
    UnknownAttribute {
        entity: &'static str,
        attribute: String,
    },
    InvalidKeyPath(String),
    /// An owner with this identity already exists.
    DuplicateOwner(OwnerId),
    /// The owner is not registered in the write context.
    OwnerNotRegistered(OwnerId),
    RepoNotFound {
        owner_id: OwnerId,
        object_id: RepoObjectId,
    },
    /// A `perform` closure failed; the context was rolled back on save.
    ContextFailed(Box<StoreError>),
    LockPoisoned(&'static str),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Repo(err) => write!(f, "{err}"),
            Self::Executor(err) => write!(f, "failed to start executor: {err}"),
            Self::UnknownAttribute { entity, attribute } => {
                write!(f, "unknown attribute `{attribute}` on entity `{entity}`")
            }
            Self::InvalidKeyPath(path) => write!(f, "invalid relationship key path `{path}`"),
            Self::DuplicateOwner(owner_id) => write!(f, "owner already exists: {owner_id}"),
            Self::OwnerNotRegistered(owner_id) => {
                write!(f, "owner {owner_id} is not registered in the write context")
            }
            Self::RepoNotFound {
                owner_id,
                object_id,
            } => write!(f, "repo {object_id:?} not found for owner {owner_id}"),
            Self::ContextFailed(err) => write!(f, "write context failed: {err}"),
            Self::LockPoisoned(name) => write!(f, "lock poisoned: {name}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            Self::Executor(err) => Some(err),
            Self::ContextFailed(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<RepoError> for StoreError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Repo(RepoError::Db(value))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Repo(RepoError::from(value))
    }
}

/// Outcome of one completed save cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveSummary {
    pub context_id: Uuid,
    pub owners_written: Vec<OwnerId>,
    pub collections_written: Vec<OwnerId>,
    pub repos_deleted: usize,
    pub repos_inserted: usize,
    /// Owners reloaded into the read context by this save.
    pub merged_owners: Vec<OwnerId>,
}

impl SaveSummary {
    fn new(context_id: Uuid, applied: AppliedWrites, merged_owners: Vec<OwnerId>) -> Self {
        Self {
            context_id,
            owners_written: applied.owners_written,
            collections_written: applied.collections_written,
            repos_deleted: applied.repos_deleted,
            repos_inserted: applied.repos_inserted,
            merged_owners,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.owners_written.is_empty() && self.collections_written.is_empty()
    }
}

/// Explicitly constructed store handle. Clones share one store.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    config: StoreConfig,
    conn: Arc<Mutex<Connection>>,
    main: Arc<SerialExecutor>,
    view: Arc<ViewStorage>,
    write_sequence: AtomicU64,
}

impl Store {
    /// Opens the database described by `config` and loads the read context.
    pub fn open(config: StoreConfig) -> StoreResult<Self> {
        let conn = open_with_config(&config)?;
        ensure_connection_ready(&conn)?;

        let main = SerialExecutor::new(format!("{}.main", config.executor_prefix))
            .map_err(StoreError::Executor)?;
        let conn = Arc::new(Mutex::new(conn));
        let view = Arc::new(ViewStorage::load(Arc::clone(&conn), Arc::clone(&main))?);
        info!(
            "event=store_open module=store status=ok owners={}",
            view.len()
        );

        Ok(Self {
            inner: Arc::new(StoreInner {
                config,
                conn,
                main,
                view,
                write_sequence: AtomicU64::new(0),
            }),
        })
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::open(StoreConfig::in_memory())
    }

    pub fn open_file(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::open(StoreConfig::file(path.as_ref()))
    }

    /// Read context, safe to read from any thread.
    pub fn view_storage(&self) -> Arc<ViewStorage> {
        Arc::clone(&self.inner.view)
    }

    /// Executor bound to the read context.
    pub fn main_executor(&self) -> Arc<SerialExecutor> {
        Arc::clone(&self.inner.main)
    }

    /// Creates an isolated write context with its own serial executor.
    pub fn new_write_storage(&self) -> StoreResult<WriteStorage> {
        let sequence = self.inner.write_sequence.fetch_add(1, Ordering::Relaxed);
        let executor = SerialExecutor::new(format!(
            "{}.write-{sequence}",
            self.inner.config.executor_prefix
        ))
        .map_err(StoreError::Executor)?;
        let storage = WriteStorage::new(Arc::clone(&self.inner.conn), executor);
        info!(
            "event=write_context_create module=store status=ok context_id={}",
            storage.id()
        );
        Ok(storage)
    }

    /// Commits `write` and merges the result into the read context.
    ///
    /// `on_complete` runs on the `main` executor after the transaction
    /// committed, the view merged and every observer was notified.
    pub fn save<F>(&self, write: &WriteStorage, on_complete: F)
    where
        F: FnOnce(StoreResult<SaveSummary>) + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let storage = write.clone();
        write.executor().execute(Box::new(move || {
            let frozen = storage.take_change_set();
            inner.commit_on_main(storage, frozen, on_complete);
        }));
    }

    /// Runs `perform` and saves exactly what it staged, in one step on the
    /// write executor.
    ///
    /// A failing `perform` is undone and reported to `on_complete` alone;
    /// other work staged in `write` is left for its own saves.
    pub fn perform_and_save<P, F>(&self, write: &WriteStorage, perform: P, on_complete: F)
    where
        P: FnOnce(&mut WriteContext) -> StoreResult<()> + Send + 'static,
        F: FnOnce(StoreResult<SaveSummary>) + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let storage = write.clone();
        write.executor().execute(Box::new(move || {
            let frozen = storage.run_and_take_change_set(perform);
            inner.commit_on_main(storage, frozen, on_complete);
        }));
    }

    /// Reloads one owner (attributes and repos) into the read context on
    /// the `main` executor.
    pub fn refresh_owner<F>(&self, owner_id: OwnerId, on_complete: F)
    where
        F: FnOnce(StoreResult<()>) + Send + 'static,
    {
        let view = Arc::clone(&self.inner.view);
        self.inner.main.execute(Box::new(move || {
            on_complete(view.refresh_objects(&[owner_id].into_iter().collect()));
        }));
    }
}

impl StoreInner {
    /// Hands a frozen change set to `main`, then settles the write context.
    fn commit_on_main<F>(
        self: Arc<Self>,
        storage: WriteStorage,
        frozen: StoreResult<ChangeSet>,
        on_complete: F,
    ) where
        F: FnOnce(StoreResult<SaveSummary>) + Send + 'static,
    {
        let main = Arc::clone(&self.main);
        main.execute(Box::new(move || {
            let outcome = match frozen {
                Ok(change_set) => {
                    let outcome = self.apply_on_main(&storage, &change_set);
                    storage.settle_async(outcome.is_err().then_some(change_set));
                    outcome
                }
                Err(err) => Err(err),
            };
            on_complete(outcome);
        }));
    }

    /// Runs on `main`: commit, publish changes, merge, then notify.
    fn apply_on_main(&self, storage: &WriteStorage, change_set: &ChangeSet) -> StoreResult<SaveSummary> {
        let started_at = Instant::now();
        let context_id = storage.id();

        let applied = if change_set.is_empty() {
            AppliedWrites::default()
        } else {
            let mut conn = lock(&self.conn, "store.connection")?;
            match apply_writes(&mut conn, &change_set.owners, &change_set.collections) {
                Ok(applied) => applied,
                Err(err) => {
                    error!(
                        "event=store_save module=store status=error context_id={} duration_ms={} error_code=apply_failed error={}",
                        context_id,
                        started_at.elapsed().as_millis(),
                        err
                    );
                    return Err(err.into());
                }
            }
        };

        let observers = storage.observers();
        for observer in &observers {
            observer.objects_did_change(context_id, &change_set.changes);
        }
        let merged = self
            .view
            .merge(&applied.owners_written, &applied.collections_written)?;
        for observer in &observers {
            observer.context_did_save(context_id);
        }

        info!(
            "event=store_save module=store status=ok context_id={} owners={} collections={} repos_deleted={} repos_inserted={} duration_ms={}",
            context_id,
            applied.owners_written.len(),
            applied.collections_written.len(),
            applied.repos_deleted,
            applied.repos_inserted,
            started_at.elapsed().as_millis()
        );
        Ok(SaveSummary::new(
            context_id,
            applied,
            merged.into_iter().collect(),
        ))
    }
}

pub(crate) fn lock<'a, T>(mutex: &'a Mutex<T>, name: &'static str) -> StoreResult<MutexGuard<'a, T>> {
    mutex.lock().map_err(|_| StoreError::LockPoisoned(name))
}

#[cfg(test)]
mod tests {
    use super::{Store, StoreError};
    use crate::model::entity::OwnerEntity;
    use crate::model::record::Scalar;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn save_without_changes_completes_on_main() {
        let store = Store::open_in_memory().unwrap();
        let write = store.new_write_storage().unwrap();
        let main = store.main_executor();
        let (tx, rx) = mpsc::channel();
        store.save(&write, move |outcome| {
            tx.send((outcome.map(|summary| summary.is_empty()).ok(), main.is_current()))
                .unwrap();
        });

        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            (Some(true), true)
        );
    }

    #[test]
    fn failed_perform_is_reported_and_rolled_back_on_save() {
        let store = Store::open_in_memory().unwrap();
        let write = store.new_write_storage().unwrap();
        write.perform(|context| {
            let mut entity = context.insert_owner(7)?;
            entity.set("account_name", Scalar::from("ghost"));
            context.update_owner(entity)?;
            context.update_owner(OwnerEntity::new(8))
        });

        let (tx, rx) = mpsc::channel();
        store.save(&write, move |outcome| tx.send(outcome).unwrap());
        match rx.recv_timeout(Duration::from_secs(2)).unwrap() {
            Err(StoreError::ContextFailed(inner)) => {
                assert!(matches!(*inner, StoreError::OwnerNotRegistered(8)));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        let (tx, rx) = mpsc::channel();
        store.save(&write, move |outcome| tx.send(outcome).unwrap());
        let summary = rx.recv_timeout(Duration::from_secs(2)).unwrap().unwrap();
        assert!(summary.is_empty());
        assert!(store.view_storage().owner(7).is_none());
    }

    #[test]
    fn failure_of_one_perform_does_not_discard_another_performs_work() {
        let store = Store::open_in_memory().unwrap();
        let write = store.new_write_storage().unwrap();
        write.perform(|context| context.update_owner(OwnerEntity::new(8)));
        write.perform(|context| context.insert_owner(2).map(|_| ()));

        let (tx, rx) = mpsc::channel();
        let first = tx.clone();
        store.save(&write, move |outcome| first.send(outcome.is_ok()).unwrap());
        store.save(&write, move |outcome| tx.send(outcome.is_ok()).unwrap());

        assert!(!rx.recv_timeout(Duration::from_secs(2)).unwrap());
        assert!(rx.recv_timeout(Duration::from_secs(2)).unwrap());
        assert!(store.view_storage().owner(2).is_some());
    }

    #[test]
    fn perform_and_save_charges_a_failure_to_its_own_call() {
        let store = Store::open_in_memory().unwrap();
        let write = store.new_write_storage().unwrap();

        let (tx, rx) = mpsc::channel();
        let failing = tx.clone();
        store.perform_and_save(
            &write,
            |context| {
                context.insert_owner(9)?;
                context.update_owner(OwnerEntity::new(8))
            },
            move |outcome| failing.send(("failing", outcome)).unwrap(),
        );
        store.perform_and_save(
            &write,
            |context| context.insert_owner(2).map(|_| ()),
            move |outcome| tx.send(("succeeding", outcome)).unwrap(),
        );

        let (label, outcome) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(label, "failing");
        assert!(matches!(outcome, Err(StoreError::OwnerNotRegistered(8))));
        let (label, outcome) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(label, "succeeding");
        assert_eq!(outcome.unwrap().merged_owners, vec![2]);
        assert!(store.view_storage().owner(9).is_none());
    }
}

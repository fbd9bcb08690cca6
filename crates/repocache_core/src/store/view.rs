//! Read context: in-memory mirror of persisted owners.
//!
//! # Responsibility
//! - Serve owner reads to any thread without touching SQLite.
//! - Absorb merged saves and explicit refreshes on the `main` executor.
//! - Fan out changed owner ids to registered view observers.
//!
//! # Invariants
//! - Mutation happens only on the `main` executor.
//! - A merge reloads, attributes and repos, every owner whose attributes or
//!   repo collection a save wrote.
//! - Observers hear about owners whose attributes were written. Repo-only
//!   changes reach them through `refresh_objects`, which live queries call
//!   for watched relationship paths.
//! - Observers are called with no view lock held.

use super::query::FetchRequest;
use super::{lock, StoreResult};
use crate::model::record::{Owner, OwnerId};
use crate::repo::owner_repo::{OwnerRepository, SqliteOwnerRepository};
use crate::task::executor::SerialExecutor;
use log::{debug, warn};
use rusqlite::Connection;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, RwLock, Weak};

/// Receives owner ids whose view state changed.
pub trait ViewObserver: Send + Sync {
    /// Called on the `main` executor after the view absorbed a change.
    fn view_did_change(&self, changed: &BTreeSet<OwnerId>);
}

/// Long-lived, UI-facing read context.
pub struct ViewStorage {
    conn: Arc<Mutex<Connection>>,
    main: Arc<SerialExecutor>,
    owners: RwLock<BTreeMap<OwnerId, Owner>>,
    observers: Mutex<Vec<Weak<dyn ViewObserver>>>,
}

impl ViewStorage {
    pub(crate) fn load(conn: Arc<Mutex<Connection>>, main: Arc<SerialExecutor>) -> StoreResult<Self> {
        let records = {
            let guard = lock(&conn, "store.connection")?;
            SqliteOwnerRepository::new_unchecked(&guard).load_all_records()?
        };
        let owners = records
            .into_iter()
            .map(|owner| (owner.owner_id, owner))
            .collect();

        Ok(Self {
            conn,
            main,
            owners: RwLock::new(owners),
            observers: Mutex::new(Vec::new()),
        })
    }

    pub fn owner(&self, owner_id: OwnerId) -> Option<Owner> {
        match self.owners.read() {
            Ok(owners) => owners.get(&owner_id).cloned(),
            Err(poisoned) => poisoned.into_inner().get(&owner_id).cloned(),
        }
    }

    /// Every owner, ordered by `owner_id`.
    pub fn owners(&self) -> Vec<Owner> {
        self.fetch(&FetchRequest::default())
    }

    pub fn len(&self) -> usize {
        match self.owners.read() {
            Ok(owners) => owners.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Filters and orders the current view state.
    pub fn fetch(&self, request: &FetchRequest) -> Vec<Owner> {
        let mut matched: Vec<Owner> = match self.owners.read() {
            Ok(owners) => collect_matches(&owners, request),
            Err(poisoned) => collect_matches(&poisoned.into_inner(), request),
        };
        matched.sort_by(|left, right| request.compare(left, right));
        matched
    }

    /// Re-reads `owner_ids` in full (attributes and repos) from disk.
    ///
    /// Must run on the `main` executor. Owners missing on disk are dropped
    /// from the view.
    pub fn refresh_objects(&self, owner_ids: &BTreeSet<OwnerId>) -> StoreResult<()> {
        if owner_ids.is_empty() {
            return Ok(());
        }
        if !self.main.is_current() {
            warn!(
                "event=view_refresh module=store status=error error_code=off_main_executor owners={}",
                owner_ids.len()
            );
        }

        self.reload(owner_ids)?;
        debug!(
            "event=view_refresh module=store status=ok owners={}",
            owner_ids.len()
        );
        self.notify(owner_ids);
        Ok(())
    }

    pub fn register_observer(&self, observer: Weak<dyn ViewObserver>) {
        if let Ok(mut observers) = self.observers.lock() {
            observers.push(observer);
        }
    }

    /// Absorbs the owners and collections written by one save.
    ///
    /// Returns every reloaded owner; observers get only `owners_written`.
    pub(crate) fn merge(
        &self,
        owners_written: &[OwnerId],
        collections_written: &[OwnerId],
    ) -> StoreResult<BTreeSet<OwnerId>> {
        let merged: BTreeSet<OwnerId> = owners_written
            .iter()
            .chain(collections_written)
            .copied()
            .collect();
        if merged.is_empty() {
            return Ok(merged);
        }

        self.reload(&merged)?;
        let changed: BTreeSet<OwnerId> = owners_written.iter().copied().collect();
        if !changed.is_empty() {
            self.notify(&changed);
        }
        Ok(merged)
    }

    fn reload(&self, owner_ids: &BTreeSet<OwnerId>) -> StoreResult<()> {
        let mut loaded = Vec::with_capacity(owner_ids.len());
        {
            let guard = lock(&self.conn, "store.connection")?;
            let repository = SqliteOwnerRepository::new_unchecked(&guard);
            for owner_id in owner_ids {
                loaded.push((*owner_id, repository.load_owner_record(*owner_id)?));
            }
        }

        let mut owners = match self.owners.write() {
            Ok(owners) => owners,
            Err(poisoned) => poisoned.into_inner(),
        };
        for (owner_id, record) in loaded {
            match record {
                Some(owner) => {
                    owners.insert(owner_id, owner);
                }
                None => {
                    owners.remove(&owner_id);
                }
            }
        }
        Ok(())
    }

    fn notify(&self, changed: &BTreeSet<OwnerId>) {
        let observers: Vec<Arc<dyn ViewObserver>> = match self.observers.lock() {
            Ok(mut observers) => {
                observers.retain(|observer| observer.strong_count() > 0);
                observers.iter().filter_map(Weak::upgrade).collect()
            }
            Err(_) => return,
        };
        for observer in observers {
            observer.view_did_change(changed);
        }
    }
}

fn collect_matches(owners: &BTreeMap<OwnerId, Owner>, request: &FetchRequest) -> Vec<Owner> {
    owners
        .values()
        .filter(|owner| request.predicate.evaluate(owner))
        .cloned()
        .collect()
}

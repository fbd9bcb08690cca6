//! Write contexts: isolated staging areas with private serial executors.
//!
//! # Responsibility
//! - Stage owner attribute edits and repo collection edits.
//! - Track dirty attributes per owner so saves write only what changed.
//! - Record changed objects, with inverse links for repos, for observers.
//!
//! # Invariants
//! - Staging state is touched only from the context's own executor.
//! - `insert_owner` never creates a second owner for a known identity.
//! - A failed `perform` leaves no staged trace of its own; only its error is
//!   kept, and the next save reports it without touching work staged by
//!   other performs.
//! - After a save is frozen, registered objects stay registered with their
//!   base advanced, so later performs never re-read rows the `main` executor
//!   has not applied yet. Once no frozen save is outstanding, objects with
//!   nothing pending are released.

use super::{lock, StoreError, StoreResult};
use crate::model::entity::{ObjectId, OwnerEntity, RepoEntity, RepoObjectId};
use crate::model::record::{AttributeMap, OwnerId, REPO_ATTRIBUTES};
use crate::repo::owner_repo::{
    OwnerRepository, OwnerWrite, RepoCollectionWrite, SqliteOwnerRepository,
};
use crate::task::executor::{Executor, SerialExecutor};
use log::{debug, error, warn};
use rusqlite::Connection;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, Weak};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Inserted,
    Updated,
    Deleted,
}

/// Inverse relationship link from a changed child to its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InverseLink {
    pub relationship: &'static str,
    pub owner_id: OwnerId,
}

/// One object changed inside a write context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedObject {
    pub entity: &'static str,
    pub object_id: ObjectId,
    pub kind: ChangeKind,
    /// Attributes whose value changed. Empty for deletions.
    pub changed_keys: BTreeSet<&'static str>,
    pub inverse: Option<InverseLink>,
}

impl ChangedObject {
    fn owner(owner_id: OwnerId, kind: ChangeKind, changed_keys: BTreeSet<&'static str>) -> Self {
        Self {
            entity: "Owner",
            object_id: ObjectId::Owner(owner_id),
            kind,
            changed_keys,
            inverse: None,
        }
    }

    fn repo(
        owner_id: OwnerId,
        object_id: RepoObjectId,
        kind: ChangeKind,
        changed_keys: BTreeSet<&'static str>,
    ) -> Self {
        Self {
            entity: "Repo",
            object_id: ObjectId::Repo(object_id),
            kind,
            changed_keys,
            inverse: Some(InverseLink {
                relationship: "owner",
                owner_id,
            }),
        }
    }
}

/// Frozen pending changes of one save cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub owners: Vec<OwnerWrite>,
    pub collections: Vec<RepoCollectionWrite>,
    pub changes: Vec<ChangedObject>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty() && self.collections.is_empty()
    }
}

/// Listens to one write context's change and save signals.
pub trait ContextObserver: Send + Sync {
    /// Called on the `main` executor with the changes of a committed save.
    fn objects_did_change(&self, context_id: Uuid, changes: &[ChangedObject]);
    /// Called on the `main` executor once the save merged into the view.
    fn context_did_save(&self, context_id: Uuid);
}

#[derive(Clone)]
struct StagedOwner {
    /// Attributes as last read from or written to disk; `None` when the
    /// owner was inserted here and never saved.
    base: Option<AttributeMap>,
    current: OwnerEntity,
}

impl StagedOwner {
    fn is_clean(&self) -> bool {
        self.base.as_ref() == Some(&self.current.attributes)
    }

    fn dirty_attributes(&self) -> AttributeMap {
        match &self.base {
            None => self.current.attributes.clone(),
            Some(base) => self
                .current
                .attributes
                .iter()
                .filter(|(name, value)| base.get(*name) != Some(*value))
                .map(|(name, value)| (*name, value.clone()))
                .collect(),
        }
    }
}

#[derive(Clone)]
struct StagedCollection {
    repos: Vec<RepoEntity>,
    dirty: bool,
}

/// Staging area of one write context.
pub struct WriteContext {
    id: Uuid,
    conn: Arc<Mutex<Connection>>,
    owners: BTreeMap<OwnerId, StagedOwner>,
    collections: BTreeMap<OwnerId, StagedCollection>,
    next_temporary: u64,
    changes: Vec<ChangedObject>,
    failure: Option<StoreError>,
    /// Frozen change sets not yet settled by the `main` executor.
    in_flight: usize,
}

/// Staging state captured before one `perform`.
struct Checkpoint {
    owners: BTreeMap<OwnerId, StagedOwner>,
    collections: BTreeMap<OwnerId, StagedCollection>,
    changes_len: usize,
}

impl WriteContext {
    fn new(id: Uuid, conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            id,
            conn,
            owners: BTreeMap::new(),
            collections: BTreeMap::new(),
            next_temporary: 0,
            changes: Vec::new(),
            failure: None,
            in_flight: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether anything is staged for the next save.
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Number of owners and repo collections currently registered.
    pub fn registered_objects(&self) -> usize {
        self.owners.len() + self.collections.len()
    }

    /// Finds an owner by identity: registered objects first, then disk.
    pub fn fetch_owner(&mut self, owner_id: OwnerId) -> StoreResult<Option<OwnerEntity>> {
        if let Some(staged) = self.owners.get(&owner_id) {
            return Ok(Some(staged.current.clone()));
        }

        let persisted = {
            let conn = lock(&self.conn, "store.connection")?;
            SqliteOwnerRepository::new_unchecked(&conn).get_owner(owner_id)?
        };
        let Some(entity) = persisted else {
            return Ok(None);
        };
        self.owners.insert(
            owner_id,
            StagedOwner {
                base: Some(entity.attributes.clone()),
                current: entity.clone(),
            },
        );
        Ok(Some(entity))
    }

    /// Registers a new owner with default attributes.
    pub fn insert_owner(&mut self, owner_id: OwnerId) -> StoreResult<OwnerEntity> {
        if self.fetch_owner(owner_id)?.is_some() {
            return Err(StoreError::DuplicateOwner(owner_id));
        }

        let entity = OwnerEntity::new(owner_id);
        let keys = entity.attributes.keys().copied().collect();
        self.owners.insert(
            owner_id,
            StagedOwner {
                base: None,
                current: entity.clone(),
            },
        );
        self.collections.insert(
            owner_id,
            StagedCollection {
                repos: Vec::new(),
                dirty: false,
            },
        );
        self.changes
            .push(ChangedObject::owner(owner_id, ChangeKind::Inserted, keys));
        Ok(entity)
    }

    /// Replaces the staged attributes of a registered owner.
    pub fn update_owner(&mut self, entity: OwnerEntity) -> StoreResult<()> {
        let owner_id = entity.owner_id;
        let staged = self
            .owners
            .get_mut(&owner_id)
            .ok_or(StoreError::OwnerNotRegistered(owner_id))?;

        let changed_keys: BTreeSet<&'static str> = entity
            .attributes
            .iter()
            .filter(|(name, value)| staged.current.attributes.get(*name) != Some(*value))
            .map(|(name, _)| *name)
            .collect();
        if changed_keys.is_empty() {
            return Ok(());
        }

        staged.current = entity;
        self.changes
            .push(ChangedObject::owner(owner_id, ChangeKind::Updated, changed_keys));
        Ok(())
    }

    /// Ordered repo collection of a registered owner.
    pub fn owned_repos(&mut self, owner_id: OwnerId) -> StoreResult<Vec<RepoEntity>> {
        Ok(self.collection_mut(owner_id)?.repos.clone())
    }

    /// Creates a repo with a temporary id and appends it to the owner's
    /// collection.
    pub fn insert_repo(&mut self, owner_id: OwnerId, attributes: AttributeMap) -> StoreResult<RepoEntity> {
        let object_id = RepoObjectId::Temporary(self.next_temporary);
        let entity = RepoEntity {
            object_id,
            owner_id,
            attributes: normalize_repo_attributes(attributes),
        };
        let keys = entity.attributes.keys().copied().collect();

        let collection = self.collection_mut(owner_id)?;
        collection.repos.push(entity.clone());
        collection.dirty = true;
        self.next_temporary += 1;
        self.changes.push(ChangedObject::repo(
            owner_id,
            object_id,
            ChangeKind::Inserted,
            keys,
        ));
        Ok(entity)
    }

    /// Replaces the attributes of one repo in the owner's collection.
    pub fn update_repo(&mut self, entity: RepoEntity) -> StoreResult<()> {
        let owner_id = entity.owner_id;
        let object_id = entity.object_id;
        let collection = self.collection_mut(owner_id)?;
        let slot = collection
            .repos
            .iter_mut()
            .find(|repo| repo.object_id == object_id)
            .ok_or(StoreError::RepoNotFound {
                owner_id,
                object_id,
            })?;

        let attributes = normalize_repo_attributes(entity.attributes);
        let changed_keys: BTreeSet<&'static str> = attributes
            .iter()
            .filter(|(name, value)| slot.attributes.get(*name) != Some(*value))
            .map(|(name, _)| *name)
            .collect();
        if changed_keys.is_empty() {
            return Ok(());
        }

        slot.attributes = attributes;
        collection.dirty = true;
        self.changes.push(ChangedObject::repo(
            owner_id,
            object_id,
            ChangeKind::Updated,
            changed_keys,
        ));
        Ok(())
    }

    /// Removes one repo from the owner's collection.
    pub fn delete_repo(&mut self, owner_id: OwnerId, object_id: RepoObjectId) -> StoreResult<()> {
        let collection = self.collection_mut(owner_id)?;
        let before = collection.repos.len();
        collection.repos.retain(|repo| repo.object_id != object_id);
        if collection.repos.len() == before {
            return Err(StoreError::RepoNotFound {
                owner_id,
                object_id,
            });
        }

        collection.dirty = true;
        self.changes.push(ChangedObject::repo(
            owner_id,
            object_id,
            ChangeKind::Deleted,
            BTreeSet::new(),
        ));
        Ok(())
    }

    /// Assigns the owner's collection to exactly `repos`, in order.
    ///
    /// Every entry must already belong to the owner's collection; repos left
    /// out are deleted.
    pub fn set_owned_repos(&mut self, owner_id: OwnerId, repos: Vec<RepoEntity>) -> StoreResult<()> {
        let collection = self.collection_mut(owner_id)?;
        let known: BTreeSet<RepoObjectId> =
            collection.repos.iter().map(|repo| repo.object_id).collect();
        if let Some(unknown) = repos.iter().find(|repo| !known.contains(&repo.object_id)) {
            return Err(StoreError::RepoNotFound {
                owner_id,
                object_id: unknown.object_id,
            });
        }

        let kept: BTreeSet<RepoObjectId> = repos.iter().map(|repo| repo.object_id).collect();
        let dropped: Vec<RepoObjectId> = known.difference(&kept).copied().collect();
        let reordered = collection
            .repos
            .iter()
            .map(|repo| repo.object_id)
            .ne(repos.iter().map(|repo| repo.object_id));

        collection.repos = repos
            .into_iter()
            .map(|repo| RepoEntity { owner_id, ..repo })
            .collect();
        if reordered {
            collection.dirty = true;
        }
        for object_id in dropped {
            self.changes.push(ChangedObject::repo(
                owner_id,
                object_id,
                ChangeKind::Deleted,
                BTreeSet::new(),
            ));
        }
        Ok(())
    }

    /// Discards every registered object and pending change.
    pub fn rollback(&mut self) {
        self.owners.clear();
        self.collections.clear();
        self.changes.clear();
        self.failure = None;
    }

    fn collection_mut(&mut self, owner_id: OwnerId) -> StoreResult<&mut StagedCollection> {
        if !self.collections.contains_key(&owner_id) {
            if self.fetch_owner(owner_id)?.is_none() {
                return Err(StoreError::OwnerNotRegistered(owner_id));
            }
            let repos = {
                let conn = lock(&self.conn, "store.connection")?;
                SqliteOwnerRepository::new_unchecked(&conn).list_owned_repos(owner_id)?
            };
            self.collections
                .insert(owner_id, StagedCollection { repos, dirty: false });
        }

        self.collections
            .get_mut(&owner_id)
            .ok_or(StoreError::OwnerNotRegistered(owner_id))
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            owners: self.owners.clone(),
            collections: self.collections.clone(),
            changes_len: self.changes.len(),
        }
    }

    fn restore(&mut self, checkpoint: Checkpoint) {
        self.owners = checkpoint.owners;
        self.collections = checkpoint.collections;
        self.changes.truncate(checkpoint.changes_len);
    }

    /// Runs `f`, undoing everything it staged when it fails.
    fn run_scoped<F>(&mut self, f: F) -> StoreResult<()>
    where
        F: FnOnce(&mut WriteContext) -> StoreResult<()>,
    {
        let checkpoint = self.checkpoint();
        let outcome = f(self);
        if outcome.is_err() {
            self.restore(checkpoint);
        }
        outcome
    }

    fn record_failure(&mut self, err: StoreError) {
        if self.failure.is_none() {
            self.failure = Some(err);
        } else {
            debug!(
                "event=write_perform module=store status=error context_id={} detail=later_failure_discarded error={}",
                self.id, err
            );
        }
    }

    /// Freezes pending changes and advances registered bases.
    ///
    /// A recorded `perform` failure is reported instead; staged work stays
    /// for the next save.
    fn freeze(&mut self) -> StoreResult<ChangeSet> {
        if let Some(err) = self.failure.take() {
            return Err(StoreError::ContextFailed(Box::new(err)));
        }
        Ok(self.freeze_staged())
    }

    /// Freezes pending changes, leaving any recorded failure in place.
    fn freeze_staged(&mut self) -> ChangeSet {
        let mut change_set = ChangeSet {
            changes: std::mem::take(&mut self.changes),
            ..ChangeSet::default()
        };
        for (owner_id, staged) in &mut self.owners {
            let attributes = staged.dirty_attributes();
            if staged.base.is_some() && attributes.is_empty() {
                continue;
            }
            change_set.owners.push(OwnerWrite {
                owner_id: *owner_id,
                attributes,
            });
            staged.base = Some(staged.current.attributes.clone());
        }
        for (owner_id, collection) in &mut self.collections {
            if !collection.dirty {
                continue;
            }
            change_set.collections.push(RepoCollectionWrite {
                owner_id: *owner_id,
                repos: collection.repos.clone(),
            });
            collection.dirty = false;
        }
        self.in_flight += 1;
        change_set
    }

    /// Settles one frozen change set after `main` applied it or failed to.
    fn settle(&mut self, failed: Option<&ChangeSet>) {
        self.in_flight = self.in_flight.saturating_sub(1);
        if let Some(failed) = failed {
            // Newer edits on top of unwritten values must rewrite them all.
            for write in &failed.owners {
                if let Some(staged) = self.owners.get_mut(&write.owner_id) {
                    if !staged.is_clean() {
                        staged.base = None;
                    }
                }
            }
        }
        if self.in_flight == 0 {
            self.release_clean();
        }
    }

    /// Drops registered objects with nothing pending; disk is current for
    /// them once no frozen change set is outstanding.
    fn release_clean(&mut self) {
        let before = self.registered_objects();
        let collections = &self.collections;
        self.owners.retain(|owner_id, staged| {
            !staged.is_clean()
                || collections
                    .get(owner_id)
                    .is_some_and(|collection| collection.dirty)
        });
        self.collections.retain(|_, collection| collection.dirty);
        debug!(
            "event=write_release module=store status=ok context_id={} released={} kept={}",
            self.id,
            before - self.registered_objects(),
            self.registered_objects()
        );
    }
}

fn normalize_repo_attributes(attributes: AttributeMap) -> AttributeMap {
    attributes
        .into_iter()
        .filter(|(name, _)| {
            let known = REPO_ATTRIBUTES.contains(name);
            if !known {
                warn!("event=write_stage module=store status=error error_code=unknown_repo_attribute attribute={name}");
            }
            known
        })
        .collect()
}

/// Handle to one write context and its private executor. Clones share the
/// context.
#[derive(Clone)]
pub struct WriteStorage {
    inner: Arc<WriteStorageInner>,
}

struct WriteStorageInner {
    id: Uuid,
    executor: Arc<SerialExecutor>,
    context: Mutex<WriteContext>,
    observers: Mutex<Vec<Weak<dyn ContextObserver>>>,
}

impl WriteStorage {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>, executor: Arc<SerialExecutor>) -> Self {
        let id = Uuid::new_v4();
        Self {
            inner: Arc::new(WriteStorageInner {
                id,
                executor,
                context: Mutex::new(WriteContext::new(id, conn)),
                observers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn executor(&self) -> Arc<SerialExecutor> {
        Arc::clone(&self.inner.executor)
    }

    /// Runs `f` on this context's executor with exclusive staging access.
    ///
    /// An error undoes what `f` staged and marks the context as failed; the
    /// next save reports it.
    pub fn perform<F>(&self, f: F)
    where
        F: FnOnce(&mut WriteContext) -> StoreResult<()> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        self.inner.executor.execute(Box::new(move || {
            let mut context = match inner.context.lock() {
                Ok(context) => context,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Err(err) = context.run_scoped(f) {
                error!(
                    "event=write_perform module=store status=error context_id={} error={}",
                    inner.id, err
                );
                context.record_failure(err);
            }
        }));
    }

    /// Registers a direct observer of this context's saves.
    pub fn add_observer(&self, observer: Weak<dyn ContextObserver>) {
        if let Ok(mut observers) = self.inner.observers.lock() {
            observers.push(observer);
        }
    }

    pub(crate) fn observers(&self) -> Vec<Arc<dyn ContextObserver>> {
        match self.inner.observers.lock() {
            Ok(mut observers) => {
                observers.retain(|observer| observer.strong_count() > 0);
                observers.iter().filter_map(Weak::upgrade).collect()
            }
            Err(_) => Vec::new(),
        }
    }

    /// Must run on this context's executor.
    pub(crate) fn take_change_set(&self) -> StoreResult<ChangeSet> {
        let mut context = lock(&self.inner.context, "write.context")?;
        context.freeze()
    }

    /// Runs `f` and freezes in one step. Must run on this context's executor.
    ///
    /// A failure of `f` is returned directly and never reaches another
    /// save; a failure recorded by an earlier `perform` stays for the next
    /// `Store::save`.
    pub(crate) fn run_and_take_change_set<F>(&self, f: F) -> StoreResult<ChangeSet>
    where
        F: FnOnce(&mut WriteContext) -> StoreResult<()>,
    {
        let mut context = lock(&self.inner.context, "write.context")?;
        context.run_scoped(f)?;
        Ok(context.freeze_staged())
    }

    /// Queues settlement of a frozen change set behind submitted work.
    pub(crate) fn settle_async(&self, failed: Option<ChangeSet>) {
        let inner = Arc::clone(&self.inner);
        self.inner.executor.execute(Box::new(move || {
            let mut context = match inner.context.lock() {
                Ok(context) => context,
                Err(poisoned) => poisoned.into_inner(),
            };
            context.settle(failed.as_ref());
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::{ChangeKind, WriteContext};
    use crate::db::open_db_in_memory;
    use crate::model::entity::{ObjectId, RepoObjectId};
    use crate::model::record::{Repo, Scalar};
    use crate::store::StoreError;
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    fn context() -> WriteContext {
        let conn = open_db_in_memory().unwrap();
        WriteContext::new(Uuid::new_v4(), Arc::new(Mutex::new(conn)))
    }

    #[test]
    fn insert_owner_rejects_known_identity() {
        let mut context = context();
        context.insert_owner(1).unwrap();
        assert!(matches!(
            context.insert_owner(1),
            Err(StoreError::DuplicateOwner(1))
        ));
    }

    #[test]
    fn only_changed_attributes_are_frozen_after_first_save() {
        let mut context = context();
        let mut owner = context.insert_owner(1).unwrap();
        owner.set("account_name", "octocat");
        context.update_owner(owner.clone()).unwrap();
        let first = context.freeze().unwrap();
        assert_eq!(first.owners.len(), 1);
        assert_eq!(
            first.owners[0].attributes.len(),
            owner.attributes.len()
        );

        owner.set("bio", "hello");
        context.update_owner(owner.clone()).unwrap();
        context.update_owner(owner).unwrap();
        let second = context.freeze().unwrap();
        assert_eq!(second.owners.len(), 1);
        assert_eq!(
            second.owners[0].attributes.keys().copied().collect::<Vec<_>>(),
            vec!["bio"]
        );
        assert_eq!(second.changes.len(), 1);
        assert!(second.changes[0].changed_keys.contains("bio"));
    }

    #[test]
    fn repo_changes_carry_inverse_owner_link() {
        let mut context = context();
        context.insert_owner(5).unwrap();
        let repo = context
            .insert_repo(5, Repo::new(5, "hello-world").attributes())
            .unwrap();
        let mut renamed = repo.clone();
        renamed
            .attributes
            .insert("repository_name", Scalar::from("renamed"));
        context.update_repo(renamed).unwrap();
        context.delete_repo(5, repo.object_id).unwrap();

        let frozen = context.freeze().unwrap();
        let repo_changes: Vec<_> = frozen
            .changes
            .iter()
            .filter(|change| change.entity == "Repo")
            .collect();
        assert_eq!(repo_changes.len(), 3);
        assert_eq!(repo_changes[0].kind, ChangeKind::Inserted);
        assert_eq!(repo_changes[1].kind, ChangeKind::Updated);
        assert_eq!(repo_changes[2].kind, ChangeKind::Deleted);
        for change in repo_changes {
            assert_eq!(change.inverse.map(|link| link.owner_id), Some(5));
            assert_eq!(change.inverse.map(|link| link.relationship), Some("owner"));
            assert_eq!(change.object_id, ObjectId::Repo(RepoObjectId::Temporary(0)));
        }
        assert_eq!(frozen.collections.len(), 1);
        assert!(frozen.collections[0].repos.is_empty());
    }

    #[test]
    fn failure_is_reported_once_and_keeps_other_staged_work() {
        let mut context = context();
        context.insert_owner(1).unwrap();
        context.record_failure(StoreError::OwnerNotRegistered(2));

        assert!(matches!(
            context.freeze(),
            Err(StoreError::ContextFailed(_))
        ));
        let next = context.freeze().unwrap();
        assert_eq!(next.owners.len(), 1);
        assert_eq!(next.owners[0].owner_id, 1);
    }

    #[test]
    fn failing_closure_leaves_no_staged_trace() {
        let mut context = context();
        context.insert_owner(1).unwrap();

        let outcome = context.run_scoped(|context| {
            context.insert_owner(2)?;
            context.insert_repo(1, Repo::new(1, "half-done").attributes())?;
            context.insert_owner(1).map(|_| ())
        });

        assert!(matches!(outcome, Err(StoreError::DuplicateOwner(1))));
        assert_eq!(context.registered_objects(), 2);
        assert!(context.owned_repos(1).unwrap().is_empty());
        let frozen = context.freeze().unwrap();
        assert_eq!(frozen.owners.len(), 1);
        assert_eq!(frozen.changes.len(), 1);
        assert!(frozen.collections.is_empty());
    }

    #[test]
    fn clean_objects_are_released_only_when_no_save_is_outstanding() {
        let mut context = context();
        context.insert_owner(1).unwrap();
        let first = context.freeze().unwrap();
        context.insert_owner(2).unwrap();
        let second = context.freeze().unwrap();
        assert_eq!((first.owners.len(), second.owners.len()), (1, 1));

        context.settle(None);
        assert_eq!(context.registered_objects(), 4);
        context.settle(None);
        assert_eq!(context.registered_objects(), 0);
    }

    #[test]
    fn edits_over_a_failed_save_are_rewritten_in_full() {
        let mut context = context();
        let mut owner = context.insert_owner(1).unwrap();
        let failed = context.freeze().unwrap();

        owner.set("bio", "hello");
        context.update_owner(owner.clone()).unwrap();
        context.settle(Some(&failed));

        let retry = context.freeze().unwrap();
        assert_eq!(retry.owners.len(), 1);
        assert_eq!(retry.owners[0].attributes.len(), owner.attributes.len());
    }

    #[test]
    fn rollback_discards_everything_staged() {
        let mut context = context();
        context.insert_owner(1).unwrap();
        context.record_failure(StoreError::OwnerNotRegistered(2));

        context.rollback();

        assert_eq!(context.registered_objects(), 0);
        assert!(!context.has_changes());
        assert!(context.freeze().unwrap().is_empty());
    }
}

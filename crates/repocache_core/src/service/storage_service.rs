//! Upsert engine and the shared write-storage service.
//!
//! # Responsibility
//! - Upsert owner records by identity inside a write context.
//! - Replace an owner's repo collection wholesale, preserving source order.
//! - Wrap one long-lived write storage and save after every use case.
//!
//! # Invariants
//! - Owner upserts never insert a second owner for the same `owner_id`.
//! - Owner upserts overwrite every scalar attribute and leave repos alone.
//! - After a repo replacement is saved, the owner's repos equal exactly the
//!   given list; the collection owner key wins over `Repo.owner_id`.
//! - Each service call runs in exactly one save cycle and reports only its
//!   own outcome; a failing call leaves other callers' work untouched.

use crate::model::entity::OwnerEntity;
use crate::model::record::{Owner, OwnerId, Repo, UserDetails};
use crate::store::{SaveSummary, Store, StoreResult, WriteContext, WriteStorage};
use log::{debug, error, info};
use std::time::Instant;

/// Loads or creates the owner for `record.owner_id` and overwrites its
/// scalar attributes.
pub fn upsert_owner(context: &mut WriteContext, record: &Owner) -> StoreResult<OwnerEntity> {
    let mut entity = match context.fetch_owner(record.owner_id)? {
        Some(entity) => entity,
        None => context.insert_owner(record.owner_id)?,
    };
    entity.update_with(record);
    context.update_owner(entity.clone())?;
    Ok(entity)
}

/// Upserts each record in order inside the same context.
pub fn upsert_owners(context: &mut WriteContext, records: &[Owner]) -> StoreResult<usize> {
    for record in records {
        upsert_owner(context, record)?;
    }
    Ok(records.len())
}

/// Replaces the repo collection of `owner_id` with `repos`.
///
/// Returns `false` without staging anything when the owner is unknown. An
/// empty `repos` clears the collection.
pub fn upsert_repos_replace_all(
    context: &mut WriteContext,
    owner_id: OwnerId,
    repos: &[Repo],
) -> StoreResult<bool> {
    if context.fetch_owner(owner_id)?.is_none() {
        debug!("event=upsert_repos module=service status=skipped owner_id={owner_id} detail=owner_missing");
        return Ok(false);
    }

    for existing in context.owned_repos(owner_id)? {
        context.delete_repo(owner_id, existing.object_id)?;
    }

    let mut fresh = Vec::with_capacity(repos.len());
    for repo in repos {
        fresh.push(context.insert_repo(owner_id, repo.attributes())?);
    }
    context.set_owned_repos(owner_id, fresh)?;
    Ok(true)
}

/// Use-case service over one shared write storage.
#[derive(Clone)]
pub struct StorageService {
    store: Store,
    storage: WriteStorage,
}

impl StorageService {
    /// Creates the service and its dedicated write storage.
    pub fn new(store: Store) -> StoreResult<Self> {
        let storage = store.new_write_storage()?;
        Ok(Self { store, storage })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Write storage every service call stages into.
    pub fn write_storage(&self) -> &WriteStorage {
        &self.storage
    }

    pub fn update_owner<F>(&self, owner: Owner, on_complete: F)
    where
        F: FnOnce(StoreResult<SaveSummary>) + Send + 'static,
    {
        self.perform_and_save(
            "update_owner",
            move |context| upsert_owner(context, &owner).map(|_| ()),
            on_complete,
        );
    }

    pub fn update_owners<F>(&self, owners: Vec<Owner>, on_complete: F)
    where
        F: FnOnce(StoreResult<SaveSummary>) + Send + 'static,
    {
        self.perform_and_save(
            "update_owners",
            move |context| upsert_owners(context, &owners).map(|_| ()),
            on_complete,
        );
    }

    /// Upserts the owner described by a detail payload; repos are untouched.
    pub fn update_user_details<F>(&self, details: UserDetails, on_complete: F)
    where
        F: FnOnce(StoreResult<SaveSummary>) + Send + 'static,
    {
        let owner = details.into_owner();
        self.perform_and_save(
            "update_user_details",
            move |context| upsert_owner(context, &owner).map(|_| ()),
            on_complete,
        );
    }

    pub fn update_owner_repos<F>(&self, owner_id: OwnerId, repos: Vec<Repo>, on_complete: F)
    where
        F: FnOnce(StoreResult<SaveSummary>) + Send + 'static,
    {
        self.perform_and_save(
            "update_owner_repos",
            move |context| upsert_repos_replace_all(context, owner_id, &repos).map(|_| ()),
            on_complete,
        );
    }

    fn perform_and_save<P, F>(&self, operation: &'static str, perform: P, on_complete: F)
    where
        P: FnOnce(&mut WriteContext) -> StoreResult<()> + Send + 'static,
        F: FnOnce(StoreResult<SaveSummary>) + Send + 'static,
    {
        let started_at = Instant::now();
        self.store.perform_and_save(&self.storage, perform, move |outcome| {
            match &outcome {
                Ok(summary) => info!(
                    "event=storage_service module=service status=ok operation={operation} owners={} collections={} duration_ms={}",
                    summary.owners_written.len(),
                    summary.collections_written.len(),
                    started_at.elapsed().as_millis()
                ),
                Err(err) => error!(
                    "event=storage_service module=service status=error operation={operation} duration_ms={} error={}",
                    started_at.elapsed().as_millis(),
                    err
                ),
            }
            on_complete(outcome);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::{upsert_owner, upsert_repos_replace_all, StorageService};
    use crate::model::entity::OwnerEntity;
    use crate::model::record::{Owner, Repo};
    use crate::store::{Store, StoreError, StoreResult, WriteContext};
    use std::sync::mpsc;
    use std::time::Duration;

    fn run<T, F>(store: &Store, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut WriteContext) -> StoreResult<T> + Send + 'static,
    {
        let write = store.new_write_storage().unwrap();
        let (tx, rx) = mpsc::channel();
        write.perform(move |context| {
            tx.send(f(context)).unwrap();
            Ok(())
        });
        rx.recv_timeout(Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn replace_all_on_unknown_owner_is_a_no_op() {
        let store = Store::open_in_memory().unwrap();
        let replaced = run(&store, |context| {
            upsert_repos_replace_all(context, 99, &[Repo::new(99, "x")])
        })
        .unwrap();
        assert!(!replaced);
    }

    #[test]
    fn parent_key_wins_over_record_owner_id() {
        let store = Store::open_in_memory().unwrap();
        let repos = run(&store, |context| {
            upsert_owner(context, &Owner::new(1, "alice"))?;
            upsert_repos_replace_all(context, 1, &[Repo::new(42, "misfiled")])?;
            context.owned_repos(1)
        })
        .unwrap();

        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].owner_id, 1);
        assert_eq!(repos[0].to_record().repository_name, "misfiled");
    }

    #[test]
    fn service_call_is_not_charged_with_another_callers_failure() {
        let store = Store::open_in_memory().unwrap();
        let service = StorageService::new(store.clone()).unwrap();
        service
            .write_storage()
            .perform(|context| context.update_owner(OwnerEntity::new(8)));

        let (tx, rx) = mpsc::channel();
        service.update_owner(Owner::new(2, "bob"), move |outcome| {
            tx.send(outcome.is_ok()).unwrap()
        });
        assert!(rx.recv_timeout(Duration::from_secs(2)).unwrap());
        assert_eq!(store.view_storage().owner(2).unwrap().account_name, "bob");

        let (tx, rx) = mpsc::channel();
        store.save(service.write_storage(), move |outcome| tx.send(outcome).unwrap());
        match rx.recv_timeout(Duration::from_secs(2)).unwrap() {
            Err(StoreError::ContextFailed(inner)) => {
                assert!(matches!(*inner, StoreError::OwnerNotRegistered(8)));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn failing_service_call_keeps_concurrent_calls_intact() {
        let store = Store::open_in_memory().unwrap();
        let service = StorageService::new(store.clone()).unwrap();

        let (tx, rx) = mpsc::channel();
        let failing = tx.clone();
        service.perform_and_save(
            "failing_call",
            |context| {
                upsert_owner(context, &Owner::new(9, "ghost"))?;
                context.update_owner(OwnerEntity::new(8))
            },
            move |outcome| failing.send(outcome.is_ok()).unwrap(),
        );
        service.update_owners(
            vec![Owner::new(1, "alice"), Owner::new(2, "bob")],
            move |outcome| tx.send(outcome.is_ok()).unwrap(),
        );

        assert!(!rx.recv_timeout(Duration::from_secs(2)).unwrap());
        assert!(rx.recv_timeout(Duration::from_secs(2)).unwrap());
        let view = store.view_storage();
        assert!(view.owner(9).is_none());
        assert_eq!(view.owner(1).unwrap().account_name, "alice");
        assert_eq!(view.owner(2).unwrap().account_name, "bob");
    }
}

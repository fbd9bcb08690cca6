//! Standing owner queries with relationship-aware invalidation.
//!
//! # Responsibility
//! - Keep an ordered, predicate-filtered owner snapshot current.
//! - Re-emit snapshots on direct owner changes that touch the result set.
//! - Watch `relationship.attribute` key paths: collect owners whose children
//!   changed in an observed write context, then refresh those owners in the
//!   read context once that context saved.
//!
//! # Invariants
//! - Subscribers receive full snapshots on the `main` executor.
//! - Candidate owners are tracked per write context and cleared on each of
//!   that context's saves.
//! - Changes matching no watched path, or lacking the inverse link, are
//!   ignored here.
//! - No internal lock is held while calling the view or a subscriber.

use super::query::{FetchRequest, Predicate};
use super::view::{ViewObserver, ViewStorage};
use super::write::{ChangeKind, ChangedObject, ContextObserver, WriteStorage};
use super::{Store, StoreError, StoreResult};
use crate::model::entity::{entity_by_name, EntityDescription, OWNER_ENTITY};
use crate::model::record::{Owner, OwnerId};
use crate::task::executor::{Executor, SerialExecutor};
use log::{debug, error, info};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

static KEY_PATH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([a-z][a-z0-9_]*)\.([a-z][a-z0-9_]*)$").expect("valid key path regex")
});

/// A watched `relationship.attribute` path resolved against the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipKeyPath {
    pub path: String,
    /// Relationship name on the owner entity.
    pub relationship: &'static str,
    pub destination: &'static str,
    pub attribute: &'static str,
    /// Inverse relationship on the destination, when declared.
    pub inverse: Option<&'static str>,
}

impl RelationshipKeyPath {
    pub fn parse(path: &str, source: &EntityDescription) -> StoreResult<Self> {
        let invalid = || StoreError::InvalidKeyPath(path.to_string());
        let captures = KEY_PATH_RE.captures(path.trim()).ok_or_else(invalid)?;
        let (relationship_name, attribute_name) = match (captures.get(1), captures.get(2)) {
            (Some(relationship), Some(attribute)) => (relationship.as_str(), attribute.as_str()),
            _ => return Err(invalid()),
        };

        let relationship = source.relationship(relationship_name).ok_or_else(invalid)?;
        let destination = entity_by_name(relationship.destination).ok_or_else(invalid)?;
        let attribute = destination
            .attributes
            .iter()
            .find(|candidate| **candidate == attribute_name)
            .copied()
            .ok_or_else(invalid)?;

        Ok(Self {
            path: path.trim().to_string(),
            relationship: relationship.name,
            destination: destination.name,
            attribute,
            inverse: relationship.inverse,
        })
    }

    /// Owner id reached through the inverse link of a matching change.
    fn candidate_owner(&self, change: &ChangedObject) -> Option<OwnerId> {
        if change.entity != self.destination {
            return None;
        }
        let touched = match change.kind {
            ChangeKind::Deleted => true,
            ChangeKind::Inserted | ChangeKind::Updated => {
                change.changed_keys.contains(self.attribute)
            }
        };
        if !touched {
            return None;
        }

        match (self.inverse, change.inverse) {
            (Some(expected), Some(link)) if link.relationship == expected => Some(link.owner_id),
            _ => {
                debug!(
                    "event=live_query_relationship module=store status=skipped key_path={} detail=missing_inverse",
                    self.path
                );
                None
            }
        }
    }
}

type Subscriber = Arc<dyn Fn(&[Owner]) + Send + Sync + 'static>;

struct QueryState {
    request: FetchRequest,
    results: Vec<Owner>,
    result_ids: BTreeSet<OwnerId>,
}

struct LiveQueryInner {
    view: Arc<ViewStorage>,
    main: Arc<SerialExecutor>,
    key_paths: Vec<RelationshipKeyPath>,
    state: Mutex<QueryState>,
    subscribers: Mutex<Vec<Subscriber>>,
    pending: Mutex<HashMap<Uuid, BTreeSet<OwnerId>>>,
}

/// Standing, predicate-filtered read over owners.
#[derive(Clone)]
pub struct LiveQuery {
    inner: Arc<LiveQueryInner>,
}

impl LiveQuery {
    /// Validates `request` and registers the query with the read context.
    ///
    /// Call `perform_fetch` to load the first snapshot.
    pub fn new(store: &Store, request: FetchRequest) -> StoreResult<Self> {
        request.validate()?;
        let key_paths = request
            .relationship_key_paths
            .iter()
            .map(|path| RelationshipKeyPath::parse(path, &OWNER_ENTITY))
            .collect::<StoreResult<Vec<_>>>()?;

        let inner = Arc::new(LiveQueryInner {
            view: store.view_storage(),
            main: store.main_executor(),
            key_paths,
            state: Mutex::new(QueryState {
                request,
                results: Vec::new(),
                result_ids: BTreeSet::new(),
            }),
            subscribers: Mutex::new(Vec::new()),
            pending: Mutex::new(HashMap::new()),
        });
        let as_view_observer: Arc<dyn ViewObserver> = inner.clone();
        inner.view.register_observer(Arc::downgrade(&as_view_observer));
        Ok(Self { inner })
    }

    /// Loads the current snapshot without notifying subscribers.
    pub fn perform_fetch(&self) -> StoreResult<Vec<Owner>> {
        self.inner.refetch()
    }

    /// Current snapshot as of the last fetch.
    pub fn fetched_objects(&self) -> Vec<Owner> {
        match self.inner.state.lock() {
            Ok(state) => state.results.clone(),
            Err(poisoned) => poisoned.into_inner().results.clone(),
        }
    }

    pub fn key_paths(&self) -> &[RelationshipKeyPath] {
        &self.inner.key_paths
    }

    /// Replaces the predicate, then refetches and notifies on `main`.
    pub fn set_predicate(&self, predicate: Predicate) -> StoreResult<()> {
        predicate.validate(&OWNER_ENTITY)?;
        {
            let mut state = super::lock(&self.inner.state, "live_query.state")?;
            state.request.predicate = predicate;
        }

        let inner = Arc::clone(&self.inner);
        self.inner.main.execute(Box::new(move || inner.refetch_and_notify("predicate")));
        Ok(())
    }

    /// Registers a snapshot callback, invoked on the `main` executor.
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&[Owner]) + Send + Sync + 'static,
    {
        if let Ok(mut subscribers) = self.inner.subscribers.lock() {
            subscribers.push(Arc::new(callback));
        }
    }

    /// Watches `storage` for changes along the configured key paths.
    pub fn observe_context(&self, storage: &WriteStorage) {
        let as_context_observer: Arc<dyn ContextObserver> = self.inner.clone();
        storage.add_observer(Arc::downgrade(&as_context_observer));
        debug!(
            "event=live_query_observe module=store status=ok context_id={} key_paths={}",
            storage.id(),
            self.inner.key_paths.len()
        );
    }
}

impl LiveQueryInner {
    fn refetch(&self) -> StoreResult<Vec<Owner>> {
        let request = super::lock(&self.state, "live_query.state")?.request.clone();
        let results = self.view.fetch(&request);

        let mut state = super::lock(&self.state, "live_query.state")?;
        state.result_ids = results.iter().map(|owner| owner.owner_id).collect();
        state.results = results.clone();
        Ok(results)
    }

    fn refetch_and_notify(&self, reason: &str) {
        match self.refetch() {
            Ok(results) => {
                debug!(
                    "event=live_query_notify module=store status=ok reason={reason} results={}",
                    results.len()
                );
                self.notify(&results);
            }
            Err(err) => {
                error!(
                    "event=live_query_notify module=store status=error reason={reason} error={err}"
                );
            }
        }
    }

    fn notify(&self, results: &[Owner]) {
        let subscribers: Vec<Subscriber> = match self.subscribers.lock() {
            Ok(subscribers) => subscribers.clone(),
            Err(_) => return,
        };
        for subscriber in subscribers {
            subscriber(results);
        }
    }

    /// Whether a direct change to `changed` can alter the result set.
    fn is_affected_by(&self, changed: &BTreeSet<OwnerId>) -> bool {
        let (predicate, result_ids) = match self.state.lock() {
            Ok(state) => (state.request.predicate.clone(), state.result_ids.clone()),
            Err(_) => return false,
        };
        changed.iter().any(|owner_id| {
            result_ids.contains(owner_id)
                || self
                    .view
                    .owner(*owner_id)
                    .is_some_and(|owner| predicate.evaluate(&owner))
        })
    }
}

impl ViewObserver for LiveQueryInner {
    fn view_did_change(&self, changed: &BTreeSet<OwnerId>) {
        if self.is_affected_by(changed) {
            self.refetch_and_notify("direct");
        }
    }
}

impl ContextObserver for LiveQueryInner {
    fn objects_did_change(&self, context_id: Uuid, changes: &[ChangedObject]) {
        if self.key_paths.is_empty() {
            return;
        }

        let candidates: BTreeSet<OwnerId> = changes
            .iter()
            .filter_map(|change| {
                self.key_paths
                    .iter()
                    .find_map(|key_path| key_path.candidate_owner(change))
            })
            .collect();
        if candidates.is_empty() {
            return;
        }

        if let Ok(mut pending) = self.pending.lock() {
            pending.entry(context_id).or_default().extend(candidates);
        }
    }

    fn context_did_save(&self, context_id: Uuid) {
        let candidates = match self.pending.lock() {
            Ok(mut pending) => pending.remove(&context_id).unwrap_or_default(),
            Err(_) => return,
        };
        if candidates.is_empty() {
            return;
        }

        let visible: BTreeSet<OwnerId> = match self.state.lock() {
            Ok(state) => candidates
                .intersection(&state.result_ids)
                .copied()
                .collect(),
            Err(_) => return,
        };
        if visible.is_empty() {
            return;
        }

        info!(
            "event=live_query_relationship module=store status=ok context_id={} refreshed={}",
            context_id,
            visible.len()
        );
        if let Err(err) = self.view.refresh_objects(&visible) {
            error!(
                "event=live_query_relationship module=store status=error context_id={} error={}",
                context_id, err
            );
        }
    }
}

//! Synchronization orchestrator over the remote source and the store.
//!
//! # Responsibility
//! - Run the search flow: fetch the owner list, persist it, narrow the live
//!   query to the returned ids, then enrich every owner with details and
//!   repos concurrently.
//! - Run the single-owner refresh flow used by detail screens.
//! - Expose the live owner snapshot to subscribers.
//!
//! # Invariants
//! - A list fetch failure or any persistence failure reaches the caller.
//! - Per-owner detail/repo fetch failures during search enrichment are
//!   logged and counted, never propagated; the enrichment task still
//!   finishes.
//! - Every flow calls its completion exactly once.

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::model::record::{Owner, OwnerId};
use crate::remote::{RemoteSource, SearchRequest};
use crate::service::storage_service::StorageService;
use crate::store::{FetchRequest, LiveQuery, Predicate, Store, StoreResult};
use crate::task::executor::Executor;
use crate::task::{ConcurrentExecutor, Controller, Task};
use log::{error, info, warn};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Outcome of one search flow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub term: String,
    /// Owner ids returned by the list fetch, in remote order.
    pub owner_ids: Vec<OwnerId>,
    /// Owners whose detail fetch failed and was skipped.
    pub detail_failures: usize,
    /// Owners whose repo fetch failed and was skipped.
    pub repo_failures: usize,
}

/// Consumer-facing orchestrator. Clones share one orchestrator.
#[derive(Clone)]
pub struct SyncService {
    inner: Arc<SyncInner>,
}

struct SyncInner {
    config: SyncConfig,
    remote: Arc<dyn RemoteSource>,
    storage: StorageService,
    live_query: LiveQuery,
    fetch: Arc<dyn Executor>,
}

#[derive(Default)]
struct FailureCounters {
    details: AtomicUsize,
    repos: AtomicUsize,
}

/// How a fetch failure inside an enrichment task is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchFailurePolicy {
    /// Log, count and finish the task.
    Skip,
    /// Fail the task.
    Propagate,
}

impl SyncService {
    /// Builds the orchestrator with its own write storage and live query.
    ///
    /// The live query starts narrowed to no owners.
    pub fn new(store: Store, remote: Arc<dyn RemoteSource>, config: SyncConfig) -> StoreResult<Self> {
        let storage = StorageService::new(store.clone())?;
        let request = config.watched_key_paths.iter().fold(
            FetchRequest::new(Predicate::owner_id_in(Vec::new())),
            |request, path| request.watching(path.as_str()),
        );
        let live_query = LiveQuery::new(&store, request)?;
        live_query.observe_context(storage.write_storage());
        live_query.perform_fetch()?;

        let fetch: Arc<dyn Executor> = ConcurrentExecutor::new(config.fetch_executor_name.clone());
        Ok(Self {
            inner: Arc::new(SyncInner {
                config,
                remote,
                storage,
                live_query,
                fetch,
            }),
        })
    }

    pub fn storage(&self) -> &StorageService {
        &self.inner.storage
    }

    pub fn live_query(&self) -> &LiveQuery {
        &self.inner.live_query
    }

    /// Registers a snapshot callback, invoked on the store's `main` executor.
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&[Owner]) + Send + Sync + 'static,
    {
        self.inner.live_query.subscribe(callback);
    }

    /// Owners currently matched by the live query.
    pub fn current_owners(&self) -> Vec<Owner> {
        self.inner.live_query.fetched_objects()
    }

    /// Searches owners by `term` and caches them with details and repos.
    ///
    /// A blank term completes immediately with an empty report.
    pub fn search<F>(&self, term: &str, completion: F)
    where
        F: FnOnce(Result<SyncReport, SyncError>) + Send + 'static,
    {
        let term = term.trim().to_string();
        if term.is_empty() {
            completion(Ok(SyncReport::default()));
            return;
        }

        let started_at = Instant::now();
        info!("event=sync_search module=sync status=start term_len={}", term.len());
        let request =
            SearchRequest::new(term.clone()).with_per_page(self.inner.config.normalized_page_size());
        let inner = Arc::clone(&self.inner);
        let completion = move |outcome: Result<SyncReport, SyncError>| {
            match &outcome {
                Ok(report) => info!(
                    "event=sync_search module=sync status=ok owners={} detail_failures={} repo_failures={} duration_ms={}",
                    report.owner_ids.len(),
                    report.detail_failures,
                    report.repo_failures,
                    started_at.elapsed().as_millis()
                ),
                Err(err) => error!(
                    "event=sync_search module=sync status=error duration_ms={} error={}",
                    started_at.elapsed().as_millis(),
                    err
                ),
            }
            completion(outcome);
        };

        self.inner.remote.search_users(
            request,
            Box::new(move |result| match result {
                Ok(owners) => inner.persist_search_results(term, owners, completion),
                Err(err) => completion(Err(err)),
            }),
        );
    }

    /// Narrows the live query to one owner and reloads its details, then
    /// its repos. Any failure reaches `completion`.
    pub fn refresh_owner<F>(&self, owner_id: OwnerId, account_name: &str, completion: F)
    where
        F: FnOnce(Result<(), SyncError>) + Send + 'static,
    {
        if let Err(err) = self
            .inner
            .live_query
            .set_predicate(Predicate::owner_id_in([owner_id]))
        {
            completion(Err(err.into()));
            return;
        }

        let counters = Arc::new(FailureCounters::default());
        let started_at = Instant::now();
        let task = Task::sequence(vec![
            self.inner.details_task(
                account_name.to_string(),
                FetchFailurePolicy::Propagate,
                Arc::clone(&counters),
            ),
            self.inner.repos_task(
                owner_id,
                account_name.to_string(),
                FetchFailurePolicy::Propagate,
                counters,
            ),
        ]);
        task.perform(Arc::clone(&self.inner.fetch), move |outcome| {
            match &outcome {
                Ok(()) => info!(
                    "event=sync_refresh module=sync status=ok owner_id={owner_id} duration_ms={}",
                    started_at.elapsed().as_millis()
                ),
                Err(err) => error!(
                    "event=sync_refresh module=sync status=error owner_id={owner_id} duration_ms={} error={}",
                    started_at.elapsed().as_millis(),
                    err
                ),
            }
            completion(outcome);
        });
    }
}

impl SyncInner {
    fn persist_search_results<F>(self: Arc<Self>, term: String, owners: Vec<Owner>, completion: F)
    where
        F: FnOnce(Result<SyncReport, SyncError>) + Send + 'static,
    {
        let owner_ids: Vec<OwnerId> = owners.iter().map(|owner| owner.owner_id).collect();
        let targets: Vec<(OwnerId, String)> = owners
            .iter()
            .map(|owner| (owner.owner_id, owner.account_name.clone()))
            .collect();
        let inner = Arc::clone(&self);

        self.storage.update_owners(owners, move |outcome| {
            if let Err(err) = outcome {
                completion(Err(err.into()));
                return;
            }
            if let Err(err) = inner
                .live_query
                .set_predicate(Predicate::owner_id_in(owner_ids.iter().copied()))
            {
                completion(Err(err.into()));
                return;
            }

            let report = SyncReport {
                term,
                owner_ids,
                ..SyncReport::default()
            };
            inner.enrich(targets, report, completion);
        });
    }

    /// Runs `sequence([group(details), group(repos)])` over `targets`.
    fn enrich<F>(&self, targets: Vec<(OwnerId, String)>, report: SyncReport, completion: F)
    where
        F: FnOnce(Result<SyncReport, SyncError>) + Send + 'static,
    {
        let counters = Arc::new(FailureCounters::default());
        let details = targets
            .iter()
            .map(|(_, account_name)| {
                self.details_task(
                    account_name.clone(),
                    FetchFailurePolicy::Skip,
                    Arc::clone(&counters),
                )
            })
            .collect();
        let repos = targets
            .into_iter()
            .map(|(owner_id, account_name)| {
                self.repos_task(
                    owner_id,
                    account_name,
                    FetchFailurePolicy::Skip,
                    Arc::clone(&counters),
                )
            })
            .collect();

        Task::sequence(vec![Task::group(details), Task::group(repos)]).perform(
            Arc::clone(&self.fetch),
            move |outcome| {
                completion(outcome.map(|()| SyncReport {
                    detail_failures: counters.details.load(Ordering::SeqCst),
                    repo_failures: counters.repos.load(Ordering::SeqCst),
                    ..report
                }))
            },
        );
    }

    fn details_task(
        &self,
        account_name: String,
        policy: FetchFailurePolicy,
        counters: Arc<FailureCounters>,
    ) -> Task {
        let remote = Arc::clone(&self.remote);
        let storage = self.storage.clone();
        Task::new(move |controller| {
            let requested = account_name.clone();
            remote.user_details(
                &requested,
                Box::new(move |result| match result {
                    Ok(details) => storage.update_user_details(details, move |outcome| {
                        complete_with_store_outcome(controller, outcome.map(|_| ()))
                    }),
                    Err(err) => handle_fetch_failure(
                        controller,
                        err,
                        policy,
                        "details",
                        &account_name,
                        &counters.details,
                    ),
                }),
            );
        })
    }

    fn repos_task(
        &self,
        owner_id: OwnerId,
        account_name: String,
        policy: FetchFailurePolicy,
        counters: Arc<FailureCounters>,
    ) -> Task {
        let remote = Arc::clone(&self.remote);
        let storage = self.storage.clone();
        Task::new(move |controller| {
            let requested = account_name.clone();
            remote.user_repos(
                &requested,
                Box::new(move |result| match result {
                    Ok(repos) => storage.update_owner_repos(owner_id, repos, move |outcome| {
                        complete_with_store_outcome(controller, outcome.map(|_| ()))
                    }),
                    Err(err) => handle_fetch_failure(
                        controller,
                        err,
                        policy,
                        "repos",
                        &account_name,
                        &counters.repos,
                    ),
                }),
            );
        })
    }
}

fn complete_with_store_outcome(controller: Controller, outcome: StoreResult<()>) {
    match outcome {
        Ok(()) => controller.finish(),
        Err(err) => controller.fail(err.into()),
    }
}

fn handle_fetch_failure(
    controller: Controller,
    err: SyncError,
    policy: FetchFailurePolicy,
    request: &str,
    account_name: &str,
    counter: &AtomicUsize,
) {
    match policy {
        FetchFailurePolicy::Skip => {
            counter.fetch_add(1, Ordering::SeqCst);
            warn!(
                "event=sync_enrich module=sync status=skipped request={request} account_len={} error={}",
                account_name.len(),
                err
            );
            controller.finish();
        }
        FetchFailurePolicy::Propagate => controller.fail(err),
    }
}

use repocache_core::{
    Completion, FetchError, Owner, RemoteSource, Repo, SearchRequest, Store, SyncConfig,
    SyncError, SyncReport, SyncService, UserDetails,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

const SEARCH_FIXTURE: &str = r#"[
    {"owner_id": 1, "account_name": "user1", "user_name": "", "avatar_url": "https://avatars.invalid/1", "email": "", "bio": "", "location": "", "created_at": "", "followers_count": 0, "following_count": 0, "repos_count": 0},
    {"owner_id": 2, "account_name": "user2", "user_name": "", "avatar_url": "https://avatars.invalid/2", "email": "", "bio": "", "location": "", "created_at": "", "followers_count": 0, "following_count": 0, "repos_count": 0},
    {"owner_id": 3, "account_name": "user3", "user_name": "", "avatar_url": "https://avatars.invalid/3", "email": "", "bio": "", "location": "", "created_at": "", "followers_count": 0, "following_count": 0, "repos_count": 0},
    {"owner_id": 4, "account_name": "user4", "user_name": "", "avatar_url": "https://avatars.invalid/4", "email": "", "bio": "", "location": "", "created_at": "", "followers_count": 0, "following_count": 0, "repos_count": 0},
    {"owner_id": 5, "account_name": "user5", "user_name": "", "avatar_url": "https://avatars.invalid/5", "email": "", "bio": "", "location": "", "created_at": "", "followers_count": 0, "following_count": 0, "repos_count": 0}
]"#;

/// Remote double answering from fixtures on background threads.
#[derive(Default)]
struct FixtureRemote {
    search_failure: Option<u16>,
    failing_details: HashSet<String>,
    failing_repos: HashSet<String>,
    search_calls: AtomicUsize,
    requested_page_size: Mutex<Option<u32>>,
}

fn owner_id_of(account_name: &str) -> i64 {
    account_name
        .trim_start_matches("user")
        .parse()
        .unwrap_or_default()
}

fn fixture_repos(account_name: &str) -> Vec<Repo> {
    let owner_id = owner_id_of(account_name);
    (1..=2)
        .map(|index| {
            let mut repo = Repo::new(owner_id, format!("{account_name}-repo-{index}"));
            repo.owner_name = account_name.to_string();
            repo.stars_count = index;
            repo
        })
        .collect()
}

impl RemoteSource for FixtureRemote {
    fn search_users(&self, request: SearchRequest, completion: Completion<Vec<Owner>>) {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        *self.requested_page_size.lock().unwrap() = Some(request.per_page);
        let failure = self.search_failure;
        thread::spawn(move || match failure {
            Some(status_code) => completion(Err(SyncError::Server { status_code })),
            None => completion(
                serde_json::from_str::<Vec<Owner>>(SEARCH_FIXTURE)
                    .map_err(|err| SyncError::Decode(err.to_string())),
            ),
        });
    }

    fn user_details(&self, account_name: &str, completion: Completion<UserDetails>) {
        let fails = self.failing_details.contains(account_name);
        let account_name = account_name.to_string();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(2));
            if fails {
                completion(Err(FetchError::Timeout.into()));
                return;
            }
            completion(Ok(UserDetails {
                owner_id: owner_id_of(&account_name),
                user_name: format!("Name of {account_name}"),
                bio: Some("writes code".to_string()),
                created_at: "2020-01-01T00:00:00Z".to_string(),
                followers_count: 3,
                public_repos_count: 2,
                account_name,
                ..UserDetails::default()
            }));
        });
    }

    fn user_repos(&self, account_name: &str, completion: Completion<Vec<Repo>>) {
        let fails = self.failing_repos.contains(account_name);
        let account_name = account_name.to_string();
        thread::spawn(move || {
            if fails {
                completion(Err(FetchError::ConnectionLost.into()));
            } else {
                completion(Ok(fixture_repos(&account_name)));
            }
        });
    }
}

fn service_with(remote: Arc<FixtureRemote>) -> SyncService {
    let store = Store::open_in_memory().unwrap();
    SyncService::new(store, remote, SyncConfig::default()).unwrap()
}

fn search_and_wait(service: &SyncService, term: &str) -> Result<SyncReport, SyncError> {
    let (tx, rx) = mpsc::channel();
    service.search(term, move |outcome| tx.send(outcome).unwrap());
    rx.recv_timeout(Duration::from_secs(10)).unwrap()
}

fn repo_names(owner: &Owner) -> Vec<String> {
    owner
        .repos
        .iter()
        .map(|repo| repo.repository_name.clone())
        .collect()
}

#[test]
fn search_caches_every_owner_with_details_and_repos() {
    let remote = Arc::new(FixtureRemote::default());
    let service = service_with(Arc::clone(&remote));
    let snapshots = Arc::new(Mutex::new(Vec::<Vec<Owner>>::new()));
    let sink = Arc::clone(&snapshots);
    service.subscribe(move |owners| sink.lock().unwrap().push(owners.to_vec()));

    let report = search_and_wait(&service, "  user ").unwrap();

    assert_eq!(report.term, "user");
    assert_eq!(report.owner_ids, vec![1, 2, 3, 4, 5]);
    assert_eq!((report.detail_failures, report.repo_failures), (0, 0));
    assert_eq!(*remote.requested_page_size.lock().unwrap(), Some(5));

    let owners = service.current_owners();
    assert_eq!(owners.len(), 5);
    for owner in &owners {
        let account_name = format!("user{}", owner.owner_id);
        assert_eq!(owner.account_name, account_name);
        assert_eq!(owner.user_name, format!("Name of {account_name}"));
        assert_eq!(owner.repos_count, 2);
        assert_eq!(
            repo_names(owner),
            vec![
                format!("{account_name}-repo-1"),
                format!("{account_name}-repo-2")
            ]
        );
    }

    let snapshots = snapshots.lock().unwrap();
    assert_eq!(snapshots.last(), Some(&owners));
}

#[test]
fn per_owner_fetch_failures_are_skipped_and_counted() {
    let remote = Arc::new(FixtureRemote {
        failing_details: HashSet::from(["user2".to_string()]),
        failing_repos: HashSet::from(["user4".to_string(), "user5".to_string()]),
        ..FixtureRemote::default()
    });
    let service = service_with(remote);

    let report = search_and_wait(&service, "user").unwrap();

    assert_eq!(report.detail_failures, 1);
    assert_eq!(report.repo_failures, 2);
    let owners = service.current_owners();
    assert_eq!(owners.len(), 5);
    assert_eq!(owners[1].user_name, "");
    assert_eq!(owners[1].avatar_url, "https://avatars.invalid/2");
    assert_eq!(repo_names(&owners[1]).len(), 2);
    assert!(owners[3].repos.is_empty());
    assert!(owners[4].repos.is_empty());
    assert_eq!(owners[3].user_name, "Name of user4");
}

#[test]
fn list_fetch_failure_reaches_the_caller() {
    let remote = Arc::new(FixtureRemote {
        search_failure: Some(403),
        ..FixtureRemote::default()
    });
    let service = service_with(remote);

    match search_and_wait(&service, "user") {
        Err(err @ SyncError::Server { status_code: 403 }) => {
            assert!(err.to_string().contains("rate limited"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(service.current_owners().is_empty());
}

#[test]
fn blank_term_completes_without_remote_calls() {
    let remote = Arc::new(FixtureRemote::default());
    let service = service_with(Arc::clone(&remote));

    let report = search_and_wait(&service, "   ").unwrap();

    assert_eq!(report, SyncReport::default());
    assert_eq!(remote.search_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn repeated_search_does_not_duplicate_owners_or_repos() {
    let remote = Arc::new(FixtureRemote::default());
    let service = service_with(remote);

    search_and_wait(&service, "user").unwrap();
    search_and_wait(&service, "user").unwrap();

    let store = service.storage().store();
    assert_eq!(store.view_storage().len(), 5);
    for owner in service.current_owners() {
        assert_eq!(owner.repos.len(), 2);
    }
}

#[test]
fn refresh_owner_loads_one_owner_and_narrows_the_query() {
    let remote = Arc::new(FixtureRemote::default());
    let service = service_with(remote);
    search_and_wait(&service, "user").unwrap();

    let (tx, rx) = mpsc::channel();
    service.refresh_owner(3, "user3", move |outcome| tx.send(outcome).unwrap());
    rx.recv_timeout(Duration::from_secs(10)).unwrap().unwrap();

    let owners = service.current_owners();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].owner_id, 3);
    assert_eq!(repo_names(&owners[0]), vec!["user3-repo-1", "user3-repo-2"]);
}

#[test]
fn refresh_owner_propagates_fetch_failures() {
    let remote = Arc::new(FixtureRemote {
        failing_repos: HashSet::from(["user9".to_string()]),
        ..FixtureRemote::default()
    });
    let service = service_with(remote);

    let (tx, rx) = mpsc::channel();
    service.refresh_owner(9, "user9", move |outcome| tx.send(outcome).unwrap());
    let outcome = rx.recv_timeout(Duration::from_secs(10)).unwrap();

    assert!(matches!(
        outcome,
        Err(SyncError::Fetch(FetchError::ConnectionLost))
    ));
    let owners = service.current_owners();
    assert_eq!(owners.len(), 1);
    assert!(owners[0].repos.is_empty());
}

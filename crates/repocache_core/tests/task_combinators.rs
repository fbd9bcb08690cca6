use repocache_core::{
    ConcurrentExecutor, Executor, FetchError, SerialExecutor, SyncError, Task, TaskResult,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

fn perform_and_wait(task: Task, executor: Arc<dyn Executor>) -> TaskResult {
    let (tx, rx) = mpsc::channel();
    task.perform(executor, move |outcome| tx.send(outcome).unwrap());
    rx.recv_timeout(Duration::from_secs(5)).unwrap()
}

fn counting_task(counter: &Arc<AtomicUsize>, delay: Duration, failure: Option<FetchError>) -> Task {
    let counter = Arc::clone(counter);
    Task::new(move |controller| {
        thread::spawn(move || {
            thread::sleep(delay);
            counter.fetch_add(1, Ordering::SeqCst);
            match failure {
                Some(err) => controller.fail(err.into()),
                None => controller.finish(),
            }
        });
    })
}

#[test]
fn group_waits_for_every_member_before_reporting_failure() {
    let executor = ConcurrentExecutor::new("group-fail");
    let counter = Arc::new(AtomicUsize::new(0));
    let slow = Duration::from_millis(50);
    let group = Task::group(vec![
        counting_task(&counter, slow, None),
        counting_task(&counter, Duration::ZERO, Some(FetchError::ConnectionLost)),
        counting_task(&counter, slow, None),
    ]);

    let started_at = Instant::now();
    let outcome = perform_and_wait(group, executor);

    assert!(started_at.elapsed() >= slow);
    assert_eq!(counter.load(Ordering::SeqCst), 3);
    match outcome {
        Err(SyncError::Aggregate(inner)) => {
            assert!(matches!(*inner, SyncError::Fetch(FetchError::ConnectionLost)));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn group_reports_one_of_several_failures() {
    let executor = ConcurrentExecutor::new("group-many");
    let counter = Arc::new(AtomicUsize::new(0));
    let group = Task::group(vec![
        counting_task(&counter, Duration::from_millis(5), Some(FetchError::Timeout)),
        counting_task(&counter, Duration::from_millis(5), Some(FetchError::Cancelled)),
    ]);

    match perform_and_wait(group, executor) {
        Err(SyncError::Aggregate(inner)) => assert!(matches!(
            *inner,
            SyncError::Fetch(FetchError::Timeout) | SyncError::Fetch(FetchError::Cancelled)
        )),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[test]
fn sequence_short_circuits_after_first_failure() {
    let executor = SerialExecutor::new("sequence-fail").unwrap();
    let counter = Arc::new(AtomicUsize::new(0));
    let third = Arc::new(AtomicUsize::new(0));
    let sequence = Task::sequence(vec![
        counting_task(&counter, Duration::from_millis(5), None),
        counting_task(&counter, Duration::ZERO, Some(FetchError::Unknown)),
        counting_task(&third, Duration::ZERO, None),
    ]);

    let outcome = perform_and_wait(sequence, executor);

    assert!(matches!(outcome, Err(SyncError::Fetch(FetchError::Unknown))));
    assert_eq!(counter.load(Ordering::SeqCst), 2);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(third.load(Ordering::SeqCst), 0);
}

#[test]
fn sequence_of_groups_composes() {
    let executor = ConcurrentExecutor::new("composed");
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));
    let observed_first = Arc::new(AtomicUsize::new(usize::MAX));

    let seen_first = Arc::clone(&first);
    let seen_observed = Arc::clone(&observed_first);
    let checkpoint = Task::new(move |controller| {
        seen_observed.store(seen_first.load(Ordering::SeqCst), Ordering::SeqCst);
        controller.finish();
    });

    let composed = Task::sequence(vec![
        Task::group(vec![
            counting_task(&first, Duration::from_millis(10), None),
            counting_task(&first, Duration::from_millis(20), None),
        ]),
        checkpoint,
        Task::group(vec![counting_task(&second, Duration::ZERO, None)]),
    ]);

    assert!(perform_and_wait(composed, executor).is_ok());
    assert_eq!(observed_first.load(Ordering::SeqCst), 2);
    assert_eq!(second.load(Ordering::SeqCst), 1);
}

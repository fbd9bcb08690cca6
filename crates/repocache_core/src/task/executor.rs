//! Named executors that run queued jobs.
//!
//! # Responsibility
//! - Provide serial executors (one worker thread, FIFO) for the read
//!   context and each write context.
//! - Provide a concurrent executor for remote fetch work.
//!
//! # Invariants
//! - Jobs submitted to one `SerialExecutor` run one at a time, in
//!   submission order.
//! - A panicking job is logged and does not stop the worker.
//! - No executor blocks its caller while a job runs.

use log::{error, warn};
use once_cell::sync::OnceCell;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

/// Unit of work accepted by an executor.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Dispatch target for jobs.
pub trait Executor: Send + Sync {
    fn name(&self) -> &str;
    fn execute(&self, job: Job);
}

/// Single worker thread draining a FIFO channel.
pub struct SerialExecutor {
    name: String,
    sender: Sender<Job>,
    worker: OnceCell<ThreadId>,
}

impl SerialExecutor {
    /// Spawns the named worker thread.
    ///
    /// The worker exits once every handle to this executor is dropped and
    /// the queue is drained.
    pub fn new(name: impl Into<String>) -> io::Result<Arc<Self>> {
        let name = name.into();
        let (sender, receiver) = mpsc::channel::<Job>();
        let thread_name = name.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                while let Ok(job) = receiver.recv() {
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!(
                            "event=executor_job module=task status=error executor={} error_code=job_panicked",
                            thread_name
                        );
                    }
                }
            })?;

        let executor = Arc::new(Self {
            name,
            sender,
            worker: OnceCell::new(),
        });
        let _ = executor.worker.set(handle.thread().id());
        Ok(executor)
    }

    /// Whether the calling thread is this executor's worker.
    pub fn is_current(&self) -> bool {
        self.worker.get() == Some(&thread::current().id())
    }
}

impl Executor for SerialExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, job: Job) {
        if self.sender.send(job).is_err() {
            error!(
                "event=executor_dispatch module=task status=error executor={} error_code=worker_gone",
                self.name
            );
        }
    }
}

/// Runs every job on its own named thread.
pub struct ConcurrentExecutor {
    name: String,
    spawned: AtomicU64,
}

impl ConcurrentExecutor {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            spawned: AtomicU64::new(0),
        })
    }
}

impl Executor for ConcurrentExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, job: Job) {
        let sequence = self.spawned.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(Mutex::new(Some(job)));
        let worker_slot = Arc::clone(&slot);
        let spawned = thread::Builder::new()
            .name(format!("{}-{sequence}", self.name))
            .spawn(move || {
                if let Some(job) = take_job(&worker_slot) {
                    job();
                }
            });

        if let Err(err) = spawned {
            warn!(
                "event=executor_dispatch module=task status=error executor={} error_code=spawn_failed error={} fallback=inline",
                self.name, err
            );
            if let Some(job) = take_job(&slot) {
                job();
            }
        }
    }
}

fn take_job(slot: &Mutex<Option<Job>>) -> Option<Job> {
    match slot.lock() {
        Ok(mut guard) => guard.take(),
        Err(poisoned) => poisoned.into_inner().take(),
    }
}

#[cfg(test)]
mod tests {
    use super::{ConcurrentExecutor, Executor, SerialExecutor};
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn serial_executor_preserves_submission_order() {
        let executor = SerialExecutor::new("test-serial").unwrap();
        let (tx, rx) = mpsc::channel();
        for index in 0..20 {
            let tx = tx.clone();
            executor.execute(Box::new(move || tx.send(index).unwrap()));
        }

        let received: Vec<i32> = (0..20)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(received, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn serial_executor_survives_panicking_job() {
        let executor = SerialExecutor::new("test-panic").unwrap();
        let (tx, rx) = mpsc::channel();
        executor.execute(Box::new(|| panic!("boom")));
        let handle = executor.clone();
        executor.execute(Box::new(move || tx.send(handle.is_current()).unwrap()));

        assert!(rx.recv_timeout(Duration::from_secs(2)).unwrap());
        assert!(!executor.is_current());
    }

    #[test]
    fn concurrent_executor_runs_jobs_in_parallel() {
        let executor = ConcurrentExecutor::new("test-concurrent");
        let (tx, rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let blocked_tx = tx.clone();
        executor.execute(Box::new(move || {
            release_rx.recv_timeout(Duration::from_secs(2)).unwrap();
            blocked_tx.send("slow").unwrap();
        }));
        executor.execute(Box::new(move || tx.send("fast").unwrap()));

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "fast");
        release_tx.send(()).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "slow");
    }
}

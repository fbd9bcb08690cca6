//! Task combinator runtime.
//!
//! # Responsibility
//! - Wrap one unit of asynchronous work behind an explicit completion
//!   handle (`Controller`).
//! - Compose tasks into `group` (parallel fan-out, join barrier) and
//!   `sequence` (ordered chain, short-circuit on failure).
//!
//! # Invariants
//! - `perform` reports exactly one outcome once the task completes.
//! - A `group` reports only after every member reported; its failure is the
//!   first failure observed (any member, not the earliest issued).
//! - A `sequence` starts member `n + 1` only after member `n` finished, and
//!   never starts members after a failure.
//! - No member task is ever cancelled.

pub mod executor;

use crate::error::SyncError;
use executor::Executor;
use log::{debug, warn};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub use executor::{ConcurrentExecutor, Job, SerialExecutor};

/// Outcome of one task.
pub type TaskResult = Result<(), SyncError>;

type Handler = Box<dyn FnOnce(TaskResult) + Send + 'static>;

/// Completion handle passed to a task body.
///
/// Calling neither `finish` nor `fail` leaves the task pending forever;
/// dropping an unfinished controller logs a warning.
pub struct Controller {
    executor: Arc<dyn Executor>,
    handler: Option<Handler>,
}

impl Controller {
    fn new(executor: Arc<dyn Executor>, handler: Handler) -> Self {
        Self {
            executor,
            handler: Some(handler),
        }
    }

    /// Executor the task was performed on.
    pub fn executor(&self) -> Arc<dyn Executor> {
        Arc::clone(&self.executor)
    }

    /// Completes the task successfully.
    pub fn finish(self) {
        self.complete(Ok(()));
    }

    /// Completes the task with `error`.
    pub fn fail(self, error: SyncError) {
        self.complete(Err(error));
    }

    fn complete(mut self, outcome: TaskResult) {
        if let Some(handler) = self.handler.take() {
            // Completion may arrive on any thread; hop back to the task's executor.
            self.executor.execute(Box::new(move || handler(outcome)));
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        if self.handler.is_some() {
            warn!(
                "event=task_abandoned module=task status=error executor={} error_code=controller_dropped",
                self.executor.name()
            );
        }
    }
}

/// One unit of asynchronous work.
pub struct Task {
    closure: Box<dyn FnOnce(Controller) + Send + 'static>,
}

impl Task {
    /// Wraps a body that must eventually call `finish` or `fail`.
    pub fn new<F>(closure: F) -> Self
    where
        F: FnOnce(Controller) + Send + 'static,
    {
        Self {
            closure: Box::new(closure),
        }
    }

    /// Task that completes immediately with success.
    pub fn finished() -> Self {
        Self::new(Controller::finish)
    }

    /// Schedules the body on `executor` and reports its outcome once.
    pub fn perform<F>(self, executor: Arc<dyn Executor>, on_complete: F)
    where
        F: FnOnce(TaskResult) + Send + 'static,
    {
        let controller_executor = Arc::clone(&executor);
        let closure = self.closure;
        executor.execute(Box::new(move || {
            closure(Controller::new(controller_executor, Box::new(on_complete)));
        }));
    }

    /// Runs every task concurrently and joins on all of them.
    ///
    /// Reports `SyncError::Aggregate` wrapping the first failure observed.
    pub fn group(tasks: Vec<Task>) -> Task {
        Task::new(move |controller| {
            if tasks.is_empty() {
                controller.finish();
                return;
            }

            let executor = controller.executor();
            let join = Arc::new(Mutex::new(GroupJoin {
                remaining: tasks.len(),
                first_error: None,
                controller: Some(controller),
            }));

            for task in tasks {
                let join = Arc::clone(&join);
                task.perform(Arc::clone(&executor), move |outcome| {
                    let completed = {
                        let mut state = match join.lock() {
                            Ok(guard) => guard,
                            Err(poisoned) => poisoned.into_inner(),
                        };
                        state.record(outcome)
                    };

                    if let Some((controller, first_error)) = completed {
                        match first_error {
                            Some(error) => controller.fail(SyncError::aggregate(error)),
                            None => controller.finish(),
                        }
                    }
                });
            }
        })
    }

    /// Runs tasks one at a time in order, stopping at the first failure.
    pub fn sequence(tasks: Vec<Task>) -> Task {
        let queue: VecDeque<Task> = tasks.into();
        Task::new(move |controller| perform_next(queue, controller))
    }
}

/// Join state shared by the members of one group.
struct GroupJoin {
    remaining: usize,
    first_error: Option<SyncError>,
    controller: Option<Controller>,
}

impl GroupJoin {
    /// Records one member outcome; returns the controller once all reported.
    fn record(&mut self, outcome: TaskResult) -> Option<(Controller, Option<SyncError>)> {
        if let Err(error) = outcome {
            if self.first_error.is_none() {
                self.first_error = Some(error);
            } else {
                debug!("event=task_group module=task status=error detail=later_failure_discarded error={error}");
            }
        }

        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining > 0 {
            return None;
        }
        self.controller
            .take()
            .map(|controller| (controller, self.first_error.take()))
    }
}

fn perform_next(mut remaining: VecDeque<Task>, controller: Controller) {
    let Some(task) = remaining.pop_front() else {
        controller.finish();
        return;
    };

    task.perform(controller.executor(), move |outcome| match outcome {
        Ok(()) => perform_next(remaining, controller),
        Err(error) => controller.fail(error),
    });
}

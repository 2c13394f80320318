//! Background tasks.
//!
//! Maintenance work (checkpoints, compaction) runs on one worker thread fed
//! by a bounded queue. A submitter keeps the task and blocks on its
//! [`TaskHandle`] when it needs the outcome.

mod checkpoint;
mod compact;
mod processor;

pub use checkpoint::ForceCheckpointTask;
pub use compact::CompactSegmentsTask;
pub use processor::{BgTaskProcessor, PeriodicTask};

use crate::error::{CoreError, CoreResult};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;

/// A unit of background work.
pub trait BgTask: Send + Sync {
    /// Short name for logs and errors.
    fn name(&self) -> &'static str;

    /// Runs the task on the worker thread.
    ///
    /// # Errors
    ///
    /// Returns whatever stopped the task. The error reaches waiters through
    /// [`TaskHandle::wait`].
    fn execute(&self) -> CoreResult<()>;

    /// Completion handle of this task.
    fn handle(&self) -> &TaskHandle;
}

#[derive(Default)]
struct Completion {
    outcome: Mutex<Option<Result<(), String>>>,
    done: Condvar,
}

/// Completion handle shared between a task and its waiters.
#[derive(Clone)]
pub struct TaskHandle {
    task: &'static str,
    completion: Arc<Completion>,
}

impl TaskHandle {
    /// Creates a pending handle for task `task`.
    #[must_use]
    pub fn new(task: &'static str) -> Self {
        Self {
            task,
            completion: Arc::new(Completion::default()),
        }
    }

    /// Records the outcome and wakes every waiter. Later calls are ignored.
    pub fn complete(&self, result: &CoreResult<()>) {
        let mut outcome = self.completion.outcome.lock();
        if outcome.is_none() {
            *outcome = Some(result.as_ref().map(|_| ()).map_err(ToString::to_string));
            self.completion.done.notify_all();
        }
    }

    /// Whether the task finished.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.completion.outcome.lock().is_some()
    }

    /// Blocks until the task finished.
    ///
    /// # Errors
    ///
    /// Returns `TaskFailed` carrying the task's error message.
    pub fn wait(&self) -> CoreResult<()> {
        let mut outcome = self.completion.outcome.lock();
        loop {
            match outcome.as_ref() {
                Some(Ok(())) => return Ok(()),
                Some(Err(message)) => {
                    return Err(CoreError::TaskFailed {
                        task: self.task.to_string(),
                        message: message.clone(),
                    })
                }
                None => self.completion.done.wait(&mut outcome),
            }
        }
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("task", &self.task)
            .field("done", &self.is_done())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn wait_returns_after_complete() {
        let handle = TaskHandle::new("test");
        let waiter = {
            let handle = handle.clone();
            thread::spawn(move || handle.wait())
        };
        handle.complete(&Ok(()));
        waiter.join().unwrap().unwrap();
        assert!(handle.is_done());
    }

    #[test]
    fn failure_reaches_waiters_as_task_failed() {
        let handle = TaskHandle::new("compact");
        handle.complete(&Err(CoreError::invalid_operation("boom")));
        handle.complete(&Ok(()));
        match handle.wait() {
            Err(CoreError::TaskFailed { task, message }) => {
                assert_eq!(task, "compact");
                assert!(message.contains("boom"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}

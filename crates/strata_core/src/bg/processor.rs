//! The background worker.

use super::BgTask;
use crate::error::{CoreError, CoreResult};
use crate::stats::StorageStats;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Work the worker runs on its own every `interval` while idle.
pub struct PeriodicTask {
    name: &'static str,
    interval: Duration,
    run: Box<dyn FnMut() -> CoreResult<()> + Send>,
}

impl PeriodicTask {
    /// Creates a periodic task.
    pub fn new(
        name: &'static str,
        interval: Duration,
        run: impl FnMut() -> CoreResult<()> + Send + 'static,
    ) -> Self {
        Self {
            name,
            interval,
            run: Box::new(run),
        }
    }
}

/// Runs submitted tasks one at a time, in submission order.
///
/// Tasks queued before [`BgTaskProcessor::stop`] still run; submissions
/// after it fail with `StorageClosed`.
pub struct BgTaskProcessor {
    sender: Mutex<Option<Sender<Arc<dyn BgTask>>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl BgTaskProcessor {
    /// Starts the worker thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn start(
        queue_capacity: usize,
        stats: Arc<StorageStats>,
        periodic: Option<PeriodicTask>,
    ) -> CoreResult<Self> {
        let (sender, receiver) = bounded(queue_capacity.max(1));
        let worker = thread::Builder::new()
            .name("strata-bg".into())
            .spawn(move || worker_loop(&receiver, &stats, periodic))?;
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Queues `task`. Blocks while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns `StorageClosed` once the processor is stopped.
    pub fn submit(&self, task: Arc<dyn BgTask>) -> CoreResult<()> {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Err(CoreError::StorageClosed);
        };
        debug!(task = task.name(), "submitting task");
        sender.send(task).map_err(|_| CoreError::StorageClosed)
    }

    /// Runs the queued tasks, then joins the worker. Idempotent.
    pub fn stop(&self) {
        drop(self.sender.lock().take());
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                warn!("background worker panicked");
            }
        }
    }

    /// Whether tasks are still accepted.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.sender.lock().is_some()
    }
}

impl fmt::Debug for BgTaskProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BgTaskProcessor")
            .field("running", &self.is_running())
            .finish()
    }
}

impl Drop for BgTaskProcessor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs `work`, turning a panic into `TaskFailed` so the worker lives on.
fn guarded(name: &'static str, work: impl FnOnce() -> CoreResult<()>) -> CoreResult<()> {
    panic::catch_unwind(AssertUnwindSafe(work)).unwrap_or_else(|payload| {
        Err(CoreError::TaskFailed {
            task: name.to_string(),
            message: format!("panicked: {}", panic_message(payload.as_ref())),
        })
    })
}

fn run_task(task: &dyn BgTask, stats: &StorageStats) {
    let started = Instant::now();
    let result = guarded(task.name(), || task.execute());
    match &result {
        Ok(()) => debug!(
            task = task.name(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "task finished"
        ),
        Err(e) => {
            stats.record_task_failure();
            warn!(task = task.name(), error = %e, "task failed");
        }
    }
    task.handle().complete(&result);
}

fn worker_loop(
    receiver: &Receiver<Arc<dyn BgTask>>,
    stats: &StorageStats,
    mut periodic: Option<PeriodicTask>,
) {
    let mut last_run = Instant::now();
    loop {
        let Some(hook) = periodic.as_mut() else {
            match receiver.recv() {
                Ok(task) => run_task(task.as_ref(), stats),
                Err(_) => break,
            }
            continue;
        };

        let wait = hook.interval.saturating_sub(last_run.elapsed());
        match receiver.recv_timeout(wait) {
            Ok(task) => run_task(task.as_ref(), stats),
            Err(RecvTimeoutError::Timeout) => {
                last_run = Instant::now();
                if let Err(e) = guarded(hook.name, &mut hook.run) {
                    stats.record_task_failure();
                    warn!(task = hook.name, error = %e, "periodic task failed");
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    info!("background worker stopped");
}

//! Structured concurrency for a batch of fiber work (§5): spawn a set
//! of tasks onto the scheduler, and if any one fails, cancel the rest
//! and report the first failure rather than leaving orphaned work
//! running. Used by the macro/restriction pipeline to fan semantic
//! restrictions out in parallel (§4.D step 4) and by the build
//! orchestrator's recursive tracing (§4.E).
//!
//! Adapted from a thread-per-task nursery to scheduler tasks: instead
//! of joining `JoinHandle`s, completions are collected from a channel,
//! and a cooperative `CancelToken` replaces killing an OS thread.

use crate::scheduler::{Scheduler, TaskPriority};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// A cooperative cancellation flag shared with every task in a
/// nursery. Tasks should check `is_cancelled()` at safe points and
/// return early when set.
#[derive(Clone)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CancelToken(cancelled={})", self.is_cancelled())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NurseryError {
    #[error("task {task_id} failed: {error}")]
    TaskFailed { task_id: u64, error: String },
    #[error("nursery was cancelled before all tasks completed")]
    Cancelled,
    #[error("task {task_id} panicked: {message}")]
    TaskPanicked { task_id: u64, message: String },
}

/// Spawns fiber tasks onto a `Scheduler` and waits for all of them, or
/// cancels the rest on the first failure.
pub struct FiberNursery<'s> {
    scheduler: &'s Scheduler,
    cancel_token: CancelToken,
    next_id: std::sync::atomic::AtomicU64,
    spawned: std::sync::atomic::AtomicU64,
    results_tx: Sender<(u64, Result<String, String>)>,
    results_rx: Receiver<(u64, Result<String, String>)>,
}

impl<'s> FiberNursery<'s> {
    pub fn new(scheduler: &'s Scheduler) -> Self {
        let (results_tx, results_rx) = unbounded();
        Self {
            scheduler,
            cancel_token: CancelToken::new(),
            next_id: std::sync::atomic::AtomicU64::new(0),
            spawned: std::sync::atomic::AtomicU64::new(0),
            results_tx,
            results_rx,
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel_token.clone()
    }

    pub fn spawned_count(&self) -> u64 {
        self.spawned.load(Ordering::SeqCst)
    }

    /// Spawns one task. The task receives its `CancelToken` and should
    /// honor it cooperatively.
    pub fn spawn<F>(&self, priority: TaskPriority, f: F) -> u64
    where
        F: FnOnce(CancelToken) -> Result<String, String> + Send + 'static,
    {
        let task_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.spawned.fetch_add(1, Ordering::SeqCst);
        let cancel_token = self.cancel_token.clone();
        let tx = self.results_tx.clone();
        self.scheduler.execute(priority, move || {
            let outcome = catch_unwind(AssertUnwindSafe(|| f(cancel_token)));
            let result = match outcome {
                Ok(r) => r,
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    Err(format!("__panic__:{message}"))
                }
            };
            let _ = tx.send((task_id, result));
        });
        task_id
    }

    /// Waits for every spawned task. On first failure, cancels the
    /// token, drains remaining results (without waiting further on
    /// them to finish any additional work), and returns that failure.
    pub fn wait_all(&self) -> Result<Vec<String>, NurseryError> {
        let total = self.spawned.load(Ordering::SeqCst) as usize;
        let mut results = Vec::with_capacity(total);
        let mut first_error = None;

        for _ in 0..total {
            match self.results_rx.recv() {
                Ok((_task_id, Ok(value))) => {
                    if first_error.is_none() {
                        results.push(value);
                    }
                }
                Ok((task_id, Err(message))) => {
                    if first_error.is_none() {
                        self.cancel_token.cancel();
                        first_error = Some(if let Some(stripped) = message.strip_prefix("__panic__:") {
                            NurseryError::TaskPanicked {
                                task_id,
                                message: stripped.to_string(),
                            }
                        } else {
                            NurseryError::TaskFailed {
                                task_id,
                                error: message,
                            }
                        });
                    }
                }
                Err(_) => break,
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(results),
        }
    }
}

//! Work-unit accounting and the quiescence hook (§4.A, §9).
//!
//! The guarantee that "exactly one solution ⇒ invoke completion"
//! depends on `queued` being incremented before the unit that might
//! enqueue more work runs, and `completed` being incremented, under
//! the same monitor, only after it returns. `WorkUnitTracker` is that
//! monitor; the task itself always runs outside the lock.

use crate::scheduler::{Scheduler, TaskPriority};
use std::sync::{Arc, Mutex};

pub type QuiescenceHook = Box<dyn FnOnce() + Send + 'static>;

struct Inner {
    queued: u64,
    completed: u64,
    hook: Option<QuiescenceHook>,
}

/// Tracks queued/completed work units for one top-level parse attempt
/// (or any other bounded burst of fanned-out work) and fires a
/// registered hook the instant the two counts become equal and
/// non-zero.
#[derive(Clone)]
pub struct WorkUnitTracker {
    inner: Arc<Mutex<Inner>>,
}

impl Default for WorkUnitTracker {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                queued: 0,
                completed: 0,
                hook: None,
            })),
        }
    }
}

impl WorkUnitTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the quiescence hook. At most one may be active; a
    /// second call replaces the first (callers are expected to use one
    /// tracker per top-level parse attempt).
    pub fn set_hook(&self, hook: QuiescenceHook) {
        self.inner.lock().expect("quiescence monitor poisoned").hook = Some(hook);
    }

    /// `queued++; run task (outside the monitor); completed++; if
    /// queued == completed, invoke the hook.`
    pub fn run_work_unit(
        &self,
        scheduler: &Scheduler,
        priority: TaskPriority,
        task: impl FnOnce() + Send + 'static,
    ) {
        {
            let mut inner = self.inner.lock().expect("quiescence monitor poisoned");
            inner.queued += 1;
        }
        let this = self.clone();
        scheduler.execute(priority, move || {
            task();
            let hook_to_run = {
                let mut inner = this.inner.lock().expect("quiescence monitor poisoned");
                inner.completed += 1;
                if inner.queued == inner.completed {
                    inner.hook.take()
                } else {
                    None
                }
            };
            if let Some(hook) = hook_to_run {
                hook();
            }
        });
    }

    pub fn queued(&self) -> u64 {
        self.inner.lock().expect("quiescence monitor poisoned").queued
    }

    pub fn completed(&self) -> u64 {
        self.inner.lock().expect("quiescence monitor poisoned").completed
    }

    pub fn is_quiescent(&self) -> bool {
        let inner = self.inner.lock().expect("quiescence monitor poisoned");
        inner.queued != 0 && inner.queued == inner.completed
    }
}

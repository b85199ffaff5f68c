//! `Fiber`: a unit of user-code execution with its own state machine,
//! not a thread (§3, §4.A).

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::YieldType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FiberState {
    Unstarted,
    Running,
    Suspended,
    Interrupted,
    Parked,
    Asleep,
    Terminated,
    Aborted,
    Retired,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("illegal fiber state transition: {from:?} -> {to:?}")]
pub struct IllegalTransition {
    pub from: FiberState,
    pub to: FiberState,
}

impl FiberState {
    /// The transition table fixed by §4.A. Any pair not listed here is
    /// a contract violation.
    pub fn can_transition_to(self, to: FiberState) -> bool {
        use FiberState::*;
        matches!(
            (self, to),
            (Unstarted, Running)
                | (Running, Suspended)
                | (Running, Interrupted)
                | (Running, Parked)
                | (Running, Terminated)
                | (Running, Aborted)
                | (Suspended, Running)
                | (Suspended, Asleep)
                | (Suspended, Aborted)
                | (Parked, Suspended)
                | (Asleep, Suspended)
                | (Interrupted, Running)
                | (Terminated, Aborted)
                | (Terminated, Retired)
                | (Aborted, Retired)
        )
    }
}

/// Priority ordering used by the scheduler; lower numeric value runs
/// first, matching a typical "priority 0 is highest" convention.
pub type Priority = u8;

/// Two independently settable cancellation signals (§4.A
/// "Cancellation"). Each is a single atomic so setting either is
/// racy-safe without a lock.
#[derive(Debug, Default)]
pub struct InterruptFlags {
    pub termination_requested: AtomicBool,
    pub reification_requested: AtomicBool,
}

impl InterruptFlags {
    pub fn request_termination(&self) {
        self.termination_requested.store(true, Ordering::SeqCst);
    }

    pub fn request_reification(&self) {
        self.reification_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_termination_requested(&self) -> bool {
        self.termination_requested.load(Ordering::SeqCst)
    }

    pub fn is_reification_requested(&self) -> bool {
        self.reification_requested.load(Ordering::SeqCst)
    }
}

/// A unit of user-code execution. The continuation itself is owned by
/// the scheduler crate (`skein-rt`), which is the only thing that
/// resumes fibers; this struct holds the state machine and the
/// bookkeeping the core data model is responsible for.
pub struct Fiber {
    pub result_type: YieldType,
    pub priority: Priority,
    state: Mutex<FiberState>,
    pub fiber_globals: Mutex<std::collections::BTreeMap<String, String>>,
    pub heritable_globals: Mutex<std::collections::BTreeMap<String, String>>,
    pub interrupt_flags: Arc<InterruptFlags>,
    /// Per-fiber textual trace flags (§3); interpreted by the
    /// scheduler, stored here since they are part of fiber identity.
    pub trace_flags: Mutex<Vec<String>>,
}

impl Fiber {
    pub fn new(result_type: YieldType, priority: Priority) -> Self {
        Self {
            result_type,
            priority,
            state: Mutex::new(FiberState::Unstarted),
            fiber_globals: Mutex::new(std::collections::BTreeMap::new()),
            heritable_globals: Mutex::new(std::collections::BTreeMap::new()),
            interrupt_flags: Arc::new(InterruptFlags::default()),
            trace_flags: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> FiberState {
        *self.state.lock().expect("fiber state lock poisoned")
    }

    /// Attempts the transition; on success the new state is recorded
    /// and returned, on failure the fiber's state is left unchanged.
    pub fn transition(&self, to: FiberState) -> Result<FiberState, IllegalTransition> {
        let mut guard = self.state.lock().expect("fiber state lock poisoned");
        if !guard.can_transition_to(to) {
            return Err(IllegalTransition { from: *guard, to });
        }
        *guard = to;
        Ok(to)
    }

    /// Reads a fiber-global written by a prefix function (§4.D) under
    /// the given well-known key.
    pub fn read_global(&self, key: &str) -> Option<String> {
        self.fiber_globals
            .lock()
            .expect("fiber globals lock poisoned")
            .get(key)
            .cloned()
    }

    pub fn write_global(&self, key: impl Into<String>, value: impl Into<String>) {
        self.fiber_globals
            .lock()
            .expect("fiber globals lock poisoned")
            .insert(key.into(), value.into());
    }
}

impl std::fmt::Debug for Fiber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fiber")
            .field("state", &self.state())
            .field("priority", &self.priority)
            .finish()
    }
}

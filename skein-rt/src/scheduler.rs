//! A bounded thread pool executing tasks drawn from a priority queue
//! (§5 "Scheduling model").
//!
//! Task priority is a coarse integer; ties among parser tasks are
//! broken by leftmost token position first. Dispatch checks a single
//! process-wide `shouldStop` flag before running each task and
//! short-circuits if it is set (§5 "Cancellation & timeouts").

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Coarse scheduling priority; tasks from the parser additionally
/// carry a token position used to break ties leftmost-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskPriority {
    pub priority: u8,
    pub token_position: usize,
}

impl TaskPriority {
    pub fn new(priority: u8, token_position: usize) -> Self {
        Self {
            priority,
            token_position,
        }
    }

    /// A priority with no meaningful token position, for build-side
    /// work (tracing, loading) that isn't tied to a parse attempt.
    pub fn plain(priority: u8) -> Self {
        Self {
            priority,
            token_position: 0,
        }
    }
}

struct QueuedTask {
    priority: TaskPriority,
    sequence: u64,
    task: Task,
}

impl QueuedTask {
    fn rank(&self) -> (u8, usize, std::cmp::Reverse<u64>) {
        // Lower priority number runs first; among equal priority,
        // lower token position runs first; among those, earlier
        // sequence runs first (stable ordering for otherwise-tied
        // tasks). `BinaryHeap` is a max-heap, so we want the
        // "should run first" task to compare as *greater*: negate the
        // priority and position by reversing the whole tuple's
        // ordering in `Ord`, below.
        (self.priority.priority, self.priority.token_position, std::cmp::Reverse(self.sequence))
    }
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.rank() == other.rank()
    }
}
impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse so the heap's "greatest" element is the task that
        // should run first (lowest priority number, lowest token
        // position, earliest sequence).
        other.rank().cmp(&self.rank())
    }
}

struct SchedulerShared {
    queue: Mutex<BinaryHeap<QueuedTask>>,
    not_empty: Condvar,
    should_stop: AtomicBool,
    next_sequence: AtomicU64,
    pending: AtomicU64,
}

/// A bounded worker-thread pool. Dropping the last handle joins all
/// workers after signaling shutdown.
pub struct Scheduler {
    shared: Arc<SchedulerShared>,
    workers: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(num_workers: usize) -> Self {
        let shared = Arc::new(SchedulerShared {
            queue: Mutex::new(BinaryHeap::new()),
            not_empty: Condvar::new(),
            should_stop: AtomicBool::new(false),
            next_sequence: AtomicU64::new(0),
            pending: AtomicU64::new(0),
        });

        let workers = (0..num_workers.max(1))
            .map(|_| {
                let shared = shared.clone();
                thread::spawn(move || Self::worker_loop(shared))
            })
            .collect();

        Self { shared, workers }
    }

    /// A pool sized to the available parallelism, via `num_cpus`, the
    /// usual default for a CPU-bound pool.
    pub fn with_default_workers() -> Self {
        Self::new(num_cpus::get().max(1))
    }

    fn worker_loop(shared: Arc<SchedulerShared>) {
        loop {
            let next = {
                let mut queue = shared.queue.lock().expect("scheduler queue poisoned");
                loop {
                    if shared.should_stop.load(AtomicOrdering::SeqCst) {
                        return;
                    }
                    if let Some(task) = queue.pop() {
                        break task;
                    }
                    queue = shared
                        .not_empty
                        .wait(queue)
                        .expect("scheduler queue poisoned");
                }
            };
            if shared.should_stop.load(AtomicOrdering::SeqCst) {
                shared.pending.fetch_sub(1, AtomicOrdering::SeqCst);
                return;
            }
            (next.task)();
            shared.pending.fetch_sub(1, AtomicOrdering::SeqCst);
        }
    }

    /// Places `task` on the pool at the given priority.
    pub fn execute(&self, priority: TaskPriority, task: impl FnOnce() + Send + 'static) {
        let sequence = self.shared.next_sequence.fetch_add(1, AtomicOrdering::SeqCst);
        self.shared.pending.fetch_add(1, AtomicOrdering::SeqCst);
        let mut queue = self.shared.queue.lock().expect("scheduler queue poisoned");
        queue.push(QueuedTask {
            priority,
            sequence,
            task: Box::new(task),
        });
        self.shared.not_empty.notify_one();
    }

    /// Number of tasks queued or running, not yet completed.
    pub fn pending_count(&self) -> u64 {
        self.shared.pending.load(AtomicOrdering::SeqCst)
    }

    /// The process-wide `shouldStop` flag (§5). Every scheduler
    /// dispatch point checks it.
    pub fn request_stop(&self) {
        self.shared.should_stop.store(true, AtomicOrdering::SeqCst);
        self.shared.not_empty.notify_all();
    }

    pub fn is_stopping(&self) -> bool {
        self.shared.should_stop.load(AtomicOrdering::SeqCst)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.request_stop();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn runs_a_single_task() {
        let scheduler = Scheduler::new(2);
        let (tx, rx) = mpsc::channel();
        scheduler.execute(TaskPriority::plain(0), move || tx.send(42).unwrap());
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 42);
    }

    #[test]
    fn higher_priority_number_never_blocks_lower_forever() {
        let scheduler = Scheduler::new(1);
        let (tx, rx) = mpsc::channel();
        for i in 0..5 {
            let tx = tx.clone();
            scheduler.execute(TaskPriority::plain(0), move || tx.send(i).unwrap());
        }
        let mut seen = vec![];
        for _ in 0..5 {
            seen.push(rx.recv_timeout(Duration::from_secs(1)).unwrap());
        }
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn leftmost_token_position_runs_before_rightmost_at_same_priority() {
        let scheduler = Scheduler::new(1);
        let (tx, rx) = mpsc::channel();
        // Enqueue rightmost first so ordering only passes if the
        // scheduler actually reorders by position.
        let tx2 = tx.clone();
        scheduler.execute(TaskPriority::new(0, 10), move || tx2.send("right").unwrap());
        scheduler.execute(TaskPriority::new(0, 1), move || tx.send("left").unwrap());

        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), "left");
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), "right");
    }

    #[test]
    fn request_stop_prevents_further_progress() {
        let scheduler = Scheduler::new(1);
        scheduler.request_stop();
        assert!(scheduler.is_stopping());
    }

    #[test]
    fn pending_count_drops_to_zero_after_completion() {
        let scheduler = Scheduler::new(2);
        let (tx, rx) = mpsc::channel();
        scheduler.execute(TaskPriority::plain(0), move || tx.send(()).unwrap());
        rx.recv_timeout(Duration::from_secs(1)).unwrap();
        // Give the worker a moment to decrement after returning from
        // the task closure.
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(scheduler.pending_count(), 0);
    }
}

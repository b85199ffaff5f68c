//! A simple, lock-guarded injection queue.
//!
//! A lock-free MPMC queue would work here too, but the queue is never
//! the contended resource in this scheduler: tasks hold the lock for
//! the time it takes to push or pop one entry, and entries themselves
//! carry the expensive work. A plain `Mutex<VecDeque<T>>` keeps the
//! scheduler's locking story legible.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub struct InjectionQueue<T> {
    inner: Arc<Mutex<VecDeque<T>>>,
}

impl<T> Default for InjectionQueue<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::new())),
        }
    }
}

impl<T> InjectionQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, item: T) {
        self.inner.lock().expect("injection queue poisoned").push_back(item);
    }

    pub fn pop(&self) -> Option<T> {
        self.inner.lock().expect("injection queue poisoned").pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("injection queue poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for InjectionQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "InjectionQueue(len={})", self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn push_then_pop_is_fifo() {
        let q = InjectionQueue::new();
        q.push(1);
        q.push(2);
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn empty_queue_reports_empty() {
        let q: InjectionQueue<i32> = InjectionQueue::new();
        assert!(q.is_empty());
    }

    #[test]
    fn clone_shares_the_same_backing_queue() {
        let q = InjectionQueue::new();
        let q2 = q.clone();
        q.push(5);
        assert_eq!(q2.pop(), Some(5));
    }

    #[test]
    fn concurrent_pushes_are_all_observed() {
        let q: InjectionQueue<usize> = InjectionQueue::new();
        thread::scope(|scope| {
            for i in 0..8 {
                let q = q.clone();
                scope.spawn(move || q.push(i));
            }
        });
        assert_eq!(q.len(), 8);
    }
}

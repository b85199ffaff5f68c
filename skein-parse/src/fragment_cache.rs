//! The fragment cache: memoization keyed by `ParserState` (§4.C).
//!
//! On first lookup at a position the caller starts a single parse and
//! records each delivered solution; concurrent and later lookups at
//! the same position subscribe to the same list and are re-delivered
//! every solution that has arrived (and every solution that arrives
//! later), in arbitrary order. A single monitor per entry guards both
//! the started/finished state and the solutions/subscribers lists
//! (§5 "Shared-resource policy").

use crossbeam_channel::{unbounded, Receiver, Sender};
use skein_core::ParserState;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

struct CacheEntry<T> {
    solutions: Vec<T>,
    subscribers: Vec<Sender<T>>,
    finished: bool,
}

impl<T: Clone> CacheEntry<T> {
    fn new() -> Self {
        Self {
            solutions: Vec::new(),
            subscribers: Vec::new(),
            finished: false,
        }
    }

    fn deliver(&mut self, value: T) {
        self.solutions.push(value.clone());
        self.subscribers.retain(|s| s.send(value.clone()).is_ok());
    }

    fn finish(&mut self) {
        self.finished = true;
        self.subscribers.clear();
    }
}

/// A subscription to one position's solution list: the solutions
/// already recorded when the subscriber joined, plus a channel for
/// anything delivered afterward (empty/closed if the parse had
/// already finished).
pub struct Subscription<T> {
    pub already_delivered: Vec<T>,
    pub live: Receiver<T>,
}

/// Handle returned to whichever caller is responsible for actually
/// running the parse at a position (the first lookup).
pub struct ParseOwner<T> {
    entry: Arc<Mutex<CacheEntry<T>>>,
}

impl<T: Clone> ParseOwner<T> {
    pub fn deliver(&self, value: T) {
        self.entry.lock().expect("fragment cache entry poisoned").deliver(value);
    }

    pub fn finish(&self) {
        self.entry.lock().expect("fragment cache entry poisoned").finish();
    }
}

/// Memoizes parse attempts by `ParserState`.
pub struct FragmentCache<T> {
    entries: Mutex<HashMap<ParserState, Arc<Mutex<CacheEntry<T>>>>>,
}

impl<T: Clone> Default for FragmentCache<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

pub enum Lookup<T> {
    /// This caller is first; it owns running the parse and must call
    /// `deliver`/`finish` on the returned owner handle.
    Owner(ParseOwner<T>, Subscription<T>),
    /// Another caller already started (or finished) the parse at this
    /// position; subscribe to its results instead of re-parsing.
    Subscriber(Subscription<T>),
}

impl<T: Clone> FragmentCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up (or creates) the entry for `state`. The eliminator
    /// above distinguishes the single caller that must actually run
    /// the parse from every other caller, which only subscribes.
    pub fn lookup(&self, state: ParserState) -> Lookup<T> {
        let (entry, is_owner) = {
            let mut entries = self.entries.lock().expect("fragment cache map poisoned");
            match entries.get(&state) {
                Some(existing) => (existing.clone(), false),
                None => {
                    let fresh = Arc::new(Mutex::new(CacheEntry::new()));
                    entries.insert(state, fresh.clone());
                    (fresh, true)
                }
            }
        };

        let (tx, rx) = unbounded();
        let already_delivered = {
            let mut guard = entry.lock().expect("fragment cache entry poisoned");
            if !guard.finished {
                guard.subscribers.push(tx);
            }
            guard.solutions.clone()
        };
        let subscription = Subscription {
            already_delivered,
            live: rx,
        };

        if is_owner {
            Lookup::Owner(ParseOwner { entry }, subscription)
        } else {
            Lookup::Subscriber(subscription)
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("fragment cache map poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn first_lookup_is_the_owner() {
        let cache: FragmentCache<i32> = FragmentCache::new();
        match cache.lookup(ParserState::new(0)) {
            Lookup::Owner(..) => {}
            Lookup::Subscriber(..) => panic!("expected owner"),
        }
    }

    #[test]
    fn second_lookup_at_same_state_is_a_subscriber() {
        let cache: FragmentCache<i32> = FragmentCache::new();
        let _owner = cache.lookup(ParserState::new(0));
        match cache.lookup(ParserState::new(0)) {
            Lookup::Subscriber(..) => {}
            Lookup::Owner(..) => panic!("expected subscriber"),
        }
    }

    #[test]
    fn subscriber_sees_solutions_delivered_before_it_joined() {
        let cache: FragmentCache<i32> = FragmentCache::new();
        let owner = match cache.lookup(ParserState::new(0)) {
            Lookup::Owner(owner, _) => owner,
            _ => unreachable!(),
        };
        owner.deliver(1);
        owner.deliver(2);

        match cache.lookup(ParserState::new(0)) {
            Lookup::Subscriber(sub) => {
                assert_eq!(sub.already_delivered, vec![1, 2]);
            }
            _ => panic!("expected subscriber"),
        }
    }

    #[test]
    fn subscriber_sees_solutions_delivered_after_it_joined() {
        let cache: FragmentCache<i32> = FragmentCache::new();
        let owner = match cache.lookup(ParserState::new(0)) {
            Lookup::Owner(owner, _) => owner,
            _ => unreachable!(),
        };
        let sub = match cache.lookup(ParserState::new(0)) {
            Lookup::Subscriber(sub) => sub,
            _ => unreachable!(),
        };
        owner.deliver(99);
        assert_eq!(sub.live.recv_timeout(Duration::from_secs(1)).unwrap(), 99);
    }

    #[test]
    fn different_states_get_independent_entries() {
        let cache: FragmentCache<i32> = FragmentCache::new();
        let _a = cache.lookup(ParserState::new(0));
        match cache.lookup(ParserState::new(1)) {
            Lookup::Owner(..) => {}
            Lookup::Subscriber(..) => panic!("states differ; expected a fresh owner"),
        }
        assert_eq!(cache.len(), 2);
    }
}

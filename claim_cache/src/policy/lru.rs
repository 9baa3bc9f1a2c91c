use std::collections::{BTreeMap, HashMap};
use std::fmt;

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use utils::ByteSize;

use super::{CachePolicy, Evictable, PolicyKey};

struct TrackedEntry {
    ordering: u64,
    size: i64,
    handle: Box<dyn Evictable>,
}

#[derive(Default)]
struct LruState {
    /// Recency order; the smallest ordering is the least recently used.
    queue: BTreeMap<u64, PolicyKey>,
    entries: HashMap<PolicyKey, TrackedEntry>,
    next_ordering: u64,
    current_size: i64,
    max_size: i64,
}

impl LruState {
    fn bump(&mut self) -> u64 {
        self.next_ordering += 1;
        self.next_ordering
    }

    fn insert(&mut self, key: PolicyKey, ordering: u64, size: i64, handle: Box<dyn Evictable>) -> Option<TrackedEntry> {
        let previous = self.remove(&key);
        self.queue.insert(ordering, key.clone());
        self.entries.insert(key, TrackedEntry { ordering, size, handle });
        self.current_size += size;
        previous
    }

    fn remove(&mut self, key: &PolicyKey) -> Option<TrackedEntry> {
        let entry = self.entries.remove(key)?;
        self.queue.remove(&entry.ordering);
        self.current_size -= entry.size;
        Some(entry)
    }

    fn over_budget(&self) -> bool {
        self.current_size > self.max_size
    }
}

/// Least-recently-used eviction over a byte budget.
///
/// Tracking and updating an entry moves it to the back of the queue; eviction always
/// takes the front. Handles are evicted with the policy lock released, so deleting data
/// never blocks other managers from tracking or untracking.
pub struct LruCachePolicy {
    state: Mutex<LruState>,
}

impl LruCachePolicy {
    pub fn new(max_size: i64) -> Self {
        Self {
            state: Mutex::new(LruState {
                max_size,
                ..Default::default()
            }),
        }
    }

    pub fn with_capacity(capacity: ByteSize) -> Self {
        Self::new(capacity.as_i64())
    }

    /// Tracked keys from least to most recently used.
    pub fn keys_by_recency(&self) -> Vec<PolicyKey> {
        self.state.lock().queue.values().cloned().collect()
    }
}

impl CachePolicy for LruCachePolicy {
    fn track(&self, key: PolicyKey, handle: Box<dyn Evictable>) {
        let size = handle.size();
        let replaced = {
            let mut state = self.state.lock();
            let ordering = state.bump();
            state.insert(key, ordering, size, handle)
        };
        drop(replaced);
    }

    fn update(&self, key: &PolicyKey) -> bool {
        {
            let mut state = self.state.lock();
            let Some(entry) = state.entries.get(key) else {
                return false;
            };
            let (old_ordering, old_size, new_size) = (entry.ordering, entry.size, entry.handle.size());
            let ordering = state.bump();
            state.queue.remove(&old_ordering);
            state.queue.insert(ordering, key.clone());
            state.current_size += new_size - old_size;
            if let Some(entry) = state.entries.get_mut(key) {
                entry.ordering = ordering;
                entry.size = new_size;
            }
        }
        self.check_budget();
        true
    }

    fn untrack(&self, key: &PolicyKey) -> bool {
        let removed = self.state.lock().remove(key);
        removed.is_some()
    }

    fn check_budget(&self) {
        // Entries whose eviction fails come back through `track`; each entry present at the
        // start gets one attempt per pass.
        let mut attempts_left = None;
        loop {
            let (ordering, key, entry) = {
                let mut state = self.state.lock();
                if !state.over_budget() {
                    return;
                }
                if state.queue.is_empty() {
                    panic!(
                        "cache policy is over budget ({} > {}) with nothing left to evict",
                        state.current_size, state.max_size
                    );
                }
                let attempts = attempts_left.get_or_insert(state.queue.len());
                if *attempts == 0 {
                    warn!(
                        current_size = state.current_size,
                        max_size = state.max_size,
                        "cache is still over budget after trying every entry once"
                    );
                    return;
                }
                *attempts -= 1;
                let Some((ordering, key)) = state.queue.pop_first() else {
                    return;
                };
                let Some(entry) = state.entries.remove(&key) else {
                    panic!("eviction queue references untracked entry {key}");
                };
                state.current_size -= entry.size;
                (ordering, key, entry)
            };

            {
                let mut state = self.state.lock();
                if state.current_size + entry.size <= state.max_size {
                    // Others shrank the cache in the meantime; keep the entry where it was.
                    let size = entry.size;
                    let _ = state.insert(key, ordering, size, entry.handle);
                    return;
                }
            }

            debug!(key = %key, size = entry.size, "evicting least recently used entry");
            entry.handle.evict();
        }
    }

    fn set_max_size(&self, max_size: i64) {
        {
            let mut state = self.state.lock();
            info!(
                "cache budget changed from {} to {}",
                ByteSize::new(state.max_size.max(0) as u64),
                ByteSize::new(max_size.max(0) as u64)
            );
            state.max_size = max_size;
        }
        self.check_budget();
    }

    fn max_size(&self) -> i64 {
        self.state.lock().max_size
    }

    fn current_size(&self) -> i64 {
        self.state.lock().current_size
    }

    fn len(&self) -> usize {
        self.state.lock().entries.len()
    }
}

impl fmt::Debug for LruCachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("LruCachePolicy")
            .field("current_size", &state.current_size)
            .field("max_size", &state.max_size)
            .field("entries", &state.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    use parking_lot::Mutex;
    use tracing_test::traced_test;

    use super::*;

    struct TestHandle {
        name: &'static str,
        size: Arc<AtomicI64>,
        evicted: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Evictable for TestHandle {
        fn size(&self) -> i64 {
            self.size.load(Ordering::SeqCst)
        }

        fn evict(self: Box<Self>) {
            self.evicted.lock().push(self.name);
        }
    }

    struct Harness {
        policy: LruCachePolicy,
        evicted: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Harness {
        fn new(max_size: i64) -> Self {
            Self {
                policy: LruCachePolicy::new(max_size),
                evicted: Arc::default(),
            }
        }

        fn track(&self, name: &'static str, size: i64) -> Arc<AtomicI64> {
            let size = Arc::new(AtomicI64::new(size));
            self.policy.track(
                key(name),
                Box::new(TestHandle {
                    name,
                    size: size.clone(),
                    evicted: self.evicted.clone(),
                }),
            );
            size
        }

        fn evicted(&self) -> Vec<&'static str> {
            self.evicted.lock().clone()
        }
    }

    fn key(name: &str) -> PolicyKey {
        PolicyKey::new(1, name)
    }

    #[test]
    fn test_track_does_not_evict() {
        let h = Harness::new(10);
        h.track("a", 8);
        h.track("b", 8);
        assert_eq!(h.policy.current_size(), 16);
        assert!(h.evicted().is_empty());

        h.policy.check_budget();
        assert_eq!(h.evicted(), vec!["a"]);
        assert_eq!(h.policy.current_size(), 8);
        assert_eq!(h.policy.len(), 1);
    }

    #[test]
    fn test_evicts_least_recently_used_first() {
        let h = Harness::new(30);
        h.track("a", 10);
        h.track("b", 10);
        h.track("c", 10);
        assert!(h.policy.update(&key("a")));
        assert_eq!(h.policy.keys_by_recency(), vec![key("b"), key("c"), key("a")]);

        h.track("d", 10);
        h.policy.check_budget();
        assert_eq!(h.evicted(), vec!["b"]);
    }

    #[test]
    fn test_untrack() {
        let h = Harness::new(100);
        h.track("a", 10);
        assert!(h.policy.untrack(&key("a")));
        assert!(!h.policy.untrack(&key("a")));
        assert!(!h.policy.update(&key("a")));
        assert_eq!(h.policy.current_size(), 0);
        assert!(h.policy.is_empty());
    }

    #[test]
    fn test_update_rereads_size_and_enforces_budget() {
        let h = Harness::new(20);
        h.track("a", 5);
        let b = h.track("b", 5);
        b.store(18, Ordering::SeqCst);

        assert!(h.policy.update(&key("b")));
        assert_eq!(h.evicted(), vec!["a"]);
        assert_eq!(h.policy.current_size(), 18);
    }

    #[test]
    fn test_retrack_replaces_size() {
        let h = Harness::new(100);
        h.track("a", 10);
        h.track("a", 30);
        assert_eq!(h.policy.current_size(), 30);
        assert_eq!(h.policy.len(), 1);
    }

    #[test]
    fn test_shrinking_budget_evicts() {
        let h = Harness::new(100);
        for name in ["a", "b", "c", "d"] {
            h.track(name, 25);
        }
        h.policy.set_max_size(50);
        assert_eq!(h.evicted(), vec!["a", "b"]);
        assert_eq!(h.policy.max_size(), 50);
        assert!(h.policy.current_size() <= 50);
    }

    #[test]
    fn test_single_oversized_entry_is_evicted() {
        let h = Harness::new(10);
        h.track("big", 11);
        h.policy.check_budget();
        assert_eq!(h.evicted(), vec!["big"]);
        assert_eq!(h.policy.current_size(), 0);
    }

    #[test]
    #[should_panic(expected = "nothing left to evict")]
    fn test_over_budget_with_empty_queue_panics() {
        let h = Harness::new(-1);
        h.policy.check_budget();
    }

    /// Puts itself back, as a manager does with an entry it failed to delete.
    struct RetrackingHandle {
        policy: Arc<LruCachePolicy>,
        name: &'static str,
        attempts: Arc<AtomicI64>,
    }

    impl Evictable for RetrackingHandle {
        fn size(&self) -> i64 {
            10
        }

        fn evict(self: Box<Self>) {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let policy = self.policy.clone();
            policy.track(key(self.name), self);
        }
    }

    #[test]
    #[traced_test]
    fn test_entries_that_refuse_eviction_do_not_stall_the_budget_check() {
        let policy = Arc::new(LruCachePolicy::new(15));
        let attempts = Arc::new(AtomicI64::new(0));
        for name in ["a", "b"] {
            policy.track(
                key(name),
                Box::new(RetrackingHandle {
                    policy: policy.clone(),
                    name,
                    attempts: attempts.clone(),
                }),
            );
        }

        policy.check_budget();
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(policy.current_size(), 20);
        assert_eq!(policy.keys_by_recency(), vec![key("a"), key("b")]);
        assert!(logs_contain("still over budget"));

        // A later pass tries again.
        policy.check_budget();
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_track_and_check_evicts() {
        let h = Harness::new(10);
        h.track("a", 8);
        let b = Box::new(TestHandle {
            name: "b",
            size: Arc::new(AtomicI64::new(8)),
            evicted: h.evicted.clone(),
        });
        h.policy.track_and_check(key("b"), b);
        assert_eq!(h.evicted(), vec!["a"]);
        assert_eq!(h.policy.keys_by_recency(), vec![key("b")]);
    }

    #[test]
    fn test_with_capacity() {
        let policy = LruCachePolicy::with_capacity(ByteSize::kib(4));
        assert_eq!(policy.max_size(), 4096);
    }
}

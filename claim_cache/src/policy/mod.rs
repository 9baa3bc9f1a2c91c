mod lru;

use std::fmt;

pub use lru::LruCachePolicy;
pub use utils::{SIZE_GIB, SIZE_KIB, SIZE_MIB};

/// Identifies a tracked entry across all managers sharing one policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PolicyKey {
    /// Id of the manager the entry belongs to.
    pub owner: u64,
    /// The entry's generated key path.
    pub path: String,
}

impl PolicyKey {
    pub fn new(owner: u64, path: impl Into<String>) -> Self {
        Self {
            owner,
            path: path.into(),
        }
    }
}

impl fmt::Display for PolicyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.owner, self.path)
    }
}

/// Something a policy can account for and later evict.
pub trait Evictable: Send + Sync {
    /// Current size in bytes.
    fn size(&self) -> i64;

    /// Deletes the data and hands the entry back to its owner.
    /// Called without any policy lock held.
    fn evict(self: Box<Self>);
}

/// Decides which idle entries to delete once the tracked total exceeds a byte budget.
///
/// A policy may be shared by several managers. Entries are keyed by [`PolicyKey`] and
/// represented by the handle the owning manager passes to [`CachePolicy::track`].
///
/// Tracking and eviction are separate steps. [`CachePolicy::track`] only records the
/// entry, so a manager can call it while holding its own locks; the caller must follow
/// up with [`CachePolicy::check_budget`] once those locks are released, or the total may
/// stay above budget until the next call that checks it. [`CachePolicy::track_and_check`]
/// does both for callers that hold no locks. [`Evictable::evict`] runs with no policy
/// lock held and may track entries again.
pub trait CachePolicy: Send + Sync {
    /// Starts accounting for `key`. Tracking a key again replaces its handle and marks it
    /// as most recently used. Never evicts; see [`CachePolicy::check_budget`].
    fn track(&self, key: PolicyKey, handle: Box<dyn Evictable>);

    /// Tracks `key`, then enforces the budget.
    fn track_and_check(&self, key: PolicyKey, handle: Box<dyn Evictable>) {
        self.track(key, handle);
        self.check_budget();
    }

    /// Marks `key` as used and re-reads its size, then enforces the budget.
    /// Returns false if `key` is not tracked.
    fn update(&self, key: &PolicyKey) -> bool;

    /// Stops accounting for `key` and drops its handle. Returns false if `key` is not
    /// tracked, which includes losing a race with eviction.
    fn untrack(&self, key: &PolicyKey) -> bool;

    /// Evicts entries until the tracked total is within budget. Entries that come back
    /// while being evicted are not retried in the same call, so the total can remain above
    /// budget if their deletion keeps failing.
    fn check_budget(&self);

    /// Changes the budget and enforces it.
    fn set_max_size(&self, max_size: i64);

    fn max_size(&self) -> i64;

    fn current_size(&self) -> i64;

    /// Number of tracked entries.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use cache_types::{FileId, FileIdFactory};
use error_printer::ErrorPrinter;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::claim::{Claim, ClaimCore, ClaimGate, ClaimKind, ReadClaim, ReadWriteClaim};
use crate::error::CacheError;
use crate::policy::{CachePolicy, Evictable, PolicyKey};
use crate::storage::{CacheStorage, StorageLocation};

static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(1);

type RemovalListener<K> = Arc<dyn Fn(&K) + Send + Sync>;
type EvictionHook<K, L> = Arc<dyn Fn(&K, &L) + Send + Sync>;

/// Claim bookkeeping of one key.
///
/// An entry is either claimed (readers or a single writer), or tracked by the policy,
/// in which case the policy holds the write claim. An entry that is neither is removed.
struct ClaimEntry<L> {
    location: Arc<L>,
    read_claims: HashSet<u64>,
    write_claim: Option<u64>,
    tracked: bool,
    /// Cleared when the entry leaves the map; a thread that looked the entry up before
    /// that retries.
    valid: bool,
}

impl<L> ClaimEntry<L> {
    fn new(location: Arc<L>) -> Self {
        Self {
            location,
            read_claims: HashSet::new(),
            write_claim: None,
            tracked: false,
            valid: true,
        }
    }

    fn is_claimed_by_user(&self) -> bool {
        !self.tracked && (self.write_claim.is_some() || !self.read_claims.is_empty())
    }
}

type EntryRef<L> = Arc<Mutex<ClaimEntry<L>>>;

pub(crate) struct ManagerInner<S: CacheStorage> {
    pub(crate) id: u64,
    storage: S,
    policy: Arc<dyn CachePolicy>,
    entries: Mutex<HashMap<S::Key, EntryRef<S::Location>>>,
    next_claim_id: AtomicU64,
    indexed: AtomicBool,
    listeners: RwLock<Vec<RemovalListener<S::Key>>>,
    eviction_hooks: RwLock<Vec<EvictionHook<S::Key, S::Location>>>,
}

impl<S: CacheStorage> Drop for ManagerInner<S> {
    fn drop(&mut self) {
        // Entries the policy still accounts for would otherwise hold budget forever.
        for (key, entry) in self.entries.get_mut().drain() {
            if entry.lock().tracked {
                self.policy.untrack(&PolicyKey::new(self.id, key.gen_path()));
            }
        }
    }
}

/// How a key is currently held, as reported by [`CacheManager::snapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Reading(usize),
    Writing,
    Tracked,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntrySnapshot<K> {
    pub key: K,
    pub status: EntryStatus,
    pub size: i64,
}

/// Grants read and read-write claims on the artifacts of one storage backend and hands
/// unclaimed artifacts to an eviction policy.
///
/// For every key at most one read-write claim exists, never together with a read claim.
/// While a key is claimed the policy cannot see it, so claimed data is never evicted.
/// When the last claim on a key is released the data is handed to the policy if it
/// exists and forgotten otherwise.
///
/// Cloning is cheap and yields a handle to the same manager.
pub struct CacheManager<S: CacheStorage> {
    inner: Arc<ManagerInner<S>>,
}

impl<S: CacheStorage> Clone for CacheManager<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: CacheStorage> fmt::Debug for CacheManager<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheManager")
            .field("id", &self.inner.id)
            .field("storage", &self.inner.storage.name())
            .field("entries", &self.len())
            .finish()
    }
}

impl<S: CacheStorage> CacheManager<S> {
    pub fn new(storage: S, policy: Arc<dyn CachePolicy>) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                id: NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed),
                storage,
                policy,
                entries: Mutex::new(HashMap::new()),
                next_claim_id: AtomicU64::new(1),
                indexed: AtomicBool::new(false),
                listeners: RwLock::new(Vec::new()),
                eviction_hooks: RwLock::new(Vec::new()),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ManagerInner<S>>) -> Self {
        Self { inner }
    }

    /// Process-unique id of this manager, distinguishing its entries in a shared policy.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn storage(&self) -> &S {
        &self.inner.storage
    }

    pub fn policy(&self) -> &Arc<dyn CachePolicy> {
        &self.inner.policy
    }

    /// Registers a callback run after an entry leaves this manager, by eviction or by a
    /// release that finds no data. Callbacks run without any manager lock held.
    pub fn add_removal_listener(&self, listener: impl Fn(&S::Key) + Send + Sync + 'static) {
        self.inner.listeners.write().push(Arc::new(listener));
    }

    /// Registers a callback that sees an entry's data just before the policy deletes it.
    /// The policy holds the write claim while hooks run, so the data cannot change, but
    /// hooks must not claim the same key from this manager.
    pub fn add_eviction_hook(&self, hook: impl Fn(&S::Key, &S::Location) + Send + Sync + 'static) {
        self.inner.eviction_hooks.write().push(Arc::new(hook));
    }

    /// A read claim on `key`, if it has data that nobody is writing.
    ///
    /// Returns `None` if the key is unknown, write-claimed, or was evicted concurrently.
    pub fn request_read(&self, key: &S::Key) -> Option<ReadClaim<S>> {
        loop {
            let entry = self.lookup(key)?;
            let mut state = entry.lock();
            if !state.valid {
                continue;
            }
            if state.tracked {
                if !self.reclaim_from_policy(key, &mut state) {
                    return None;
                }
            } else if state.write_claim.is_some() {
                return None;
            }
            let core = self.new_core(key.clone(), state.location.clone(), true);
            state.read_claims.insert(core.id);
            return Some(ReadClaim::from_core(core));
        }
    }

    /// The exclusive claim on `key`, creating an entry if the key is unknown.
    ///
    /// Returns `None` if the key is claimed in any way, or was evicted concurrently.
    pub fn request_read_write(&self, key: &S::Key) -> Option<ReadWriteClaim<S>> {
        loop {
            let entry = {
                let mut entries = self.inner.entries.lock();
                match entries.get(key) {
                    Some(entry) => entry.clone(),
                    None => {
                        let location = Arc::new(self.inner.storage.locate(key));
                        let mut state = ClaimEntry::new(location.clone());
                        let core = self.new_core(key.clone(), location, true);
                        state.write_claim = Some(core.id);
                        entries.insert(key.clone(), Arc::new(Mutex::new(state)));
                        return Some(ReadWriteClaim::from_core(core));
                    },
                }
            };

            let mut state = entry.lock();
            if !state.valid {
                continue;
            }
            if state.tracked {
                if !self.reclaim_from_policy(key, &mut state) {
                    return None;
                }
            } else if state.write_claim.is_some() || !state.read_claims.is_empty() {
                return None;
            }
            let core = self.new_core(key.clone(), state.location.clone(), true);
            state.write_claim = Some(core.id);
            return Some(ReadWriteClaim::from_core(core));
        }
    }

    /// Hands a claim back. Once a key has no claims left its data is given to the
    /// policy, or the entry is forgotten if there is no data. Enforces the budget.
    ///
    /// Waits for streams opened through the claim to close. Handing a claim to a manager
    /// that did not grant it is an [`CacheError::IllegalClaim`]; the claim is then released
    /// to its own manager when dropped.
    pub fn release(&self, claim: impl Into<Claim<S>>) -> Result<(), CacheError> {
        let mut claim = claim.into();
        self.check_owner(claim.core())?;
        let (core, kind) = claim.disarm();
        let result = self.release_core(core, kind);
        self.inner.policy.check_budget();
        result
    }

    /// Atomically turns a read-write claim into a read claim, so no other writer can
    /// get in between. Returns `None` if the key has no data, in which case the entry is
    /// forgotten as on release.
    pub fn degrade(&self, claim: ReadWriteClaim<S>) -> Result<Option<ReadClaim<S>>, CacheError> {
        let mut claim = claim;
        self.check_owner(&claim.core)?;
        claim.core.release_on_drop = false;
        let core = &claim.core;
        if !core.gate.invalidate() {
            return Err(CacheError::illegal(format!("claim {} on {:?} was already released", core.id, core.key)));
        }

        let entry = self.live_entry(core)?;
        let (read_claim, removed) = {
            let mut state = entry.lock();
            if state.tracked || state.write_claim != Some(core.id) {
                return Err(CacheError::illegal(format!(
                    "claim {} does not hold the write claim on {:?}",
                    core.id, core.key
                )));
            }
            state.write_claim = None;
            if state.location.exists() {
                let read = self.new_core(core.key.clone(), state.location.clone(), true);
                state.read_claims.insert(read.id);
                (Some(ReadClaim::from_core(read)), false)
            } else {
                self.remove_entry_locked(&core.key, &entry, &mut state);
                (None, true)
            }
        };

        if removed {
            self.notify_removed(&core.key);
        }
        Ok(read_claim)
    }

    /// Hands existing, unclaimed data for `key` to the policy and enforces the budget.
    /// Tracking an already tracked key does nothing.
    pub fn track(&self, key: &S::Key) -> Result<(), CacheError> {
        let result = self.track_existing(key);
        self.inner.policy.check_budget();
        result.map(|_| ())
    }

    /// Scans the storage and tracks everything the factory recognizes, then enforces the
    /// budget once. Returns the number of newly tracked keys.
    ///
    /// Only the first call scans; later calls return 0.
    pub fn index(&self, factory: &dyn FileIdFactory<S::Key>) -> Result<usize, CacheError> {
        if self.inner.indexed.swap(true, Ordering::AcqRel) {
            info!("{} cache is already indexed", self.inner.storage.name());
            return Ok(0);
        }

        let keys = self
            .inner
            .storage
            .scan(factory)
            .log_error(format!("Failed to scan {} cache", self.inner.storage.name()))?;

        let mut tracked = 0;
        for key in keys {
            match self.track_existing(&key) {
                Ok(true) => tracked += 1,
                Ok(false) => {},
                Err(e) => warn!("Not indexing {key:?}: {e}"),
            }
        }
        info!(count = tracked, "indexed {} cache", self.inner.storage.name());

        self.inner.policy.check_budget();
        Ok(tracked)
    }

    /// Marks a tracked key as recently used and re-reads its size.
    /// Returns false if the key is not tracked.
    pub fn refresh(&self, key: &S::Key) -> bool {
        if !self.is_tracked(key) {
            return false;
        }
        self.inner.policy.update(&self.policy_key(key))
    }

    /// Deletes the data of `key` if nobody holds a claim on it.
    /// Returns whether there was data to delete.
    pub fn remove(&self, key: &S::Key) -> Result<bool, CacheError> {
        let Some(mut claim) = self.request_read_write(key) else {
            return Ok(false);
        };
        let existed = claim.exists();
        let deleted = claim.delete();
        self.release(claim)?;
        deleted?;
        Ok(existed)
    }

    pub fn contains(&self, key: &S::Key) -> bool {
        self.lookup(key).is_some_and(|entry| entry.lock().valid)
    }

    pub fn is_tracked(&self, key: &S::Key) -> bool {
        self.lookup(key).is_some_and(|entry| {
            let state = entry.lock();
            state.valid && state.tracked
        })
    }

    /// Whether a user holds a read or read-write claim on `key`.
    pub fn is_claimed(&self, key: &S::Key) -> bool {
        self.lookup(key).is_some_and(|entry| {
            let state = entry.lock();
            state.valid && state.is_claimed_by_user()
        })
    }

    /// Number of known keys, claimed or tracked.
    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A point-in-time listing of every known key.
    pub fn snapshot(&self) -> Vec<EntrySnapshot<S::Key>> {
        let entries: Vec<_> = self
            .inner
            .entries
            .lock()
            .iter()
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect();

        entries
            .into_iter()
            .filter_map(|(key, entry)| {
                let (status, location) = {
                    let state = entry.lock();
                    if !state.valid {
                        return None;
                    }
                    let status = if state.tracked {
                        EntryStatus::Tracked
                    } else if state.write_claim.is_some() {
                        EntryStatus::Writing
                    } else {
                        EntryStatus::Reading(state.read_claims.len())
                    };
                    (status, state.location.clone())
                };
                Some(EntrySnapshot {
                    key,
                    status,
                    size: location.size(),
                })
            })
            .collect()
    }

    pub(crate) fn release_core(&self, core: &ClaimCore<S>, kind: ClaimKind) -> Result<(), CacheError> {
        self.check_owner(core)?;
        if !core.gate.invalidate() {
            return Err(CacheError::illegal(format!("claim {} on {:?} was already released", core.id, core.key)));
        }

        let entry = self.live_entry(core)?;
        let removed = {
            let mut state = entry.lock();
            let held = match kind {
                ClaimKind::Read => !state.tracked && state.read_claims.remove(&core.id),
                ClaimKind::ReadWrite => !state.tracked && state.write_claim == Some(core.id),
            };
            if !held {
                return Err(CacheError::illegal(format!("claim {} is not held on {:?}", core.id, core.key)));
            }
            if kind == ClaimKind::ReadWrite {
                state.write_claim = None;
            }

            if state.write_claim.is_some() || !state.read_claims.is_empty() {
                false
            } else if state.location.exists() {
                self.hand_to_policy(&core.key, &mut state);
                false
            } else {
                self.remove_entry_locked(&core.key, &entry, &mut state);
                true
            }
        };

        if removed {
            debug!("forgetting {:?}: released without data", core.key);
            self.notify_removed(&core.key);
        }
        Ok(())
    }

    /// Completes an eviction after the policy's claim tried to delete the data.
    ///
    /// If the data survived the deletion the entry goes back to the policy, which retries
    /// it on a later budget check; the budget is not checked again here.
    fn release_evicted(&self, core: &ClaimCore<S>) {
        core.gate.invalidate();
        let Some(entry) = self.lookup(&core.key) else {
            return;
        };
        {
            let mut state = entry.lock();
            if !state.valid || !state.tracked || state.write_claim != Some(core.id) {
                debug!("eviction of {:?} raced with another owner; leaving the entry alone", core.key);
                return;
            }
            state.tracked = false;
            state.write_claim = None;
            if state.location.exists() {
                warn!("could not evict {:?}; keeping it tracked", core.key);
                self.hand_to_policy(&core.key, &mut state);
                return;
            }
            self.remove_entry_locked(&core.key, &entry, &mut state);
        }
        self.notify_removed(&core.key);
    }

    fn run_eviction_hooks(&self, key: &S::Key, location: &S::Location) {
        let hooks = self.inner.eviction_hooks.read().clone();
        for hook in hooks {
            hook(key, location);
        }
    }

    /// Tracks data already present in storage. Ok(false) if the key was already tracked.
    fn track_existing(&self, key: &S::Key) -> Result<bool, CacheError> {
        let location = Arc::new(self.inner.storage.locate(key));
        if !location.exists() {
            return Err(CacheError::illegal(format!("cannot track {key:?}: it has no data")));
        }

        loop {
            let entry = {
                let mut entries = self.inner.entries.lock();
                match entries.get(key) {
                    Some(entry) => entry.clone(),
                    None => {
                        let mut state = ClaimEntry::new(location);
                        self.hand_to_policy(key, &mut state);
                        entries.insert(key.clone(), Arc::new(Mutex::new(state)));
                        return Ok(true);
                    },
                }
            };

            let state = entry.lock();
            if !state.valid {
                continue;
            }
            if state.tracked {
                return Ok(false);
            }
            return Err(CacheError::illegal(format!("cannot track {key:?}: it is claimed")));
        }
    }

    fn hand_to_policy(&self, key: &S::Key, state: &mut ClaimEntry<S::Location>) {
        let core = self.new_core(key.clone(), state.location.clone(), false);
        state.write_claim = Some(core.id);
        state.tracked = true;
        self.inner.policy.track(
            self.policy_key(key),
            Box::new(PolicyClaim {
                claim: ReadWriteClaim::from_core(core),
            }),
        );
    }

    /// Takes a tracked entry back from the policy. False if eviction got there first.
    fn reclaim_from_policy(&self, key: &S::Key, state: &mut ClaimEntry<S::Location>) -> bool {
        if !self.inner.policy.untrack(&self.policy_key(key)) {
            debug!("{key:?} is being evicted");
            return false;
        }
        state.tracked = false;
        state.write_claim = None;
        true
    }

    /// Marks the entry dead and drops it from the map. Called with the entry lock held.
    fn remove_entry_locked(&self, key: &S::Key, entry: &EntryRef<S::Location>, state: &mut ClaimEntry<S::Location>) {
        state.valid = false;
        let mut entries = self.inner.entries.lock();
        if entries.get(key).is_some_and(|current| Arc::ptr_eq(current, entry)) {
            entries.remove(key);
        }
    }

    fn notify_removed(&self, key: &S::Key) {
        let listeners = self.inner.listeners.read().clone();
        for listener in listeners {
            listener(key);
        }
    }

    fn lookup(&self, key: &S::Key) -> Option<EntryRef<S::Location>> {
        self.inner.entries.lock().get(key).cloned()
    }

    fn live_entry(&self, core: &ClaimCore<S>) -> Result<EntryRef<S::Location>, CacheError> {
        self.lookup(&core.key)
            .ok_or_else(|| CacheError::illegal(format!("claim {} refers to unknown key {:?}", core.id, core.key)))
    }

    fn check_owner(&self, core: &ClaimCore<S>) -> Result<(), CacheError> {
        if core.owner != self.inner.id {
            return Err(CacheError::illegal(format!(
                "claim {} was granted by manager {}, not {}",
                core.id, core.owner, self.inner.id
            )));
        }
        Ok(())
    }

    fn new_core(&self, key: S::Key, location: Arc<S::Location>, release_on_drop: bool) -> ClaimCore<S> {
        ClaimCore {
            id: self.inner.next_claim_id.fetch_add(1, Ordering::Relaxed),
            owner: self.inner.id,
            key,
            location,
            gate: ClaimGate::default(),
            manager: Arc::downgrade(&self.inner),
            release_on_drop,
        }
    }

    fn policy_key(&self, key: &S::Key) -> PolicyKey {
        PolicyKey::new(self.inner.id, key.gen_path())
    }
}

/// The write claim a policy holds on a tracked entry.
struct PolicyClaim<S: CacheStorage> {
    claim: ReadWriteClaim<S>,
}

impl<S: CacheStorage> Evictable for PolicyClaim<S> {
    fn size(&self) -> i64 {
        self.claim.size()
    }

    fn evict(self: Box<Self>) {
        let mut claim = self.claim;
        let manager = claim.core.manager.upgrade().map(CacheManager::from_inner);
        if let Some(manager) = &manager {
            manager.run_eviction_hooks(&claim.core.key, &claim.core.location);
        }
        let _ = claim
            .delete()
            .log_error(format!("Failed to delete evicted {:?}", claim.key()));
        if let Some(manager) = manager {
            manager.release_evicted(&claim.core);
        }
    }
}

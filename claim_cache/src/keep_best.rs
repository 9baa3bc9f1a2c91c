//! A two-tier cache that keeps only the best known quality of every position.
//!
//! Values are stored per tier under their full key (position plus quality), and each tier
//! keeps an index from position to the quality it currently holds. Storing a better
//! quality replaces the index entry and deletes the worse artifact; storing an equal or
//! worse one is refused. Entries the underlying managers drop on their own (eviction) are
//! reported through a removal listener and purged from the index before its next use.
//!
//! Reading a position from disk promotes it to memory. With write-back enabled, values
//! the memory tier evicts are queued and written to disk on the next call into the cache.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cache_types::{FileIdFactory, QualityId, QualityLevel};
use error_printer::ErrorPrinter;
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::disk::{BufferedStreamFactory, FileCacheManager, FileReadClaim, FileStorage, Lz4StreamFactory, StreamFactory};
use crate::error::CacheError;
use crate::memory::{MemoryCacheManager, MemoryLocation, MemoryReadClaim, MemorySized, MemoryStorage};
use crate::policy::LruCachePolicy;
use crate::serializer::ObjectSerializer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    Memory,
    Disk,
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CacheTier::Memory => "memory",
            CacheTier::Disk => "disk",
        })
    }
}

/// A value read back from the cache, with where it came from.
#[derive(Debug, Clone)]
pub struct BestValue<V> {
    pub value: Arc<V>,
    pub quality: QualityLevel,
    pub tier: CacheTier,
}

type QualityIndex<P> = Mutex<HashMap<P, QualityLevel>>;
type Mailbox<K> = Arc<Mutex<Vec<(CacheTier, K)>>>;
type SpillQueue<K, V> = Arc<Mutex<Vec<(K, Arc<V>)>>>;

pub struct KeepBestCacheManager<K, V, Ser>
where
    K: QualityId,
    V: MemorySized,
    Ser: ObjectSerializer<V>,
{
    memory: MemoryCacheManager<K, V>,
    disk: FileCacheManager<K>,
    disk_enabled: AtomicBool,
    serializer: Ser,
    memory_index: QualityIndex<K::Position>,
    disk_index: QualityIndex<K::Position>,
    removed: Mailbox<K>,
    write_back: Arc<AtomicBool>,
    spilled: SpillQueue<K, V>,
}

impl<K, V, Ser> KeepBestCacheManager<K, V, Ser>
where
    K: QualityId,
    V: MemorySized,
    Ser: ObjectSerializer<V>,
{
    pub fn new(memory: MemoryCacheManager<K, V>, disk: FileCacheManager<K>, serializer: Ser) -> Self {
        let removed: Mailbox<K> = Arc::default();
        memory.add_removal_listener(report_removal(&removed, CacheTier::Memory));
        disk.add_removal_listener(report_removal(&removed, CacheTier::Disk));
        let write_back = Arc::new(AtomicBool::new(false));
        let spilled: SpillQueue<K, V> = Arc::default();
        memory.add_eviction_hook(queue_spill(&spilled, &write_back));

        Self {
            memory,
            disk,
            disk_enabled: AtomicBool::new(true),
            serializer,
            memory_index: Mutex::default(),
            disk_index: Mutex::default(),
            removed,
            write_back,
            spilled,
        }
    }

    /// Both tiers with their own LRU budgets as configured. The disk tier is not indexed;
    /// call [`KeepBestCacheManager::index`] for that.
    pub fn from_config(config: &CacheConfig, serializer: Ser) -> Self {
        let memory = MemoryCacheManager::new(
            MemoryStorage::new(),
            Arc::new(LruCachePolicy::with_capacity(config.memory_capacity)),
        );
        let stream_factory: Arc<dyn StreamFactory> = if config.compress {
            Arc::new(Lz4StreamFactory)
        } else {
            Arc::new(BufferedStreamFactory)
        };
        let disk = FileCacheManager::new(
            FileStorage::with_stream_factory(config.cache_directory.clone(), stream_factory),
            Arc::new(LruCachePolicy::with_capacity(config.disk_capacity)),
        );
        let cache = Self::new(memory, disk, serializer);
        cache.set_write_back(config.write_back);
        cache
    }

    pub fn memory_manager(&self) -> &MemoryCacheManager<K, V> {
        &self.memory
    }

    pub fn disk_manager(&self) -> &FileCacheManager<K> {
        &self.disk
    }

    pub fn is_disk_enabled(&self) -> bool {
        self.disk_enabled.load(Ordering::Acquire)
    }

    /// Switches writing memory evictions to disk on or off. Values already queued are
    /// still written.
    pub fn set_write_back(&self, enabled: bool) {
        self.write_back.store(enabled, Ordering::Release);
    }

    pub fn is_write_back(&self) -> bool {
        self.write_back.load(Ordering::Acquire)
    }

    /// Indexes the disk tier and records the best quality found per position; worse
    /// duplicates are deleted. If the cache directory is unusable the disk tier is
    /// switched off and the cache continues in memory only.
    pub fn index(&self, factory: &dyn FileIdFactory<K>) -> Result<usize, CacheError> {
        if let Err(e) = self.disk.index(factory) {
            warn!("Disabling the disk cache: {e}");
            self.disk_enabled.store(false, Ordering::Release);
            return Err(e);
        }

        let mut best: HashMap<K::Position, QualityLevel> = HashMap::new();
        let mut inferior = Vec::new();
        for entry in self.disk.snapshot() {
            let key = entry.key;
            match best.get(&key.position()) {
                Some(&quality) if quality >= key.quality() => inferior.push(key),
                Some(&quality) => {
                    inferior.push(K::from_parts(key.position(), quality));
                    best.insert(key.position(), key.quality());
                },
                None => {
                    best.insert(key.position(), key.quality());
                },
            }
        }

        for key in inferior {
            debug!("dropping {key:?}: a better quality is cached");
            let _ = self.disk.remove(&key).warn_error(format!("Failed to remove {key:?}"));
        }

        let mut index = self.lock_index(CacheTier::Disk);
        for (position, quality) in best {
            if !matches!(index.get(&position), Some(current) if *current >= quality) {
                index.insert(position, quality);
            }
        }
        let indexed = index.len();
        info!(positions = indexed, "indexed best qualities on disk");
        Ok(indexed)
    }

    /// Stores `value` under `key` in `tier` if no equal or better quality of the same
    /// position is already held there. Returns whether the value was stored; a refused or
    /// failed write leaves the previous best in place.
    pub fn put(&self, key: &K, tier: CacheTier, value: impl Into<Arc<V>>) -> bool {
        let stored = self.store(key, tier, value.into());
        self.flush_write_back();
        stored
    }

    /// Stores `value` in both tiers under the rules of [`KeepBestCacheManager::put`].
    /// Returns whether either tier took it.
    pub fn put_all(&self, key: &K, value: impl Into<Arc<V>>) -> bool {
        let value: Arc<V> = value.into();
        let memory = self.store(key, CacheTier::Memory, value.clone());
        let disk = self.store(key, CacheTier::Disk, value);
        self.flush_write_back();
        memory || disk
    }

    /// Writes values queued by memory evictions to disk. Returns how many were stored;
    /// values the disk already holds at an equal or better quality are dropped.
    pub fn flush_write_back(&self) -> usize {
        let pending = std::mem::take(&mut *self.spilled.lock());
        let mut written = 0;
        for (key, value) in pending {
            if self.store(&key, CacheTier::Disk, value) {
                debug!("wrote evicted {key:?} back to disk");
                written += 1;
            }
        }
        written
    }

    /// The best quality held in either tier, preferring memory when both tiers hold the
    /// same quality. Falls back to the other tier if the first read fails. A value read
    /// from disk is also stored in memory.
    pub fn get_best(&self, position: &K::Position) -> Option<BestValue<V>> {
        self.flush_write_back();
        let best = self.find_best(position);
        self.flush_write_back();
        best
    }

    pub fn get_from_memory(&self, position: &K::Position) -> Option<BestValue<V>> {
        let quality = self.memory_quality(position)?;
        self.read_tier(CacheTier::Memory, position, quality)
    }

    /// The disk tier's value for `position`, which is also stored in memory.
    pub fn get_from_disk(&self, position: &K::Position) -> Option<BestValue<V>> {
        self.flush_write_back();
        let best = self
            .disk_quality(position)
            .and_then(|quality| self.read_tier(CacheTier::Disk, position, quality));
        self.flush_write_back();
        best
    }

    pub fn memory_quality(&self, position: &K::Position) -> Option<QualityLevel> {
        self.quality_in(CacheTier::Memory, position)
    }

    pub fn disk_quality(&self, position: &K::Position) -> Option<QualityLevel> {
        self.quality_in(CacheTier::Disk, position)
    }

    pub fn best_quality(&self, position: &K::Position) -> Option<QualityLevel> {
        self.memory_quality(position).max(self.disk_quality(position))
    }

    pub fn is_memory_cached(&self, position: &K::Position) -> bool {
        self.memory_quality(position).is_some()
    }

    pub fn is_disk_cached(&self, position: &K::Position) -> bool {
        self.disk_quality(position).is_some()
    }

    pub fn is_cached(&self, position: &K::Position) -> bool {
        self.is_memory_cached(position) || self.is_disk_cached(position)
    }

    /// Drops `position` from both tiers. Returns whether either tier held it.
    pub fn remove(&self, position: &K::Position) -> bool {
        let memory = self.remove_from(position, CacheTier::Memory);
        let disk = self.remove_from(position, CacheTier::Disk);
        memory || disk
    }

    /// Drops `position` from one tier's index and deletes its data unless it is claimed.
    /// Returns whether the tier held the position.
    pub fn remove_from(&self, position: &K::Position, tier: CacheTier) -> bool {
        let Some(quality) = self.lock_index(tier).remove(position) else {
            return false;
        };
        let key = K::from_parts(position.clone(), quality);
        let _ = self
            .manager_remove(tier, &key)
            .warn_error(format!("Failed to delete {key:?} from {tier} cache"));
        true
    }

    fn store(&self, key: &K, tier: CacheTier, value: Arc<V>) -> bool {
        if tier == CacheTier::Disk && !self.is_disk_enabled() {
            return false;
        }
        if self.quality_in(tier, &key.position()).is_some_and(|q| q >= key.quality()) {
            return false;
        }

        let written = match tier {
            CacheTier::Memory => self.write_memory(key, value).map(Written::Memory),
            CacheTier::Disk => self.write_disk(key, &value).map(Written::Disk),
        };
        let Some(written) = written else {
            return false;
        };

        // The read claim keeps the new artifact from being evicted until it is indexed.
        let mut index = self.lock_index(tier);
        let current = index.get(&key.position()).copied();
        if let Some(current) = current.filter(|current| *current >= key.quality()) {
            drop(index);
            self.release_written(written);
            debug!("{key:?} lost to quality {current} while being written");
            // An equal quality in the index is this very key, rewritten by a concurrent put.
            if current > key.quality() {
                let _ = self.manager_remove(tier, key).debug_error(format!("removing superseded {key:?}"));
            }
            return false;
        }
        let previous = index.insert(key.position(), key.quality());
        drop(index);
        self.release_written(written);

        if let Some(previous) = previous {
            let old = key.with_quality(previous);
            if let Err(e) = self.manager_remove(tier, &old) {
                debug!("could not delete superseded {old:?} from {tier} cache: {e}");
            }
        }
        true
    }

    fn find_best(&self, position: &K::Position) -> Option<BestValue<V>> {
        let memory = self.memory_quality(position);
        let disk = self.disk_quality(position);
        let order = match (memory, disk) {
            (Some(m), Some(d)) if d > m => [(CacheTier::Disk, d), (CacheTier::Memory, m)],
            (Some(m), Some(d)) => [(CacheTier::Memory, m), (CacheTier::Disk, d)],
            (Some(m), None) => return self.read_tier(CacheTier::Memory, position, m),
            (None, Some(d)) => return self.read_tier(CacheTier::Disk, position, d),
            (None, None) => return None,
        };
        order
            .into_iter()
            .find_map(|(tier, quality)| self.read_tier(tier, position, quality))
    }

    fn quality_in(&self, tier: CacheTier, position: &K::Position) -> Option<QualityLevel> {
        if tier == CacheTier::Disk && !self.is_disk_enabled() {
            return None;
        }
        self.lock_index(tier).get(position).copied()
    }

    fn index_of(&self, tier: CacheTier) -> &QualityIndex<K::Position> {
        match tier {
            CacheTier::Memory => &self.memory_index,
            CacheTier::Disk => &self.disk_index,
        }
    }

    /// Locks a tier's index after applying removals reported by the managers.
    fn lock_index(&self, tier: CacheTier) -> MutexGuard<'_, HashMap<K::Position, QualityLevel>> {
        let removed = std::mem::take(&mut *self.removed.lock());
        for (removed_tier, key) in removed {
            let mut index = self.index_of(removed_tier).lock();
            let position = key.position();
            if index.get(&position) == Some(&key.quality()) && !self.manager_contains(removed_tier, &key) {
                debug!("{key:?} left the {removed_tier} cache");
                index.remove(&position);
            }
        }
        self.index_of(tier).lock()
    }

    fn manager_contains(&self, tier: CacheTier, key: &K) -> bool {
        match tier {
            CacheTier::Memory => self.memory.contains(key),
            CacheTier::Disk => self.disk.contains(key),
        }
    }

    fn manager_remove(&self, tier: CacheTier, key: &K) -> Result<bool, CacheError> {
        match tier {
            CacheTier::Memory => self.memory.remove(key),
            CacheTier::Disk => self.disk.remove(key),
        }
    }

    /// Writes `key` and returns a read claim on it, or `None` if the key is busy or the
    /// write failed.
    fn write_memory(&self, key: &K, value: Arc<V>) -> Option<MemoryReadClaim<K, V>> {
        let Some(mut claim) = self.memory.request_read_write(key) else {
            debug!("{key:?} is busy in the memory cache");
            return None;
        };
        claim.set(value).log_error(format!("Failed to store {key:?} in memory")).ok()?;
        self.memory
            .degrade(claim)
            .log_error(format!("Failed to finish storing {key:?} in memory"))
            .ok()
            .flatten()
    }

    fn write_disk(&self, key: &K, value: &V) -> Option<FileReadClaim<K>> {
        let Some(mut claim) = self.disk.request_read_write(key) else {
            debug!("{key:?} is busy in the disk cache");
            return None;
        };
        claim
            .writer()
            .and_then(|mut writer| {
                self.serializer.serialize(&mut writer, value)?;
                writer.close()
            })
            .log_error(format!("Failed to write {key:?} to disk"))
            .ok()?;
        self.disk
            .degrade(claim)
            .log_error(format!("Failed to finish writing {key:?} to disk"))
            .ok()
            .flatten()
    }

    fn release_written(&self, written: Written<K, V>) {
        let result = match written {
            Written::Memory(claim) => self.memory.release(claim),
            Written::Disk(claim) => self.disk.release(claim),
        };
        let _ = result.debug_error("releasing freshly written claim");
    }

    fn read_tier(&self, tier: CacheTier, position: &K::Position, quality: QualityLevel) -> Option<BestValue<V>> {
        let key = K::from_parts(position.clone(), quality);
        let value = match tier {
            CacheTier::Memory => {
                let claim = self.memory.request_read(&key)?;
                let value = claim.get();
                let _ = self.memory.release(claim).debug_error("releasing memory read claim");
                value?
            },
            CacheTier::Disk => {
                let value = self.read_disk(&key)?;
                if self.store(&key, CacheTier::Memory, value.clone()) {
                    debug!("promoted {key:?} to memory");
                }
                value
            },
        };
        Some(BestValue { value, quality, tier })
    }

    /// Reads `key` from disk. An artifact that cannot be read back is deleted and dropped
    /// from the index.
    fn read_disk(&self, key: &K) -> Option<Arc<V>> {
        let claim = self.disk.request_read(key)?;
        let read = claim
            .reader()
            .and_then(|mut reader| self.serializer.deserialize(&mut reader));
        let _ = self.disk.release(claim).debug_error("releasing disk read claim");
        match read {
            Ok(value) => Some(Arc::new(value)),
            Err(e) => {
                warn!("Discarding unreadable {key:?} from disk cache: {e}");
                {
                    let mut index = self.lock_index(CacheTier::Disk);
                    if index.get(&key.position()) == Some(&key.quality()) {
                        index.remove(&key.position());
                    }
                }
                let _ = self
                    .disk
                    .remove(key)
                    .warn_error(format!("Failed to delete unreadable {key:?}"));
                None
            },
        }
    }
}

impl<K, V, Ser> fmt::Debug for KeepBestCacheManager<K, V, Ser>
where
    K: QualityId,
    V: MemorySized,
    Ser: ObjectSerializer<V>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeepBestCacheManager")
            .field("memory", &self.memory)
            .field("disk", &self.disk)
            .field("disk_enabled", &self.is_disk_enabled())
            .finish()
    }
}

enum Written<K: QualityId, V: MemorySized> {
    Memory(MemoryReadClaim<K, V>),
    Disk(FileReadClaim<K>),
}

impl<K, V, Ser> Drop for KeepBestCacheManager<K, V, Ser>
where
    K: QualityId,
    V: MemorySized,
    Ser: ObjectSerializer<V>,
{
    fn drop(&mut self) {
        self.flush_write_back();
    }
}

fn queue_spill<K: QualityId, V: MemorySized>(
    spilled: &SpillQueue<K, V>,
    write_back: &Arc<AtomicBool>,
) -> impl Fn(&K, &MemoryLocation<V>) + Send + Sync + 'static {
    let spilled = spilled.clone();
    let write_back = write_back.clone();
    move |key: &K, location: &MemoryLocation<V>| {
        if !write_back.load(Ordering::Acquire) {
            return;
        }
        if let Some(value) = location.value() {
            spilled.lock().push((key.clone(), value));
        }
    }
}

fn report_removal<K: QualityId>(removed: &Mailbox<K>, tier: CacheTier) -> impl Fn(&K) + Send + Sync + 'static {
    let removed = removed.clone();
    move |key: &K| removed.lock().push((tier, key.clone()))
}

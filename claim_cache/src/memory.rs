use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use cache_types::{FileId, FileIdFactory};
use parking_lot::Mutex;

use crate::error::CacheError;
use crate::storage::{CacheStorage, StorageLocation};
use crate::{CacheManager, ReadClaim, ReadWriteClaim};

/// Values that can be held by the memory tier, accounted by their approximate heap size.
pub trait MemorySized: Send + Sync + 'static {
    fn memory_size(&self) -> i64;
}

impl MemorySized for Vec<u8> {
    fn memory_size(&self) -> i64 {
        self.len() as i64
    }
}

impl MemorySized for Vec<f32> {
    fn memory_size(&self) -> i64 {
        (self.len() * std::mem::size_of::<f32>()) as i64
    }
}

impl MemorySized for String {
    fn memory_size(&self) -> i64 {
        self.len() as i64
    }
}

pub type MemoryCacheManager<K, T> = CacheManager<MemoryStorage<K, T>>;
pub type MemoryReadClaim<K, T> = ReadClaim<MemoryStorage<K, T>>;
pub type MemoryReadWriteClaim<K, T> = ReadWriteClaim<MemoryStorage<K, T>>;

/// Keeps values in process memory. Nothing survives a restart, so scanning finds nothing.
pub struct MemoryStorage<K, T> {
    _marker: PhantomData<fn() -> (K, T)>,
}

impl<K, T> MemoryStorage<K, T> {
    pub fn new() -> Self {
        Self { _marker: PhantomData }
    }
}

impl<K, T> Default for MemoryStorage<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> fmt::Debug for MemoryStorage<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MemoryStorage")
    }
}

impl<K: FileId, T: MemorySized> CacheStorage for MemoryStorage<K, T> {
    type Key = K;
    type Location = MemoryLocation<T>;

    fn name(&self) -> &'static str {
        "memory"
    }

    fn locate(&self, _key: &K) -> MemoryLocation<T> {
        MemoryLocation { slot: Mutex::new(None) }
    }

    fn scan(&self, _factory: &dyn FileIdFactory<K>) -> Result<Vec<K>, CacheError> {
        Ok(Vec::new())
    }
}

/// The slot holding one key's value.
pub struct MemoryLocation<T> {
    slot: Mutex<Option<Arc<T>>>,
}

impl<T> MemoryLocation<T> {
    /// The value in the slot. Meant for eviction hooks, which run while the policy holds
    /// the write claim; elsewhere read through a claim.
    pub fn value(&self) -> Option<Arc<T>> {
        self.slot.lock().clone()
    }
}

impl<T: MemorySized> StorageLocation for MemoryLocation<T> {
    fn size(&self) -> i64 {
        self.slot.lock().as_ref().map_or(0, |value| value.memory_size())
    }

    fn exists(&self) -> bool {
        self.slot.lock().is_some()
    }

    fn delete(&self) -> Result<(), CacheError> {
        self.slot.lock().take();
        Ok(())
    }
}

impl<K: FileId, T: MemorySized> ReadClaim<MemoryStorage<K, T>> {
    /// The stored value, `None` if the claim is no longer valid.
    pub fn get(&self) -> Option<Arc<T>> {
        let _guard = self.core.gate.enter_read().ok()?;
        self.core.location.slot.lock().clone()
    }
}

impl<K: FileId, T: MemorySized> ReadWriteClaim<MemoryStorage<K, T>> {
    pub fn get(&self) -> Option<Arc<T>> {
        let _guard = self.core.gate.enter_read().ok()?;
        self.core.location.slot.lock().clone()
    }

    pub fn set(&mut self, value: impl Into<Arc<T>>) -> Result<(), CacheError> {
        let _guard = self.core.gate.enter_write()?;
        *self.core.location.slot.lock() = Some(value.into());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cache_types::{ChunkId, ChunkPosition, QualityLevel};

    use super::*;
    use crate::policy::LruCachePolicy;

    fn key() -> ChunkId {
        ChunkId::new(ChunkPosition::new(0., 0., 10., 10.), QualityLevel::Las)
    }

    #[test]
    fn test_set_then_read() {
        let manager = MemoryCacheManager::<ChunkId, Vec<u8>>::new(MemoryStorage::new(), Arc::new(LruCachePolicy::new(1024)));

        let mut claim = manager.request_read_write(&key()).unwrap();
        assert!(claim.get().is_none());
        claim.set(vec![1, 2, 3]).unwrap();
        assert_eq!(claim.size(), 3);

        let read = manager.degrade(claim).unwrap().unwrap();
        assert_eq!(read.get().as_deref(), Some(&vec![1, 2, 3]));
        manager.release(read).unwrap();

        assert!(manager.is_tracked(&key()));
        assert_eq!(manager.policy().current_size(), 3);
    }

    #[test]
    fn test_eviction_clears_slot() {
        let manager = MemoryCacheManager::<ChunkId, Vec<u8>>::new(MemoryStorage::new(), Arc::new(LruCachePolicy::new(4)));
        let mut claim = manager.request_read_write(&key()).unwrap();
        claim.set(vec![0; 8]).unwrap();
        manager.release(claim).unwrap();

        assert!(!manager.contains(&key()));
        assert!(manager.request_read(&key()).is_none());
        assert_eq!(manager.policy().current_size(), 0);
    }

    #[test]
    fn test_eviction_hook_sees_value_before_it_is_dropped() {
        let manager = MemoryCacheManager::<ChunkId, Vec<u8>>::new(MemoryStorage::new(), Arc::new(LruCachePolicy::new(4)));
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        manager.add_eviction_hook(move |key: &ChunkId, location: &MemoryLocation<Vec<u8>>| {
            sink.lock().push((key.clone(), location.value()));
        });

        let mut claim = manager.request_read_write(&key()).unwrap();
        claim.set(vec![7; 8]).unwrap();
        manager.release(claim).unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, key());
        assert_eq!(seen[0].1.as_deref(), Some(&vec![7; 8]));
        assert!(!manager.contains(&key()));
    }

    #[test]
    fn test_readers_share_value() {
        let manager = MemoryCacheManager::<ChunkId, String>::new(MemoryStorage::new(), Arc::new(LruCachePolicy::new(1024)));
        let mut claim = manager.request_read_write(&key()).unwrap();
        claim.set("tile".to_owned()).unwrap();
        let read = manager.degrade(claim).unwrap().unwrap();
        let second = manager.request_read(&key()).unwrap();
        manager.release(read).unwrap();

        assert_eq!(second.get().as_deref().map(String::as_str), Some("tile"));
        manager.release(second).unwrap();
    }
}

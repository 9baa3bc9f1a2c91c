//! Claim-based caching of pipeline artifacts.
//!
//! A [`CacheManager`] hands out read and read-write claims on keys of one storage backend
//! (files on disk, or values in memory). Unclaimed data is tracked by a [`CachePolicy`]
//! that evicts the least recently used artifacts once a byte budget is exceeded, and
//! never touches data somebody holds a claim on. [`KeepBestCacheManager`] layers a
//! "keep only the best quality per position" rule over a memory and a disk manager.

mod claim;
mod config;
pub mod disk;
pub mod error;
mod keep_best;
mod manager;
pub mod memory;
pub mod policy;
mod serializer;
mod storage;

pub use cache_types::{FileId, FileIdFactory, QualityId, QualityLevel};
pub use claim::{Claim, ReadClaim, ReadWriteClaim};
pub use config::{
    CacheConfig, CACHE_DIRECTORY_ENV, COMPRESS_ENV, DEFAULT_DISK_CAPACITY, DEFAULT_MEMORY_CAPACITY, DISK_CAPACITY_ENV,
    MEMORY_CAPACITY_ENV, WRITE_BACK_ENV,
};
pub use disk::{
    BufferedStreamFactory, ClaimReader, ClaimWriter, FileCacheManager, FileReadClaim, FileReadWriteClaim, FileStorage,
    Lz4StreamFactory, StreamFactory,
};
pub use error::CacheError;
pub use keep_best::{BestValue, CacheTier, KeepBestCacheManager};
pub use manager::{CacheManager, EntrySnapshot, EntryStatus};
pub use memory::{
    MemoryCacheManager, MemoryLocation, MemoryReadClaim, MemoryReadWriteClaim, MemorySized, MemoryStorage,
};
pub use policy::{CachePolicy, Evictable, LruCachePolicy, PolicyKey, SIZE_GIB, SIZE_KIB, SIZE_MIB};
pub use serializer::{BytesSerializer, F32ArraySerializer, ObjectSerializer};
pub use storage::{CacheStorage, StorageLocation};

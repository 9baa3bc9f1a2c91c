use cache_types::{FileId, FileIdFactory};

use crate::error::CacheError;

/// Where the data of one key lives. Created once per cache entry and shared by every claim
/// on that entry.
pub trait StorageLocation: Send + Sync + 'static {
    /// Size in bytes of the stored data, 0 if there is none or it cannot be determined.
    fn size(&self) -> i64;

    fn exists(&self) -> bool;

    /// Removes the stored data. Removing data that does not exist succeeds.
    fn delete(&self) -> Result<(), CacheError>;
}

/// A backend a [`crate::CacheManager`] stores its artifacts in.
pub trait CacheStorage: Send + Sync + 'static {
    type Key: FileId;
    type Location: StorageLocation;

    /// Short name used in log lines.
    fn name(&self) -> &'static str;

    /// The location of `key`'s data, whether or not any data is there yet.
    fn locate(&self, key: &Self::Key) -> Self::Location;

    /// Enumerates the keys already present in the backend. Entries the factory cannot
    /// turn into a key are skipped.
    fn scan(&self, factory: &dyn FileIdFactory<Self::Key>) -> Result<Vec<Self::Key>, CacheError>;
}

use std::path::PathBuf;

use utils::{env_config_value, ByteSize};

pub const CACHE_DIRECTORY_ENV: &str = "TILE_CACHE_DIRECTORY";
pub const DISK_CAPACITY_ENV: &str = "TILE_CACHE_DISK_CAPACITY";
pub const MEMORY_CAPACITY_ENV: &str = "TILE_CACHE_MEMORY_CAPACITY";
pub const COMPRESS_ENV: &str = "TILE_CACHE_COMPRESS";
pub const WRITE_BACK_ENV: &str = "TILE_CACHE_WRITE_BACK";

pub const DEFAULT_DISK_CAPACITY: ByteSize = ByteSize::gib(1);
pub const DEFAULT_MEMORY_CAPACITY: ByteSize = ByteSize::mib(256);

/// Settings for a two-tier tile cache. Built once at startup and passed to constructors.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheConfig {
    /// Root of the disk tier.
    pub cache_directory: PathBuf,
    /// Byte budget of the disk tier's eviction policy.
    pub disk_capacity: ByteSize,
    /// Byte budget of the memory tier's eviction policy.
    pub memory_capacity: ByteSize,
    /// Store disk artifacts as LZ4 frames.
    pub compress: bool,
    /// Write values the memory tier evicts to the disk tier.
    pub write_back: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_directory: PathBuf::from("./cache"),
            disk_capacity: DEFAULT_DISK_CAPACITY,
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            compress: false,
            write_back: false,
        }
    }
}

impl CacheConfig {
    pub fn new(cache_directory: impl Into<PathBuf>) -> Self {
        Self {
            cache_directory: cache_directory.into(),
            ..Default::default()
        }
    }

    /// The defaults, overridden by any of `TILE_CACHE_DIRECTORY`, `TILE_CACHE_DISK_CAPACITY`,
    /// `TILE_CACHE_MEMORY_CAPACITY`, `TILE_CACHE_COMPRESS` and `TILE_CACHE_WRITE_BACK` that
    /// are set.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            cache_directory: env_config_value(CACHE_DIRECTORY_ENV, defaults.cache_directory),
            disk_capacity: env_config_value(DISK_CAPACITY_ENV, defaults.disk_capacity),
            memory_capacity: env_config_value(MEMORY_CAPACITY_ENV, defaults.memory_capacity),
            compress: env_config_value(COMPRESS_ENV, defaults.compress),
            write_back: env_config_value(WRITE_BACK_ENV, defaults.write_back),
        }
    }
}

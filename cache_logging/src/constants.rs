/// Default log level for the library to use. Override using the `RUST_LOG` env variable.
pub(crate) const DEFAULT_LOG_LEVEL_FILE: &str = "info";
pub(crate) const DEFAULT_LOG_LEVEL_CONSOLE: &str = "warn";

/// Log destination. Empty means console; a path ending in `/` or naming an existing
/// directory means a new timestamped file in that directory; anything else is a file.
pub const LOG_DEST_ENV: &str = "TILE_CACHE_LOG_DEST";

/// "json" for json blobs; anything else is pretty text.
pub const LOG_FORMAT_ENV: &str = "TILE_CACHE_LOG_FORMAT";

/// Base name of log files created in a log directory.
pub const LOG_PREFIX_ENV: &str = "TILE_CACHE_LOG_PREFIX";

pub const DEFAULT_LOG_PREFIX: &str = "tile_cache";

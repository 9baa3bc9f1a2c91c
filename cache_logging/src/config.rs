use std::path::PathBuf;

use utils::env_config_value;

use crate::constants::{DEFAULT_LOG_PREFIX, LOG_DEST_ENV, LOG_FORMAT_ENV, LOG_PREFIX_ENV};

#[derive(Clone, Debug, PartialEq)]
pub enum LoggingMode {
    Directory(PathBuf),
    File(PathBuf),
    Console,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LoggingConfig {
    pub logging_mode: LoggingMode,
    pub use_json: bool,
    pub filename_prefix: String,
    pub version: String,
}

impl LoggingConfig {
    /// Console logging in text format.
    pub fn console(version: impl Into<String>) -> Self {
        Self {
            logging_mode: LoggingMode::Console,
            use_json: false,
            filename_prefix: DEFAULT_LOG_PREFIX.to_owned(),
            version: version.into(),
        }
    }

    /// Builds the configuration from `TILE_CACHE_LOG_DEST`, `TILE_CACHE_LOG_FORMAT` and
    /// `TILE_CACHE_LOG_PREFIX`, using `default_mode` when no destination is set.
    pub fn from_env(version: impl Into<String>, default_mode: LoggingMode) -> Self {
        let log_dest: Option<String> = env_config_value(LOG_DEST_ENV, None);
        let log_format: Option<String> = env_config_value(LOG_FORMAT_ENV, None);
        let filename_prefix: String = env_config_value(LOG_PREFIX_ENV, DEFAULT_LOG_PREFIX.to_owned());

        let logging_mode = resolve_logging_mode(log_dest.as_deref(), default_mode);
        let use_json = match &log_format {
            Some(format) => format.to_ascii_lowercase().trim() == "json",
            None => logging_mode != LoggingMode::Console,
        };

        Self {
            logging_mode,
            use_json,
            filename_prefix,
            version: version.into(),
        }
    }
}

fn resolve_logging_mode(log_dest: Option<&str>, default_mode: LoggingMode) -> LoggingMode {
    let Some(log_dest) = log_dest else {
        return default_mode;
    };
    if log_dest.trim().is_empty() {
        return LoggingMode::Console;
    }

    let path = PathBuf::from(log_dest);
    if log_dest.ends_with('/') || log_dest.ends_with('\\') || path.is_dir() {
        LoggingMode::Directory(path)
    } else {
        LoggingMode::File(path)
    }
}

mod config;
mod constants;

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, FixedOffset, Local};
pub use config::{LoggingConfig, LoggingMode};
pub use constants::{DEFAULT_LOG_PREFIX, LOG_DEST_ENV, LOG_FORMAT_ENV, LOG_PREFIX_ENV};
use constants::{DEFAULT_LOG_LEVEL_CONSOLE, DEFAULT_LOG_LEVEL_FILE};
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// The main entry point to set up logging. Should only be called once per process;
/// later calls fail to install a subscriber and are ignored.
pub fn init_logging(cfg: LoggingConfig) {
    let maybe_log_file: Option<PathBuf> = match &cfg.logging_mode {
        LoggingMode::Directory(log_dir) => Some(log_file_in_dir(log_dir, &cfg.filename_prefix)),
        LoggingMode::File(path) => Some(path.clone()),
        LoggingMode::Console => None,
    };

    if let Some(log_file) = maybe_log_file {
        // Attempt logging to a file, but fallback to console logging on error.
        if let Err(e) = init_logging_to_file(&log_file, cfg.use_json) {
            init_logging_to_console(&cfg);
            error!("Error logging to file {log_file:?} ({e}); falling back to console logging.");
        }
    } else {
        init_logging_to_console(&cfg);
    }

    info!("{}, tile cache {}", &cfg.version, env!("CARGO_PKG_VERSION"));
}

fn init_logging_to_console(cfg: &LoggingConfig) {
    let fmt_layer_base = tracing_subscriber::fmt::layer()
        .with_line_number(true)
        .with_file(true)
        .with_target(false);
    let fmt_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_LEVEL_CONSOLE))
        .unwrap_or_default();

    let registry = tracing_subscriber::registry();
    if cfg.use_json {
        let _ = registry.with(fmt_layer_base.json().with_filter(fmt_filter)).try_init();
    } else {
        let _ = registry.with(fmt_layer_base.pretty().with_filter(fmt_filter)).try_init();
    }
}

fn init_logging_to_file(path: &Path, use_json: bool) -> Result<(), std::io::Error> {
    use tracing_appender::{non_blocking, rolling};

    let (path, file_name) = match path.file_name() {
        Some(name) => (path.to_path_buf(), name.to_owned()),
        None => (path.join("tile_cache.log"), OsStr::new("tile_cache.log").to_owned()),
    };

    let log_directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            std::fs::create_dir_all(parent)?;
            parent
        },
        _ => Path::new("."),
    };

    // Make sure the log location is writeable so we error early here and dump to stderr on failure.
    std::fs::write(&path, [])?;

    let file_appender = rolling::never(log_directory, file_name);
    let (writer, guard) = non_blocking(file_appender);

    // Keep the worker alive for the life of the process so buffered lines are not dropped.
    static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
    let _ = FILE_GUARD.set(guard);

    let fmt_layer_base = tracing_subscriber::fmt::layer()
        .with_line_number(true)
        .with_file(true)
        .with_target(false)
        .with_ansi(false)
        .with_writer(writer);
    let fmt_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_LEVEL_FILE))
        .unwrap_or_default();

    let registry = tracing_subscriber::registry();
    if use_json {
        let _ = registry.with(fmt_layer_base.json().with_filter(fmt_filter)).try_init();
    } else {
        let _ = registry.with(fmt_layer_base.pretty().with_filter(fmt_filter)).try_init();
    }

    Ok(())
}

/// Build `<prefix>_<YYYYMMDD>T<HHMMSS><mmm><+/-HHMM>_<pid>.log` in `dir`.
/// Timestamp is in local time with numeric offset, filename-safe.
pub fn log_file_in_dir(dir: impl AsRef<Path>, prefix: &str) -> PathBuf {
    let now_local: DateTime<Local> = Local::now();
    let now_fixed: DateTime<FixedOffset> = now_local.with_timezone(now_local.offset());
    let ts = now_fixed.format("%Y%m%dT%H%M%S%3f%z");

    let pid = std::process::id();
    dir.as_ref().join(format!("{prefix}_{ts}_{pid}.log"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_name_has_prefix_timestamp_and_pid() {
        let path = log_file_in_dir("/tmp", "tile_cache");
        assert_eq!(path.parent(), Some(Path::new("/tmp")));

        let name = path.file_name().unwrap().to_str().unwrap();
        let stamp = name
            .strip_prefix("tile_cache_")
            .and_then(|rest| rest.strip_suffix(&format!("_{}.log", std::process::id())))
            .unwrap();
        assert!(DateTime::parse_from_str(stamp, "%Y%m%dT%H%M%S%3f%z").is_ok(), "{name}");
    }

    #[test]
    fn file_logging_creates_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let log_file = dir.path().join("nested").join("cache.log");
        init_logging(LoggingConfig {
            logging_mode: LoggingMode::File(log_file.clone()),
            use_json: true,
            filename_prefix: DEFAULT_LOG_PREFIX.to_owned(),
            version: "test".to_owned(),
        });
        assert!(log_file.exists());
    }
}

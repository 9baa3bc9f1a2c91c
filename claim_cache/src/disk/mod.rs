mod stream;
pub mod test_utils;

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use std::sync::Arc;

use cache_types::{FileId, FileIdFactory};
use error_printer::ErrorPrinter;
use file_utils::{remove_file_if_exists, SafeFileCreator, TEMP_FILE_SUFFIX};
pub use stream::{BufferedStreamFactory, FinishWrite, Lz4StreamFactory, StreamFactory};
use tracing::{debug, error, warn};

use crate::claim::{ClaimCore, ReaderGuard, WriterGuard};
use crate::error::CacheError;
use crate::storage::{CacheStorage, StorageLocation};
use crate::{CacheManager, ReadClaim, ReadWriteClaim};

/// Extension of a completed cache file.
pub const CACHE_FILE_EXTENSION: &str = ".cache";

pub type FileCacheManager<K> = CacheManager<FileStorage<K>>;
pub type FileReadClaim<K> = ReadClaim<FileStorage<K>>;
pub type FileReadWriteClaim<K> = ReadWriteClaim<FileStorage<K>>;

/// Stores each key in its own file, `<root>/<generated path>.cache`.
///
/// Writes go to `<file>.cache.part` first and are renamed into place once complete,
/// so a `.cache` file is always whole. Leftover `.part` files are deleted on scan.
pub struct FileStorage<K> {
    root: PathBuf,
    stream_factory: Arc<dyn StreamFactory>,
    _key: PhantomData<fn() -> K>,
}

impl<K> fmt::Debug for FileStorage<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileStorage").field("root", &self.root).finish()
    }
}

impl<K: FileId> FileStorage<K> {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_stream_factory(root, Arc::new(BufferedStreamFactory))
    }

    pub fn with_stream_factory(root: impl Into<PathBuf>, stream_factory: Arc<dyn StreamFactory>) -> Self {
        Self {
            root: root.into(),
            stream_factory,
            _key: PhantomData,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &K) -> PathBuf {
        self.root.join(format!("{}{CACHE_FILE_EXTENSION}", key.gen_path()))
    }

    fn scan_dir(&self, dir: &Path, factory: &dyn FileIdFactory<K>, keys: &mut Vec<K>) {
        let read_dir = match std::fs::read_dir(dir) {
            Ok(read_dir) => read_dir,
            Err(e) => {
                warn!("Failed to read cache directory {dir:?}: {e}");
                return;
            },
        };

        for entry in read_dir {
            let Ok(entry) = entry else {
                continue;
            };
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            let path = entry.path();
            if file_type.is_dir() {
                self.scan_dir(&path, factory, keys);
                continue;
            }
            if !file_type.is_file() {
                continue;
            }

            let Some(relative) = path.strip_prefix(&self.root).ok().and_then(|p| p.to_str()) else {
                debug!("skipping non-utf8 cache file {path:?}");
                continue;
            };
            if relative.ends_with(TEMP_FILE_SUFFIX) {
                debug!("removing unfinished write {path:?}");
                let _ = remove_file_if_exists(&path).warn_error(format!("Failed to remove {path:?}"));
                continue;
            }
            let Some(key_path) = relative.strip_suffix(CACHE_FILE_EXTENSION) else {
                debug!("skipping foreign file {path:?}");
                continue;
            };

            let key_path = key_path.replace(MAIN_SEPARATOR, "/");
            match factory.from_path(&key_path) {
                Some(key) => keys.push(key),
                None => debug!("skipping unrecognized cache file {path:?}"),
            }
        }
    }
}

impl<K: FileId> CacheStorage for FileStorage<K> {
    type Key = K;
    type Location = FileLocation;

    fn name(&self) -> &'static str {
        "disk"
    }

    fn locate(&self, key: &K) -> FileLocation {
        let path = self.path_for(key);
        let mut temp_path = path.clone().into_os_string();
        temp_path.push(TEMP_FILE_SUFFIX);
        FileLocation {
            path,
            temp_path: temp_path.into(),
            stream_factory: self.stream_factory.clone(),
        }
    }

    fn scan(&self, factory: &dyn FileIdFactory<K>) -> Result<Vec<K>, CacheError> {
        if let Err(e) = std::fs::create_dir_all(&self.root) {
            error!("Cache directory {:?} is unavailable: {e}", self.root);
            return Err(CacheError::DirectoryUnavailable(self.root.clone()));
        }
        if !self.root.is_dir() {
            error!("Cache directory {:?} is not a directory", self.root);
            return Err(CacheError::DirectoryUnavailable(self.root.clone()));
        }

        let mut keys = Vec::new();
        self.scan_dir(&self.root, factory, &mut keys);
        Ok(keys)
    }
}

/// The file backing one key.
pub struct FileLocation {
    path: PathBuf,
    temp_path: PathBuf,
    stream_factory: Arc<dyn StreamFactory>,
}

impl FileLocation {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }
}

impl fmt::Debug for FileLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileLocation").field("path", &self.path).finish()
    }
}

impl StorageLocation for FileLocation {
    fn size(&self) -> i64 {
        std::fs::metadata(&self.path).map(|m| m.len() as i64).unwrap_or(0)
    }

    fn exists(&self) -> bool {
        self.path.is_file()
    }

    fn delete(&self) -> Result<(), CacheError> {
        remove_file_if_exists(&self.path)?;
        Ok(())
    }
}

/// Reads a cache file through a claim. The claim cannot be released while this is open.
pub struct ClaimReader<'a> {
    inner: Box<dyn Read + Send>,
    _guard: ReaderGuard<'a>,
}

impl Read for ClaimReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

/// Writes a cache file through a read-write claim.
///
/// Nothing is visible at the cache path until [`ClaimWriter::close`] succeeds; dropping
/// the writer discards the data written so far.
pub struct ClaimWriter<'a> {
    inner: Box<dyn FinishWrite>,
    _guard: WriterGuard<'a>,
}

impl ClaimWriter<'_> {
    pub fn close(self) -> Result<(), CacheError> {
        let ClaimWriter { inner, _guard } = self;
        inner.finish()?;
        Ok(())
    }
}

impl Write for ClaimWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn open_reader<K: FileId>(core: &ClaimCore<FileStorage<K>>) -> Result<ClaimReader<'_>, CacheError> {
    let guard = core.gate.enter_read()?;
    let location = &core.location;
    let file = File::open(&location.path)?;
    Ok(ClaimReader {
        inner: location.stream_factory.read(file)?,
        _guard: guard,
    })
}

impl<K: FileId> ReadClaim<FileStorage<K>> {
    pub fn reader(&self) -> Result<ClaimReader<'_>, CacheError> {
        open_reader(&self.core)
    }

    pub fn path(&self) -> &Path {
        &self.core.location.path
    }
}

impl<K: FileId> ReadWriteClaim<FileStorage<K>> {
    pub fn reader(&self) -> Result<ClaimReader<'_>, CacheError> {
        open_reader(&self.core)
    }

    /// Starts replacing the file's content. Blocks while readers of this claim are open.
    pub fn writer(&mut self) -> Result<ClaimWriter<'_>, CacheError> {
        let guard = self.core.gate.enter_write()?;
        let location = &self.core.location;
        let file = SafeFileCreator::with_temp_path(&location.path, &location.temp_path)?;
        Ok(ClaimWriter {
            inner: location.stream_factory.write(file)?,
            _guard: guard,
        })
    }

    pub fn path(&self) -> &Path {
        &self.core.location.path
    }
}

use std::ffi::OsString;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::remove_file_if_exists;

/// Suffix appended to the destination path to form the in-flight file.
pub const TEMP_FILE_SUFFIX: &str = ".part";

/// Writes a file to a temporary sibling path and moves it to its destination
/// on [`SafeFileCreator::close`].
///
/// The destination either holds its previous content or the complete new
/// content; a crash or error mid-write only ever leaves the temporary file
/// behind. If the creator is dropped without being closed, the temporary file
/// is removed.
#[derive(Debug)]
pub struct SafeFileCreator {
    dest_path: PathBuf,
    temp_path: PathBuf,
    file: Option<File>,
}

impl SafeFileCreator {
    /// Creates a writer for `dest_path`, staging data at `<dest_path>.part`.
    pub fn new(dest_path: impl AsRef<Path>) -> io::Result<Self> {
        let dest_path = dest_path.as_ref().to_path_buf();
        let temp_path = temp_path_for(&dest_path);
        Self::with_temp_path(dest_path, temp_path)
    }

    /// Creates a writer for `dest_path`, staging data at `temp_path`.
    /// Parent directories of both paths are created as needed.
    pub fn with_temp_path(dest_path: impl Into<PathBuf>, temp_path: impl Into<PathBuf>) -> io::Result<Self> {
        let dest_path = dest_path.into();
        let temp_path = temp_path.into();

        for parent in [dest_path.parent(), temp_path.parent()].into_iter().flatten() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = File::create(&temp_path)?;
        Ok(Self {
            dest_path,
            temp_path,
            file: Some(file),
        })
    }

    pub fn dest_path(&self) -> &Path {
        &self.dest_path
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// Flushes the staged data to disk and renames it over the destination.
    pub fn close(mut self) -> io::Result<()> {
        let Some(mut file) = self.file.take() else {
            return Ok(());
        };
        let result = file
            .flush()
            .and_then(|_| file.sync_all())
            .and_then(|_| {
                drop(file);
                std::fs::rename(&self.temp_path, &self.dest_path)
            });
        if result.is_err() {
            let _ = remove_file_if_exists(&self.temp_path);
        }
        result
    }

    fn file_mut(&mut self) -> io::Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("write to a closed SafeFileCreator"))
    }
}

impl Write for SafeFileCreator {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file_mut()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file_mut()?.flush()
    }
}

impl Drop for SafeFileCreator {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            drop(file);
            debug!("discarding unfinished file {:?}", self.temp_path);
            let _ = remove_file_if_exists(&self.temp_path);
        }
    }
}

fn temp_path_for(dest_path: &Path) -> PathBuf {
    let mut name = OsString::from(dest_path.as_os_str());
    name.push(TEMP_FILE_SUFFIX);
    PathBuf::from(name)
}

mod safe_file_creator;

pub use safe_file_creator::{SafeFileCreator, TEMP_FILE_SUFFIX};

use std::io::ErrorKind;
use std::path::Path;

/// removes a file but disregards a "NotFound" error if the file is already gone
pub fn remove_file_if_exists(path: impl AsRef<Path>) -> std::io::Result<()> {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != ErrorKind::NotFound {
            return Err(e);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_remove_missing_file_is_ok() {
        let dir = TempDir::new().unwrap();
        assert!(remove_file_if_exists(dir.path().join("nope")).is_ok());
    }

    #[test]
    fn test_remove_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a");
        std::fs::write(&path, b"x").unwrap();
        remove_file_if_exists(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_remove_directory_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(remove_file_if_exists(dir.path()).is_err());
    }
}

use std::path::{Path, PathBuf};

use super::CACHE_FILE_EXTENSION;

/// Writes `<root>/<key_path>.cache` as if a previous run had cached it.
pub fn write_cache_file(root: &Path, key_path: &str, data: &[u8]) -> PathBuf {
    write_cache_file_raw(root, &format!("{key_path}{CACHE_FILE_EXTENSION}"), data)
}

/// Writes `<root>/<relative>` verbatim, creating parent directories.
pub fn write_cache_file_raw(root: &Path, relative: &str, data: &[u8]) -> PathBuf {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, data).unwrap();
    path
}

/// Every file below `root`, as sorted `/`-separated relative paths.
pub fn list_files(root: &Path) -> Vec<String> {
    fn walk(root: &Path, dir: &Path, out: &mut Vec<String>) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                walk(root, &path, out);
            } else if let Ok(relative) = path.strip_prefix(root) {
                out.push(relative.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/"));
            }
        }
    }

    let mut out = Vec::new();
    walk(root, root, &mut out);
    out.sort();
    out
}

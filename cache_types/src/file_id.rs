use std::fmt::{Debug, Display, Write};
use std::hash::Hash;

use crate::QualityLevel;

/// Separator between the fields of a generated path.
pub const PATH_DELIM: char = '_';

/// A cache key.
///
/// Equality and hashing follow the key's semantic coordinates, and
/// [`FileId::gen_path`] maps each distinct key to a distinct relative path
/// (`/`-separated, no extension) that storage backends use as the file or slot name.
pub trait FileId: Clone + Eq + Hash + Debug + Send + Sync + 'static {
    fn gen_path(&self) -> String;
}

/// Rebuilds keys from the paths produced by [`FileId::gen_path`] while indexing a cache.
/// Returns `None` for paths that belong to some other key type or are malformed.
pub trait FileIdFactory<K>: Send + Sync {
    fn from_path(&self, path: &str) -> Option<K>;
}

impl<K, F> FileIdFactory<K> for F
where
    F: Fn(&str) -> Option<K> + Send + Sync,
{
    fn from_path(&self, path: &str) -> Option<K> {
        self(path)
    }
}

/// A key that is one quality variant of some quality-independent position.
pub trait QualityId: FileId {
    type Position: Clone + Eq + Hash + Debug + Send + Sync + 'static;

    fn position(&self) -> Self::Position;

    fn quality(&self) -> QualityLevel;

    /// The key for the same position at `quality`.
    fn with_quality(&self, quality: QualityLevel) -> Self;

    fn from_parts(position: Self::Position, quality: QualityLevel) -> Self;
}

/// Joins `fields` with [`PATH_DELIM`] below the directory `prefix`: `prefix/a_b_c`.
pub fn gen_path(prefix: &str, fields: &[&dyn Display]) -> String {
    let mut path = String::with_capacity(prefix.len() + 8 * fields.len());
    path.push_str(prefix);
    path.push('/');
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            path.push(PATH_DELIM);
        }
        let _ = write!(path, "{field}");
    }
    path
}

/// Inverse of [`gen_path`]: the fields below `prefix`, if there are exactly `n_fields`.
pub fn split_path<'a>(path: &'a str, prefix: &str, n_fields: usize) -> Option<Vec<&'a str>> {
    let rest = path.strip_prefix(prefix)?.strip_prefix('/')?;
    let fields: Vec<&str> = rest.split(PATH_DELIM).collect();
    (fields.len() == n_fields && fields.iter().all(|f| !f.is_empty())).then_some(fields)
}

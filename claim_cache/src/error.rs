use std::path::PathBuf;

use thiserror::Error;
use utils::serialization_utils::PrematureEof;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("IO: {0}")]
    IO(std::io::Error),

    /// A claim protocol violation: releasing a claim twice or through the wrong manager,
    /// or handing back a claim the entry does not hold.
    #[error("Illegal claim: {0}")]
    IllegalClaim(String),

    #[error("Claim has been invalidated")]
    InvalidClaim,

    #[error("Premature end of data: expected {expected} bytes, got {got}")]
    PrematureEof { expected: usize, got: usize },

    #[error("Cache directory unavailable: {0:?}")]
    DirectoryUnavailable(PathBuf),

    #[error("ParseError: {0}")]
    Parse(String),
}

impl CacheError {
    pub fn parse<T: ToString>(value: T) -> CacheError {
        CacheError::Parse(value.to_string())
    }

    pub fn illegal<T: ToString>(value: T) -> CacheError {
        CacheError::IllegalClaim(value.to_string())
    }
}

impl From<std::io::Error> for CacheError {
    fn from(e: std::io::Error) -> Self {
        if let Some(eof) = e.get_ref().and_then(|inner| inner.downcast_ref::<PrematureEof>()) {
            return CacheError::PrematureEof {
                expected: eof.expected,
                got: eof.got,
            };
        }
        CacheError::IO(e)
    }
}

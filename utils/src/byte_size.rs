use std::fmt;
use std::str::FromStr;

use thiserror::Error;

pub const SIZE_KIB: i64 = 1 << 10;
pub const SIZE_MIB: i64 = 1 << 20;
pub const SIZE_GIB: i64 = 1 << 30;

/// A byte count that parses from and displays as a human-friendly string.
///
/// Accepted forms are a bare integer ("4096") or an integer followed by a unit,
/// case-insensitive and optionally separated by whitespace: "b", "k"/"kb"/"kib",
/// "m"/"mb"/"mib", "g"/"gb"/"gib". All units are binary (1 kb == 1024 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ByteSize(u64);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ByteSizeParseError {
    #[error("empty byte size")]
    Empty,

    #[error("invalid number in byte size: {0}")]
    InvalidNumber(String),

    #[error("unknown byte size unit: {0}")]
    UnknownUnit(String),

    #[error("byte size overflows: {0}")]
    Overflow(String),
}

impl ByteSize {
    pub const fn new(bytes: u64) -> Self {
        Self(bytes)
    }

    pub const fn kib(n: u64) -> Self {
        Self(n * SIZE_KIB as u64)
    }

    pub const fn mib(n: u64) -> Self {
        Self(n * SIZE_MIB as u64)
    }

    pub const fn gib(n: u64) -> Self {
        Self(n * SIZE_GIB as u64)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// The size as a signed byte count, saturating at `i64::MAX`.
    pub fn as_i64(&self) -> i64 {
        i64::try_from(self.0).unwrap_or(i64::MAX)
    }
}

impl From<u64> for ByteSize {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<ByteSize> for u64 {
    fn from(value: ByteSize) -> Self {
        value.0
    }
}

impl FromStr for ByteSize {
    type Err = ByteSizeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ByteSizeParseError::Empty);
        }

        let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
        let (digits, unit) = s.split_at(split);
        let n: u64 = digits
            .parse()
            .map_err(|_| ByteSizeParseError::InvalidNumber(s.to_owned()))?;

        let multiplier: u64 = match unit.trim().to_ascii_lowercase().as_str() {
            "" | "b" => 1,
            "k" | "kb" | "kib" => SIZE_KIB as u64,
            "m" | "mb" | "mib" => SIZE_MIB as u64,
            "g" | "gb" | "gib" => SIZE_GIB as u64,
            other => return Err(ByteSizeParseError::UnknownUnit(other.to_owned())),
        };

        n.checked_mul(multiplier)
            .map(Self)
            .ok_or_else(|| ByteSizeParseError::Overflow(s.to_owned()))
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.0;
        if n != 0 && n % SIZE_GIB as u64 == 0 {
            write!(f, "{}GiB", n / SIZE_GIB as u64)
        } else if n != 0 && n % SIZE_MIB as u64 == 0 {
            write!(f, "{}MiB", n / SIZE_MIB as u64)
        } else if n != 0 && n % SIZE_KIB as u64 == 0 {
            write!(f, "{}KiB", n / SIZE_KIB as u64)
        } else {
            write!(f, "{n}B")
        }
    }
}

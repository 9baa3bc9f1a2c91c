use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::KeyError;
use crate::file_id::{gen_path, split_path, FileId, FileIdFactory, QualityId};

/// The bounding box of a chunk; `(x, y)` is the lower left corner.
///
/// Equality and hashing compare the bit patterns of the coordinates so a
/// position can be used as a map key. All NaNs count as one value; `0.0` and `-0.0`
/// stay distinct, as they do in generated paths. Parsing a path only accepts finite
/// coordinates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChunkPosition {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl ChunkPosition {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    fn bits(&self) -> [u64; 4] {
        [canonical_bits(self.x), canonical_bits(self.y), canonical_bits(self.width), canonical_bits(self.height)]
    }

    /// The same area grown by `border` on every side.
    pub fn with_border(&self, border: f64) -> Self {
        Self {
            x: self.x - border,
            y: self.y - border,
            width: self.width + 2. * border,
            height: self.height + 2. * border,
        }
    }

    pub(crate) fn parse_fields(fields: &[&str]) -> Option<Self> {
        let [x, y, w, h] = fields else {
            return None;
        };
        Some(Self {
            x: parse_finite(x)?,
            y: parse_finite(y)?,
            width: parse_finite(w)?,
            height: parse_finite(h)?,
        })
    }
}

fn canonical_bits(value: f64) -> u64 {
    if value.is_nan() { f64::NAN.to_bits() } else { value.to_bits() }
}

fn parse_finite(field: &str) -> Option<f64> {
    field.parse::<f64>().ok().filter(|value| value.is_finite())
}

impl PartialEq for ChunkPosition {
    fn eq(&self, other: &Self) -> bool {
        self.bits() == other.bits()
    }
}

impl Eq for ChunkPosition {}

impl Hash for ChunkPosition {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bits().hash(state);
    }
}

impl Display for ChunkPosition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}) {}x{}", self.x, self.y, self.width, self.height)
    }
}

/// The quality of the point cloud data a chunk was sourced from. Higher order is better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityLevel {
    FiveByFive,
    HalfByHalf,
    Las,
}

impl QualityLevel {
    pub const ALL: [QualityLevel; 3] = [QualityLevel::FiveByFive, QualityLevel::HalfByHalf, QualityLevel::Las];

    pub const fn order(self) -> i32 {
        match self {
            QualityLevel::FiveByFive => 0,
            QualityLevel::HalfByHalf => 1,
            QualityLevel::Las => 2,
        }
    }

    pub fn from_order(order: i32) -> Result<Self, KeyError> {
        Self::ALL
            .into_iter()
            .find(|q| q.order() == order)
            .ok_or(KeyError::UnknownQualityOrder(order))
    }

    /// Whether the source data was interpolated onto a grid rather than raw points.
    pub const fn is_interpolated(self) -> bool {
        !matches!(self, QualityLevel::Las)
    }

    pub fn best() -> Self {
        QualityLevel::Las
    }
}

impl TryFrom<i32> for QualityLevel {
    type Error = KeyError;

    fn try_from(order: i32) -> Result<Self, Self::Error> {
        Self::from_order(order)
    }
}

impl Display for QualityLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QualityLevel::FiveByFive => "5x5",
            QualityLevel::HalfByHalf => "0.5x0.5",
            QualityLevel::Las => "las",
        };
        f.write_str(s)
    }
}

/// Identifies the point data of a chunk at one quality level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkId {
    pub position: ChunkPosition,
    pub quality: QualityLevel,
}

impl ChunkId {
    pub const PREFIX: &'static str = "chunk";

    pub const fn new(position: ChunkPosition, quality: QualityLevel) -> Self {
        Self { position, quality }
    }

    /// Parses a path produced by [`FileId::gen_path`].
    pub fn from_path(path: &str) -> Option<Self> {
        let fields = split_path(path, Self::PREFIX, 5)?;
        let position = ChunkPosition::parse_fields(&fields[..4])?;
        let quality = QualityLevel::from_order(fields[4].parse().ok()?).ok()?;
        Some(Self { position, quality })
    }
}

impl FileId for ChunkId {
    fn gen_path(&self) -> String {
        let p = &self.position;
        gen_path(Self::PREFIX, &[&p.x, &p.y, &p.width, &p.height, &self.quality.order()])
    }
}

impl QualityId for ChunkId {
    type Position = ChunkPosition;

    fn position(&self) -> ChunkPosition {
        self.position
    }

    fn quality(&self) -> QualityLevel {
        self.quality
    }

    fn with_quality(&self, quality: QualityLevel) -> Self {
        Self::new(self.position, quality)
    }

    fn from_parts(position: ChunkPosition, quality: QualityLevel) -> Self {
        Self::new(position, quality)
    }
}

impl Display for ChunkId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "chunk {} @ {}", self.position, self.quality)
    }
}

/// Key factory for [`ChunkId`] paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkIdFactory;

impl FileIdFactory<ChunkId> for ChunkIdFactory {
    fn from_path(&self, path: &str) -> Option<ChunkId> {
        ChunkId::from_path(path)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_quality_order() {
        assert!(QualityLevel::Las > QualityLevel::HalfByHalf);
        assert!(QualityLevel::HalfByHalf > QualityLevel::FiveByFive);
        for q in QualityLevel::ALL {
            assert_eq!(QualityLevel::from_order(q.order()).unwrap(), q);
        }
        assert_eq!(QualityLevel::from_order(3), Err(KeyError::UnknownQualityOrder(3)));
        assert!(QualityLevel::FiveByFive.is_interpolated());
        assert!(QualityLevel::HalfByHalf.is_interpolated());
        assert!(!QualityLevel::Las.is_interpolated());
    }

    #[test]
    fn test_chunk_path() {
        let id = ChunkId::new(ChunkPosition::new(150000., 375000.5, 400., 400.), QualityLevel::HalfByHalf);
        let path = id.gen_path();
        assert_eq!(path, "chunk/150000_375000.5_400_400_1");
        assert_eq!(ChunkId::from_path(&path), Some(id));
        assert_eq!(ChunkIdFactory.from_path(&path), Some(id));
    }

    #[test]
    fn test_chunk_path_rejects_malformed() {
        assert_eq!(ChunkId::from_path("chunk/1_2_3_4"), None);
        assert_eq!(ChunkId::from_path("chunk/1_2_3_4_9"), None);
        assert_eq!(ChunkId::from_path("chunk/a_2_3_4_0"), None);
        assert_eq!(ChunkId::from_path("mesh/1_2_3_4_0"), None);
        assert_eq!(ChunkId::from_path("garbage"), None);
    }

    #[test]
    fn test_nan_positions_are_one_key() {
        let quiet = ChunkPosition::new(f64::NAN, 0., 1., 1.);
        let payload = ChunkPosition::new(f64::from_bits(f64::NAN.to_bits() | 1), 0., 1., 1.);
        assert!(payload.x.is_nan());
        assert_eq!(quiet, payload);

        let mut set = HashSet::new();
        set.insert(quiet);
        assert!(set.contains(&payload));
        assert_eq!(
            ChunkId::new(quiet, QualityLevel::Las).gen_path(),
            ChunkId::new(payload, QualityLevel::Las).gen_path()
        );

        assert_ne!(ChunkPosition::new(0., 0., 1., 1.), ChunkPosition::new(-0., 0., 1., 1.));
    }

    #[test]
    fn test_non_finite_paths_are_rejected() {
        assert_eq!(ChunkId::from_path("chunk/NaN_0_1_1_0"), None);
        assert_eq!(ChunkId::from_path("chunk/0_inf_1_1_0"), None);
        assert_eq!(ChunkId::from_path("chunk/0_0_-inf_1_0"), None);
        assert!(ChunkId::from_path("chunk/-0_0_1_1_0").is_some());
    }

    #[test]
    fn test_position_as_key() {
        let a = ChunkPosition::new(1., 2., 3., 4.);
        let b = ChunkPosition::new(1., 2., 3., 4.);
        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
        assert!(!set.contains(&a.with_border(1.)));
        assert_eq!(a.with_border(1.), ChunkPosition::new(0., 1., 5., 6.));
    }

    #[test]
    fn test_distinct_keys_distinct_paths() {
        let pos = ChunkPosition::new(0., 0., 1., 1.);
        let paths: HashSet<String> = QualityLevel::ALL
            .into_iter()
            .map(|q| ChunkId::new(pos, q).gen_path())
            .collect();
        assert_eq!(paths.len(), 3);
    }

    #[test]
    fn test_serde_names() {
        let id = ChunkId::new(ChunkPosition::new(1., 2., 3., 4.), QualityLevel::Las);
        let json = serde_json::to_string(&id).unwrap();
        assert!(json.contains("\"las\""));
        let back: ChunkId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}

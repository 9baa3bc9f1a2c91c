use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::error::KeyError;
use crate::file_id::{gen_path, split_path, FileId, FileIdFactory, QualityId};
use crate::{ChunkId, ChunkPosition, QualityLevel};

/// Layout of the vertex buffer of a generated mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum VertexBufferType {
    /// Separate float3 position and float3 normal buffers.
    Vertex3FloatNormal3Float = 0,
    /// One buffer with position and normal interleaved per vertex.
    InterleavedVertex3FloatNormal3Float = 1,
}

impl VertexBufferType {
    pub const fn id(self) -> i32 {
        self as i32
    }

    pub fn from_id(id: i32) -> Result<Self, KeyError> {
        match id {
            0 => Ok(Self::Vertex3FloatNormal3Float),
            1 => Ok(Self::InterleavedVertex3FloatNormal3Float),
            _ => Err(KeyError::UnknownVertexBufferType(id)),
        }
    }
}

/// Primitive type and winding of the index buffer of a generated mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum MeshBufferType {
    TrianglesClockwise3Int = 0,
    TrianglesCounterClockwise3Int = 1,
    QuadsClockwise4Int = 2,
    QuadsCounterClockwise4Int = 3,
}

impl MeshBufferType {
    pub const fn id(self) -> i32 {
        self as i32
    }

    pub fn from_id(id: i32) -> Result<Self, KeyError> {
        match id {
            0 => Ok(Self::TrianglesClockwise3Int),
            1 => Ok(Self::TrianglesCounterClockwise3Int),
            2 => Ok(Self::QuadsClockwise4Int),
            3 => Ok(Self::QuadsCounterClockwise4Int),
            _ => Err(KeyError::UnknownMeshBufferType(id)),
        }
    }

    pub const fn is_clockwise(self) -> bool {
        matches!(self, Self::TrianglesClockwise3Int | Self::QuadsClockwise4Int)
    }

    pub const fn indices_per_primitive(self) -> usize {
        match self {
            Self::TrianglesClockwise3Int | Self::TrianglesCounterClockwise3Int => 3,
            Self::QuadsClockwise4Int | Self::QuadsCounterClockwise4Int => 4,
        }
    }
}

/// The quality-independent part of a [`MeshChunkId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MeshChunkPosition {
    pub position: ChunkPosition,
    pub vertex_type: VertexBufferType,
    pub mesh_type: MeshBufferType,
}

/// Identifies a generated mesh of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MeshChunkId {
    pub position: ChunkPosition,
    pub quality: QualityLevel,
    pub vertex_type: VertexBufferType,
    pub mesh_type: MeshBufferType,
}

impl MeshChunkId {
    pub const PREFIX: &'static str = "mesh";

    pub const fn new(
        position: ChunkPosition,
        quality: QualityLevel,
        vertex_type: VertexBufferType,
        mesh_type: MeshBufferType,
    ) -> Self {
        Self {
            position,
            quality,
            vertex_type,
            mesh_type,
        }
    }

    /// The point data key this mesh is generated from.
    pub fn as_chunk_id(&self) -> ChunkId {
        ChunkId::new(self.position, self.quality)
    }

    /// The same mesh over an area grown by `border` on every side.
    pub fn with_border(&self, border: f64) -> Self {
        Self {
            position: self.position.with_border(border),
            ..*self
        }
    }

    pub fn from_path(path: &str) -> Option<Self> {
        let fields = split_path(path, Self::PREFIX, 7)?;
        let position = ChunkPosition::parse_fields(&fields[..4])?;
        let quality = QualityLevel::from_order(fields[4].parse().ok()?).ok()?;
        let vertex_type = VertexBufferType::from_id(fields[5].parse().ok()?).ok()?;
        let mesh_type = MeshBufferType::from_id(fields[6].parse().ok()?).ok()?;
        Some(Self::new(position, quality, vertex_type, mesh_type))
    }
}

impl FileId for MeshChunkId {
    fn gen_path(&self) -> String {
        let p = &self.position;
        gen_path(
            Self::PREFIX,
            &[
                &p.x,
                &p.y,
                &p.width,
                &p.height,
                &self.quality.order(),
                &self.vertex_type.id(),
                &self.mesh_type.id(),
            ],
        )
    }
}

impl QualityId for MeshChunkId {
    type Position = MeshChunkPosition;

    fn position(&self) -> MeshChunkPosition {
        MeshChunkPosition {
            position: self.position,
            vertex_type: self.vertex_type,
            mesh_type: self.mesh_type,
        }
    }

    fn quality(&self) -> QualityLevel {
        self.quality
    }

    fn with_quality(&self, quality: QualityLevel) -> Self {
        Self { quality, ..*self }
    }

    fn from_parts(position: MeshChunkPosition, quality: QualityLevel) -> Self {
        Self::new(position.position, quality, position.vertex_type, position.mesh_type)
    }
}

impl Display for MeshChunkId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "mesh {} @ {} ({:?}, {:?})",
            self.position, self.quality, self.vertex_type, self.mesh_type
        )
    }
}

/// Key factory for [`MeshChunkId`] paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeshChunkIdFactory;

impl FileIdFactory<MeshChunkId> for MeshChunkIdFactory {
    fn from_path(&self, path: &str) -> Option<MeshChunkId> {
        MeshChunkId::from_path(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mesh_id() -> MeshChunkId {
        MeshChunkId::new(
            ChunkPosition::new(10., 20., 5., 5.),
            QualityLevel::Las,
            VertexBufferType::InterleavedVertex3FloatNormal3Float,
            MeshBufferType::QuadsCounterClockwise4Int,
        )
    }

    #[test]
    fn test_mesh_path() {
        let id = mesh_id();
        let path = id.gen_path();
        assert_eq!(path, "mesh/10_20_5_5_2_1_3");
        assert_eq!(MeshChunkIdFactory.from_path(&path), Some(id));
        assert_eq!(ChunkId::from_path(&path), None);
        assert_eq!(MeshChunkId::from_path("mesh/10_20_5_5_2_2_3"), None);
        assert_eq!(MeshChunkId::from_path("mesh/10_20_5_5_2_1_4"), None);
        assert_eq!(MeshChunkId::from_path("mesh/NaN_20_5_5_2_1_1"), None);
    }

    #[test]
    fn test_quality_variants_share_position() {
        let id = mesh_id();
        let low = id.with_quality(QualityLevel::FiveByFive);
        assert_ne!(low, id);
        assert_eq!(low.position(), id.position());
        assert_ne!(low.gen_path(), id.gen_path());
        assert_eq!(MeshChunkId::from_parts(id.position(), id.quality()), id);
        assert_eq!(id.as_chunk_id().gen_path(), "chunk/10_20_5_5_2");
    }

    #[test]
    fn test_buffer_types() {
        for id in 0..4 {
            assert_eq!(MeshBufferType::from_id(id).unwrap().id(), id);
        }
        assert!(MeshBufferType::TrianglesClockwise3Int.is_clockwise());
        assert!(!MeshBufferType::QuadsCounterClockwise4Int.is_clockwise());
        assert_eq!(MeshBufferType::QuadsClockwise4Int.indices_per_primitive(), 4);
        assert_eq!(VertexBufferType::from_id(2), Err(KeyError::UnknownVertexBufferType(2)));
    }
}

mod chunk;
mod error;
mod file_id;
mod mesh;

pub use chunk::{ChunkId, ChunkIdFactory, ChunkPosition, QualityLevel};
pub use error::KeyError;
pub use file_id::{gen_path, split_path, FileId, FileIdFactory, QualityId, PATH_DELIM};
pub use mesh::{MeshBufferType, MeshChunkId, MeshChunkIdFactory, MeshChunkPosition, VertexBufferType};

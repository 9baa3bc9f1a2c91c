use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("Unknown quality level order: {0}")]
    UnknownQualityOrder(i32),

    #[error("Unknown vertex buffer type id: {0}")]
    UnknownVertexBufferType(i32),

    #[error("Unknown mesh buffer type id: {0}")]
    UnknownMeshBufferType(i32),
}

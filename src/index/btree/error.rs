use thiserror::Error;
use crate::storage::buffer::BufferPoolError;

#[derive(Error, Debug)]
pub enum BTreeError {
    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Node too large for page")]
    NodeTooLarge,

    #[error("Invalid page format")]
    InvalidPageFormat,

    #[error("Index name {0:?} cannot be registered in the header page")]
    IndexNameRejected(String),

    #[error("Buffer pool error: {0}")]
    BufferPoolError(#[from] BufferPoolError),
}

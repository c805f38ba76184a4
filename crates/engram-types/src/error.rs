use thiserror::Error;

use crate::memory::MemoryType;

/// Errors from repository operations (used by trait definitions in engram-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Errors raised while operating on a memory instance.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("{memory_type} memory failed to initialize: {message}")]
    Initialization {
        memory_type: MemoryType,
        message: String,
    },

    #[error("{memory_type} memory store failed: {message}")]
    Store {
        memory_type: MemoryType,
        message: String,
    },

    #[error("{memory_type} memory retrieval failed: {message}")]
    Retrieve {
        memory_type: MemoryType,
        message: String,
    },

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Errors from the screenshot captioning provider.
#[derive(Debug, Error)]
pub enum CaptionError {
    #[error("caption provider error: {0}")]
    Provider(String),

    #[error("no image data supplied")]
    EmptyImage,

    #[error("deserialization error: {0}")]
    Deserialization(String),
}

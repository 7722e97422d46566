//! Typed errors for each subsystem.
//!
//! Library-internal code returns these closed enums so callers can match on
//! failure kind; the CLI and HTTP/MCP boundary collapse everything into
//! `anyhow::Error`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported extension: {0}")]
    UnsupportedExtension(String),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("model '{0}' failed to load: {1}")]
    ModelLoad(String, String),
    #[error("embedding batch returned {got} vectors for {expected} inputs")]
    ShapeMismatch { expected: usize, got: usize },
    #[error("embedding server unreachable at {0}: {1}")]
    ServerUnreachable(String, String),
    #[error("embedding isolate has shut down")]
    IsolateGone,
    #[error("embedding provider is disabled for this silo")]
    Disabled,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("vector dimension mismatch: column expects {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("stored key '{0}' does not map to any configured silo directory")]
    InvalidStoredKey(String),
}

#[derive(Debug, Error)]
pub enum SiloError {
    #[error("silo '{0}' not found")]
    NotFound(String),
    #[error("a silo named '{0}' already exists")]
    DuplicateName(String),
    #[error("silo '{0}' has no watched directories configured")]
    NoDirectories(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error("silo '{0}' is in the error state: {1}")]
    SiloInErrorState(String, String),
}

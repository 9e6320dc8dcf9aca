use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("memory not found: {id} (server {server_id})")]
    NotFound { id: String, server_id: String },

    #[error("embedding failed: {0}")]
    EmbedFailed(String),

    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("content must not be empty")]
    EmptyContent,
}

pub type Result<T> = std::result::Result<T, MemoryError>;

//! Error categories, matching the surface-mapping table the MCP/HTTP layer relies on.

use thiserror::Error;

/// Top-level kernel-facing error. Downstream (HTTP, stdio tools) maps each
/// variant to a status/category per the error handling table.
#[derive(Debug, Error)]
pub enum Error {
    #[error("validation: {0}")]
    Validation(String),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    VectorIndex(#[from] crate::vector::VectorIndexError),

    #[error(transparent)]
    PendingQueue(#[from] crate::storage::pending::PendingQueueError),

    #[error(transparent)]
    IdentityStore(#[from] crate::storage::identity::IdentityStoreError),

    #[cfg(feature = "cloud-sync")]
    #[error(transparent)]
    Sync(#[from] crate::sync::SyncError),

    #[error(transparent)]
    Embedding(#[from] crate::embeddings::EmbeddingError),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error("cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;

//! Cloud Sync (§4.L): push/pull of memories and the identity layer to a
//! remote object-storage prefix, optionally encrypted at rest.

pub mod backend;
pub mod encryptor;
pub mod manifest;

pub use backend::{CloudSyncService, ImportReport, ObjectStore};
pub use encryptor::DataEncryptor;
pub use manifest::{MemoryRecord, SyncManifest};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("encryption failed: {0}")]
    Encryption(String),
    #[error("decryption failed: {0}")]
    Decryption(String),
    #[error("checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: String, got: String },
    #[error("object store error: {0}")]
    ObjectStore(String),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("manifest error: {0}")]
    Manifest(String),
}

/// How an imported record is reconciled against an existing local one with
/// the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictStrategy {
    /// Last-write-wins by `updated_at`: overwrite only if the incoming
    /// record is strictly newer.
    LastWriteWins,
    /// Never overwrite an existing record.
    Skip,
    /// Field-level merge. Not implemented — every `Merge` request is
    /// treated as `Skip` and counted as a conflict, per the open decision
    /// recorded in the design notes.
    Merge,
}

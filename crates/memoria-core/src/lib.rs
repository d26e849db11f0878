//! # memoria-core
//!
//! A layered memory engine for long-running AI agents and caregiving
//! assistants: five cognitive tiers from a write-protected identity schema
//! down to procedural know-how, backed by a pluggable vector index, a
//! durable pending-approval queue, and a three-approver workflow for
//! anything that touches identity.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use memoria_core::{MemoryKernel, AddMemoryRequest};
//!
//! let outcome = kernel.add_memory(AddMemoryRequest {
//!     content: "patient went for a walk in the park today".into(),
//!     layer: "verified_fact".into(),
//!     ..Default::default()
//! })?;
//! ```
//!
//! ## Feature flags
//!
//! - `embeddings` (default): local embedding generation via fastembed
//! - `vector-search` (default): embedded HNSW search via usearch
//! - `remote-index`: Qdrant-backed vector index over HTTP
//! - `cloud-sync`: encrypted push/pull to a remote object store

pub mod budget;
pub mod cache;
pub mod config;
pub mod conflict;
pub mod embeddings;
pub mod error;
pub mod kernel;
pub mod model;
pub mod safety;
pub mod storage;
#[cfg(feature = "cloud-sync")]
pub mod sync;
pub mod vector;
pub mod workflow;

pub use budget::{BudgetConfig, BudgetReport, ContextBudgetManager, LayerUsage};
pub use cache::WorkingMemoryCache;
pub use config::{IdentityConfigSource, IdentityYamlEntry, ProjectPaths, YamlIdentityConfig};
pub use conflict::{Conflict, ConflictDetector, ConflictDetectorConfig, ConflictType, Severity};
pub use error::{Error, Result};
pub use kernel::{AddMemoryOutcome, AddMemoryRequest, KernelStats, MemoryKernel, SearchHit, SearchMemoryRequest};
pub use model::{Category, Layer, MemoryItem, Source};
pub use safety::{FilterAction, SafetyConfig, SafetyFilter, SafetyResult};
pub use storage::{IdentityChangeRecord, IdentityChangeStore, PendingQueueStore, PendingRecord};
#[cfg(feature = "vector-search")]
pub use vector::EmbeddedVectorIndex;
#[cfg(feature = "remote-index")]
pub use vector::RemoteVectorIndex;
pub use vector::{PayloadPatch, QueryFilter, ScoredItem, VectorIndex, VectorIndexError};
pub use workflow::ApprovalWorkflow;

#[cfg(feature = "cloud-sync")]
pub use sync::{CloudSyncService, ConflictStrategy, DataEncryptor, ImportReport, MemoryRecord, ObjectStore, SyncError, SyncManifest};

/// Crate version, exposed for `get_stats`-style diagnostic responses.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model: BAAI/bge-small-en-v1.5, 384 dimensions natively.
pub const DEFAULT_EMBEDDING_MODEL: &str = "BAAI/bge-small-en-v1.5";

/// Convenient imports for tool handlers and HTTP wiring.
pub mod prelude {
    pub use crate::{
        AddMemoryOutcome, AddMemoryRequest, ApprovalWorkflow, Category, ContextBudgetManager, Error, Layer,
        MemoryItem, MemoryKernel, PendingQueueStore, QueryFilter, Result, SafetyFilter, SearchHit,
        SearchMemoryRequest, Source, VectorIndex, WorkingMemoryCache,
    };

    #[cfg(feature = "embeddings")]
    pub use crate::embeddings::{EmbeddingProvider, LocalEmbeddingProvider};
}

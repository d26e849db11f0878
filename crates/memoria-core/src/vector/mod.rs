//! Vector Index Adapter (§4.B) — a backend-independent contract implemented
//! by two conforming deployment modes: [`embedded::EmbeddedVectorIndex`]
//! (file-backed, usearch + SQLite payload store) and
//! [`remote::RemoteVectorIndex`] (Qdrant over HTTP). There is no silent
//! fallback between them; the caller picks a mode at construction time.

#[cfg(feature = "vector-search")]
pub mod embedded;
#[cfg(feature = "remote-index")]
pub mod remote;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{Layer, MemoryItem};

#[cfg(feature = "vector-search")]
pub use embedded::EmbeddedVectorIndex;
#[cfg(feature = "remote-index")]
pub use remote::RemoteVectorIndex;

#[derive(Debug, Error)]
pub enum VectorIndexError {
    #[error("index creation failed: {0}")]
    Creation(String),
    #[error("upsert failed: {0}")]
    Upsert(String),
    #[error("query failed: {0}")]
    Query(String),
    #[error("persistence failed: {0}")]
    Persistence(String),
    #[error("dimension mismatch: expected {expected}, got {got}")]
    InvalidDimensions { expected: usize, got: usize },
    #[error("item not found: {0}")]
    NotFound(String),
    #[error(
        "remote index unreachable at {url}: readiness probe failed ({reason}); refusing to fall back to embedded mode"
    )]
    RemoteUnreachable { url: String, reason: String },
}

/// AND-of-equality filter over payload fields, plus the two filter rules
/// the adapter must enforce identically across modes (§4.B):
///
/// 1. `only_active` (default on) restricts to `is_active = true`.
/// 2. Expired items (`expires_at` in the past) are excluded unconditionally —
///    this is not a flag, every query path applies it.
/// 3. `agent_id` is honored only when `layer == Some(Layer::EventLog)`; the
///    adapter itself drops the constraint otherwise, so callers do not need
///    to remember the rule.
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    pub layer: Option<Layer>,
    pub category: Option<String>,
    pub agent_id: Option<String>,
    pub only_active: bool,
}

impl QueryFilter {
    pub fn new() -> Self {
        Self { only_active: true, ..Default::default() }
    }

    /// The agent_id constraint after rule 3 is applied.
    pub fn effective_agent_id(&self) -> Option<&str> {
        if self.layer == Some(Layer::EventLog) { self.agent_id.as_deref() } else { None }
    }
}

/// One scored hit from [`VectorIndex::query`]. Score is clamped to [0, 1].
#[derive(Debug, Clone)]
pub struct ScoredItem {
    pub item: MemoryItem,
    pub score: f32,
}

/// Stable contract over the backing vector engine.
pub trait VectorIndex: Send + Sync {
    /// Idempotent collection/table creation for the given dimension.
    fn ensure_collection(&self, dimensions: usize) -> Result<(), VectorIndexError>;

    /// Idempotent by id: a second upsert with the same id replaces the first.
    fn upsert(&self, vector: &[f32], item: &MemoryItem) -> Result<(), VectorIndexError>;

    /// Top-k by cosine score, filtered per [`QueryFilter`]'s rules. Returned
    /// scores are clamped to `[0, 1]`.
    fn query(&self, vector: &[f32], k: usize, filter: &QueryFilter) -> Result<Vec<ScoredItem>, VectorIndexError>;

    /// Stable enumeration with the same filter rules as `query`, but no
    /// vector cost — used for e.g. the identity layer scroll.
    fn scroll(
        &self,
        filter: &QueryFilter,
        limit: usize,
        offset: Option<usize>,
    ) -> Result<(Vec<MemoryItem>, Option<usize>), VectorIndexError>;

    fn retrieve_by_id(&self, id: uuid::Uuid) -> Result<Option<MemoryItem>, VectorIndexError>;

    /// Patch a subset of payload fields without touching the vector.
    fn set_payload(&self, id: uuid::Uuid, patch: PayloadPatch) -> Result<(), VectorIndexError>;

    /// Hard delete.
    fn delete(&self, id: uuid::Uuid) -> Result<(), VectorIndexError>;

    fn stats(&self) -> Result<IndexStats, VectorIndexError>;
}

/// Partial update applied by `set_payload`. `None` fields are left
/// untouched; this is a patch, not a replace.
#[derive(Debug, Clone, Default)]
pub struct PayloadPatch {
    pub is_active: Option<bool>,
    pub promoted_to_fact: Option<bool>,
    pub promoted_at: Option<DateTime<Utc>>,
    pub promoted_fact_id: Option<uuid::Uuid>,
}

#[derive(Debug, Clone)]
pub struct IndexStats {
    pub total_items: usize,
    pub dimensions: usize,
    pub collection_name: String,
    pub mode: &'static str,
}

/// Clamp a raw cosine score into `[0, 1]`, the contract every adapter mode
/// must honor before returning a score to a caller.
pub fn clamp_score(score: f32) -> f32 {
    score.clamp(0.0, 1.0)
}

pub(crate) fn is_expired(item: &MemoryItem, now: DateTime<Utc>) -> bool {
    item.is_expired(now)
}

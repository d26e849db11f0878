//! Memory Kernel (§4.I): the orchestrator every tool and HTTP handler calls
//! through. Nothing downstream talks to the vector index, the pending
//! queue, or the identity store directly — the kernel is where the rules
//! in §3 and §4 actually get enforced.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::budget::ContextBudgetManager;
use crate::config::{identity_entry_id, IdentityConfigSource};
use crate::conflict::{Conflict, ConflictDetector, ConflictDetectorConfig};
use crate::embeddings::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::model::{Category, Layer, MemoryItem, Source};
use crate::safety::{FilterAction, SafetyFilter};
use crate::storage::pending::PendingQueueStats;
use crate::storage::{PendingQueueStore, PendingRecord};
use crate::vector::{PayloadPatch, QueryFilter, VectorIndex};

const MAX_CONSTITUTION_ITEMS: usize = 20;
/// Sources below this confidence are written straight to the kernel
/// (caregiver/user); sources at or above `AI_AUTO_SAVE_THRESHOLD` among the
/// gated sources are saved directly, the band below down to
/// `AI_PENDING_THRESHOLD` goes to the pending queue, and anything lower is
/// rejected outright.
const AI_AUTO_SAVE_THRESHOLD: f64 = 0.9;
const AI_PENDING_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone, Default)]
pub struct AddMemoryRequest {
    pub content: String,
    pub layer: String,
    pub category: Option<String>,
    pub source: Option<String>,
    pub agent_id: Option<String>,
    pub created_by: Option<String>,
    pub session_id: Option<String>,
    pub confidence: Option<f64>,
    pub priority: Option<u32>,
    pub event_when: Option<DateTime<Utc>>,
    pub event_where: Option<String>,
    pub event_who: Vec<String>,
    pub ttl_days: Option<i64>,
    pub related_files: Vec<String>,
    pub requires_approval: bool,
}

#[derive(Debug, Clone)]
pub enum AddMemoryOutcome {
    /// `conflicts` is the §4.H rule-based scan against the rest of the
    /// item's layer; it never blocks the save, only reports.
    Saved { item: MemoryItem, conflicts: Vec<Conflict> },
    Pending { id: Uuid, confidence: f64 },
    RejectedLowConfidence,
    RejectedUnsafe { reason: String, pii_detected: Vec<String> },
}

#[derive(Debug, Clone, Default)]
pub struct SearchMemoryRequest {
    pub query: String,
    pub layer: Option<String>,
    pub agent_id: Option<String>,
    pub category: Option<String>,
    pub limit: usize,
    pub min_score: f32,
    pub include_constitution: bool,
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub item: MemoryItem,
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct KernelStats {
    pub total_items: usize,
    pub dimensions: usize,
    pub mode: &'static str,
    pub pending: PendingQueueStats,
}

pub struct MemoryKernel {
    vector_index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    pending_store: Arc<PendingQueueStore>,
    identity_config: Arc<dyn IdentityConfigSource>,
    safety_filter: SafetyFilter,
    budget: ContextBudgetManager,
    conflict_config: ConflictDetectorConfig,
    project_id: String,
}

impl MemoryKernel {
    pub fn new(
        project_id: impl Into<String>,
        vector_index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        pending_store: Arc<PendingQueueStore>,
        identity_config: Arc<dyn IdentityConfigSource>,
        safety_filter: SafetyFilter,
        budget: ContextBudgetManager,
    ) -> Result<Self> {
        vector_index.ensure_collection(embedder.dimensions())?;
        Ok(Self {
            vector_index,
            embedder,
            pending_store,
            identity_config,
            safety_filter,
            budget,
            conflict_config: ConflictDetectorConfig::default(),
            project_id: project_id.into(),
        })
    }

    pub fn budget(&self) -> &ContextBudgetManager {
        &self.budget
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn add_memory(&self, req: AddMemoryRequest) -> Result<AddMemoryOutcome> {
        let layer = Layer::normalize(&req.layer).ok_or_else(|| Error::Validation(format!("unknown layer: {}", req.layer)))?;

        if layer == Layer::IdentitySchema {
            return Err(Error::Permission(
                "the identity layer is write-protected; use propose_constitution_change instead".to_string(),
            ));
        }

        let safety = self.safety_filter.check(&req.content);
        if safety.action == FilterAction::Block {
            return Ok(AddMemoryOutcome::RejectedUnsafe {
                reason: "content failed the safety filter".to_string(),
                pii_detected: safety.pii_detected,
            });
        }
        let content = safety.filtered_content;

        let source = req.source.as_deref().map(Source::parse);
        let confidence = req.confidence.unwrap_or(1.0);

        let mut item = MemoryItem::new(content, layer);
        item.category = req.category.as_deref().map(Category::parse);
        item.source = req.source.clone();
        item.agent_id = req.agent_id;
        item.created_by = req.created_by;
        item.session_id = req.session_id;
        item.confidence = confidence;
        item.priority = req.priority.unwrap_or(100);
        item.event_when = req.event_when;
        item.event_where = req.event_where;
        item.event_who = req.event_who;
        item.related_files = req.related_files;
        if let Some(days) = req.ttl_days {
            item.expires_at = Some(Utc::now() + chrono::Duration::days(days));
        }

        let gated = source.as_ref().is_some_and(Source::is_gated);
        if gated || req.requires_approval {
            if confidence >= AI_AUTO_SAVE_THRESHOLD && !req.requires_approval {
                let conflicts = self.save_item_and_detect_conflicts(&item)?;
                return Ok(AddMemoryOutcome::Saved { item, conflicts });
            }
            if confidence >= AI_PENDING_THRESHOLD || req.requires_approval {
                let id = self.pending_store.insert(item)?;
                return Ok(AddMemoryOutcome::Pending { id, confidence });
            }
            return Ok(AddMemoryOutcome::RejectedLowConfidence);
        }

        let conflicts = self.save_item_and_detect_conflicts(&item)?;
        Ok(AddMemoryOutcome::Saved { item, conflicts })
    }

    fn save_item(&self, item: MemoryItem) -> Result<()> {
        let vector = self.embedder.embed(&item.content)?;
        self.vector_index.upsert(&vector, &item)?;
        Ok(())
    }

    /// Embeds once, runs the §4.H conflict scan against the item's layer
    /// before the write lands, then upserts. A conflict-detection failure
    /// (e.g. a transient index query error) is logged and treated as "no
    /// conflicts found" rather than blocking the save — conflict reporting
    /// is advisory, not a gate.
    fn save_item_and_detect_conflicts(&self, item: &MemoryItem) -> Result<Vec<Conflict>> {
        let vector = self.embedder.embed(&item.content)?;
        let detector = ConflictDetector::new(self.vector_index.as_ref(), self.embedder.as_ref(), self.conflict_config);
        let conflicts = match detector.detect_all(item, &vector) {
            Ok(conflicts) => conflicts,
            Err(e) => {
                tracing::warn!(memory_id = %item.id, error = %e, "conflict detection failed; saving without a conflict report");
                Vec::new()
            }
        };
        self.vector_index.upsert(&vector, item)?;
        Ok(conflicts)
    }

    /// Pairwise conflict scan across a whole layer (or the whole project),
    /// exposed for maintenance tooling outside the per-write path.
    pub fn scan_conflicts(&self, layer: Option<Layer>, limit: usize) -> Result<Vec<Conflict>> {
        let detector = ConflictDetector::new(self.vector_index.as_ref(), self.embedder.as_ref(), self.conflict_config);
        Ok(detector.scan_project(layer, limit)?)
    }

    /// Only reachable from [`crate::workflow`] applying an approved
    /// identity change — the only legitimate path onto L0.
    pub(crate) fn write_identity_item_bypass(&self, item: &MemoryItem) -> Result<()> {
        let vector = self.embedder.embed(&item.content)?;
        self.vector_index.upsert(&vector, item)?;
        Ok(())
    }

    pub fn search_memory(&self, req: SearchMemoryRequest) -> Result<Vec<SearchHit>> {
        let layer = match req.layer.as_deref() {
            Some(raw) => Some(Layer::normalize(raw).ok_or_else(|| Error::Validation(format!("unknown layer: {raw}")))?),
            None => None,
        };

        if layer == Some(Layer::IdentitySchema) {
            return Ok(self.get_constitution()?.into_iter().map(|item| SearchHit { item, score: 1.0 }).collect());
        }

        let identity_hits: Vec<SearchHit> = if req.include_constitution {
            self.get_constitution()?.into_iter().map(|item| SearchHit { item, score: 1.0 }).collect()
        } else {
            Vec::new()
        };

        let vector = self.embedder.embed(&req.query)?;
        let limit = if req.limit == 0 { 10 } else { req.limit };

        let mut raw_hits = Vec::new();
        match layer {
            Some(Layer::VerifiedFact) => {
                let mut filter = QueryFilter::new();
                filter.layer = Some(Layer::VerifiedFact);
                filter.category = req.category.clone();
                raw_hits.extend(self.vector_index.query(&vector, limit * 2, &filter)?);
            }
            Some(Layer::EventLog) => {
                let mut filter = QueryFilter::new();
                filter.layer = Some(Layer::EventLog);
                filter.agent_id = req.agent_id.clone();
                filter.category = req.category.clone();
                raw_hits.extend(self.vector_index.query(&vector, limit * 2, &filter)?);
            }
            // Any other explicit layer (or none at all) falls through to the
            // same "L3 unscoped plus L2 scoped" query as no layer filter.
            _ => {
                let mut fact_filter = QueryFilter::new();
                fact_filter.layer = Some(Layer::VerifiedFact);
                fact_filter.category = req.category.clone();
                raw_hits.extend(self.vector_index.query(&vector, limit * 2, &fact_filter)?);

                let mut event_filter = QueryFilter::new();
                event_filter.layer = Some(Layer::EventLog);
                event_filter.agent_id = req.agent_id.clone();
                event_filter.category = req.category.clone();
                raw_hits.extend(self.vector_index.query(&vector, limit * 2, &event_filter)?);
            }
        }

        let mut non_identity: Vec<SearchHit> = raw_hits
            .into_iter()
            .filter(|hit| hit.item.layer != Layer::IdentitySchema && hit.score >= req.min_score)
            .map(|hit| SearchHit { item: hit.item, score: hit.score })
            .collect();
        non_identity.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        let budgeted = self.apply_budget(&non_identity, limit);

        let mut result = identity_hits;
        result.extend(budgeted);
        Ok(result)
    }

    /// Assembles the final result set through the context budget manager
    /// (§4.F) rather than a plain count truncation: each hit, in
    /// score-descending order, is admitted only while both its layer and the
    /// overall token budget have room, then the admitted set is capped at
    /// `limit`.
    fn apply_budget(&self, non_identity: &[SearchHit], limit: usize) -> Vec<SearchHit> {
        self.budget.reset();
        let budget_items: Vec<(Layer, String, f32)> =
            non_identity.iter().map(|hit| (hit.item.layer, hit.item.content.clone(), hit.score)).collect();
        self.budget
            .truncate_to_fit(&budget_items, false)
            .into_iter()
            .filter_map(|kept| {
                let idx = budget_items.iter().position(|item| std::ptr::eq(item, kept))?;
                Some(non_identity[idx].clone())
            })
            .take(limit)
            .collect()
    }

    /// Merges the authoritative YAML identity entries with whatever the
    /// vector index has historically recorded for L0, YAML winning on exact
    /// content collisions. No vector query involved — this is a list, not a
    /// similarity search.
    pub fn get_constitution(&self) -> Result<Vec<MemoryItem>> {
        let yaml_entries = self.identity_config.load()?;
        let mut seen_content = std::collections::HashSet::new();
        let mut items = Vec::with_capacity(yaml_entries.len());

        for entry in &yaml_entries {
            seen_content.insert(entry.content.clone());
            let mut item = MemoryItem::new(entry.content.clone(), Layer::IdentitySchema);
            item.id = identity_entry_id(&self.project_id, &entry.item_id);
            item.category = entry.category.as_deref().map(Category::parse);
            item.confidence = 1.0;
            items.push(item);
        }

        let mut filter = QueryFilter::new();
        filter.layer = Some(Layer::IdentitySchema);
        let (indexed, _) = self.vector_index.scroll(&filter, MAX_CONSTITUTION_ITEMS, None)?;
        for item in indexed {
            if items.len() >= MAX_CONSTITUTION_ITEMS {
                break;
            }
            if seen_content.contains(&item.content) {
                continue;
            }
            items.push(item);
        }

        Ok(items)
    }

    pub fn log_event(&self, mut req: AddMemoryRequest) -> Result<AddMemoryOutcome> {
        req.layer = Layer::EventLog.as_str().to_string();
        if req.source.is_none() {
            req.source = Some("ai".to_string());
        }
        if req.confidence.is_none() {
            req.confidence = Some(0.8);
        }
        if !req.event_where.as_deref().unwrap_or("").is_empty() || !req.event_who.is_empty() {
            let where_part = req.event_where.clone().unwrap_or_default();
            let who_part = req.event_who.join(",");
            req.content = format!("{}[地点:{};人物:{}]", req.content, where_part, who_part);
        }
        self.add_memory(req)
    }

    pub fn search_events(&self, mut req: SearchMemoryRequest) -> Result<Vec<SearchHit>> {
        req.layer = Some(Layer::EventLog.as_str().to_string());
        self.search_memory(req)
    }

    pub fn promote_event_to_fact(&self, event_id: Uuid) -> Result<MemoryItem> {
        let event = self.vector_index.retrieve_by_id(event_id)?.ok_or_else(|| Error::NotFound(event_id.to_string()))?;
        if event.layer == Layer::VerifiedFact {
            return Ok(event);
        }

        let mut fact = MemoryItem::new(event.content.clone(), Layer::VerifiedFact);
        fact.confidence = 1.0;
        fact.source = Some(Source::PromotedFromEvent.as_str().to_string());
        fact.category = event.category.clone();
        fact.created_by = event.created_by.clone();
        self.save_item(fact.clone())?;

        self.vector_index.set_payload(
            event_id,
            PayloadPatch { promoted_to_fact: Some(true), promoted_at: Some(Utc::now()), promoted_fact_id: Some(fact.id), ..Default::default() },
        )?;

        Ok(fact)
    }

    const CONFIRMATION_PHRASES: [&'static str; 6] =
        ["确认删除", "confirm delete", "我确认", "i confirm", "确认执行", "confirm execute"];

    /// Confirmation is a case-insensitive substring match against a bank of
    /// accepted phrases, not exact equality — `"please confirm delete, go
    /// ahead"` is as valid as `"confirm delete"` on its own.
    pub fn delete_memory(&self, id: Uuid, confirmation: &str) -> Result<()> {
        let lowered = confirmation.to_lowercase();
        let confirmed = Self::CONFIRMATION_PHRASES.iter().any(|phrase| lowered.contains(&phrase.to_lowercase()));
        if !confirmed {
            return Err(Error::Permission(
                "deletion requires a confirmation phrase such as \"confirm delete\" or \"i confirm\"".to_string(),
            ));
        }
        self.vector_index.delete(id)?;
        Ok(())
    }

    pub fn update_memory_status(&self, id: Uuid, is_active: bool) -> Result<()> {
        self.vector_index.set_payload(id, PayloadPatch { is_active: Some(is_active), ..Default::default() })?;
        Ok(())
    }

    pub fn get_stats(&self) -> Result<KernelStats> {
        let index_stats = self.vector_index.stats()?;
        let pending = self.pending_store.stats()?;
        Ok(KernelStats { total_items: index_stats.total_items, dimensions: index_stats.dimensions, mode: index_stats.mode, pending })
    }

    pub fn pending_store(&self) -> &PendingQueueStore {
        &self.pending_store
    }

    pub fn vector_index(&self) -> &dyn VectorIndex {
        self.vector_index.as_ref()
    }

    pub fn embedder(&self) -> &dyn EmbeddingProvider {
        self.embedder.as_ref()
    }

    /// The approve-pending sequence (§5): try_lock, embed+upsert, then
    /// mark_approved + delete on success.
    ///
    /// Compensation only applies once the item is actually live in the
    /// vector index. A failure before that point (embed or upsert itself
    /// failing) has written nothing, so the only cleanup needed is unlocking
    /// the pending record for retry — attempting a soft-delete on an id that
    /// was never upserted would just bounce off `NotFound` and get logged as
    /// a spurious "compensation also failed". A failure *after* the upsert
    /// (finalizing the pending record) means a live duplicate is now sitting
    /// in the index, so that case soft-deletes it before unlocking.
    pub fn approve_pending(&self, id: Uuid) -> Result<MemoryItem> {
        if !self.pending_store.try_lock(id)? {
            return Err(Error::Conflict(format!("pending memory {id} is not available for approval")));
        }

        let record: PendingRecord = self.pending_store.get(id)?.ok_or_else(|| Error::NotFound(id.to_string()))?;

        let vector = match self.embedder.embed(&record.item.content) {
            Ok(v) => v,
            Err(e) => return Err(self.unlock_after_unwritten_failure(id, e.into())),
        };

        if let Err(e) = self.vector_index.upsert(&vector, &record.item) {
            return Err(self.unlock_after_unwritten_failure(id, e.into()));
        }

        match self.pending_store.mark_approved(id).and_then(|_| self.pending_store.delete(id)) {
            Ok(()) => Ok(record.item),
            Err(finalize_err) => {
                let finalize_err = Error::from(finalize_err);
                let compensation = self
                    .vector_index
                    .set_payload(record.item.id, PayloadPatch { is_active: Some(false), ..Default::default() });
                if let Err(compensation_err) = compensation {
                    tracing::error!(
                        pending_id = %id,
                        memory_id = %record.item.id,
                        original_error = %finalize_err,
                        compensation_error = %compensation_err,
                        "approve_pending wrote the item but could not finalize or soft-delete it; this record needs manual cleanup"
                    );
                } else {
                    tracing::warn!(
                        pending_id = %id,
                        memory_id = %record.item.id,
                        error = %finalize_err,
                        "approve_pending finalize failed after the item was written; soft-deleted the live duplicate"
                    );
                }
                Err(finalize_err)
            }
        }
    }

    /// Unlocks a pending record after a failure that wrote nothing to the
    /// vector index, so it can be retried. Returns the original error,
    /// logging separately if the unlock itself also fails.
    fn unlock_after_unwritten_failure(&self, id: Uuid, original: Error) -> Error {
        if let Err(unlock_err) = self.pending_store.unlock(id) {
            tracing::error!(
                pending_id = %id,
                original_error = %original,
                unlock_error = %unlock_err,
                "approve_pending failed before any write and the record could not be unlocked; this record needs manual cleanup"
            );
        } else {
            tracing::warn!(pending_id = %id, error = %original, "approve_pending failed before any write; record unlocked for retry");
        }
        original
    }

    pub fn reject_pending(&self, id: Uuid) -> Result<()> {
        self.pending_store.mark_rejected(id)?;
        Ok(())
    }
}


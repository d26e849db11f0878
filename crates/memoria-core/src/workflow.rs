//! Approval Workflow (§4.G): the only path onto the write-protected L0
//! identity layer. A proposal collects approvals until it crosses its
//! threshold, at which point the change is applied and only then marked
//! `applied` — never the other way around.

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::kernel::MemoryKernel;
use crate::model::{Category, MemoryItem};
use crate::storage::identity::{ChangeStatus, ChangeType, DEFAULT_APPROVALS_NEEDED};
use crate::storage::{IdentityChangeRecord, IdentityChangeStore};

pub struct ApprovalWorkflow<'a> {
    store: &'a IdentityChangeStore,
    kernel: &'a MemoryKernel,
}

impl<'a> ApprovalWorkflow<'a> {
    pub fn new(store: &'a IdentityChangeStore, kernel: &'a MemoryKernel) -> Self {
        Self { store, kernel }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn propose(
        &self,
        change_type: ChangeType,
        proposed_content: String,
        reason: Option<String>,
        target_id: Option<Uuid>,
        category: Option<String>,
        proposer: Option<String>,
    ) -> Result<Uuid> {
        if change_type != ChangeType::Create && target_id.is_none() {
            return Err(Error::Validation("update/delete proposals require a target_id".to_string()));
        }
        Ok(self.store.propose(change_type, proposed_content, reason, target_id, category, proposer, DEFAULT_APPROVALS_NEEDED)?)
    }

    pub fn get(&self, id: Uuid) -> Result<IdentityChangeRecord> {
        self.store.get(id)?.ok_or_else(|| Error::NotFound(id.to_string()))
    }

    pub fn list_pending(&self) -> Result<Vec<IdentityChangeRecord>> {
        Ok(self.store.list(Some(ChangeStatus::Pending))?)
    }

    /// Appends an approval; if it crosses the threshold, applies the change
    /// before persisting the terminal status — a failed apply leaves the
    /// record pending (with the new approval counted) so it can be retried
    /// rather than silently marked applied.
    pub fn approve(&self, id: Uuid, approver: String, comment: Option<String>) -> Result<IdentityChangeRecord> {
        let record = self.store.record_approval(id, approver, comment)?;

        if record.approvals_count < record.approvals_needed {
            return Ok(record);
        }

        self.apply(&record)?;
        self.store.set_status(id, ChangeStatus::Applied)?;
        self.store.get(id)?.ok_or_else(|| Error::NotFound(id.to_string()))
    }

    pub fn reject(&self, id: Uuid) -> Result<()> {
        Ok(self.store.reject(id)?)
    }

    /// Apply semantics: `create` writes a brand-new L0 item via the
    /// kernel's privileged bypass path; `update` deletes the target and
    /// re-upserts under the same id so content and embedding stay in sync;
    /// `delete` just removes the target. All three are safe to retry —
    /// deleting an already-deleted id, or re-upserting the same content, is
    /// a no-op in effect.
    fn apply(&self, record: &IdentityChangeRecord) -> Result<()> {
        match record.change_type {
            ChangeType::Create => {
                let mut item = MemoryItem::new(record.proposed_content.clone(), crate::model::Layer::IdentitySchema);
                item.category = record.category.as_deref().map(Category::parse);
                item.confidence = 1.0;
                self.kernel.write_identity_item_bypass(&item)
            }
            ChangeType::Update => {
                let target_id = record.target_id.ok_or_else(|| Error::Validation("update change missing target_id".to_string()))?;
                self.kernel.vector_index().delete(target_id)?;
                let mut item = MemoryItem::new(record.proposed_content.clone(), crate::model::Layer::IdentitySchema);
                item.id = target_id;
                item.category = record.category.as_deref().map(Category::parse);
                item.confidence = 1.0;
                self.kernel.write_identity_item_bypass(&item)
            }
            ChangeType::Delete => {
                let target_id = record.target_id.ok_or_else(|| Error::Validation("delete change missing target_id".to_string()))?;
                self.kernel.vector_index().delete(target_id)?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::ContextBudgetManager;
    use crate::config::{IdentityConfigSource, IdentityYamlEntry};
    use crate::embeddings::EmbeddingProvider;
    use crate::safety::SafetyFilter;
    use crate::storage::PendingQueueStore;
    use crate::vector::{EmbeddedVectorIndex, VectorIndex};
    use std::sync::Arc;

    struct StubEmbedder;
    impl EmbeddingProvider for StubEmbedder {
        fn dimensions(&self) -> usize {
            8
        }
        fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, crate::embeddings::EmbeddingError> {
            let mut v = vec![0.0; 8];
            for (i, b) in text.bytes().enumerate() {
                v[i % 8] += b as f32;
            }
            Ok(v)
        }
    }

    struct EmptyIdentityConfig;
    impl IdentityConfigSource for EmptyIdentityConfig {
        fn load(&self) -> std::result::Result<Vec<IdentityYamlEntry>, crate::config::ConfigError> {
            Ok(Vec::new())
        }
    }

    fn test_kernel() -> (MemoryKernel, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let index: Arc<dyn VectorIndex> = Arc::new(EmbeddedVectorIndex::open(&dir.path().join("vectors"), 8).unwrap());
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(StubEmbedder);
        let pending = Arc::new(PendingQueueStore::open(&dir.path().join("pending.db")).unwrap());
        let identity_config: Arc<dyn IdentityConfigSource> = Arc::new(EmptyIdentityConfig);
        let kernel = MemoryKernel::new(
            "test-project",
            index,
            embedder,
            pending,
            identity_config,
            SafetyFilter::default(),
            ContextBudgetManager::default(),
        )
        .unwrap();
        (kernel, dir)
    }

    #[test]
    fn applies_only_once_threshold_is_reached() {
        let (kernel, _dir) = test_kernel();
        let store = IdentityChangeStore::open(&_dir.path().join("identity_changes.db")).unwrap();
        let workflow = ApprovalWorkflow::new(&store, &kernel);

        let id = workflow
            .propose(ChangeType::Create, "the patient's name is Wei".into(), None, None, None, Some("alice".into()))
            .unwrap();

        let after_first = workflow.approve(id, "bob".into(), None).unwrap();
        assert_eq!(after_first.status, ChangeStatus::Pending);

        workflow.approve(id, "carol".into(), None).unwrap();
        let after_third = workflow.approve(id, "dave".into(), None).unwrap();
        assert_eq!(after_third.status, ChangeStatus::Applied);
        assert!(after_third.applied_at.is_some());

        let constitution = kernel.get_constitution().unwrap();
        assert!(constitution.iter().any(|item| item.content == "the patient's name is Wei"));
    }

    #[test]
    fn rejected_change_cannot_collect_further_approvals() {
        let (kernel, _dir) = test_kernel();
        let store = IdentityChangeStore::open(&_dir.path().join("identity_changes.db")).unwrap();
        let workflow = ApprovalWorkflow::new(&store, &kernel);

        let id = workflow.propose(ChangeType::Create, "x".into(), None, None, None, None).unwrap();
        workflow.reject(id).unwrap();
        assert!(workflow.approve(id, "anyone".into(), None).is_err());
    }
}

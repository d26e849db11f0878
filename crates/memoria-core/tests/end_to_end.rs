//! End-to-end scenarios across the kernel's public surface: a saved write
//! found by search, the confidence gate's three outcomes, agent isolation on
//! the episodic log, and the pending-approval round trip.

use std::sync::Arc;

use memoria_core::config::{ConfigError, IdentityConfigSource, IdentityYamlEntry};
use memoria_core::embeddings::{EmbeddingError, EmbeddingProvider};
use memoria_core::{
    AddMemoryOutcome, AddMemoryRequest, BudgetConfig, ContextBudgetManager, EmbeddedVectorIndex, MemoryKernel,
    PendingQueueStore, SafetyConfig, SafetyFilter, SearchMemoryRequest, VectorIndex,
};

/// Deterministic bag-of-bytes embedder: stable across calls, sensitive to
/// the actual text, with no model download required.
struct StubEmbedder;

impl EmbeddingProvider for StubEmbedder {
    fn dimensions(&self) -> usize {
        16
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut v = vec![0.0_f32; 16];
        for (i, word) in text.split_whitespace().enumerate() {
            for b in word.bytes() {
                v[(i + b as usize) % 16] += 1.0;
            }
        }
        Ok(v)
    }
}

struct EmptyIdentityConfig;

impl IdentityConfigSource for EmptyIdentityConfig {
    fn load(&self) -> Result<Vec<IdentityYamlEntry>, ConfigError> {
        Ok(Vec::new())
    }
}

fn test_kernel() -> (MemoryKernel, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let index: Arc<dyn VectorIndex> = Arc::new(EmbeddedVectorIndex::open(&dir.path().join("vectors"), 16).unwrap());
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(StubEmbedder);
    let pending = Arc::new(PendingQueueStore::open(&dir.path().join("pending.db")).unwrap());
    let identity_config: Arc<dyn IdentityConfigSource> = Arc::new(EmptyIdentityConfig);
    let kernel = MemoryKernel::new(
        "end-to-end-test",
        index,
        embedder,
        pending,
        identity_config,
        SafetyFilter::new(SafetyConfig::default()),
        ContextBudgetManager::new(BudgetConfig::default()),
    )
    .unwrap();
    (kernel, dir)
}

#[test]
fn saved_write_is_found_by_search() {
    let (kernel, _dir) = test_kernel();

    let outcome = kernel
        .add_memory(AddMemoryRequest {
            content: "patient went for a walk in the park today".into(),
            layer: "verified_fact".into(),
            source: Some("caregiver".into()),
            ..Default::default()
        })
        .unwrap();

    let saved = match outcome {
        AddMemoryOutcome::Saved { item, .. } => item,
        other => panic!("expected Saved, got {other:?}"),
    };

    let hits = kernel
        .search_memory(SearchMemoryRequest { query: "walk in the park".into(), limit: 5, ..Default::default() })
        .unwrap();

    assert!(hits.iter().any(|h| h.item.id == saved.id));
}

#[test]
fn high_confidence_ai_extraction_saves_directly() {
    let (kernel, _dir) = test_kernel();

    let outcome = kernel
        .add_memory(AddMemoryRequest {
            content: "patient prefers tea over coffee".into(),
            layer: "verified_fact".into(),
            source: Some("ai_extraction".into()),
            confidence: Some(0.95),
            ..Default::default()
        })
        .unwrap();

    assert!(matches!(outcome, AddMemoryOutcome::Saved { .. }));
}

#[test]
fn mid_confidence_ai_extraction_is_queued_pending() {
    let (kernel, _dir) = test_kernel();

    let outcome = kernel
        .add_memory(AddMemoryRequest {
            content: "patient might have mentioned a new medication".into(),
            layer: "verified_fact".into(),
            source: Some("ai_extraction".into()),
            confidence: Some(0.8),
            ..Default::default()
        })
        .unwrap();

    match outcome {
        AddMemoryOutcome::Pending { confidence, .. } => assert_eq!(confidence, 0.8),
        other => panic!("expected Pending, got {other:?}"),
    }
}

#[test]
fn low_confidence_ai_extraction_is_rejected() {
    let (kernel, _dir) = test_kernel();

    let outcome = kernel
        .add_memory(AddMemoryRequest {
            content: "unreliable guess about the patient's mood".into(),
            layer: "verified_fact".into(),
            source: Some("ai_extraction".into()),
            confidence: Some(0.3),
            ..Default::default()
        })
        .unwrap();

    assert!(matches!(outcome, AddMemoryOutcome::RejectedLowConfidence));
}

#[test]
fn pending_item_approved_lands_in_the_index() {
    let (kernel, _dir) = test_kernel();

    let outcome = kernel
        .add_memory(AddMemoryRequest {
            content: "caregiver observed improved appetite".into(),
            layer: "verified_fact".into(),
            source: Some("ai_extraction".into()),
            confidence: Some(0.75),
            ..Default::default()
        })
        .unwrap();

    let id = match outcome {
        AddMemoryOutcome::Pending { id, .. } => id,
        other => panic!("expected Pending, got {other:?}"),
    };

    let approved = kernel.approve_pending(id).unwrap();
    assert_eq!(approved.content, "caregiver observed improved appetite");

    let hits = kernel
        .search_memory(SearchMemoryRequest { query: "improved appetite".into(), limit: 5, ..Default::default() })
        .unwrap();
    assert!(hits.iter().any(|h| h.item.content.contains("improved appetite")));
}

#[test]
fn pending_item_rejected_never_appears_in_search() {
    let (kernel, _dir) = test_kernel();

    let outcome = kernel
        .add_memory(AddMemoryRequest {
            content: "speculative note about a family visit".into(),
            layer: "verified_fact".into(),
            source: Some("ai_extraction".into()),
            confidence: Some(0.75),
            ..Default::default()
        })
        .unwrap();

    let id = match outcome {
        AddMemoryOutcome::Pending { id, .. } => id,
        other => panic!("expected Pending, got {other:?}"),
    };

    kernel.reject_pending(id).unwrap();

    let hits = kernel
        .search_memory(SearchMemoryRequest { query: "family visit".into(), limit: 5, ..Default::default() })
        .unwrap();
    assert!(hits.iter().all(|h| !h.item.content.contains("family visit")));
}

#[test]
fn event_log_search_is_isolated_per_agent() {
    let (kernel, _dir) = test_kernel();

    kernel
        .log_event(AddMemoryRequest {
            content: "agent alpha noticed the door was unlocked".into(),
            agent_id: Some("alpha".into()),
            ..Default::default()
        })
        .unwrap();

    kernel
        .log_event(AddMemoryRequest {
            content: "agent beta noticed the door was unlocked".into(),
            agent_id: Some("beta".into()),
            ..Default::default()
        })
        .unwrap();

    let alpha_hits = kernel
        .search_events(SearchMemoryRequest {
            query: "door was unlocked".into(),
            agent_id: Some("alpha".into()),
            limit: 10,
            ..Default::default()
        })
        .unwrap();

    assert!(alpha_hits.iter().all(|h| h.item.agent_id.as_deref() == Some("alpha")));
    assert!(alpha_hits.iter().any(|h| h.item.content.contains("agent alpha")));
}

#[test]
fn promoting_an_event_creates_a_full_confidence_fact() {
    let (kernel, _dir) = test_kernel();

    let outcome = kernel
        .log_event(AddMemoryRequest { content: "patient took medication at 8am".into(), agent_id: Some("alpha".into()), ..Default::default() })
        .unwrap();

    let event = match outcome {
        AddMemoryOutcome::Saved { item, .. } => item,
        other => panic!("expected Saved, got {other:?}"),
    };

    let fact = kernel.promote_event_to_fact(event.id).unwrap();
    assert_eq!(fact.confidence, 1.0);
    assert_eq!(fact.content, event.content);
}

#[test]
fn identity_layer_cannot_be_written_through_add_memory() {
    let (kernel, _dir) = test_kernel();

    let result = kernel.add_memory(AddMemoryRequest { content: "attempted direct identity write".into(), layer: "identity_schema".into(), ..Default::default() });

    assert!(result.is_err());
}

#[test]
fn delete_requires_a_confirmation_phrase() {
    let (kernel, _dir) = test_kernel();

    let outcome = kernel
        .add_memory(AddMemoryRequest { content: "temporary note".into(), layer: "verified_fact".into(), source: Some("caregiver".into()), ..Default::default() })
        .unwrap();
    let item = match outcome {
        AddMemoryOutcome::Saved { item, .. } => item,
        other => panic!("expected Saved, got {other:?}"),
    };

    assert!(kernel.delete_memory(item.id, "please delete this").is_err());
    assert!(kernel.delete_memory(item.id, "yes, I confirm, please delete it").is_ok());
}

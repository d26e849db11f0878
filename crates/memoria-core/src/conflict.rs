//! Conflict Detector (§4.K): flags candidate memories that plausibly
//! contradict something already stored in the same layer. Similarity is a
//! pre-filter, not the verdict — three independent rule checks run against
//! every near-duplicate to decide whether, and how severely, they conflict.
//!
//! A pure semantic-contradiction check (e.g. an NLI model judging "these two
//! sentences disagree") is not implemented; the rule checks below cover
//! temporal, provenance, and confidence disagreement only.

use std::collections::HashSet;

use serde::Serialize;
use uuid::Uuid;

use crate::embeddings::{cosine_similarity, EmbeddingProvider};
use crate::model::{Layer, MemoryItem};
use crate::vector::{QueryFilter, VectorIndex, VectorIndexError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// `event_when`/`valid_at` fall within `temporal_overlap_days` of each other.
    Temporal,
    /// The two items were recorded by different `created_by` values.
    Source,
    /// Confidence differs by at least `confidence_diff_threshold`.
    Confidence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub existing_id: Uuid,
    pub candidate_id: Uuid,
    pub conflict_type: ConflictType,
    pub severity: Severity,
    pub similarity: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct ConflictDetectorConfig {
    pub similarity_threshold: f32,
    pub temporal_overlap_days: i64,
    pub confidence_diff_threshold: f64,
}

impl Default for ConflictDetectorConfig {
    fn default() -> Self {
        Self { similarity_threshold: 0.85, temporal_overlap_days: 7, confidence_diff_threshold: 0.3 }
    }
}

pub struct ConflictDetector<'a> {
    index: &'a dyn VectorIndex,
    embedder: &'a dyn EmbeddingProvider,
    config: ConflictDetectorConfig,
}

impl<'a> ConflictDetector<'a> {
    pub fn new(index: &'a dyn VectorIndex, embedder: &'a dyn EmbeddingProvider, config: ConflictDetectorConfig) -> Self {
        Self { index, embedder, config }
    }

    /// Highest-severity conflict between `candidate` and whatever already
    /// exists in its layer, or `None` if nothing clears the similarity bar.
    pub fn detect(&self, candidate: &MemoryItem, candidate_vector: &[f32]) -> Result<Option<Conflict>, VectorIndexError> {
        let conflicts = self.detect_all(candidate, candidate_vector)?;
        Ok(conflicts.into_iter().max_by_key(|c| c.severity))
    }

    /// Every conflict between `candidate` and near-duplicates in its layer.
    pub fn detect_all(&self, candidate: &MemoryItem, candidate_vector: &[f32]) -> Result<Vec<Conflict>, VectorIndexError> {
        let mut filter = QueryFilter::new();
        filter.layer = Some(candidate.layer);
        let hits = self.index.query(candidate_vector, 10, &filter)?;

        let mut conflicts = Vec::new();
        for hit in hits {
            if hit.item.id == candidate.id || hit.score < self.config.similarity_threshold {
                continue;
            }
            conflicts.extend(self.rule_conflicts(&hit.item, candidate, hit.score));
        }
        Ok(conflicts)
    }

    fn rule_conflicts(&self, existing: &MemoryItem, candidate: &MemoryItem, similarity: f32) -> Vec<Conflict> {
        let mut found = Vec::new();

        if let (Some(a), Some(b)) = (existing.event_when, candidate.event_when) {
            let delta = (a - b).num_days().abs();
            if delta <= self.config.temporal_overlap_days {
                found.push(Conflict {
                    existing_id: existing.id,
                    candidate_id: candidate.id,
                    conflict_type: ConflictType::Temporal,
                    severity: Severity::Medium,
                    similarity,
                });
            }
        }

        if let (Some(a), Some(b)) = (&existing.created_by, &candidate.created_by) {
            if a != b {
                found.push(Conflict {
                    existing_id: existing.id,
                    candidate_id: candidate.id,
                    conflict_type: ConflictType::Source,
                    severity: Severity::Low,
                    similarity,
                });
            }
        }

        let diff = (existing.confidence - candidate.confidence).abs();
        if diff >= self.config.confidence_diff_threshold {
            let severity = if candidate.confidence < existing.confidence { Severity::High } else { Severity::Medium };
            found.push(Conflict {
                existing_id: existing.id,
                candidate_id: candidate.id,
                conflict_type: ConflictType::Confidence,
                severity,
                similarity,
            });
        }

        found
    }

    /// Pairwise scan across a whole layer (or the whole project). Each pair
    /// is checked at most once, via a sorted-id dedup set, regardless of the
    /// order the scroll happens to return items in.
    pub fn scan_project(&self, layer: Option<Layer>, limit: usize) -> Result<Vec<Conflict>, VectorIndexError> {
        let mut filter = QueryFilter::new();
        filter.layer = layer;
        let (items, _) = self.index.scroll(&filter, limit, None)?;

        let contents: Vec<&str> = items.iter().map(|i| i.content.as_str()).collect();
        let vectors = self
            .embedder
            .embed_batch(&contents)
            .map_err(|e| VectorIndexError::Query(e.to_string()))?;

        let mut checked: HashSet<(Uuid, Uuid)> = HashSet::new();
        let mut conflicts = Vec::new();
        for i in 0..items.len() {
            for j in (i + 1)..items.len() {
                let pair = if items[i].id < items[j].id { (items[i].id, items[j].id) } else { (items[j].id, items[i].id) };
                if !checked.insert(pair) {
                    continue;
                }
                let similarity = cosine_similarity(&vectors[i], &vectors[j]);
                if similarity < self.config.similarity_threshold {
                    continue;
                }
                conflicts.extend(self.rule_conflicts(&items[i], &items[j], similarity));
            }
        }
        Ok(conflicts)
    }
}

pub(crate) fn overlaps_within(a: chrono::DateTime<chrono::Utc>, b: chrono::DateTime<chrono::Utc>, days: i64) -> bool {
    (a - b).num_days().abs() <= days
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlap_window_is_symmetric() {
        let now = chrono::Utc::now();
        assert!(overlaps_within(now, now - chrono::Duration::days(3), 7));
        assert!(!overlaps_within(now, now - chrono::Duration::days(30), 7));
    }
}

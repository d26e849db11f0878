//! Remote vector index mode: a Qdrant collection reached over its HTTP API.
//! This is the production default. Construction performs a readiness probe
//! and fails fast on failure — there is deliberately no fallback to the
//! embedded mode, since a silent downgrade would mean writes landing in a
//! different store than reads without anyone noticing.

use std::time::Duration;

use chrono::Utc;
use reqwest::blocking::Client;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::model::MemoryItem;

use super::{IndexStats, PayloadPatch, QueryFilter, ScoredItem, VectorIndex, VectorIndexError};

const READINESS_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct RemoteVectorIndex {
    client: Client,
    base_url: String,
    collection: String,
    dimensions: usize,
}

impl RemoteVectorIndex {
    /// Connects to `base_url` and probes `/readyz`. Returns
    /// [`VectorIndexError::RemoteUnreachable`] immediately on any failure —
    /// callers must treat that as fatal at startup, not retry into a
    /// degraded local mode.
    pub fn connect(base_url: &str, collection: &str, dimensions: usize) -> Result<Self, VectorIndexError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| VectorIndexError::Creation(format!("building http client: {e}")))?;

        let probe_url = format!("{}/readyz", base_url.trim_end_matches('/'));
        let probe = client
            .get(&probe_url)
            .timeout(READINESS_TIMEOUT)
            .send()
            .map_err(|e| VectorIndexError::RemoteUnreachable { url: base_url.to_string(), reason: e.to_string() })?;
        if !probe.status().is_success() {
            return Err(VectorIndexError::RemoteUnreachable {
                url: base_url.to_string(),
                reason: format!("readiness probe returned {}", probe.status()),
            });
        }

        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string(), collection: collection.to_string(), dimensions })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/collections/{}{}", self.base_url, self.collection, path)
    }

    fn filter_json(filter: &QueryFilter) -> Value {
        let mut must: Vec<Value> = Vec::new();
        if filter.only_active {
            must.push(json!({"key": "is_active", "match": {"value": true}}));
        }
        if let Some(layer) = filter.layer {
            must.push(json!({"key": "layer", "match": {"value": layer.as_str()}}));
        }
        if let Some(category) = &filter.category {
            must.push(json!({"key": "category", "match": {"value": category}}));
        }
        if let Some(agent_id) = filter.effective_agent_id() {
            must.push(json!({"key": "agent_id", "match": {"value": agent_id}}));
        }
        let now = Utc::now().to_rfc3339();
        must.push(json!({
            "should": [
                {"is_empty": {"key": "expires_at"}},
                {"key": "expires_at", "range": {"gte": now}}
            ]
        }));
        json!({"must": must})
    }

    fn payload_json(item: &MemoryItem) -> Value {
        json!({
            "id": item.id.to_string(),
            "content": item.content,
            "layer": item.layer.as_str(),
            "category": item.category.as_ref().map(|c| c.as_str()),
            "is_active": item.is_active,
            "confidence": item.confidence,
            "source": item.source,
            "agent_id": item.agent_id,
            "created_at": item.created_at.to_rfc3339(),
            "updated_at": item.updated_at.to_rfc3339(),
            "expires_at": item.expires_at.map(|t| t.to_rfc3339()),
            "priority": item.priority,
            "created_by": item.created_by,
            "session_id": item.session_id,
            "related_files": item.related_files,
            "event_when": item.event_when.map(|t| t.to_rfc3339()),
            "event_where": item.event_where,
            "event_who": item.event_who,
            "promoted_to_fact": item.promoted_to_fact,
            "promoted_at": item.promoted_at.map(|t| t.to_rfc3339()),
            "promoted_fact_id": item.promoted_fact_id.map(|u| u.to_string()),
        })
    }

    fn payload_to_item(id: Uuid, payload: &Value) -> Option<MemoryItem> {
        let get_str = |k: &str| payload.get(k).and_then(|v| v.as_str()).map(str::to_string);
        let get_dt = |k: &str| get_str(k).and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&Utc));

        Some(MemoryItem {
            id,
            content: get_str("content")?,
            layer: crate::model::Layer::normalize(&get_str("layer")?)?,
            category: get_str("category").map(|c| crate::model::Category::parse(&c)),
            is_active: payload.get("is_active").and_then(|v| v.as_bool()).unwrap_or(true),
            confidence: payload.get("confidence").and_then(|v| v.as_f64()).unwrap_or(1.0),
            source: get_str("source"),
            agent_id: get_str("agent_id"),
            created_at: get_dt("created_at")?,
            updated_at: get_dt("updated_at")?,
            expires_at: get_dt("expires_at"),
            priority: payload.get("priority").and_then(|v| v.as_u64()).unwrap_or(100) as u32,
            created_by: get_str("created_by"),
            session_id: get_str("session_id"),
            related_files: payload
                .get("related_files")
                .and_then(|v| v.as_array())
                .map(|a| a.iter().filter_map(|x| x.as_str().map(str::to_string)).collect())
                .unwrap_or_default(),
            event_when: get_dt("event_when"),
            event_where: get_str("event_where"),
            event_who: payload
                .get("event_who")
                .and_then(|v| v.as_array())
                .map(|a| a.iter().filter_map(|x| x.as_str().map(str::to_string)).collect())
                .unwrap_or_default(),
            promoted_to_fact: payload.get("promoted_to_fact").and_then(|v| v.as_bool()).unwrap_or(false),
            promoted_at: get_dt("promoted_at"),
            promoted_fact_id: get_str("promoted_fact_id").and_then(|s| Uuid::parse_str(&s).ok()),
        })
    }
}

impl VectorIndex for RemoteVectorIndex {
    fn ensure_collection(&self, dimensions: usize) -> Result<(), VectorIndexError> {
        let exists = self
            .client
            .get(format!("{}/collections/{}", self.base_url, self.collection))
            .send()
            .map_err(|e| VectorIndexError::Creation(e.to_string()))?
            .status()
            .is_success();
        if exists {
            return Ok(());
        }
        let body = json!({"vectors": {"size": dimensions, "distance": "Cosine"}});
        let resp = self
            .client
            .put(format!("{}/collections/{}", self.base_url, self.collection))
            .json(&body)
            .send()
            .map_err(|e| VectorIndexError::Creation(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(VectorIndexError::Creation(format!("collection creation returned {}", resp.status())));
        }
        Ok(())
    }

    fn upsert(&self, vector: &[f32], item: &MemoryItem) -> Result<(), VectorIndexError> {
        if vector.len() != self.dimensions {
            return Err(VectorIndexError::InvalidDimensions { expected: self.dimensions, got: vector.len() });
        }
        let body = json!({
            "points": [{
                "id": item.id.to_string(),
                "vector": vector,
                "payload": Self::payload_json(item),
            }]
        });
        let resp = self
            .client
            .put(self.url("/points?wait=true"))
            .json(&body)
            .send()
            .map_err(|e| VectorIndexError::Upsert(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(VectorIndexError::Upsert(format!("upsert returned {}", resp.status())));
        }
        Ok(())
    }

    fn query(&self, vector: &[f32], k: usize, filter: &QueryFilter) -> Result<Vec<ScoredItem>, VectorIndexError> {
        if vector.len() != self.dimensions {
            return Err(VectorIndexError::InvalidDimensions { expected: self.dimensions, got: vector.len() });
        }
        let body = json!({
            "vector": vector,
            "limit": k,
            "filter": Self::filter_json(filter),
            "with_payload": true,
        });
        let resp = self
            .client
            .post(self.url("/points/search"))
            .json(&body)
            .send()
            .map_err(|e| VectorIndexError::Query(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(VectorIndexError::Query(format!("search returned {}", resp.status())));
        }
        let body: Value = resp.json().map_err(|e| VectorIndexError::Query(e.to_string()))?;
        let results = body.get("result").and_then(|v| v.as_array()).cloned().unwrap_or_default();

        let mut hits = Vec::with_capacity(results.len());
        for hit in results {
            let Some(id_str) = hit.get("id").and_then(|v| v.as_str()) else { continue };
            let Ok(id) = Uuid::parse_str(id_str) else { continue };
            let score = hit.get("score").and_then(|v| v.as_f64()).unwrap_or(0.0) as f32;
            let Some(payload) = hit.get("payload") else { continue };
            if let Some(item) = Self::payload_to_item(id, payload) {
                hits.push(ScoredItem { item, score: super::clamp_score(score) });
            }
        }
        Ok(hits)
    }

    fn scroll(
        &self,
        filter: &QueryFilter,
        limit: usize,
        offset: Option<usize>,
    ) -> Result<(Vec<MemoryItem>, Option<usize>), VectorIndexError> {
        let mut body = json!({
            "filter": Self::filter_json(filter),
            "limit": limit,
            "with_payload": true,
            "with_vector": false,
        });
        if let Some(offset) = offset {
            body["offset"] = json!(offset);
        }
        let resp = self
            .client
            .post(self.url("/points/scroll"))
            .json(&body)
            .send()
            .map_err(|e| VectorIndexError::Query(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(VectorIndexError::Query(format!("scroll returned {}", resp.status())));
        }
        let body: Value = resp.json().map_err(|e| VectorIndexError::Query(e.to_string()))?;
        let result = body.get("result").cloned().unwrap_or_default();
        let points = result.get("points").and_then(|v| v.as_array()).cloned().unwrap_or_default();
        let next_offset = result
            .get("next_page_offset")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize);

        let mut items = Vec::with_capacity(points.len());
        for point in points {
            let Some(id_str) = point.get("id").and_then(|v| v.as_str()) else { continue };
            let Ok(id) = Uuid::parse_str(id_str) else { continue };
            if let Some(payload) = point.get("payload") {
                if let Some(item) = Self::payload_to_item(id, payload) {
                    items.push(item);
                }
            }
        }
        Ok((items, next_offset))
    }

    fn retrieve_by_id(&self, id: Uuid) -> Result<Option<MemoryItem>, VectorIndexError> {
        let resp = self
            .client
            .get(self.url(&format!("/points/{id}")))
            .send()
            .map_err(|e| VectorIndexError::Query(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(VectorIndexError::Query(format!("retrieve returned {}", resp.status())));
        }
        let body: Value = resp.json().map_err(|e| VectorIndexError::Query(e.to_string()))?;
        let Some(result) = body.get("result") else { return Ok(None) };
        if result.is_null() {
            return Ok(None);
        }
        let Some(payload) = result.get("payload") else { return Ok(None) };
        Ok(Self::payload_to_item(id, payload))
    }

    fn set_payload(&self, id: Uuid, patch: PayloadPatch) -> Result<(), VectorIndexError> {
        let mut set = serde_json::Map::new();
        if let Some(v) = patch.is_active {
            set.insert("is_active".into(), json!(v));
        }
        if let Some(v) = patch.promoted_to_fact {
            set.insert("promoted_to_fact".into(), json!(v));
        }
        if let Some(v) = patch.promoted_at {
            set.insert("promoted_at".into(), json!(v.to_rfc3339()));
        }
        if let Some(v) = patch.promoted_fact_id {
            set.insert("promoted_fact_id".into(), json!(v.to_string()));
        }
        set.insert("updated_at".into(), json!(Utc::now().to_rfc3339()));

        let body = json!({"payload": Value::Object(set), "points": [id.to_string()]});
        let resp = self
            .client
            .post(self.url("/points/payload?wait=true"))
            .json(&body)
            .send()
            .map_err(|e| VectorIndexError::Upsert(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(VectorIndexError::Upsert(format!("set_payload returned {}", resp.status())));
        }
        Ok(())
    }

    fn delete(&self, id: Uuid) -> Result<(), VectorIndexError> {
        let body = json!({"points": [id.to_string()]});
        let resp = self
            .client
            .post(self.url("/points/delete?wait=true"))
            .json(&body)
            .send()
            .map_err(|e| VectorIndexError::Upsert(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(VectorIndexError::Upsert(format!("delete returned {}", resp.status())));
        }
        Ok(())
    }

    fn stats(&self) -> Result<IndexStats, VectorIndexError> {
        let resp = self
            .client
            .get(format!("{}/collections/{}", self.base_url, self.collection))
            .send()
            .map_err(|e| VectorIndexError::Query(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(VectorIndexError::Query(format!("collection info returned {}", resp.status())));
        }
        let body: Value = resp.json().map_err(|e| VectorIndexError::Query(e.to_string()))?;
        let total = body
            .get("result")
            .and_then(|r| r.get("points_count"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize;
        Ok(IndexStats {
            total_items: total,
            dimensions: self.dimensions,
            collection_name: self.collection.clone(),
            mode: "remote",
        })
    }
}

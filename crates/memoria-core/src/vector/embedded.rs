//! Embedded vector index mode: usearch (HNSW) for nearest-neighbor search,
//! SQLite for the payload and the usearch-key mapping. Selected only when
//! explicitly configured (tests, single-machine deployments); the default
//! production mode is [`super::remote::RemoteVectorIndex`].
//!
//! Grounded on the same two-structure split a file-backed HNSW index always
//! needs — a dense key space for the ANN graph, and a payload store keyed by
//! the caller's own id — but keeps both in one SQLite file instead of a
//! separate JSON sidecar: the `usearch_key` column *is* the sidecar.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};
use uuid::Uuid;

use crate::model::{Category, Layer, MemoryItem};

use super::{IndexStats, PayloadPatch, QueryFilter, ScoredItem, VectorIndex, VectorIndexError};

/// How many extra candidates to pull from the ANN index per requested `k`,
/// since usearch has no native filter predicate — we over-fetch, then apply
/// [`QueryFilter`] in SQL and trim back down to `k`.
const OVERSAMPLE_FACTOR: usize = 6;
const MIN_OVERSAMPLE: usize = 64;

pub struct EmbeddedVectorIndex {
    conn: Mutex<Connection>,
    index: Mutex<Index>,
    key_to_id: Mutex<HashMap<u64, Uuid>>,
    id_to_key: Mutex<HashMap<Uuid, u64>>,
    next_key: AtomicU64,
    index_path: PathBuf,
    dimensions: usize,
}

impl EmbeddedVectorIndex {
    pub fn open(dir: &Path, dimensions: usize) -> Result<Self, VectorIndexError> {
        std::fs::create_dir_all(dir)
            .map_err(|e| VectorIndexError::Creation(format!("creating index dir: {e}")))?;

        let db_path = dir.join("payload.sqlite3");
        let conn = Connection::open(&db_path)
            .map_err(|e| VectorIndexError::Creation(format!("opening payload store: {e}")))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| VectorIndexError::Creation(e.to_string()))?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| VectorIndexError::Creation(e.to_string()))?;
        create_schema(&conn)?;

        let options = IndexOptions {
            dimensions,
            metric: MetricKind::Cos,
            quantization: ScalarKind::F32,
            ..Default::default()
        };
        let index = Index::new(&options)
            .map_err(|e| VectorIndexError::Creation(format!("creating usearch index: {e}")))?;

        let index_path = dir.join("vectors.usearch");
        let mut max_key = 0_u64;
        let mut key_to_id = HashMap::new();
        let mut id_to_key = HashMap::new();
        if index_path.exists() {
            index
                .load(index_path.to_string_lossy().as_ref())
                .map_err(|e| VectorIndexError::Persistence(format!("loading usearch index: {e}")))?;

            let mut stmt = conn
                .prepare("SELECT id, usearch_key FROM memory_items")
                .map_err(|e| VectorIndexError::Creation(e.to_string()))?;
            let rows = stmt
                .query_map([], |row| {
                    let id: String = row.get(0)?;
                    let key: i64 = row.get(1)?;
                    Ok((id, key as u64))
                })
                .map_err(|e| VectorIndexError::Creation(e.to_string()))?;
            for row in rows {
                let (id_str, key) = row.map_err(|e| VectorIndexError::Creation(e.to_string()))?;
                if let Ok(id) = Uuid::parse_str(&id_str) {
                    key_to_id.insert(key, id);
                    id_to_key.insert(id, key);
                    max_key = max_key.max(key + 1);
                }
            }
        } else {
            index
                .reserve(1024)
                .map_err(|e| VectorIndexError::Creation(format!("reserving usearch capacity: {e}")))?;
        }

        Ok(Self {
            conn: Mutex::new(conn),
            index: Mutex::new(index),
            key_to_id: Mutex::new(key_to_id),
            id_to_key: Mutex::new(id_to_key),
            next_key: AtomicU64::new(max_key),
            index_path,
            dimensions,
        })
    }

    fn persist_index(&self, index: &Index) -> Result<(), VectorIndexError> {
        index
            .save(self.index_path.to_string_lossy().as_ref())
            .map_err(|e| VectorIndexError::Persistence(format!("saving usearch index: {e}")))
    }
}

fn create_schema(conn: &Connection) -> Result<(), VectorIndexError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS memory_items (
            id TEXT PRIMARY KEY,
            usearch_key INTEGER NOT NULL UNIQUE,
            content TEXT NOT NULL,
            layer TEXT NOT NULL,
            category TEXT,
            is_active INTEGER NOT NULL,
            confidence REAL NOT NULL,
            source TEXT,
            agent_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            expires_at TEXT,
            priority INTEGER NOT NULL,
            created_by TEXT,
            session_id TEXT,
            related_files TEXT NOT NULL,
            event_when TEXT,
            event_where TEXT,
            event_who TEXT NOT NULL,
            promoted_to_fact INTEGER NOT NULL,
            promoted_at TEXT,
            promoted_fact_id TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_memory_items_layer ON memory_items(layer);
        CREATE INDEX IF NOT EXISTS idx_memory_items_agent ON memory_items(agent_id);",
    )
    .map_err(|e| VectorIndexError::Creation(e.to_string()))
}

fn row_to_item(row: &rusqlite::Row) -> rusqlite::Result<MemoryItem> {
    let id: String = row.get("id")?;
    let layer: String = row.get("layer")?;
    let category: Option<String> = row.get("category")?;
    let related_files: String = row.get("related_files")?;
    let event_who: String = row.get("event_who")?;
    let promoted_fact_id: Option<String> = row.get("promoted_fact_id")?;

    Ok(MemoryItem {
        id: Uuid::parse_str(&id).unwrap_or_else(|_| Uuid::nil()),
        content: row.get("content")?,
        layer: Layer::normalize(&layer).unwrap_or(Layer::VerifiedFact),
        category: category.map(|c| Category::parse(&c)),
        is_active: row.get("is_active")?,
        confidence: row.get("confidence")?,
        source: row.get("source")?,
        agent_id: row.get("agent_id")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        expires_at: row.get("expires_at")?,
        priority: row.get::<_, i64>("priority")? as u32,
        created_by: row.get("created_by")?,
        session_id: row.get("session_id")?,
        related_files: serde_json::from_str(&related_files).unwrap_or_default(),
        event_when: row.get("event_when")?,
        event_where: row.get("event_where")?,
        event_who: serde_json::from_str(&event_who).unwrap_or_default(),
        promoted_to_fact: row.get("promoted_to_fact")?,
        promoted_at: row.get("promoted_at")?,
        promoted_fact_id: promoted_fact_id.and_then(|s| Uuid::parse_str(&s).ok()),
    })
}

fn build_filter_clause(filter: &QueryFilter, now: DateTime<Utc>) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
    let mut clauses = vec!["(expires_at IS NULL OR expires_at >= ?1)".to_string()];
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(now)];

    if filter.only_active {
        clauses.push("is_active = 1".to_string());
    }
    if let Some(layer) = filter.layer {
        params.push(Box::new(layer.as_str().to_string()));
        clauses.push(format!("layer = ?{}", params.len()));
    }
    if let Some(category) = &filter.category {
        params.push(Box::new(category.clone()));
        clauses.push(format!("category = ?{}", params.len()));
    }
    if let Some(agent_id) = filter.effective_agent_id() {
        params.push(Box::new(agent_id.to_string()));
        clauses.push(format!("agent_id = ?{}", params.len()));
    }

    (clauses.join(" AND "), params)
}

impl VectorIndex for EmbeddedVectorIndex {
    fn ensure_collection(&self, dimensions: usize) -> Result<(), VectorIndexError> {
        if dimensions != self.dimensions {
            return Err(VectorIndexError::InvalidDimensions { expected: self.dimensions, got: dimensions });
        }
        Ok(())
    }

    fn upsert(&self, vector: &[f32], item: &MemoryItem) -> Result<(), VectorIndexError> {
        if vector.len() != self.dimensions {
            return Err(VectorIndexError::InvalidDimensions { expected: self.dimensions, got: vector.len() });
        }

        let index = self.index.lock().unwrap();
        let mut id_to_key = self.id_to_key.lock().unwrap();
        let mut key_to_id = self.key_to_id.lock().unwrap();

        let key = match id_to_key.get(&item.id) {
            Some(&existing) => {
                index
                    .remove(existing)
                    .map_err(|e| VectorIndexError::Upsert(format!("replacing existing vector: {e}")))?;
                existing
            }
            None => {
                let key = self.next_key.fetch_add(1, Ordering::SeqCst);
                if index.size() + 1 > index.capacity() {
                    index
                        .reserve(index.capacity() * 2 + 1024)
                        .map_err(|e| VectorIndexError::Upsert(format!("growing usearch capacity: {e}")))?;
                }
                key
            }
        };
        index
            .add(key, vector)
            .map_err(|e| VectorIndexError::Upsert(format!("adding vector: {e}")))?;
        id_to_key.insert(item.id, key);
        key_to_id.insert(key, item.id);
        self.persist_index(&index)?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO memory_items (
                id, usearch_key, content, layer, category, is_active, confidence, source, agent_id,
                created_at, updated_at, expires_at, priority, created_by, session_id, related_files,
                event_when, event_where, event_who, promoted_to_fact, promoted_at, promoted_fact_id
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22)
            ON CONFLICT(id) DO UPDATE SET
                usearch_key=excluded.usearch_key, content=excluded.content, layer=excluded.layer,
                category=excluded.category, is_active=excluded.is_active, confidence=excluded.confidence,
                source=excluded.source, agent_id=excluded.agent_id, updated_at=excluded.updated_at,
                expires_at=excluded.expires_at, priority=excluded.priority, created_by=excluded.created_by,
                session_id=excluded.session_id, related_files=excluded.related_files,
                event_when=excluded.event_when, event_where=excluded.event_where, event_who=excluded.event_who,
                promoted_to_fact=excluded.promoted_to_fact, promoted_at=excluded.promoted_at,
                promoted_fact_id=excluded.promoted_fact_id",
            params![
                item.id.to_string(),
                key as i64,
                item.content,
                item.layer.as_str(),
                item.category.as_ref().map(|c| c.as_str().to_string()),
                item.is_active,
                item.confidence,
                item.source,
                item.agent_id,
                item.created_at,
                item.updated_at,
                item.expires_at,
                item.priority as i64,
                item.created_by,
                item.session_id,
                serde_json::to_string(&item.related_files).unwrap_or_default(),
                item.event_when,
                item.event_where,
                serde_json::to_string(&item.event_who).unwrap_or_default(),
                item.promoted_to_fact,
                item.promoted_at,
                item.promoted_fact_id.map(|u| u.to_string()),
            ],
        )
        .map_err(|e| VectorIndexError::Upsert(e.to_string()))?;
        Ok(())
    }

    fn query(&self, vector: &[f32], k: usize, filter: &QueryFilter) -> Result<Vec<ScoredItem>, VectorIndexError> {
        if vector.len() != self.dimensions {
            return Err(VectorIndexError::InvalidDimensions { expected: self.dimensions, got: vector.len() });
        }
        let index = self.index.lock().unwrap();
        if index.size() == 0 {
            return Ok(Vec::new());
        }
        let fetch = (k * OVERSAMPLE_FACTOR).max(MIN_OVERSAMPLE).min(index.size());
        let matches = index
            .search(vector, fetch)
            .map_err(|e| VectorIndexError::Query(format!("usearch search: {e}")))?;
        drop(index);

        let key_to_id = self.key_to_id.lock().unwrap();
        let now = Utc::now();
        let conn = self.conn.lock().unwrap();
        let (clause, dyn_params) = build_filter_clause(filter, now);
        let sql = format!(
            "SELECT * FROM memory_items WHERE id = ?1 AND {clause}"
        );

        let mut hits = Vec::with_capacity(matches.keys.len());
        for (key, distance) in matches.keys.iter().zip(matches.distances.iter()) {
            let Some(id) = key_to_id.get(key) else { continue };
            let mut stmt = conn.prepare(&sql).map_err(|e| VectorIndexError::Query(e.to_string()))?;
            let mut full_params: Vec<&dyn rusqlite::ToSql> = vec![];
            let id_str = id.to_string();
            full_params.push(&id_str);
            for p in &dyn_params {
                full_params.push(p.as_ref());
            }
            let item = stmt
                .query_row(full_params.as_slice(), row_to_item)
                .optional()
                .map_err(|e| VectorIndexError::Query(e.to_string()))?;
            if let Some(item) = item {
                let score = super::clamp_score(1.0 - distance);
                hits.push(ScoredItem { item, score });
            }
            if hits.len() >= k {
                break;
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
        let now = Utc::now();
        let conn = self.conn.lock().unwrap();
        let (clause, dyn_params) = build_filter_clause(filter, now);
        let offset = offset.unwrap_or(0);
        let sql = format!(
            "SELECT * FROM memory_items WHERE {clause} ORDER BY created_at DESC LIMIT ?{} OFFSET ?{}",
            dyn_params.len() + 1,
            dyn_params.len() + 2
        );
        let mut stmt = conn.prepare(&sql).map_err(|e| VectorIndexError::Query(e.to_string()))?;
        let mut full_params: Vec<&dyn rusqlite::ToSql> = dyn_params.iter().map(|p| p.as_ref()).collect();
        let limit_plus_one = (limit + 1) as i64;
        let offset_i64 = offset as i64;
        full_params.push(&limit_plus_one);
        full_params.push(&offset_i64);

        let items: Vec<MemoryItem> = stmt
            .query_map(full_params.as_slice(), row_to_item)
            .map_err(|e| VectorIndexError::Query(e.to_string()))?
            .collect::<rusqlite::Result<_>>()
            .map_err(|e| VectorIndexError::Query(e.to_string()))?;

        let next_offset = if items.len() > limit { Some(offset + limit) } else { None };
        let mut items = items;
        items.truncate(limit);
        Ok((items, next_offset))
    }

    fn retrieve_by_id(&self, id: Uuid) -> Result<Option<MemoryItem>, VectorIndexError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM memory_items WHERE id = ?1",
            params![id.to_string()],
            row_to_item,
        )
        .optional()
        .map_err(|e| VectorIndexError::Query(e.to_string()))
    }

    fn set_payload(&self, id: Uuid, patch: PayloadPatch) -> Result<(), VectorIndexError> {
        let conn = self.conn.lock().unwrap();
        let existing = conn
            .query_row("SELECT * FROM memory_items WHERE id = ?1", params![id.to_string()], row_to_item)
            .optional()
            .map_err(|e| VectorIndexError::Query(e.to_string()))?
            .ok_or_else(|| VectorIndexError::NotFound(id.to_string()))?;

        let is_active = patch.is_active.unwrap_or(existing.is_active);
        let promoted_to_fact = patch.promoted_to_fact.unwrap_or(existing.promoted_to_fact);
        let promoted_at = patch.promoted_at.or(existing.promoted_at);
        let promoted_fact_id = patch.promoted_fact_id.or(existing.promoted_fact_id);

        conn.execute(
            "UPDATE memory_items SET is_active=?1, promoted_to_fact=?2, promoted_at=?3, promoted_fact_id=?4,
             updated_at=?5 WHERE id=?6",
            params![
                is_active,
                promoted_to_fact,
                promoted_at,
                promoted_fact_id.map(|u| u.to_string()),
                Utc::now(),
                id.to_string(),
            ],
        )
        .map_err(|e| VectorIndexError::Upsert(e.to_string()))?;
        Ok(())
    }

    fn delete(&self, id: Uuid) -> Result<(), VectorIndexError> {
        let mut id_to_key = self.id_to_key.lock().unwrap();
        let mut key_to_id = self.key_to_id.lock().unwrap();
        if let Some(key) = id_to_key.remove(&id) {
            key_to_id.remove(&key);
            let index = self.index.lock().unwrap();
            let _ = index.remove(key);
            self.persist_index(&index)?;
        }
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM memory_items WHERE id = ?1", params![id.to_string()])
            .map_err(|e| VectorIndexError::Upsert(e.to_string()))?;
        Ok(())
    }

    fn stats(&self) -> Result<IndexStats, VectorIndexError> {
        let conn = self.conn.lock().unwrap();
        let total: i64 = conn
            .query_row("SELECT COUNT(*) FROM memory_items", [], |r| r.get(0))
            .map_err(|e| VectorIndexError::Query(e.to_string()))?;
        Ok(IndexStats {
            total_items: total as usize,
            dimensions: self.dimensions,
            collection_name: self.index_path.to_string_lossy().to_string(),
            mode: "embedded",
        })
    }
}

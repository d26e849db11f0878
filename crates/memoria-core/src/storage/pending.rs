//! Pending-Approval Queue Store (§3, §4.E): memories that failed the
//! kernel's confidence gate and wait for a human decision before they ever
//! reach the vector index.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use thiserror::Error;
use uuid::Uuid;

use crate::model::MemoryItem;

#[derive(Debug, Error)]
pub enum PendingQueueError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("record not found: {0}")]
    NotFound(Uuid),
    #[error("record {0} is not pending (already locked or resolved)")]
    NotPending(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingStatus {
    Pending,
    Processing,
    Approved,
    Rejected,
}

impl PendingStatus {
    fn as_str(self) -> &'static str {
        match self {
            PendingStatus::Pending => "pending",
            PendingStatus::Processing => "processing",
            PendingStatus::Approved => "approved",
            PendingStatus::Rejected => "rejected",
        }
    }

    fn parse(raw: &str) -> Self {
        match raw {
            "processing" => PendingStatus::Processing,
            "approved" => PendingStatus::Approved,
            "rejected" => PendingStatus::Rejected,
            _ => PendingStatus::Pending,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PendingRecord {
    pub id: Uuid,
    pub item: MemoryItem,
    pub status: PendingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct PendingQueueStats {
    pub pending: usize,
    pub processing: usize,
    pub approved: usize,
    pub rejected: usize,
}

/// `pending_memory.db`. Every mutating method serializes through a process
/// mutex on top of SQLite's own locking so that `try_lock`'s compare-and-set
/// is race-free even under multiple in-process callers.
pub struct PendingQueueStore {
    conn: Mutex<rusqlite::Connection>,
}

impl PendingQueueStore {
    pub fn open(path: &Path) -> Result<Self, PendingQueueError> {
        let conn = super::open_connection(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS pending_memory (
                id TEXT PRIMARY KEY,
                item_json TEXT NOT NULL,
                confidence REAL NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_pending_status ON pending_memory(status);",
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn insert(&self, item: MemoryItem) -> Result<Uuid, PendingQueueError> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();
        let confidence = item.confidence;
        let id = item.id;
        conn.execute(
            "INSERT INTO pending_memory (id, item_json, confidence, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id.to_string(), serde_json::to_string(&item)?, confidence, PendingStatus::Pending.as_str(), now, now],
        )?;
        Ok(id)
    }

    pub fn get(&self, id: Uuid) -> Result<Option<PendingRecord>, PendingQueueError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM pending_memory WHERE id = ?1", params![id.to_string()], row_to_record)
            .optional()
            .map_err(PendingQueueError::from)
    }

    /// Ordered by confidence descending, then recency descending — the
    /// order a reviewer should work through the queue in.
    pub fn list(&self, status: Option<PendingStatus>) -> Result<Vec<PendingRecord>, PendingQueueError> {
        let conn = self.conn.lock().unwrap();
        let records = match status {
            Some(status) => {
                let mut stmt = conn.prepare(
                    "SELECT * FROM pending_memory WHERE status = ?1 ORDER BY confidence DESC, created_at DESC",
                )?;
                stmt.query_map(params![status.as_str()], row_to_record)?.collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let mut stmt =
                    conn.prepare("SELECT * FROM pending_memory ORDER BY confidence DESC, created_at DESC")?;
                stmt.query_map([], row_to_record)?.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(records)
    }

    /// The only admissible way to begin approval: atomically transitions
    /// `pending -> processing`. Returns `false` (not an error) if the
    /// record was already locked or resolved by someone else.
    pub fn try_lock(&self, id: Uuid) -> Result<bool, PendingQueueError> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();
        let updated = conn.execute(
            "UPDATE pending_memory SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
            params![PendingStatus::Processing.as_str(), now, id.to_string(), PendingStatus::Pending.as_str()],
        )?;
        Ok(updated == 1)
    }

    /// Compensating action when the post-lock write fails: returns a
    /// record to `pending` so it can be retried.
    pub fn unlock(&self, id: Uuid) -> Result<(), PendingQueueError> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();
        let updated = conn.execute(
            "UPDATE pending_memory SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
            params![PendingStatus::Pending.as_str(), now, id.to_string(), PendingStatus::Processing.as_str()],
        )?;
        if updated == 0 {
            return Err(PendingQueueError::NotPending(id));
        }
        Ok(())
    }

    pub fn mark_approved(&self, id: Uuid) -> Result<(), PendingQueueError> {
        self.set_status(id, PendingStatus::Approved)
    }

    /// Atomic `pending -> rejected`; unlike approval this needs no lock
    /// step since it has no vector-index side effect to compensate for.
    pub fn mark_rejected(&self, id: Uuid) -> Result<(), PendingQueueError> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();
        let updated = conn.execute(
            "UPDATE pending_memory SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
            params![PendingStatus::Rejected.as_str(), now, id.to_string(), PendingStatus::Pending.as_str()],
        )?;
        if updated == 0 {
            return Err(PendingQueueError::NotPending(id));
        }
        Ok(())
    }

    fn set_status(&self, id: Uuid, status: PendingStatus) -> Result<(), PendingQueueError> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();
        let updated = conn.execute(
            "UPDATE pending_memory SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), now, id.to_string()],
        )?;
        if updated == 0 {
            return Err(PendingQueueError::NotFound(id));
        }
        Ok(())
    }

    pub fn delete(&self, id: Uuid) -> Result<(), PendingQueueError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM pending_memory WHERE id = ?1", params![id.to_string()])?;
        Ok(())
    }

    pub fn stats(&self) -> Result<PendingQueueStats, PendingQueueError> {
        let conn = self.conn.lock().unwrap();
        let mut stats = PendingQueueStats::default();
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM pending_memory GROUP BY status")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            let (status, count) = row?;
            match PendingStatus::parse(&status) {
                PendingStatus::Pending => stats.pending = count as usize,
                PendingStatus::Processing => stats.processing = count as usize,
                PendingStatus::Approved => stats.approved = count as usize,
                PendingStatus::Rejected => stats.rejected = count as usize,
            }
        }
        Ok(stats)
    }
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<PendingRecord> {
    let id: String = row.get("id")?;
    let item_json: String = row.get("item_json")?;
    let status: String = row.get("status")?;
    let item: MemoryItem = serde_json::from_str(&item_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?;
    Ok(PendingRecord {
        id: Uuid::parse_str(&id).unwrap_or_else(|_| Uuid::nil()),
        item,
        status: PendingStatus::parse(&status),
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Layer;

    fn temp_store() -> (PendingQueueStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = PendingQueueStore::open(&dir.path().join("pending.db")).unwrap();
        (store, dir)
    }

    #[test]
    fn try_lock_is_a_one_shot_cas() {
        let (store, _dir) = temp_store();
        let item = MemoryItem::new("patient walked in the park today", Layer::VerifiedFact);
        let id = store.insert(item).unwrap();

        assert!(store.try_lock(id).unwrap());
        assert!(!store.try_lock(id).unwrap());
    }

    #[test]
    fn unlock_requires_processing_state() {
        let (store, _dir) = temp_store();
        let item = MemoryItem::new("x", Layer::VerifiedFact);
        let id = store.insert(item).unwrap();
        assert!(store.unlock(id).is_err());
        assert!(store.try_lock(id).unwrap());
        assert!(store.unlock(id).is_ok());
        assert!(store.try_lock(id).unwrap());
    }

    #[test]
    fn list_orders_by_confidence_then_recency() {
        let (store, _dir) = temp_store();
        let mut low = MemoryItem::new("low confidence", Layer::VerifiedFact);
        low.confidence = 0.72;
        let mut high = MemoryItem::new("high confidence", Layer::VerifiedFact);
        high.confidence = 0.88;
        store.insert(low).unwrap();
        store.insert(high).unwrap();

        let listed = store.list(None).unwrap();
        assert_eq!(listed[0].item.content, "high confidence");
    }

    #[test]
    fn reject_pending_is_atomic_and_terminal() {
        let (store, _dir) = temp_store();
        let item = MemoryItem::new("x", Layer::VerifiedFact);
        let id = store.insert(item).unwrap();
        store.mark_rejected(id).unwrap();
        assert!(store.mark_rejected(id).is_err());
    }
}

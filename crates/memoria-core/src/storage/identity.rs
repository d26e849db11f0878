//! Identity-Change Store (§3, §4.G): the durable log of proposed edits to
//! the L0 identity layer and the approvals collected against each one.
//! Mutating the identity layer directly is refused by the kernel; this
//! table is the only path a change can take.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum IdentityStoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("change record not found: {0}")]
    NotFound(Uuid),
    #[error("change {0} is not pending (status is already {1})")]
    NotPending(Uuid, String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Create,
    Update,
    Delete,
}

impl ChangeType {
    fn as_str(self) -> &'static str {
        match self {
            ChangeType::Create => "create",
            ChangeType::Update => "update",
            ChangeType::Delete => "delete",
        }
    }

    fn parse(raw: &str) -> Self {
        match raw {
            "update" => ChangeType::Update,
            "delete" => ChangeType::Delete,
            _ => ChangeType::Create,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeStatus {
    Pending,
    Approved,
    Applied,
    Rejected,
    Expired,
}

impl ChangeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeStatus::Pending => "pending",
            ChangeStatus::Approved => "approved",
            ChangeStatus::Applied => "applied",
            ChangeStatus::Rejected => "rejected",
            ChangeStatus::Expired => "expired",
        }
    }

    fn parse(raw: &str) -> Self {
        match raw {
            "approved" => ChangeStatus::Approved,
            "applied" => ChangeStatus::Applied,
            "rejected" => ChangeStatus::Rejected,
            "expired" => ChangeStatus::Expired,
            _ => ChangeStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approval {
    pub approver: String,
    pub comment: Option<String>,
    pub approved_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct IdentityChangeRecord {
    pub id: Uuid,
    pub change_type: ChangeType,
    pub proposed_content: String,
    pub reason: Option<String>,
    pub target_id: Option<Uuid>,
    pub category: Option<String>,
    pub status: ChangeStatus,
    pub approvals_count: u32,
    pub approvals_needed: u32,
    pub approvals: Vec<Approval>,
    pub proposer: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub applied_at: Option<DateTime<Utc>>,
}

pub const DEFAULT_APPROVALS_NEEDED: u32 = 3;

/// `constitution_changes.db`.
pub struct IdentityChangeStore {
    conn: Mutex<rusqlite::Connection>,
}

impl IdentityChangeStore {
    pub fn open(path: &Path) -> Result<Self, IdentityStoreError> {
        let conn = super::open_connection(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS identity_changes (
                id TEXT PRIMARY KEY,
                change_type TEXT NOT NULL,
                proposed_content TEXT NOT NULL,
                reason TEXT,
                target_id TEXT,
                category TEXT,
                status TEXT NOT NULL,
                approvals_count INTEGER NOT NULL,
                approvals_needed INTEGER NOT NULL,
                approvals_json TEXT NOT NULL,
                proposer TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                applied_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_identity_changes_status ON identity_changes(status);",
        )?;
        Ok(Self { conn: Mutex::new(conn) })
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
        approvals_needed: u32,
    ) -> Result<Uuid, IdentityStoreError> {
        let conn = self.conn.lock().unwrap();
        let id = Uuid::new_v4();
        let now = Utc::now();
        conn.execute(
            "INSERT INTO identity_changes (
                id, change_type, proposed_content, reason, target_id, category, status,
                approvals_count, approvals_needed, approvals_json, proposer, created_at, updated_at, applied_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,0,?8,'[]',?9,?10,?11,NULL)",
            params![
                id.to_string(),
                change_type.as_str(),
                proposed_content,
                reason,
                target_id.map(|u| u.to_string()),
                category,
                ChangeStatus::Pending.as_str(),
                approvals_needed,
                proposer,
                now,
                now,
            ],
        )?;
        Ok(id)
    }

    pub fn get(&self, id: Uuid) -> Result<Option<IdentityChangeRecord>, IdentityStoreError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM identity_changes WHERE id = ?1", params![id.to_string()], row_to_record)
            .optional()
            .map_err(IdentityStoreError::from)
    }

    pub fn list(&self, status: Option<ChangeStatus>) -> Result<Vec<IdentityChangeRecord>, IdentityStoreError> {
        let conn = self.conn.lock().unwrap();
        let records = match status {
            Some(status) => {
                let mut stmt = conn.prepare(
                    "SELECT * FROM identity_changes WHERE status = ?1 ORDER BY created_at DESC",
                )?;
                stmt.query_map(params![status.as_str()], row_to_record)?.collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let mut stmt = conn.prepare("SELECT * FROM identity_changes ORDER BY created_at DESC")?;
                stmt.query_map([], row_to_record)?.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(records)
    }

    /// Appends one approval and increments the count atomically. Refuses
    /// anything but a `pending` record — approvals stop counting the
    /// moment a change leaves that state. Does not itself move the status
    /// to `applied`; the caller (the approval workflow) does that once the
    /// threshold is reached and the change has actually been applied.
    pub fn record_approval(
        &self,
        id: Uuid,
        approver: String,
        comment: Option<String>,
    ) -> Result<IdentityChangeRecord, IdentityStoreError> {
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;
        let mut record = tx
            .query_row("SELECT * FROM identity_changes WHERE id = ?1", params![id.to_string()], row_to_record)
            .optional()?
            .ok_or(IdentityStoreError::NotFound(id))?;

        if record.status != ChangeStatus::Pending {
            return Err(IdentityStoreError::NotPending(id, record.status.as_str().to_string()));
        }

        record.approvals.push(Approval { approver, comment, approved_at: Utc::now() });
        record.approvals_count += 1;
        record.updated_at = Utc::now();

        tx.execute(
            "UPDATE identity_changes SET approvals_count = ?1, approvals_json = ?2, updated_at = ?3 WHERE id = ?4",
            params![record.approvals_count, serde_json::to_string(&record.approvals)?, record.updated_at, id.to_string()],
        )?;
        tx.commit()?;
        Ok(record)
    }

    /// Sets the final status once the workflow has decided the outcome.
    /// `applied_at` is stamped iff `status == Applied`.
    pub fn set_status(&self, id: Uuid, status: ChangeStatus) -> Result<(), IdentityStoreError> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();
        let applied_at = if status == ChangeStatus::Applied { Some(now) } else { None };
        let updated = conn.execute(
            "UPDATE identity_changes SET status = ?1, updated_at = ?2, applied_at = ?3 WHERE id = ?4",
            params![status.as_str(), now, applied_at, id.to_string()],
        )?;
        if updated == 0 {
            return Err(IdentityStoreError::NotFound(id));
        }
        Ok(())
    }

    pub fn reject(&self, id: Uuid) -> Result<(), IdentityStoreError> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();
        let updated = conn.execute(
            "UPDATE identity_changes SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
            params![ChangeStatus::Rejected.as_str(), now, id.to_string(), ChangeStatus::Pending.as_str()],
        )?;
        if updated == 0 {
            return Err(IdentityStoreError::NotPending(id, "not pending".to_string()));
        }
        Ok(())
    }
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<IdentityChangeRecord> {
    let id: String = row.get("id")?;
    let change_type: String = row.get("change_type")?;
    let target_id: Option<String> = row.get("target_id")?;
    let status: String = row.get("status")?;
    let approvals_json: String = row.get("approvals_json")?;
    let approvals: Vec<Approval> = serde_json::from_str(&approvals_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?;

    Ok(IdentityChangeRecord {
        id: Uuid::parse_str(&id).unwrap_or_else(|_| Uuid::nil()),
        change_type: ChangeType::parse(&change_type),
        proposed_content: row.get("proposed_content")?,
        reason: row.get("reason")?,
        target_id: target_id.and_then(|s| Uuid::parse_str(&s).ok()),
        category: row.get("category")?,
        status: ChangeStatus::parse(&status),
        approvals_count: row.get::<_, i64>("approvals_count")? as u32,
        approvals_needed: row.get::<_, i64>("approvals_needed")? as u32,
        approvals,
        proposer: row.get("proposer")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        applied_at: row.get("applied_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (IdentityChangeStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityChangeStore::open(&dir.path().join("identity_changes.db")).unwrap();
        (store, dir)
    }

    #[test]
    fn approvals_count_is_monotonic() {
        let (store, _dir) = temp_store();
        let id = store
            .propose(ChangeType::Create, "new fact".into(), None, None, None, Some("alice".into()), 3)
            .unwrap();

        let r1 = store.record_approval(id, "bob".into(), None).unwrap();
        assert_eq!(r1.approvals_count, 1);
        let r2 = store.record_approval(id, "carol".into(), None).unwrap();
        assert_eq!(r2.approvals_count, 2);
        assert_eq!(r2.approvals.len(), 2);
    }

    #[test]
    fn approval_refused_once_not_pending() {
        let (store, _dir) = temp_store();
        let id = store
            .propose(ChangeType::Create, "new fact".into(), None, None, None, None, 1)
            .unwrap();
        store.reject(id).unwrap();
        assert!(store.record_approval(id, "dave".into(), None).is_err());
    }

    #[test]
    fn applied_at_set_iff_status_applied() {
        let (store, _dir) = temp_store();
        let id = store
            .propose(ChangeType::Update, "edit".into(), None, None, None, None, 1)
            .unwrap();
        store.set_status(id, ChangeStatus::Applied).unwrap();
        let record = store.get(id).unwrap().unwrap();
        assert!(record.applied_at.is_some());
    }
}

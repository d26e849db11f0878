//! Cloud sync orchestration: push exports the local store to an object
//! storage prefix, pull fetches and reconciles it back in. Grounded on the
//! same manifest-then-payload shape as the embedded/remote vector split —
//! fetch the small integrity-bearing file first, then the bulk payloads,
//! and never accept a payload whose checksum doesn't match.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::model::{Layer, MemoryItem};

use super::manifest::{sha256_hex, MemoryRecord, SyncManifest};
use super::{ConflictStrategy, DataEncryptor, SyncError};

/// A key-value byte store rooted at `<prefix>/<project_id>/...`. The HTTP
/// implementation below is the production path; tests use an in-memory one.
pub trait ObjectStore: Send + Sync {
    fn put(&self, key: &str, data: &[u8]) -> Result<(), SyncError>;
    fn get(&self, key: &str) -> Result<Vec<u8>, SyncError>;
}

pub struct HttpObjectStore {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpObjectStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { client: reqwest::blocking::Client::new(), base_url: base_url.into() }
    }
}

impl ObjectStore for HttpObjectStore {
    fn put(&self, key: &str, data: &[u8]) -> Result<(), SyncError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), key);
        let resp = self
            .client
            .put(&url)
            .body(data.to_vec())
            .send()
            .map_err(|e| SyncError::ObjectStore(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(SyncError::ObjectStore(format!("PUT {url} returned {}", resp.status())));
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, SyncError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), key);
        let resp = self.client.get(&url).send().map_err(|e| SyncError::ObjectStore(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(SyncError::ObjectStore(format!("GET {url} returned {}", resp.status())));
        }
        resp.bytes().map(|b| b.to_vec()).map_err(|e| SyncError::ObjectStore(e.to_string()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
    pub conflicts: usize,
    pub errors: Vec<String>,
    /// `(original_id, regenerated_id)` pairs for incoming records whose id
    /// wasn't a valid UUID.
    pub regenerated_ids: Vec<(String, Uuid)>,
}

pub struct CloudSyncService<S: ObjectStore> {
    store: S,
    encryptor: Option<DataEncryptor>,
}

impl<S: ObjectStore> CloudSyncService<S> {
    pub fn new(store: S, encryptor: Option<DataEncryptor>) -> Self {
        Self { store, encryptor }
    }

    fn memories_key(project_id: &str, encrypted: bool) -> String {
        let suffix = if encrypted { "memories.jsonl.enc" } else { "memories.jsonl" };
        format!("{project_id}/{suffix}")
    }

    fn constitution_key(project_id: &str, encrypted: bool) -> String {
        let suffix = if encrypted { "constitution.json.enc" } else { "constitution.json" };
        format!("{project_id}/{suffix}")
    }

    fn manifest_key(project_id: &str) -> String {
        format!("{project_id}/manifest.json")
    }

    pub fn push(&self, project_id: &str, items: &[MemoryItem], constitution_json: &str) -> Result<SyncManifest, SyncError> {
        let lines: Result<Vec<String>, SyncError> = items.iter().map(|item| item_to_record(item).to_json_line()).collect();
        let memories_bytes = lines?.join("\n").into_bytes();
        let constitution_bytes = constitution_json.as_bytes().to_vec();

        let memories_checksum = sha256_hex(&memories_bytes);
        let constitution_checksum = sha256_hex(&constitution_bytes);

        let encrypted = self.encryptor.is_some();
        let (memories_payload, constitution_payload) = if let Some(enc) = &self.encryptor {
            (enc.encrypt(&memories_bytes, Some(project_id.as_bytes()))?, enc.encrypt(&constitution_bytes, Some(project_id.as_bytes()))?)
        } else {
            (memories_bytes, constitution_bytes)
        };

        self.store.put(&Self::memories_key(project_id, encrypted), &memories_payload)?;
        self.store.put(&Self::constitution_key(project_id, encrypted), &constitution_payload)?;

        let mut manifest = SyncManifest::new(project_id);
        manifest.last_sync = Utc::now();
        manifest.memories_count = items.len();
        manifest.memories_checksum = memories_checksum;
        manifest.constitution_checksum = constitution_checksum;
        manifest.encrypted = encrypted;

        self.store.put(&Self::manifest_key(project_id), manifest.to_json()?.as_bytes())?;
        Ok(manifest)
    }

    /// Fetches the manifest, then both payloads, decrypting and verifying
    /// checksums before anything is handed back to the caller.
    pub fn fetch(&self, project_id: &str) -> Result<(SyncManifest, Vec<MemoryRecord>, String), SyncError> {
        let manifest_bytes = self.store.get(&Self::manifest_key(project_id))?;
        let manifest = SyncManifest::from_json(&String::from_utf8_lossy(&manifest_bytes))?;

        let memories_raw = self.store.get(&Self::memories_key(project_id, manifest.encrypted))?;
        let constitution_raw = self.store.get(&Self::constitution_key(project_id, manifest.encrypted))?;

        let (memories_bytes, constitution_bytes) = if manifest.encrypted {
            let enc = self
                .encryptor
                .as_ref()
                .ok_or_else(|| SyncError::Decryption("payload is encrypted but no key was configured".to_string()))?;
            (
                enc.decrypt(&memories_raw, Some(project_id.as_bytes()))?,
                enc.decrypt(&constitution_raw, Some(project_id.as_bytes()))?,
            )
        } else {
            (memories_raw, constitution_raw)
        };

        let got_memories_checksum = sha256_hex(&memories_bytes);
        if got_memories_checksum != manifest.memories_checksum {
            return Err(SyncError::ChecksumMismatch { expected: manifest.memories_checksum.clone(), got: got_memories_checksum });
        }
        let got_constitution_checksum = sha256_hex(&constitution_bytes);
        if got_constitution_checksum != manifest.constitution_checksum {
            return Err(SyncError::ChecksumMismatch { expected: manifest.constitution_checksum.clone(), got: got_constitution_checksum });
        }

        let constitution_json = String::from_utf8_lossy(&constitution_bytes).to_string();
        let records: Vec<MemoryRecord> = String::from_utf8_lossy(&memories_bytes)
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(MemoryRecord::from_json_line)
            .collect::<Result<Vec<_>, _>>()?;

        Ok((manifest, records, constitution_json))
    }

    /// Reconciles fetched records against local state. `lookup` supplies the
    /// `updated_at` of any existing item with the same id (`None` = new);
    /// `apply` performs the actual insert/overwrite against the vector
    /// index. `ConflictStrategy::Merge` is not implemented — every merge
    /// request falls back to `Skip` and is counted as a conflict.
    pub fn import_records(
        &self,
        records: Vec<MemoryRecord>,
        strategy: ConflictStrategy,
        lookup: impl Fn(Uuid) -> Option<DateTime<Utc>>,
        mut apply: impl FnMut(MemoryItem) -> Result<(), SyncError>,
    ) -> ImportReport {
        let mut report = ImportReport::default();

        for record in records {
            let (item, regenerated) = match record_to_item(&record) {
                Ok(pair) => pair,
                Err(e) => {
                    report.errors.push(e);
                    continue;
                }
            };
            if let Some(original) = regenerated {
                report.regenerated_ids.push((original, item.id));
            }

            let existing_updated_at = lookup(item.id);
            let (should_write, is_conflict) = match (strategy, existing_updated_at) {
                (_, None) => (true, false),
                (ConflictStrategy::Skip, Some(_)) => (false, false),
                (ConflictStrategy::Merge, Some(_)) => (false, true),
                (ConflictStrategy::LastWriteWins, Some(existing_at)) => {
                    if existing_at >= item.updated_at { (false, false) } else { (true, true) }
                }
            };

            if !should_write {
                if is_conflict {
                    report.conflicts += 1;
                } else {
                    report.skipped += 1;
                }
                continue;
            }
            if is_conflict {
                report.conflicts += 1;
            }
            match apply(item) {
                Ok(()) => report.imported += 1,
                Err(e) => report.errors.push(e.to_string()),
            }
        }

        report
    }
}

fn item_to_record(item: &MemoryItem) -> MemoryRecord {
    MemoryRecord {
        id: item.id.to_string(),
        content: item.content.clone(),
        layer: item.layer.as_str().to_string(),
        category: item.category.as_ref().map(|c| c.as_str().to_string()),
        confidence: item.confidence,
        created_at: item.created_at,
        updated_at: item.updated_at,
        metadata: serde_json::json!({
            "source": item.source,
            "agent_id": item.agent_id,
            "created_by": item.created_by,
        }),
    }
}

/// Converts an imported record into a `MemoryItem`, normalizing legacy
/// layer aliases and regenerating the id if the incoming one isn't a valid
/// UUID (the original is returned alongside for the caller to record).
fn record_to_item(record: &MemoryRecord) -> Result<(MemoryItem, Option<String>), String> {
    let layer = Layer::normalize(&record.layer).ok_or_else(|| format!("unknown layer in import: {}", record.layer))?;

    let (id, regenerated) = match Uuid::parse_str(&record.id) {
        Ok(id) => (id, None),
        Err(_) => (Uuid::new_v4(), Some(record.id.clone())),
    };

    let mut item = MemoryItem::new(record.content.clone(), layer);
    item.id = id;
    item.category = record.category.as_deref().map(crate::model::Category::parse);
    item.confidence = record.confidence;
    item.created_at = record.created_at;
    item.updated_at = record.updated_at;
    item.source = record.metadata.get("source").and_then(|v| v.as_str()).map(str::to_string);
    item.agent_id = record.metadata.get("agent_id").and_then(|v| v.as_str()).map(str::to_string);
    item.created_by = record.metadata.get("created_by").and_then(|v| v.as_str()).map(str::to_string);

    Ok((item, regenerated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct InMemoryStore {
        objects: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl InMemoryStore {
        fn new() -> Self {
            Self { objects: Mutex::new(HashMap::new()) }
        }
    }

    impl ObjectStore for InMemoryStore {
        fn put(&self, key: &str, data: &[u8]) -> Result<(), SyncError> {
            self.objects.lock().unwrap().insert(key.to_string(), data.to_vec());
            Ok(())
        }
        fn get(&self, key: &str) -> Result<Vec<u8>, SyncError> {
            self.objects
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .ok_or_else(|| SyncError::ObjectStore(format!("missing key {key}")))
        }
    }

    #[test]
    fn push_then_fetch_round_trips_unencrypted() {
        let service = CloudSyncService::new(InMemoryStore::new(), None);
        let item = MemoryItem::new("patient went for a walk", Layer::VerifiedFact);
        let manifest = service.push("proj-1", &[item.clone()], "{}").unwrap();
        assert_eq!(manifest.memories_count, 1);
        assert!(!manifest.encrypted);

        let (fetched_manifest, records, constitution) = service.fetch("proj-1").unwrap();
        assert_eq!(fetched_manifest.memories_count, 1);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].content, "patient went for a walk");
        assert_eq!(constitution, "{}");
    }

    #[test]
    fn push_then_fetch_round_trips_encrypted() {
        let key = DataEncryptor::generate_key();
        let service = CloudSyncService::new(InMemoryStore::new(), Some(DataEncryptor::new(&key)));
        let item = MemoryItem::new("secret note", Layer::VerifiedFact);
        service.push("proj-2", &[item], "{}").unwrap();

        let (manifest, records, _) = service.fetch("proj-2").unwrap();
        assert!(manifest.encrypted);
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn merge_strategy_falls_back_to_skip_and_counts_as_conflict() {
        let service = CloudSyncService::new(InMemoryStore::new(), None);
        let record = item_to_record(&MemoryItem::new("x", Layer::VerifiedFact));
        let existing_at = Utc::now();
        let report = service.import_records(vec![record], ConflictStrategy::Merge, |_| Some(existing_at), |_| Ok(()));
        assert_eq!(report.conflicts, 1);
        assert_eq!(report.imported, 0);
    }

    #[test]
    fn last_write_wins_overwrites_only_when_newer() {
        let service = CloudSyncService::new(InMemoryStore::new(), None);
        let mut item = MemoryItem::new("x", Layer::VerifiedFact);
        item.updated_at = Utc::now();
        let record = item_to_record(&item);
        let older = item.updated_at - chrono::Duration::days(1);

        let report = service.import_records(vec![record.clone()], ConflictStrategy::LastWriteWins, |_| Some(older), |_| Ok(()));
        assert_eq!(report.imported, 1);
        assert_eq!(report.conflicts, 1);

        let newer = item.updated_at + chrono::Duration::days(1);
        let report2 = service.import_records(vec![record], ConflictStrategy::LastWriteWins, |_| Some(newer), |_| Ok(()));
        assert_eq!(report2.imported, 0);
        assert_eq!(report2.skipped, 1);
    }

    #[test]
    fn invalid_id_is_regenerated_and_reported() {
        let mut record = item_to_record(&MemoryItem::new("x", Layer::VerifiedFact));
        record.id = "not-a-uuid".to_string();
        let service = CloudSyncService::new(InMemoryStore::new(), None);
        let report = service.import_records(vec![record], ConflictStrategy::Skip, |_| None, |_| Ok(()));
        assert_eq!(report.imported, 1);
        assert_eq!(report.regenerated_ids.len(), 1);
        assert_eq!(report.regenerated_ids[0].0, "not-a-uuid");
    }
}

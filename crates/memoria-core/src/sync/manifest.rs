//! Wire shapes for cloud-sync payloads: the per-project manifest and the
//! one-record-per-line memory export format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SyncError;

pub const MANIFEST_VERSION: &str = "1.0.0";

/// `manifest.json` — always unencrypted, even when the payloads it
/// describes are not, so a puller can decide how to fetch them before
/// touching any key material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncManifest {
    pub version: String,
    pub project_id: String,
    pub last_sync: DateTime<Utc>,
    pub memories_count: usize,
    pub memories_checksum: String,
    pub constitution_checksum: String,
    pub encrypted: bool,
}

impl SyncManifest {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            version: MANIFEST_VERSION.to_string(),
            project_id: project_id.into(),
            last_sync: Utc::now(),
            memories_count: 0,
            memories_checksum: String::new(),
            constitution_checksum: String::new(),
            encrypted: false,
        }
    }

    pub fn to_json(&self) -> Result<String, SyncError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self, SyncError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// One line of `memories.jsonl`: a portable projection of a `MemoryItem`
/// plus whatever provenance metadata doesn't fit the core fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub content: String,
    pub layer: String,
    pub category: Option<String>,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl MemoryRecord {
    pub fn to_json_line(&self) -> Result<String, SyncError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json_line(line: &str) -> Result<Self, SyncError> {
        Ok(serde_json::from_str(line)?)
    }
}

/// SHA-256 checksum of `data`, hex-encoded, used for manifest integrity and
/// the pull-side `expected_checksum` verification.
pub fn sha256_hex(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_round_trips() {
        let manifest = SyncManifest::new("proj-1");
        let json = manifest.to_json().unwrap();
        let parsed = SyncManifest::from_json(&json).unwrap();
        assert_eq!(parsed.project_id, "proj-1");
        assert_eq!(parsed.version, MANIFEST_VERSION);
    }

    #[test]
    fn checksum_is_deterministic() {
        assert_eq!(sha256_hex(b"hello"), sha256_hex(b"hello"));
        assert_ne!(sha256_hex(b"hello"), sha256_hex(b"world"));
    }
}

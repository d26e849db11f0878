//! Project-local persistent layout and the identity (L0) YAML source.
//!
//! General project-settings loading (`config.yaml`) is an external
//! collaborator per the distilled spec's non-goals — `memoria-core` only
//! owns the one piece `get_constitution()` actually depends on:
//! `constitution.yaml`, the authoritative identity source.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("could not determine a project data directory")]
    NoDataDir,
}

/// Resolves the on-disk layout for one project: `config.yaml`,
/// `constitution.yaml`, `constitution_changes.db`, `pending_memory.db`, and
/// the embedded vector index directory, all rooted at a user-writable
/// per-project directory.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    root: PathBuf,
}

impl ProjectPaths {
    /// Resolve the root directory. `override_dir` takes precedence (mirrors
    /// `--data-dir` on the teacher's CLI); otherwise falls back to the
    /// platform project-data directory for (qualifier, org, app) =
    /// ("dev", "memoria", "memoria"), namespaced by `project_id`.
    pub fn resolve(project_id: &str, override_dir: Option<PathBuf>) -> Result<Self, ConfigError> {
        let root = match override_dir {
            Some(dir) => dir,
            None => {
                let dirs = directories::ProjectDirs::from("dev", "memoria", "memoria")
                    .ok_or(ConfigError::NoDataDir)?;
                dirs.data_dir().join(sanitize_project_id(project_id))
            }
        };
        std::fs::create_dir_all(&root).map_err(|e| ConfigError::Io {
            path: root.clone(),
            source: e,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_yaml(&self) -> PathBuf {
        self.root.join("config.yaml")
    }

    pub fn constitution_yaml(&self) -> PathBuf {
        self.root.join("constitution.yaml")
    }

    pub fn identity_changes_db(&self) -> PathBuf {
        self.root.join("constitution_changes.db")
    }

    pub fn pending_memory_db(&self) -> PathBuf {
        self.root.join("pending_memory.db")
    }

    pub fn vector_index_dir(&self) -> PathBuf {
        self.root.join(".vector_index")
    }
}

/// A sanitized collection name derived from the project id, used to name
/// the project's isolated vector collection (§3 Ownership).
pub fn sanitize_project_id(project_id: &str) -> String {
    project_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// One entry from the authoritative YAML identity configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IdentityYamlEntry {
    pub item_id: String,
    pub content: String,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct IdentityYamlFile {
    #[serde(default)]
    entries: Vec<IdentityYamlEntry>,
}

/// Supplies the L0 identity items sourced from YAML — authoritative, as
/// opposed to the historical contents of the vector index.
pub trait IdentityConfigSource: Send + Sync {
    fn load(&self) -> Result<Vec<IdentityYamlEntry>, ConfigError>;
}

/// Reads `constitution.yaml` at a fixed path. Missing file is treated as an
/// empty identity set (a brand-new project has no YAML identity yet).
pub struct YamlIdentityConfig {
    path: PathBuf,
}

impl YamlIdentityConfig {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl IdentityConfigSource for YamlIdentityConfig {
    fn load(&self) -> Result<Vec<IdentityYamlEntry>, ConfigError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::Io {
            path: self.path.clone(),
            source: e,
        })?;
        let parsed: IdentityYamlFile = serde_yaml::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: self.path.clone(),
            source: e,
        })?;
        Ok(parsed.entries)
    }
}

/// Derive the stable id for a YAML identity entry: namespaced UUIDv5 over
/// `(project_id, "constitution", item_id)`.
pub fn identity_entry_id(project_id: &str, item_id: &str) -> Uuid {
    let namespace = Uuid::NAMESPACE_OID;
    let key = format!("{project_id}:constitution:{item_id}");
    Uuid::new_v5(&namespace, key.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_entry_id_is_stable() {
        let a = identity_entry_id("proj-1", "name");
        let b = identity_entry_id("proj-1", "name");
        assert_eq!(a, b);
        let c = identity_entry_id("proj-1", "other");
        assert_ne!(a, c);
    }

    #[test]
    fn missing_yaml_is_empty() {
        let src = YamlIdentityConfig::new(PathBuf::from("/nonexistent/constitution.yaml"));
        assert!(src.load().unwrap().is_empty());
    }

    #[test]
    fn sanitizes_project_id() {
        assert_eq!(sanitize_project_id("my project/v2"), "my_project_v2");
    }
}

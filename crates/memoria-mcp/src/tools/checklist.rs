//! Checklist bridge.
//!
//! Memory layers capture what an agent knows; the checklist is the thin,
//! external-to-core surface that tracks what it still needs to *do*. It is
//! deliberately dumb: a flat JSON file of items, each optionally linked back
//! to a memory or event by id so a briefing can cite its source.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecklistItem {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub source_memory_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// JSON-file-backed list of checklist items, read fully into memory and
/// rewritten on every mutation. Fine at the scale a single agent's working
/// checklist ever reaches.
pub struct ChecklistStore {
    path: PathBuf,
    items: Vec<ChecklistItem>,
}

impl ChecklistStore {
    pub fn load(path: PathBuf) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let items = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            Vec::new()
        };
        Ok(Self { path, items })
    }

    fn persist(&self) -> std::io::Result<()> {
        let raw = serde_json::to_string_pretty(&self.items)?;
        std::fs::write(&self.path, raw)
    }

    pub fn create_item(&mut self, title: String, notes: Option<String>, source_memory_id: Option<Uuid>) -> std::io::Result<ChecklistItem> {
        let item = ChecklistItem {
            id: Uuid::new_v4(),
            title,
            notes,
            done: false,
            source_memory_id,
            created_at: Utc::now(),
        };
        self.items.push(item.clone());
        self.persist()?;
        Ok(item)
    }

    pub fn mark_done(&mut self, id: Uuid, done: bool) -> std::io::Result<Option<ChecklistItem>> {
        let found = self.items.iter_mut().find(|i| i.id == id);
        let result = found.map(|i| {
            i.done = done;
            i.clone()
        });
        if result.is_some() {
            self.persist()?;
        }
        Ok(result)
    }

    pub fn open_items(&self) -> Vec<&ChecklistItem> {
        self.items.iter().filter(|i| !i.done).collect()
    }

    pub fn all_items(&self) -> &[ChecklistItem] {
        &self.items
    }
}

pub fn briefing_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "includeDone": {
                "type": "boolean",
                "description": "Include completed items in the briefing (default: false)",
                "default": false
            }
        }
    })
}

pub async fn execute_briefing(store: &tokio::sync::Mutex<ChecklistStore>, args: Option<Value>) -> Result<Value, String> {
    let include_done = args
        .and_then(|v| v.get("includeDone").and_then(Value::as_bool))
        .unwrap_or(false);

    let store = store.lock().await;
    let items: Vec<&ChecklistItem> = if include_done {
        store.all_items().iter().collect()
    } else {
        store.open_items()
    };

    Ok(serde_json::json!({
        "tool": "get_checklist_briefing",
        "openCount": store.open_items().len(),
        "items": items,
    }))
}

pub fn create_item_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "required": ["title"],
        "properties": {
            "title": {
                "type": "string",
                "description": "Short description of the task"
            },
            "notes": {
                "type": "string",
                "description": "Optional free-form detail"
            },
            "sourceMemoryId": {
                "type": "string",
                "description": "Memory or event id this item was derived from, if any"
            }
        }
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateItemArgs {
    title: String,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    source_memory_id: Option<Uuid>,
}

pub async fn execute_create_item(store: &tokio::sync::Mutex<ChecklistStore>, args: Option<Value>) -> Result<Value, String> {
    let args: CreateItemArgs = match args {
        Some(v) => serde_json::from_value(v).map_err(|e| format!("invalid arguments: {e}"))?,
        None => return Err("missing arguments".into()),
    };

    let mut store = store.lock().await;
    let item = store
        .create_item(args.title, args.notes, args.source_memory_id)
        .map_err(|e| format!("failed to write checklist: {e}"))?;

    Ok(serde_json::json!({
        "tool": "create_checklist_item",
        "item": item,
    }))
}

pub fn sync_plan_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "required": ["items"],
        "properties": {
            "items": {
                "type": "array",
                "description": "Plan steps to mirror onto the checklist",
                "items": {
                    "type": "object",
                    "required": ["title"],
                    "properties": {
                        "title": { "type": "string" },
                        "notes": { "type": "string" },
                        "sourceMemoryId": { "type": "string" }
                    }
                }
            }
        }
    })
}

#[derive(Debug, Deserialize)]
struct SyncPlanArgs {
    items: Vec<CreateItemArgs>,
}

pub async fn execute_sync_plan(store: &tokio::sync::Mutex<ChecklistStore>, args: Option<Value>) -> Result<Value, String> {
    let args: SyncPlanArgs = match args {
        Some(v) => serde_json::from_value(v).map_err(|e| format!("invalid arguments: {e}"))?,
        None => return Err("missing arguments".into()),
    };

    let mut store = store.lock().await;
    let mut created = Vec::with_capacity(args.items.len());
    for item in args.items {
        let created_item = store
            .create_item(item.title, item.notes, item.source_memory_id)
            .map_err(|e| format!("failed to write checklist: {e}"))?;
        created.push(created_item);
    }

    Ok(serde_json::json!({
        "tool": "sync_plan_to_checklist",
        "createdCount": created.len(),
        "items": created,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path() -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("memoria-checklist-test-{}.json", Uuid::new_v4()));
        p
    }

    #[test]
    fn create_and_reload_round_trips() {
        let path = temp_path();
        {
            let mut store = ChecklistStore::load(path.clone()).unwrap();
            store.create_item("write tests".into(), None, None).unwrap();
        }
        let store = ChecklistStore::load(path.clone()).unwrap();
        assert_eq!(store.all_items().len(), 1);
        assert_eq!(store.open_items().len(), 1);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn mark_done_excludes_from_open_items() {
        let path = temp_path();
        let mut store = ChecklistStore::load(path.clone()).unwrap();
        let item = store.create_item("ship it".into(), None, None).unwrap();
        store.mark_done(item.id, true).unwrap();
        assert!(store.open_items().is_empty());
        std::fs::remove_file(path).ok();
    }
}

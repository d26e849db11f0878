//! Working-Memory Cache (§3 L1, §4.D): in-process, never persisted to the
//! vector index. Grounded on a simple TTL cache keyed by session, the same
//! shape active working memory takes in the original design: a small
//! bounded map with lazy expiry rather than a background sweeper.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

const DEFAULT_MAX_ITEMS: usize = 1000;
const DEFAULT_TTL: Duration = Duration::from_secs(3600);

struct Entry {
    value: serde_json::Value,
    expires_at: Instant,
}

/// Single process-wide cache. Keys are namespaced `"{session_id}:{key}"` so
/// one session's working memory never collides with another's.
pub struct WorkingMemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
    max_items: usize,
    default_ttl: Duration,
}

impl Default for WorkingMemoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ITEMS, DEFAULT_TTL)
    }
}

impl WorkingMemoryCache {
    pub fn new(max_items: usize, default_ttl: Duration) -> Self {
        Self { entries: RwLock::new(HashMap::new()), max_items, default_ttl }
    }

    fn namespaced(session_id: &str, key: &str) -> String {
        format!("{session_id}:{key}")
    }

    pub fn set(&self, session_id: &str, key: &str, value: serde_json::Value, ttl: Option<Duration>) {
        let mut entries = self.entries.write().unwrap();
        let now = Instant::now();
        entries.retain(|_, e| e.expires_at > now);

        if entries.len() >= self.max_items && !entries.contains_key(&Self::namespaced(session_id, key)) {
            if let Some(oldest_key) = entries.iter().min_by_key(|(_, e)| e.expires_at).map(|(k, _)| k.clone()) {
                entries.remove(&oldest_key);
            }
        }

        let expires_at = now + ttl.unwrap_or(self.default_ttl);
        entries.insert(Self::namespaced(session_id, key), Entry { value, expires_at });
    }

    pub fn get(&self, session_id: &str, key: &str) -> Option<serde_json::Value> {
        let entries = self.entries.read().unwrap();
        let entry = entries.get(&Self::namespaced(session_id, key))?;
        if entry.expires_at <= Instant::now() {
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn delete(&self, session_id: &str, key: &str) {
        self.entries.write().unwrap().remove(&Self::namespaced(session_id, key));
    }

    pub fn clear_session(&self, session_id: &str) {
        let prefix = format!("{session_id}:");
        self.entries.write().unwrap().retain(|k, _| !k.starts_with(&prefix));
    }

    pub fn list_keys(&self, session_id: &str) -> Vec<String> {
        let prefix = format!("{session_id}:");
        let now = Instant::now();
        self.entries
            .read()
            .unwrap()
            .iter()
            .filter(|(k, e)| k.starts_with(&prefix) && e.expires_at > now)
            .map(|(k, _)| k[prefix.len()..].to_string())
            .collect()
    }

    pub fn get_all(&self, session_id: &str) -> HashMap<String, serde_json::Value> {
        let prefix = format!("{session_id}:");
        let now = Instant::now();
        self.entries
            .read()
            .unwrap()
            .iter()
            .filter(|(k, e)| k.starts_with(&prefix) && e.expires_at > now)
            .map(|(k, e)| (k[prefix.len()..].to_string(), e.value.clone()))
            .collect()
    }

    pub fn reset(&self) {
        self.entries.write().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_then_get_round_trips() {
        let cache = WorkingMemoryCache::default();
        cache.set("s1", "topic", json!("hiking"), None);
        assert_eq!(cache.get("s1", "topic"), Some(json!("hiking")));
    }

    #[test]
    fn expired_entries_are_invisible() {
        let cache = WorkingMemoryCache::new(100, Duration::from_millis(1));
        cache.set("s1", "topic", json!("hiking"), None);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get("s1", "topic"), None);
    }

    #[test]
    fn sessions_do_not_collide() {
        let cache = WorkingMemoryCache::default();
        cache.set("s1", "topic", json!("a"), None);
        cache.set("s2", "topic", json!("b"), None);
        assert_eq!(cache.get("s1", "topic"), Some(json!("a")));
        assert_eq!(cache.get("s2", "topic"), Some(json!("b")));
    }

    #[test]
    fn clear_session_only_touches_that_session() {
        let cache = WorkingMemoryCache::default();
        cache.set("s1", "a", json!(1), None);
        cache.set("s2", "a", json!(2), None);
        cache.clear_session("s1");
        assert_eq!(cache.get("s1", "a"), None);
        assert_eq!(cache.get("s2", "a"), Some(json!(2)));
    }

    #[test]
    fn eviction_drops_earliest_expiry_when_full() {
        let cache = WorkingMemoryCache::new(2, Duration::from_secs(3600));
        cache.set("s1", "a", json!(1), Some(Duration::from_secs(1)));
        cache.set("s1", "b", json!(2), Some(Duration::from_secs(3600)));
        cache.set("s1", "c", json!(3), Some(Duration::from_secs(3600)));
        assert_eq!(cache.get("s1", "a"), None);
        assert_eq!(cache.get("s1", "b"), Some(json!(2)));
        assert_eq!(cache.get("s1", "c"), Some(json!(3)));
    }
}

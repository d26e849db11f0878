//! `refine_memory`: condense a set of memories relevant to a query into a
//! single briefing string.
//!
//! There is no LLM provider wired into this server, so the only strategy is
//! the deterministic fallback: the most recent `keep` items are kept
//! verbatim, everything older is reduced to a one-line abbreviation.

use memoria_core::{MemoryItem, MemoryKernel, SearchMemoryRequest};
use serde::Deserialize;
use serde_json::Value;

const DEFAULT_KEEP: usize = 5;
const ABBREVIATION_LEN: usize = 120;

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "required": ["query"],
        "properties": {
            "query": { "type": "string" },
            "layer": { "type": "string" },
            "limit": { "type": "integer", "minimum": 1, "maximum": 100, "default": 20 },
            "keepRecent": {
                "type": "integer",
                "minimum": 0,
                "description": "How many of the most recent matches to keep verbatim (default: 5)"
            }
        }
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Args {
    query: String,
    #[serde(default)]
    layer: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    keep_recent: Option<usize>,
}

/// Keeps the `keep` most recently created items verbatim and abbreviates the
/// rest to their first [`ABBREVIATION_LEN`] characters.
pub fn summarize(query: &str, memories: &[MemoryItem], keep: usize) -> String {
    if memories.is_empty() {
        return format!("No memories matched \"{query}\".");
    }

    let mut ordered: Vec<&MemoryItem> = memories.iter().collect();
    ordered.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let mut lines = Vec::with_capacity(ordered.len());
    for (i, item) in ordered.iter().enumerate() {
        if i < keep {
            lines.push(format!("- {}", item.content));
        } else {
            let mut text: String = item.content.chars().take(ABBREVIATION_LEN).collect();
            if item.content.chars().count() > ABBREVIATION_LEN {
                text.push('\u{2026}');
            }
            lines.push(format!("- {text}"));
        }
    }

    format!("{} memories relevant to \"{query}\":\n{}", ordered.len(), lines.join("\n"))
}

pub async fn execute(kernel: &MemoryKernel, args: Option<Value>) -> Result<Value, String> {
    let args: Args = match args {
        Some(v) => serde_json::from_value(v).map_err(|e| format!("invalid arguments: {e}"))?,
        None => return Err("missing arguments".into()),
    };

    let req = SearchMemoryRequest {
        query: args.query.clone(),
        layer: args.layer,
        limit: args.limit.unwrap_or(20),
        ..Default::default()
    };

    let hits = kernel.search_memory(req).map_err(|e| e.to_string())?;
    let items: Vec<MemoryItem> = hits.into_iter().map(|h| h.item).collect();
    let keep = args.keep_recent.unwrap_or(DEFAULT_KEEP);
    let summary = summarize(&args.query, &items, keep);

    Ok(serde_json::json!({
        "tool": "refine_memory",
        "summary": summary,
        "sourceCount": items.len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use memoria_core::Layer;

    fn item(content: &str, age_minutes: i64) -> MemoryItem {
        let mut m = MemoryItem::new(content.to_string(), Layer::VerifiedFact);
        m.created_at = Utc::now() - Duration::minutes(age_minutes);
        m
    }

    #[test]
    fn empty_input_yields_no_match_message() {
        let summary = summarize("walks", &[], 5);
        assert!(summary.contains("No memories matched"));
    }

    #[test]
    fn recent_items_kept_verbatim_older_abbreviated() {
        let long_content = "a".repeat(200);
        let items = vec![item("recent walk in the park", 1), item(&long_content, 600)];
        let summary = summarize("walks", &items, 1);
        assert!(summary.contains("recent walk in the park"));
        assert!(summary.contains('\u{2026}'));
    }
}

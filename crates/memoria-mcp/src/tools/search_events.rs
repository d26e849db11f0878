//! `search_events`: semantic search scoped to the episodic log.

use memoria_core::{MemoryKernel, SearchMemoryRequest};
use serde::Deserialize;
use serde_json::Value;

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "required": ["query", "agentId"],
        "properties": {
            "query": { "type": "string" },
            "agentId": { "type": "string" },
            "category": { "type": "string" },
            "limit": { "type": "integer", "minimum": 1, "maximum": 100, "default": 10 },
            "minScore": { "type": "number", "minimum": 0.0, "maximum": 1.0 }
        }
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Args {
    query: String,
    agent_id: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    min_score: Option<f32>,
}

pub async fn execute(kernel: &MemoryKernel, args: Option<Value>) -> Result<Value, String> {
    let args: Args = match args {
        Some(v) => serde_json::from_value(v).map_err(|e| format!("invalid arguments: {e}"))?,
        None => return Err("missing arguments".into()),
    };

    let req = SearchMemoryRequest {
        query: args.query,
        agent_id: Some(args.agent_id),
        category: args.category,
        limit: args.limit.unwrap_or(10),
        min_score: args.min_score.unwrap_or(0.0),
        ..Default::default()
    };

    let hits = kernel.search_events(req).map_err(|e| e.to_string())?;

    Ok(serde_json::json!({
        "tool": "search_events",
        "count": hits.len(),
        "results": hits.iter().map(|h| serde_json::json!({
            "item": h.item,
            "score": h.score,
        })).collect::<Vec<_>>(),
    }))
}

//! `search_memory`: semantic search across the active layers.

use memoria_core::{MemoryKernel, SearchMemoryRequest};
use serde::Deserialize;
use serde_json::Value;

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "required": ["query"],
        "properties": {
            "query": {
                "type": "string",
                "description": "Natural-language search text"
            },
            "layer": {
                "type": "string",
                "description": "Restrict to one layer (identity_schema, active_context, event_log, verified_fact, operational_knowledge)"
            },
            "agentId": {
                "type": "string",
                "description": "Restrict event_log results to this agent"
            },
            "category": {
                "type": "string"
            },
            "limit": {
                "type": "integer",
                "minimum": 1,
                "maximum": 100,
                "default": 10
            },
            "minScore": {
                "type": "number",
                "minimum": 0.0,
                "maximum": 1.0
            },
            "includeConstitution": {
                "type": "boolean",
                "default": false
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
    agent_id: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    min_score: Option<f32>,
    #[serde(default)]
    include_constitution: bool,
}

pub async fn execute(kernel: &MemoryKernel, args: Option<Value>) -> Result<Value, String> {
    let args: Args = match args {
        Some(v) => serde_json::from_value(v).map_err(|e| format!("invalid arguments: {e}"))?,
        None => return Err("missing arguments".into()),
    };

    let req = SearchMemoryRequest {
        query: args.query,
        layer: args.layer,
        agent_id: args.agent_id,
        category: args.category,
        limit: args.limit.unwrap_or(10),
        min_score: args.min_score.unwrap_or(0.0),
        include_constitution: args.include_constitution,
    };

    let hits = kernel.search_memory(req).map_err(|e| e.to_string())?;

    Ok(serde_json::json!({
        "tool": "search_memory",
        "count": hits.len(),
        "results": hits.iter().map(|h| serde_json::json!({
            "item": h.item,
            "score": h.score,
        })).collect::<Vec<_>>(),
    }))
}

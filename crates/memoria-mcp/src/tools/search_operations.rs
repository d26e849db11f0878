//! `search_operations`: keyword lookup over procedural knowledge (L4).
//! Deliberately not a semantic search — operational knowledge is looked up
//! by the trigger words an agent already has in hand, not by paraphrase.

use memoria_core::{Layer, MemoryKernel, QueryFilter};
use serde::Deserialize;
use serde_json::Value;

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "required": ["keyword"],
        "properties": {
            "keyword": {
                "type": "string",
                "description": "Substring to match against operational knowledge content, case-insensitive"
            },
            "limit": { "type": "integer", "minimum": 1, "maximum": 200, "default": 20 }
        }
    })
}

#[derive(Debug, Deserialize)]
struct Args {
    keyword: String,
    #[serde(default)]
    limit: Option<usize>,
}

pub async fn execute(kernel: &MemoryKernel, args: Option<Value>) -> Result<Value, String> {
    let args: Args = match args {
        Some(v) => serde_json::from_value(v).map_err(|e| format!("invalid arguments: {e}"))?,
        None => return Err("missing arguments".into()),
    };

    let limit = args.limit.unwrap_or(20);
    let needle = args.keyword.to_lowercase();

    let filter = QueryFilter { layer: Some(Layer::OperationalKnowledge), only_active: true, ..QueryFilter::new() };
    let mut matched = Vec::new();
    let mut offset = None;

    loop {
        let (batch, next_offset) =
            kernel.vector_index().scroll(&filter, 200, offset).map_err(|e| e.to_string())?;
        if batch.is_empty() {
            break;
        }
        for item in batch {
            if item.content.to_lowercase().contains(&needle) {
                matched.push(item);
                if matched.len() >= limit {
                    break;
                }
            }
        }
        if matched.len() >= limit || next_offset.is_none() {
            break;
        }
        offset = next_offset;
    }

    Ok(serde_json::json!({
        "tool": "search_operations",
        "count": matched.len(),
        "results": matched,
    }))
}

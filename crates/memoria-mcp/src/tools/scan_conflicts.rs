//! `scan_conflicts`: the §4.H pairwise conflict scan over a whole layer (or
//! the whole project), for maintenance use outside the per-write conflict
//! report `add_memory` already returns.

use memoria_core::{Layer, MemoryKernel};
use serde::Deserialize;
use serde_json::Value;

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "layer": {
                "type": "string",
                "description": "Restrict the scan to one layer; omit to scan the whole project"
            },
            "limit": { "type": "integer", "minimum": 1, "maximum": 1000, "default": 200 }
        }
    })
}

#[derive(Debug, Deserialize)]
struct Args {
    #[serde(default)]
    layer: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

pub async fn execute(kernel: &MemoryKernel, args: Option<Value>) -> Result<Value, String> {
    let args: Args = match args {
        Some(v) => serde_json::from_value(v).map_err(|e| format!("invalid arguments: {e}"))?,
        None => Args { layer: None, limit: None },
    };

    let layer = match args.layer.as_deref() {
        Some(raw) => Some(Layer::normalize(raw).ok_or_else(|| format!("unknown layer: {raw}"))?),
        None => None,
    };

    let conflicts = kernel.scan_conflicts(layer, args.limit.unwrap_or(200)).map_err(|e| e.to_string())?;

    Ok(serde_json::json!({
        "tool": "scan_conflicts",
        "count": conflicts.len(),
        "conflicts": conflicts,
    }))
}

//! `get_constitution`: the write-protected L0 identity set, read-only here.

use memoria_core::MemoryKernel;
use serde_json::Value;

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {}
    })
}

pub async fn execute(kernel: &MemoryKernel, _args: Option<Value>) -> Result<Value, String> {
    let items = kernel.get_constitution().map_err(|e| e.to_string())?;

    Ok(serde_json::json!({
        "tool": "get_constitution",
        "count": items.len(),
        "items": items,
    }))
}

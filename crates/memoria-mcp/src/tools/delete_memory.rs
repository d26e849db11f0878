//! `delete_memory`: hard delete behind a confirmation phrase, so an agent
//! can't trigger it by accident while exploring tool arguments.

use memoria_core::MemoryKernel;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "required": ["id", "confirm"],
        "properties": {
            "id": { "type": "string", "description": "Memory id to delete" },
            "confirm": {
                "type": "string",
                "description": "Must contain a confirmation phrase, e.g. \"confirm delete\" or \"i confirm\""
            }
        }
    })
}

#[derive(Debug, Deserialize)]
struct Args {
    id: Uuid,
    confirm: String,
}

pub async fn execute(kernel: &MemoryKernel, args: Option<Value>) -> Result<Value, String> {
    let args: Args = match args {
        Some(v) => serde_json::from_value(v).map_err(|e| format!("invalid arguments: {e}"))?,
        None => return Err("missing arguments".into()),
    };

    kernel.delete_memory(args.id, &args.confirm).map_err(|e| e.to_string())?;

    Ok(serde_json::json!({
        "tool": "delete_memory",
        "status": "deleted",
        "id": args.id,
    }))
}

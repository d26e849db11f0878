//! `promote_to_fact`: lift a verified event into durable, full-confidence
//! knowledge (L3).

use memoria_core::MemoryKernel;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "required": ["eventId"],
        "properties": {
            "eventId": { "type": "string" }
        }
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Args {
    event_id: Uuid,
}

pub async fn execute(kernel: &MemoryKernel, args: Option<Value>) -> Result<Value, String> {
    let args: Args = match args {
        Some(v) => serde_json::from_value(v).map_err(|e| format!("invalid arguments: {e}"))?,
        None => return Err("missing arguments".into()),
    };

    let fact = kernel.promote_event_to_fact(args.event_id).map_err(|e| e.to_string())?;

    Ok(serde_json::json!({
        "tool": "promote_to_fact",
        "fact": fact,
    }))
}

//! `log_event`: append to the agent-scoped episodic log (L2).

use chrono::{DateTime, Utc};
use memoria_core::{AddMemoryOutcome, AddMemoryRequest, MemoryKernel};
use serde::Deserialize;
use serde_json::Value;

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "required": ["content", "agentId"],
        "properties": {
            "content": { "type": "string" },
            "agentId": { "type": "string" },
            "category": { "type": "string" },
            "sessionId": { "type": "string" },
            "eventWhen": { "type": "string", "description": "RFC 3339 timestamp" },
            "eventWhere": { "type": "string" },
            "eventWho": { "type": "array", "items": { "type": "string" } },
            "relatedFiles": { "type": "array", "items": { "type": "string" } }
        }
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Args {
    content: String,
    agent_id: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    event_when: Option<DateTime<Utc>>,
    #[serde(default)]
    event_where: Option<String>,
    #[serde(default)]
    event_who: Vec<String>,
    #[serde(default)]
    related_files: Vec<String>,
}

pub async fn execute(kernel: &MemoryKernel, args: Option<Value>) -> Result<Value, String> {
    let args: Args = match args {
        Some(v) => serde_json::from_value(v).map_err(|e| format!("invalid arguments: {e}"))?,
        None => return Err("missing arguments".into()),
    };

    let req = AddMemoryRequest {
        content: args.content,
        agent_id: Some(args.agent_id),
        category: args.category,
        session_id: args.session_id,
        event_when: args.event_when,
        event_where: args.event_where,
        event_who: args.event_who,
        related_files: args.related_files,
        ..Default::default()
    };

    let outcome = kernel.log_event(req).map_err(|e| e.to_string())?;

    Ok(match outcome {
        AddMemoryOutcome::Saved { item, conflicts } => serde_json::json!({
            "tool": "log_event",
            "status": "saved",
            "item": item,
            "conflicts": conflicts,
        }),
        AddMemoryOutcome::Pending { id, confidence } => serde_json::json!({
            "tool": "log_event",
            "status": "pending",
            "pendingId": id,
            "confidence": confidence,
        }),
        AddMemoryOutcome::RejectedLowConfidence => serde_json::json!({
            "tool": "log_event",
            "status": "rejected",
            "reason": "confidence below the auto-reject threshold",
        }),
        AddMemoryOutcome::RejectedUnsafe { reason, pii_detected } => serde_json::json!({
            "tool": "log_event",
            "status": "rejected",
            "reason": reason,
            "piiDetected": pii_detected,
        }),
    })
}

//! `add_memory`: write into any layer except `active_context`, subject to
//! the safety filter and the source-confidence gate.

use chrono::{DateTime, Utc};
use memoria_core::{AddMemoryOutcome, AddMemoryRequest, MemoryKernel};
use serde::Deserialize;
use serde_json::Value;

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "required": ["content", "layer"],
        "properties": {
            "content": { "type": "string" },
            "layer": {
                "type": "string",
                "description": "identity_schema, event_log, verified_fact, or operational_knowledge"
            },
            "category": { "type": "string" },
            "source": {
                "type": "string",
                "description": "caregiver, user, ai_extraction, external_ai, or promoted_from_event"
            },
            "agentId": { "type": "string" },
            "createdBy": { "type": "string" },
            "sessionId": { "type": "string" },
            "confidence": { "type": "number", "minimum": 0.0, "maximum": 1.0 },
            "priority": { "type": "integer", "minimum": 0 },
            "eventWhen": { "type": "string", "description": "RFC 3339 timestamp" },
            "eventWhere": { "type": "string" },
            "eventWho": { "type": "array", "items": { "type": "string" } },
            "ttlDays": { "type": "integer" },
            "relatedFiles": { "type": "array", "items": { "type": "string" } },
            "requiresApproval": { "type": "boolean", "default": false }
        }
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Args {
    content: String,
    layer: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    agent_id: Option<String>,
    #[serde(default)]
    created_by: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    priority: Option<u32>,
    #[serde(default)]
    event_when: Option<DateTime<Utc>>,
    #[serde(default)]
    event_where: Option<String>,
    #[serde(default)]
    event_who: Vec<String>,
    #[serde(default)]
    ttl_days: Option<i64>,
    #[serde(default)]
    related_files: Vec<String>,
    #[serde(default)]
    requires_approval: bool,
}

pub async fn execute(kernel: &MemoryKernel, args: Option<Value>) -> Result<Value, String> {
    let args: Args = match args {
        Some(v) => serde_json::from_value(v).map_err(|e| format!("invalid arguments: {e}"))?,
        None => return Err("missing arguments".into()),
    };

    let req = AddMemoryRequest {
        content: args.content,
        layer: args.layer,
        category: args.category,
        source: args.source,
        agent_id: args.agent_id,
        created_by: args.created_by,
        session_id: args.session_id,
        confidence: args.confidence,
        priority: args.priority,
        event_when: args.event_when,
        event_where: args.event_where,
        event_who: args.event_who,
        ttl_days: args.ttl_days,
        related_files: args.related_files,
        requires_approval: args.requires_approval,
    };

    let outcome = kernel.add_memory(req).map_err(|e| e.to_string())?;

    Ok(match outcome {
        AddMemoryOutcome::Saved { item, conflicts } => serde_json::json!({
            "tool": "add_memory",
            "status": "saved",
            "item": item,
            "conflicts": conflicts,
        }),
        AddMemoryOutcome::Pending { id, confidence } => serde_json::json!({
            "tool": "add_memory",
            "status": "pending",
            "pendingId": id,
            "confidence": confidence,
        }),
        AddMemoryOutcome::RejectedLowConfidence => serde_json::json!({
            "tool": "add_memory",
            "status": "rejected",
            "reason": "confidence below the auto-reject threshold",
        }),
        AddMemoryOutcome::RejectedUnsafe { reason, pii_detected } => serde_json::json!({
            "tool": "add_memory",
            "status": "rejected",
            "reason": reason,
            "piiDetected": pii_detected,
        }),
    })
}

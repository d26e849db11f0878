//! `propose_constitution_change`: the only write path onto L0. Proposals
//! accumulate approvals and apply automatically once the threshold is met.

use memoria_core::storage::identity::ChangeType;
use memoria_core::{ApprovalWorkflow, IdentityChangeStore, MemoryKernel};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "required": ["changeType", "proposedContent"],
        "properties": {
            "changeType": {
                "type": "string",
                "description": "create, update, or delete"
            },
            "proposedContent": { "type": "string" },
            "reason": { "type": "string" },
            "targetId": {
                "type": "string",
                "description": "Required for update and delete"
            },
            "category": { "type": "string" },
            "proposer": { "type": "string" }
        }
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Args {
    change_type: String,
    proposed_content: String,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    target_id: Option<Uuid>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    proposer: Option<String>,
}

fn parse_change_type(raw: &str) -> Result<ChangeType, String> {
    match raw.trim().to_lowercase().as_str() {
        "create" => Ok(ChangeType::Create),
        "update" => Ok(ChangeType::Update),
        "delete" => Ok(ChangeType::Delete),
        other => Err(format!("unknown changeType \"{other}\", expected create, update, or delete")),
    }
}

pub async fn execute(kernel: &MemoryKernel, identity_store: &IdentityChangeStore, args: Option<Value>) -> Result<Value, String> {
    let args: Args = match args {
        Some(v) => serde_json::from_value(v).map_err(|e| format!("invalid arguments: {e}"))?,
        None => return Err("missing arguments".into()),
    };

    let change_type = parse_change_type(&args.change_type)?;
    let workflow = ApprovalWorkflow::new(identity_store, kernel);
    let id = workflow
        .propose(change_type, args.proposed_content, args.reason, args.target_id, args.category, args.proposer)
        .map_err(|e| e.to_string())?;

    Ok(serde_json::json!({
        "tool": "propose_constitution_change",
        "proposalId": id,
        "approvalsNeeded": workflow.get(id).map(|r| r.approvals_needed).unwrap_or_default(),
    }))
}

pub fn approve_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "required": ["proposalId", "approver"],
        "properties": {
            "proposalId": { "type": "string" },
            "approver": { "type": "string" },
            "comment": { "type": "string" }
        }
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApproveArgs {
    proposal_id: Uuid,
    approver: String,
    #[serde(default)]
    comment: Option<String>,
}

/// Casts one approval onto a pending proposal. The workflow applies the
/// change itself once the approvals threshold is met; this tool just
/// reports the resulting status.
pub async fn execute_approve(kernel: &MemoryKernel, identity_store: &IdentityChangeStore, args: Option<Value>) -> Result<Value, String> {
    let args: ApproveArgs = match args {
        Some(v) => serde_json::from_value(v).map_err(|e| format!("invalid arguments: {e}"))?,
        None => return Err("missing arguments".into()),
    };

    let workflow = ApprovalWorkflow::new(identity_store, kernel);
    let record = workflow.approve(args.proposal_id, args.approver, args.comment).map_err(|e| e.to_string())?;

    Ok(serde_json::json!({
        "tool": "approve_constitution_change",
        "proposalId": record.id,
        "status": record.status.as_str(),
        "approvalsCount": record.approvals_count,
        "approvalsNeeded": record.approvals_needed,
    }))
}

pub fn reject_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "required": ["proposalId"],
        "properties": {
            "proposalId": { "type": "string" }
        }
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RejectArgs {
    proposal_id: Uuid,
}

pub async fn execute_reject(kernel: &MemoryKernel, identity_store: &IdentityChangeStore, args: Option<Value>) -> Result<Value, String> {
    let args: RejectArgs = match args {
        Some(v) => serde_json::from_value(v).map_err(|e| format!("invalid arguments: {e}"))?,
        None => return Err("missing arguments".into()),
    };

    let workflow = ApprovalWorkflow::new(identity_store, kernel);
    workflow.reject(args.proposal_id).map_err(|e| e.to_string())?;

    Ok(serde_json::json!({ "tool": "reject_constitution_change", "proposalId": args.proposal_id, "status": "rejected" }))
}

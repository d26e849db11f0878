//! Versioned HTTP API
//!
//! A plain REST/JSON surface over the same tool functions the stdio
//! transport dispatches to, for callers that aren't speaking MCP. Every
//! mutating endpoint accepts an optional bearer/API-key header; when
//! `MEMORIA_API_KEY` is configured, a missing or mismatched key is
//! rejected with 401.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::Value;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::state::AppState;
use crate::tools;

const API_PREFIX: &str = "/v1";
const DEFAULT_ADDR: &str = "127.0.0.1:3900";

fn tool_response(result: Result<Value, String>) -> Response {
    match result {
        Ok(value) => (StatusCode::OK, Json(value)).into_response(),
        Err(message) => (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": message }))).into_response(),
    }
}

fn extract_key(headers: &HeaderMap) -> Option<String> {
    if let Some(auth) = headers.get(axum::http::header::AUTHORIZATION) {
        if let Ok(s) = auth.to_str() {
            if let Some(token) = s.strip_prefix("Bearer ") {
                return Some(token.to_string());
            }
        }
    }
    headers.get("x-api-key").and_then(|v| v.to_str().ok()).map(str::to_string)
}

async fn require_api_key(State(state): State<Arc<AppState>>, headers: HeaderMap, req: axum::extract::Request, next: Next) -> Response {
    if let Some(expected) = &state.api_key {
        let provided = extract_key(&headers);
        if provided.as_deref() != Some(expected.as_str()) {
            return (StatusCode::UNAUTHORIZED, Json(serde_json::json!({ "error": "missing or invalid API key" }))).into_response();
        }
    }
    next.run(req).await
}

async fn get_constitution(State(state): State<Arc<AppState>>) -> Response {
    tool_response(tools::get_constitution::execute(&state.kernel, None).await)
}

async fn search_memory(State(state): State<Arc<AppState>>, Json(body): Json<Value>) -> Response {
    tool_response(tools::search_memory::execute(&state.kernel, Some(body)).await)
}

async fn add_memory(State(state): State<Arc<AppState>>, Json(body): Json<Value>) -> Response {
    tool_response(tools::add_memory::execute(&state.kernel, Some(body)).await)
}

#[derive(serde::Deserialize)]
struct DeleteBody {
    confirm: String,
}

async fn delete_memory(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>, Json(body): Json<DeleteBody>) -> Response {
    let args = serde_json::json!({ "id": id, "confirm": body.confirm });
    tool_response(tools::delete_memory::execute(&state.kernel, Some(args)).await)
}

async fn propose_constitution_change(State(state): State<Arc<AppState>>, Json(body): Json<Value>) -> Response {
    tool_response(tools::propose_constitution_change::execute(&state.kernel, &state.identity_store, Some(body)).await)
}

#[derive(serde::Deserialize)]
struct ApproveBody {
    approver: String,
    #[serde(default)]
    comment: Option<String>,
}

async fn approve_constitution_change(
    State(state): State<Arc<AppState>>,
    Path(proposal_id): Path<Uuid>,
    Json(body): Json<ApproveBody>,
) -> Response {
    let args = serde_json::json!({ "proposalId": proposal_id, "approver": body.approver, "comment": body.comment });
    tool_response(tools::propose_constitution_change::execute_approve(&state.kernel, &state.identity_store, Some(args)).await)
}

async fn reject_constitution_change(State(state): State<Arc<AppState>>, Path(proposal_id): Path<Uuid>) -> Response {
    let args = serde_json::json!({ "proposalId": proposal_id });
    tool_response(tools::propose_constitution_change::execute_reject(&state.kernel, &state.identity_store, Some(args)).await)
}

#[derive(serde::Deserialize, Default)]
struct ScanConflictsQuery {
    #[serde(default)]
    layer: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

async fn scan_conflicts(State(state): State<Arc<AppState>>, Query(q): Query<ScanConflictsQuery>) -> Response {
    let args = serde_json::json!({ "layer": q.layer, "limit": q.limit });
    tool_response(tools::scan_conflicts::execute(&state.kernel, Some(args)).await)
}

async fn log_event(State(state): State<Arc<AppState>>, Json(body): Json<Value>) -> Response {
    tool_response(tools::log_event::execute(&state.kernel, Some(body)).await)
}

async fn search_events(State(state): State<Arc<AppState>>, Json(body): Json<Value>) -> Response {
    tool_response(tools::search_events::execute(&state.kernel, Some(body)).await)
}

#[derive(serde::Deserialize)]
struct PromoteBody {
    #[serde(default)]
    event_id: Option<Uuid>,
}

async fn promote_to_fact(State(state): State<Arc<AppState>>, Path(event_id): Path<Uuid>, body: Option<Json<PromoteBody>>) -> Response {
    let id = body.and_then(|b| b.event_id).unwrap_or(event_id);
    tool_response(tools::promote_to_fact::execute(&state.kernel, Some(serde_json::json!({ "eventId": id }))).await)
}

#[derive(serde::Deserialize)]
struct KeywordQuery {
    keyword: String,
    limit: Option<usize>,
}

async fn search_operations(State(state): State<Arc<AppState>>, Query(q): Query<KeywordQuery>) -> Response {
    let args = serde_json::json!({ "keyword": q.keyword, "limit": q.limit });
    tool_response(tools::search_operations::execute(&state.kernel, Some(args)).await)
}

async fn refine_memory(State(state): State<Arc<AppState>>, Json(body): Json<Value>) -> Response {
    tool_response(tools::refine_memory::execute(&state.kernel, Some(body)).await)
}

#[derive(serde::Deserialize, Default)]
struct BriefingQuery {
    #[serde(default)]
    include_done: Option<bool>,
}

async fn get_checklist_briefing(State(state): State<Arc<AppState>>, Query(q): Query<BriefingQuery>) -> Response {
    let args = serde_json::json!({ "includeDone": q.include_done.unwrap_or(false) });
    tool_response(tools::checklist::execute_briefing(&state.checklist, Some(args)).await)
}

async fn create_checklist_item(State(state): State<Arc<AppState>>, Json(body): Json<Value>) -> Response {
    tool_response(tools::checklist::execute_create_item(&state.checklist, Some(body)).await)
}

async fn sync_plan_to_checklist(State(state): State<Arc<AppState>>, Json(body): Json<Value>) -> Response {
    tool_response(tools::checklist::execute_sync_plan(&state.checklist, Some(body)).await)
}

async fn health() -> &'static str {
    "ok"
}

fn router(state: Arc<AppState>) -> Router {
    let mutating = Router::new()
        .route("/memories", post(add_memory))
        .route("/memories/{id}", delete(delete_memory))
        .route("/constitution/proposals", post(propose_constitution_change))
        .route("/constitution/proposals/{proposal_id}/approve", post(approve_constitution_change))
        .route("/constitution/proposals/{proposal_id}/reject", post(reject_constitution_change))
        .route("/events", post(log_event))
        .route("/events/{event_id}/promote", post(promote_to_fact))
        .route("/refine", post(refine_memory))
        .route("/checklist/items", post(create_checklist_item))
        .route("/checklist/sync", post(sync_plan_to_checklist))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    let read_only = Router::new()
        .route("/constitution", get(get_constitution))
        .route("/memories/search", post(search_memory))
        .route("/events/search", post(search_events))
        .route("/operations/search", get(search_operations))
        .route("/conflicts/scan", get(scan_conflicts))
        .route("/checklist", get(get_checklist_briefing));

    Router::new()
        .route("/healthz", get(health))
        .nest(API_PREFIX, mutating.merge(read_only))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(ConcurrencyLimitLayer::new(64))
        .with_state(state)
}

pub async fn serve(state: Arc<AppState>) -> std::io::Result<()> {
    let addr: SocketAddr = std::env::var("MEMORIA_HTTP_ADDR")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| DEFAULT_ADDR.parse().unwrap());

    info!("HTTP API listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_key_prefers_bearer_header() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "Bearer secret-token".parse().unwrap());
        assert_eq!(extract_key(&headers), Some("secret-token".to_string()));
    }

    #[test]
    fn extract_key_falls_back_to_api_key_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "secret-token".parse().unwrap());
        assert_eq!(extract_key(&headers), Some("secret-token".to_string()));
    }

    #[test]
    fn extract_key_absent_returns_none() {
        assert_eq!(extract_key(&HeaderMap::new()), None);
    }
}

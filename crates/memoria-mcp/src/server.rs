//! MCP Server
//!
//! Dispatches JSON-RPC requests to the tool registry. One [`McpServer`] is
//! constructed per transport connection and shares an [`AppState`] with
//! every other connection/handler in the process.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::protocol::messages::{
    CallToolRequest, CallToolResult, InitializeRequest, InitializeResult, ListToolsResult, ServerCapabilities,
    ServerInfo, ToolDescription, ToolResultContent,
};
use crate::protocol::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::state::AppState;
use crate::tools;

pub const SERVER_NAME: &str = "memoria";
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct McpServer {
    state: Arc<AppState>,
    initialized: bool,
}

impl McpServer {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state, initialized: false }
    }

    pub async fn handle_request(&mut self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        debug!(method = %request.method, "handling request");

        let is_notification = request.id.is_none();

        let result = match request.method.as_str() {
            "initialize" => self.handle_initialize(request.params),
            "notifications/initialized" => {
                self.initialized = true;
                return None;
            }
            "ping" => Ok(serde_json::json!({})),
            "tools/list" if !self.initialized => Err(JsonRpcError::server_not_initialized()),
            "tools/call" if !self.initialized => Err(JsonRpcError::server_not_initialized()),
            "tools/list" => self.handle_tools_list(),
            "tools/call" => self.handle_tools_call(request.params).await,
            other => {
                warn!(method = other, "unknown method");
                Err(JsonRpcError::method_not_found(other))
            }
        };

        if is_notification {
            return None;
        }

        Some(match result {
            Ok(value) => JsonRpcResponse::success(request.id, value),
            Err(err) => JsonRpcResponse::error(request.id, err),
        })
    }

    fn handle_initialize(&mut self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let req: InitializeRequest = match params {
            Some(v) => serde_json::from_value(v).unwrap_or_default(),
            None => InitializeRequest::default(),
        };

        let result = InitializeResult {
            protocol_version: req.protocol_version,
            server_info: ServerInfo { name: SERVER_NAME.to_string(), version: SERVER_VERSION.to_string() },
            capabilities: ServerCapabilities { tools: Some(Default::default()), resources: None, prompts: None },
            instructions: Some(
                "Layered memory for long-running agents: identity, active context, episodic events, \
                 verified facts, and operational knowledge. Start with search_memory before add_memory \
                 to avoid duplicates."
                    .to_string(),
            ),
        };

        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(&e.to_string()))
    }

    fn tool_descriptions() -> Vec<ToolDescription> {
        let specs: &[(&str, &str, fn() -> Value)] = &[
            ("search_memory", "Semantic search across memory layers.", tools::search_memory::schema),
            ("add_memory", "Write a memory into any layer except active_context.", tools::add_memory::schema),
            ("get_constitution", "Read the write-protected identity set.", tools::get_constitution::schema),
            ("delete_memory", "Hard delete a memory; requires a confirmation phrase.", tools::delete_memory::schema),
            (
                "propose_constitution_change",
                "Propose a create/update/delete change to identity; applies once the approvals threshold is met.",
                tools::propose_constitution_change::schema,
            ),
            (
                "approve_constitution_change",
                "Cast an approval on a pending identity change proposal.",
                tools::propose_constitution_change::approve_schema,
            ),
            (
                "reject_constitution_change",
                "Reject a pending identity change proposal.",
                tools::propose_constitution_change::reject_schema,
            ),
            ("log_event", "Append to the agent-scoped episodic log.", tools::log_event::schema),
            ("search_events", "Semantic search scoped to the episodic log.", tools::search_events::schema),
            ("promote_to_fact", "Promote a verified event into durable knowledge.", tools::promote_to_fact::schema),
            ("search_operations", "Keyword lookup over operational knowledge.", tools::search_operations::schema),
            ("scan_conflicts", "Pairwise conflict scan over a layer or the whole project.", tools::scan_conflicts::schema),
            ("refine_memory", "Condense memories relevant to a query into a briefing.", tools::refine_memory::schema),
            ("get_checklist_briefing", "Read the open items on the checklist.", tools::checklist::briefing_schema),
            ("sync_plan_to_checklist", "Mirror a list of plan steps onto the checklist.", tools::checklist::sync_plan_schema),
            ("create_checklist_item", "Add a single item to the checklist.", tools::checklist::create_item_schema),
        ];

        specs
            .iter()
            .map(|(name, description, schema)| ToolDescription {
                name: name.to_string(),
                description: Some(description.to_string()),
                input_schema: schema(),
            })
            .collect()
    }

    fn handle_tools_list(&self) -> Result<Value, JsonRpcError> {
        let result = ListToolsResult { tools: Self::tool_descriptions() };
        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(&e.to_string()))
    }

    async fn handle_tools_call(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let req: CallToolRequest = match params {
            Some(v) => serde_json::from_value(v).map_err(|e| JsonRpcError::invalid_params(&e.to_string()))?,
            None => return Err(JsonRpcError::invalid_params("missing params")),
        };

        let outcome = self.dispatch_tool(&req.name, req.arguments).await;

        let result = match outcome {
            Ok(value) => CallToolResult {
                content: vec![ToolResultContent { content_type: "text".to_string(), text: value.to_string() }],
                is_error: None,
            },
            Err(message) => CallToolResult {
                content: vec![ToolResultContent { content_type: "text".to_string(), text: message }],
                is_error: Some(true),
            },
        };

        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(&e.to_string()))
    }

    async fn dispatch_tool(&self, name: &str, arguments: Option<Value>) -> Result<Value, String> {
        let kernel = self.state.kernel.as_ref();

        match name {
            "search_memory" => tools::search_memory::execute(kernel, arguments).await,
            "add_memory" => tools::add_memory::execute(kernel, arguments).await,
            "get_constitution" => tools::get_constitution::execute(kernel, arguments).await,
            "delete_memory" => tools::delete_memory::execute(kernel, arguments).await,
            "propose_constitution_change" => {
                tools::propose_constitution_change::execute(kernel, self.state.identity_store.as_ref(), arguments).await
            }
            "approve_constitution_change" => {
                tools::propose_constitution_change::execute_approve(kernel, self.state.identity_store.as_ref(), arguments).await
            }
            "reject_constitution_change" => {
                tools::propose_constitution_change::execute_reject(kernel, self.state.identity_store.as_ref(), arguments).await
            }
            "log_event" => tools::log_event::execute(kernel, arguments).await,
            "search_events" => tools::search_events::execute(kernel, arguments).await,
            "promote_to_fact" => tools::promote_to_fact::execute(kernel, arguments).await,
            "search_operations" => tools::search_operations::execute(kernel, arguments).await,
            "scan_conflicts" => tools::scan_conflicts::execute(kernel, arguments).await,
            "refine_memory" => tools::refine_memory::execute(kernel, arguments).await,
            "get_checklist_briefing" => tools::checklist::execute_briefing(&self.state.checklist, arguments).await,
            "sync_plan_to_checklist" => tools::checklist::execute_sync_plan(&self.state.checklist, arguments).await,
            "create_checklist_item" => tools::checklist::execute_create_item(&self.state.checklist, arguments).await,
            other => Err(format!("unknown tool: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memoria_core::config::YamlIdentityConfig;
    use memoria_core::embeddings::EmbeddingProvider;
    use memoria_core::{
        BudgetConfig, ContextBudgetManager, EmbeddedVectorIndex, IdentityChangeStore, MemoryKernel, PendingQueueStore,
        SafetyConfig, SafetyFilter, VectorIndex,
    };

    struct StubEmbedder;

    impl EmbeddingProvider for StubEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>, memoria_core::embeddings::EmbeddingError> {
            let mut v = vec![0.0_f32; 8];
            for (i, b) in text.bytes().enumerate() {
                v[i % 8] += b as f32;
            }
            Ok(v)
        }

        fn dimensions(&self) -> usize {
            8
        }
    }

    fn test_state() -> Arc<AppState> {
        let dir = tempfile::tempdir().unwrap();
        let vector_index: Arc<dyn VectorIndex> = Arc::new(EmbeddedVectorIndex::open(&dir.path().join("vectors"), 8).unwrap());
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(StubEmbedder);
        let pending = Arc::new(PendingQueueStore::open(&dir.path().join("pending.db")).unwrap());
        let identity_store = Arc::new(IdentityChangeStore::open(&dir.path().join("identity.db")).unwrap());
        let identity_config: Arc<dyn memoria_core::IdentityConfigSource> =
            Arc::new(YamlIdentityConfig::new(dir.path().join("constitution.yaml")));
        let safety = SafetyFilter::new(SafetyConfig::default());
        let budget = ContextBudgetManager::new(BudgetConfig::default());
        let kernel = Arc::new(
            MemoryKernel::new("test-project", vector_index, embedder, pending, identity_config, safety, budget).unwrap(),
        );

        let state = AppState::new(kernel, identity_store, dir.path().join("checklist.json"), None).unwrap();
        std::mem::forget(dir);
        Arc::new(state)
    }

    async fn initialized_server() -> McpServer {
        let mut server = McpServer::new(test_state());
        let req = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: None,
            method: "notifications/initialized".to_string(),
            params: None,
        };
        server.handle_request(req).await;
        server
    }

    #[tokio::test]
    async fn initialize_marks_ready_and_returns_server_info() {
        let mut server = McpServer::new(test_state());
        let req = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(serde_json::json!(1)),
            method: "initialize".to_string(),
            params: None,
        };
        let resp = server.handle_request(req).await.unwrap();
        let result = resp.result.unwrap();
        assert_eq!(result["serverInfo"]["name"], SERVER_NAME);
    }

    #[tokio::test]
    async fn tools_list_returns_every_registered_tool() {
        let mut server = initialized_server().await;
        let req = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(serde_json::json!(1)),
            method: "tools/list".to_string(),
            params: None,
        };
        let resp = server.handle_request(req).await.unwrap();
        let tools = resp.result.unwrap()["tools"].as_array().unwrap().len();
        assert_eq!(tools, McpServer::tool_descriptions().len());
    }

    #[tokio::test]
    async fn tools_list_before_initialized_notification_is_rejected() {
        let mut server = McpServer::new(test_state());
        let req = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(serde_json::json!(1)),
            method: "tools/list".to_string(),
            params: None,
        };
        let resp = server.handle_request(req).await.unwrap();
        assert_eq!(resp.error.unwrap().code, -32002);
    }

    #[tokio::test]
    async fn unknown_method_returns_method_not_found() {
        let mut server = McpServer::new(test_state());
        let req = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(serde_json::json!(1)),
            method: "bogus".to_string(),
            params: None,
        };
        let resp = server.handle_request(req).await.unwrap();
        assert_eq!(resp.error.unwrap().code, -32601);
    }

    #[tokio::test]
    async fn notification_produces_no_response() {
        let mut server = McpServer::new(test_state());
        let req = JsonRpcRequest { jsonrpc: "2.0".to_string(), id: None, method: "notifications/initialized".to_string(), params: None };
        assert!(server.handle_request(req).await.is_none());
        assert!(server.initialized);
    }

    #[tokio::test]
    async fn add_memory_then_search_memory_round_trips() {
        let mut server = initialized_server().await;
        let add_req = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(serde_json::json!(1)),
            method: "tools/call".to_string(),
            params: Some(serde_json::json!({
                "name": "add_memory",
                "arguments": { "content": "patient enjoys morning walks", "layer": "verified_fact", "source": "caregiver" }
            })),
        };
        let add_resp = server.handle_request(add_req).await.unwrap();
        assert!(add_resp.error.is_none());

        let search_req = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(serde_json::json!(2)),
            method: "tools/call".to_string(),
            params: Some(serde_json::json!({
                "name": "search_memory",
                "arguments": { "query": "morning walks" }
            })),
        };
        let search_resp = server.handle_request(search_req).await.unwrap();
        let content = &search_resp.result.unwrap()["content"][0]["text"];
        assert!(content.as_str().unwrap().contains("\"count\""));
    }

    #[tokio::test]
    async fn checklist_create_then_briefing_lists_open_item() {
        let mut server = initialized_server().await;
        let create_req = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(serde_json::json!(1)),
            method: "tools/call".to_string(),
            params: Some(serde_json::json!({
                "name": "create_checklist_item",
                "arguments": { "title": "schedule follow-up call" }
            })),
        };
        let create_resp = server.handle_request(create_req).await.unwrap();
        assert!(create_resp.error.is_none());

        let briefing_req = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(serde_json::json!(2)),
            method: "tools/call".to_string(),
            params: Some(serde_json::json!({ "name": "get_checklist_briefing", "arguments": {} })),
        };
        let briefing_resp = server.handle_request(briefing_req).await.unwrap();
        let content = &briefing_resp.result.unwrap()["content"][0]["text"];
        assert!(content.as_str().unwrap().contains("schedule follow-up call"));
    }
}

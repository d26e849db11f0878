//! JSON-RPC 2.0 envelope shared by the stdio transport and, indirectly, the
//! HTTP surface's error bodies.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// MCP protocol version this server speaks in `initialize` responses.
pub const MCP_VERSION: &str = "2025-03-26";
pub const JSONRPC_VERSION: &str = "2.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: Option<Value>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// A request with no `id` is a notification: no response is ever sent,
    /// even if handling it fails.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self { jsonrpc: JSONRPC_VERSION.to_string(), id, result: Some(result), error: None }
    }

    pub fn error(id: Option<Value>, error: JsonRpcError) -> Self {
        Self { jsonrpc: JSONRPC_VERSION.to_string(), id, result: None, error: Some(error) }
    }
}

/// Standard JSON-RPC codes plus the small MCP-specific band
/// (-32000..-32099) this server actually raises.
#[derive(Debug, Clone, Copy)]
enum ErrorCode {
    ParseError = -32700,
    MethodNotFound = -32601,
    InvalidParams = -32602,
    InternalError = -32603,
    ServerNotInitialized = -32002,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    fn of(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code: code as i32, message: message.into(), data: None }
    }

    pub fn parse_error() -> Self {
        Self::of(ErrorCode::ParseError, "failed to parse request as JSON-RPC")
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::of(ErrorCode::MethodNotFound, format!("unknown method: {method}"))
    }

    pub fn invalid_params(detail: &str) -> Self {
        Self::of(ErrorCode::InvalidParams, detail.to_string())
    }

    pub fn internal_error(detail: &str) -> Self {
        Self::of(ErrorCode::InternalError, detail.to_string())
    }

    pub fn server_not_initialized() -> Self {
        Self::of(ErrorCode::ServerNotInitialized, "client must send initialize before other requests")
    }
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for JsonRpcError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_has_no_id() {
        let req = JsonRpcRequest { jsonrpc: JSONRPC_VERSION.to_string(), id: None, method: "notify".to_string(), params: None };
        assert!(req.is_notification());
    }

    #[test]
    fn request_with_id_is_not_a_notification() {
        let req = JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(Value::from(1)),
            method: "tools/list".to_string(),
            params: None,
        };
        assert!(!req.is_notification());
    }

    #[test]
    fn success_response_carries_no_error() {
        let resp = JsonRpcResponse::success(Some(Value::from(1)), serde_json::json!({"ok": true}));
        assert!(resp.result.is_some());
        assert!(resp.error.is_none());
    }

    #[test]
    fn error_response_carries_no_result() {
        let resp = JsonRpcResponse::error(Some(Value::from(1)), JsonRpcError::method_not_found("bogus"));
        assert!(resp.result.is_none());
        assert_eq!(resp.error.unwrap().code, -32601);
    }
}

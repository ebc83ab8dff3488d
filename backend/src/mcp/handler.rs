//! MCP JSON-RPC request handler.
//!
//! Each message goes through four stages: received (raw text), parsed
//! (envelope), dispatched (method handler) and responded (envelope out, or
//! nothing for notifications).

use super::tools::{ToolError, ToolRegistry};
use crate::query::QueryError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error};

/// MCP protocol version we support.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// JSON-RPC and application error codes.
pub mod codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    pub const UNKNOWN_TOOL: i32 = -32001;
    pub const INVALID_RANGE: i32 = -32002;
    pub const INVALID_PARAMETER: i32 = -32003;
    pub const TIMEOUT: i32 = -32004;
}

/// JSON-RPC 2.0 Request.
#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    /// Absent for notifications. An explicit `null` is kept as an id.
    #[serde(default, deserialize_with = "present")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

/// Distinguish `"id": null` from a missing id.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

/// JSON-RPC 2.0 Response.
#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Create a success response.
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response. `kind` is reported in `error.data.kind`.
    pub fn error(id: Value, code: i32, kind: &str, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: Some(json!({ "kind": kind })),
            }),
        }
    }
}

/// JSON-RPC 2.0 Error.
#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Tool call parameters from MCP.
#[derive(Debug, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

/// Error code, kind and client-facing message for a tool failure.
fn tool_error_response(err: &ToolError) -> (i32, &'static str, String) {
    match err {
        ToolError::UnknownTool(_) => (codes::UNKNOWN_TOOL, "unknown_tool", err.to_string()),
        ToolError::InvalidArguments(_) => {
            (codes::INVALID_PARAMS, "invalid_arguments", err.to_string())
        }
        ToolError::Query(q) => {
            let code = match q {
                QueryError::InvalidRange(_) => codes::INVALID_RANGE,
                QueryError::InvalidParameter(_) => codes::INVALID_PARAMETER,
                QueryError::Timeout(_) => codes::TIMEOUT,
            };
            (code, q.kind(), q.to_string())
        }
        ToolError::Internal(detail) => {
            error!("MCP: Internal error: {}", detail);
            (
                codes::INTERNAL_ERROR,
                "internal_error",
                "Internal error".to_string(),
            )
        }
    }
}

/// Server identity reported by `initialize` and the streaming `init` event.
pub fn server_info() -> Value {
    json!({
        "name": "hindsight",
        "version": env!("CARGO_PKG_VERSION")
    })
}

pub fn capabilities() -> Value {
    json!({
        "tools": {}
    })
}

/// MCP request handler.
pub struct McpHandler;

impl McpHandler {
    /// Handle one raw JSON-RPC message.
    ///
    /// Malformed JSON, including bodies that are not UTF-8, and malformed
    /// envelopes are answered with a parse error. Returns `None` for
    /// notifications.
    pub async fn handle_message(registry: &ToolRegistry, body: &[u8]) -> Option<JsonRpcResponse> {
        debug!("MCP: Received {} bytes", body.len());

        let value: Value = match serde_json::from_slice(body) {
            Ok(value) => value,
            Err(e) => {
                debug!("MCP: Malformed JSON: {}", e);
                return Some(JsonRpcResponse::error(
                    Value::Null,
                    codes::PARSE_ERROR,
                    "parse_error",
                    format!("Parse error: {}", e),
                ));
            }
        };

        if value.is_array() {
            return Some(JsonRpcResponse::error(
                Value::Null,
                codes::PARSE_ERROR,
                "parse_error",
                "Batch requests are not supported",
            ));
        }

        // Keep whatever id we can find so the error still correlates
        let salvaged_id = value.get("id").cloned().unwrap_or(Value::Null);
        let request: JsonRpcRequest = match serde_json::from_value(value) {
            Ok(request) => request,
            Err(e) => {
                debug!("MCP: Malformed envelope: {}", e);
                return Some(JsonRpcResponse::error(
                    salvaged_id,
                    codes::PARSE_ERROR,
                    "parse_error",
                    format!("Invalid request envelope: {}", e),
                ));
            }
        };

        Self::handle_request(registry, request).await
    }

    /// Handle a parsed MCP JSON-RPC request.
    pub async fn handle_request(
        registry: &ToolRegistry,
        request: JsonRpcRequest,
    ) -> Option<JsonRpcResponse> {
        let is_notification = request.id.is_none();
        let id = request.id.unwrap_or(Value::Null);
        debug!("MCP: Handling method: {}", request.method);

        let response = match request.method.as_str() {
            "initialize" => Some(Self::handle_initialize(id)),
            "initialized" | "notifications/initialized" | "notifications/cancelled" => {
                // Notifications, no response needed
                None
            }
            "ping" => Some(JsonRpcResponse::success(id, json!({}))),
            "tools/list" => Some(JsonRpcResponse::success(
                id,
                json!({ "tools": registry.list() }),
            )),
            "tools/call" => Some(Self::handle_call_tool(registry, id, request.params).await),
            _ => Some(JsonRpcResponse::error(
                id,
                codes::METHOD_NOT_FOUND,
                "unknown_method",
                format!("Method not found: {}", request.method),
            )),
        };

        if is_notification {
            debug!("MCP: {} was a notification, not responding", request.method);
            return None;
        }
        response
    }

    /// Handle the initialize request.
    fn handle_initialize(id: Value) -> JsonRpcResponse {
        JsonRpcResponse::success(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": capabilities(),
                "serverInfo": server_info()
            }),
        )
    }

    /// Handle a tools/call request.
    async fn handle_call_tool(
        registry: &ToolRegistry,
        id: Value,
        params: Option<Value>,
    ) -> JsonRpcResponse {
        let params: ToolCallParams = match serde_json::from_value(params.unwrap_or(Value::Null)) {
            Ok(params) => params,
            Err(e) => {
                return JsonRpcResponse::error(
                    id,
                    codes::INVALID_PARAMS,
                    "invalid_arguments",
                    format!("Invalid tools/call params: {}", e),
                )
            }
        };

        match registry
            .invoke(&params.name, params.arguments.unwrap_or(Value::Null))
            .await
        {
            Ok(result) => match serde_json::to_string_pretty(&result) {
                // Wrap result in MCP content format
                Ok(text) => JsonRpcResponse::success(
                    id,
                    json!({
                        "content": [{
                            "type": "text",
                            "text": text
                        }],
                        "structuredContent": result,
                        "isError": false
                    }),
                ),
                Err(e) => {
                    let (code, kind, message) =
                        tool_error_response(&ToolError::Internal(e.to_string()));
                    JsonRpcResponse::error(id, code, kind, message)
                }
            },
            Err(e) => {
                debug!("MCP: Tool {} failed: {}", params.name, e);
                let (code, kind, message) = tool_error_response(&e);
                JsonRpcResponse::error(id, code, kind, message)
            }
        }
    }
}

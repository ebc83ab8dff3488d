//! OpenAPI documentation configuration.

use crate::mcp::handler::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use hindsight_types::{DatabaseDetail, DatabaseMode, EffectiveConfig, HealthReport, ToolDescriptor};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::api::health::get_health,
        crate::api::mcp::mcp_post,
        crate::api::mcp::mcp_get,
        crate::api::mcp::mcp_delete,
        crate::api::sse::events_stream,
    ),
    components(
        schemas(
            JsonRpcRequest,
            JsonRpcResponse,
            JsonRpcError,
            HealthReport,
            DatabaseMode,
            DatabaseDetail,
            EffectiveConfig,
            ToolDescriptor,
        )
    ),
    tags(
        (name = "MCP", description = "JSON-RPC tool calls and streaming sessions"),
        (name = "System", description = "Server health")
    ),
    info(
        title = "Hindsight Recorder History API",
        description = "Read-only MCP server for Home Assistant recorder history and statistics",
        license(
            name = "MIT OR Apache-2.0"
        )
    )
)]
pub struct ApiDoc;

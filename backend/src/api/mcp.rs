//! MCP HTTP endpoint handlers.
//!
//! ## Endpoints
//!
//! - `POST /mcp` - Send a JSON-RPC request (`POST /mcp/call` is an alias)
//! - `GET /mcp` - Open a streaming session
//! - `DELETE /mcp` - Terminate a streaming session

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{debug, info};

use super::MCP_SESSION_ID_HEADER;
use crate::mcp::{JsonRpcRequest, JsonRpcResponse, McpHandler};
use crate::state::AppState;

/// Extract session ID from headers.
fn get_session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(MCP_SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Handle a JSON-RPC request.
///
/// The raw body is parsed by the dispatcher so malformed JSON, or a body that
/// is not UTF-8, is answered with a JSON-RPC parse error rather than an HTTP
/// rejection. Notifications get
/// `202 Accepted` with no body.
#[utoipa::path(
    post,
    path = "/mcp",
    tag = "MCP",
    request_body = JsonRpcRequest,
    responses(
        (status = 200, description = "JSON-RPC response", body = JsonRpcResponse),
        (status = 202, description = "Notification accepted")
    )
)]
pub async fn mcp_post(State(state): State<AppState>, body: Bytes) -> Response {
    match McpHandler::handle_message(state.registry(), &body).await {
        Some(response) => {
            debug!("MCP: Responding (error: {})", response.error.is_some());
            (StatusCode::OK, Json(response)).into_response()
        }
        // Notification - no response needed
        None => StatusCode::ACCEPTED.into_response(),
    }
}

/// Open a streaming session over MCP.
///
/// Same stream as `GET /sse`.
#[utoipa::path(
    get,
    path = "/mcp",
    tag = "MCP",
    responses(
        (status = 200, description = "Event stream of init, catalog and ping events")
    )
)]
pub async fn mcp_get(state: State<AppState>) -> Response {
    super::sse::events_stream(state).await
}

/// Terminate a streaming session.
///
/// Terminates the session identified by the `mcp-session-id` header.
#[utoipa::path(
    delete,
    path = "/mcp",
    tag = "MCP",
    params(
        ("mcp-session-id" = String, Header, description = "Session to terminate")
    ),
    responses(
        (status = 204, description = "Session terminated"),
        (status = 400, description = "Missing mcp-session-id header"),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn mcp_delete(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(session_id) = get_session_id(&headers) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "mcp-session-id header required"})),
        )
            .into_response();
    };

    if state.sessions().terminate(&session_id).await {
        info!("MCP: Session terminated: {}", session_id);
        StatusCode::NO_CONTENT.into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

//! HTTP handlers.

pub mod health;
pub mod mcp;
pub mod sse;

/// Header carrying the streaming session id.
pub const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";

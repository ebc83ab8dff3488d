//! MCP (Model Context Protocol) support.
//!
//! ## Endpoints
//!
//! - `POST /mcp` - Send JSON-RPC requests (`POST /mcp/call` is an alias)
//! - `GET /mcp`, `GET /sse` - Open a streaming session
//! - `DELETE /mcp` - Terminate a streaming session
//!
//! The same dispatcher also serves newline-delimited JSON-RPC on stdio.

pub mod handler;
pub mod session;
pub mod tools;

pub use handler::{JsonRpcRequest, JsonRpcResponse, McpHandler};
pub use session::{SessionManager, SessionState, SessionStream, DEFAULT_KEEPALIVE};
pub use tools::{Tool, ToolError, ToolRegistry};

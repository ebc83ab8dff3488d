//! Events pushed to streaming clients.

use crate::tools::ToolDescriptor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event types sent over a streaming session, in order: one `Init`, one
/// `Catalog`, then `Ping` until the session closes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamEvent {
    /// Capabilities and version, sent once on connect
    Init {
        session_id: String,
        #[serde(rename = "protocolVersion")]
        protocol_version: String,
        #[serde(rename = "serverInfo")]
        server_info: serde_json::Value,
        capabilities: serde_json::Value,
    },
    /// The full tool list, sent once after `Init`
    Catalog { tools: Vec<ToolDescriptor> },
    /// Keep-alive carrying the per-session sequence number
    Ping {
        timestamp: DateTime<Utc>,
        sequence: u64,
    },
}

impl StreamEvent {
    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Init { .. } => "init",
            StreamEvent::Catalog { .. } => "catalog",
            StreamEvent::Ping { .. } => "ping",
        }
    }

    /// Get a human-readable description of the event.
    pub fn description(&self) -> String {
        match self {
            StreamEvent::Init { session_id, .. } => format!("init for session {}", session_id),
            StreamEvent::Catalog { tools } => format!("catalog with {} tools", tools.len()),
            StreamEvent::Ping { sequence, .. } => format!("ping #{}", sequence),
        }
    }
}

//! Health reporting types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Whether tool results come from the recorder or from the mock generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum DatabaseMode {
    Connected,
    MockMode,
}

/// Outcome of a database probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct DatabaseDetail {
    pub connected: bool,
    /// Short human-readable status, never contains credentials
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
    /// Only probed when the timescale flag is enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timescaledb: Option<bool>,
}

impl DatabaseDetail {
    pub fn disconnected(detail: impl Into<String>) -> Self {
        Self {
            connected: false,
            detail: detail.into(),
            server_version: None,
            timescaledb: None,
        }
    }
}

/// Configuration as reported by `health_check`. The password is never part
/// of this struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct EffectiveConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub read_only: bool,
    pub timescaledb: bool,
    pub query_timeout: u64,
    pub max_query_days: u32,
    pub min_connections: u32,
    pub max_connections: u32,
}

/// Response of the `health_check` tool and the `/health` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct HealthReport {
    pub status: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub database: DatabaseMode,
    pub database_detail: DatabaseDetail,
    pub read_only: bool,
    pub timescaledb: bool,
    pub configuration: EffectiveConfig,
    pub tool_count: usize,
    /// Open streaming sessions, filled in by the HTTP layer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sessions: Option<usize>,
    pub mock_data: bool,
}

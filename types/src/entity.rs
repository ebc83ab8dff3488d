//! Entity listing types.

use crate::stats::StatisticMeta;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// The domain segment of an entity id (`sensor` for `sensor.temperature`).
pub fn domain_of(entity_id: &str) -> &str {
    entity_id
        .split_once('.')
        .map(|(domain, _)| domain)
        .unwrap_or(entity_id)
}

/// An entity recently seen by the recorder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct Entity {
    pub entity_id: String,
    pub last_seen: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
}

impl Entity {
    pub fn domain(&self) -> &str {
        domain_of(&self.entity_id)
    }
}

/// Result of the `list_entities` tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct EntityListResult {
    pub entities: Vec<Entity>,
    pub statistics: Vec<StatisticMeta>,
    pub entity_count: usize,
    pub statistic_count: usize,
    pub query_time: DateTime<Utc>,
    pub mock_data: bool,
}

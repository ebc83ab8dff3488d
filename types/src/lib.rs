//! Shared types for the Hindsight recorder history server.
//!
//! This crate contains the wire models returned by the MCP tools and pushed
//! over streaming sessions. Everything here is plain serde data; the query
//! logic lives in the backend.

/// Default port for the Hindsight HTTP server.
pub const DEFAULT_PORT: u16 = 8099;

pub mod entity;
pub mod events;
pub mod health;
pub mod history;
pub mod stats;
pub mod tools;

use std::fmt;

// Re-export commonly used types
pub use entity::{domain_of, Entity, EntityListResult};
pub use events::StreamEvent;
pub use health::{DatabaseDetail, DatabaseMode, EffectiveConfig, HealthReport};
pub use history::{Aggregation, HistoryPoint, HistoryResult, Interval, PointValue};
pub use stats::{Period, StatisticField, StatisticMeta, StatisticRecord, StatisticsResult};
pub use tools::ToolDescriptor;

/// A tag string (interval, aggregation, period, field) that is not one of
/// the recognised values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownTag {
    /// What kind of tag was being parsed, e.g. `"interval"`.
    pub kind: &'static str,
    /// The rejected input.
    pub value: String,
}

impl UnknownTag {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

impl fmt::Display for UnknownTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} '{}'", self.kind, self.value)
    }
}

impl std::error::Error for UnknownTag {}

//! History and statistics queries.

pub mod aggregate;
pub mod engine;
pub mod mock;

pub use engine::{EntityFilter, HistoryRequest, QueryEngine, QueryLimits, StatisticsRequest};

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use std::time::Duration;

/// Raw history queries return at most this many points.
pub const MAX_RAW_POINTS: usize = 5000;

/// Upper bound of hourly statistics rows read for a day, week or month
/// roll-up. The longest allowed range (3650 days) needs 87 600.
pub const MAX_ROLLUP_SOURCE_ROWS: usize = 500_000;

/// `list_entities` only reports entities seen within this many days.
pub const ENTITY_RECENCY_DAYS: i64 = 7;

pub const DEFAULT_ENTITY_LIMIT: usize = 100;
pub const MAX_ENTITY_LIMIT: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("Invalid time range: {0}")]
    InvalidRange(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Query timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

impl QueryError {
    /// Stable error kind string.
    pub fn kind(&self) -> &'static str {
        match self {
            QueryError::InvalidRange(_) => "invalid_range",
            QueryError::InvalidParameter(_) => "invalid_parameter",
            QueryError::Timeout(_) => "timeout",
        }
    }
}

/// Parse a timestamp argument.
///
/// RFC 3339 with an offset is preferred; a naive date-time or a bare date is
/// taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(value) {
        return Some(t.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(t) = NaiveDateTime::parse_from_str(value, format) {
            return Some(t.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(NaiveTime::default()).and_utc())
}

//! Storage layer for reading recorder history.
//!
//! The recorder schema keeps raw states (`states`, `states_meta`,
//! `state_attributes`) apart from pre-aggregated statistics (`statistics`,
//! `statistics_short_term`, `statistics_meta`). Backends only ever read.

mod memory_storage;
pub mod pool;
mod postgres_storage;

pub use memory_storage::MemoryRecorder;
pub use pool::{PoolError, PoolManager, PoolState};
pub use postgres_storage::PostgresRecorder;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use hindsight_types::{
    Aggregation, DatabaseDetail, Entity, HistoryPoint, StatisticMeta, StatisticRecord,
};

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Malformed recorder row: {0}")]
    Decode(String),

    #[error("Connection pool is closed")]
    Closed,

    #[error("Simulated storage failure")]
    Simulated,
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Parameters of a state history read.
#[derive(Debug, Clone)]
pub struct StateQuery<'a> {
    pub entity_id: &'a str,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Maximum number of rows to return
    pub limit: usize,
    pub include_attributes: bool,
}

/// Parameters of a bucketed state history read.
///
/// Buckets are `[start + i * width, start + (i + 1) * width)`. Only numeric
/// states are aggregated and buckets without any are left out, so a read
/// returns at most `ceil((end - start) / width)` points.
#[derive(Debug, Clone)]
pub struct BucketQuery<'a> {
    pub entity_id: &'a str,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub width: TimeDelta,
    pub aggregation: Aggregation,
}

impl BucketQuery<'_> {
    /// Start of bucket `index`.
    pub fn bucket_start(&self, index: i64) -> DateTime<Utc> {
        self.start + TimeDelta::milliseconds(index * self.width.num_milliseconds())
    }
}

/// Which statistics table to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatisticsTable {
    /// 5 minute rows
    ShortTerm,
    /// Hourly rows
    LongTerm,
}

impl StatisticsTable {
    pub fn table_name(&self) -> &'static str {
        match self {
            StatisticsTable::ShortTerm => "statistics_short_term",
            StatisticsTable::LongTerm => "statistics",
        }
    }
}

/// Statistics rows of one statistic together with its metadata.
#[derive(Debug, Clone)]
pub struct StatisticsRows {
    pub meta: StatisticMeta,
    pub records: Vec<StatisticRecord>,
}

/// Trait for recorder backends.
///
/// `Ok(None)` from a lookup means the recorder has never seen the id, which
/// callers turn into an empty result rather than an error.
#[async_trait]
pub trait Recorder: Send + Sync {
    /// States with `start <= t < end`, ascending by time.
    async fn states(&self, query: &StateQuery<'_>) -> Result<Option<Vec<HistoryPoint>>>;

    /// Numeric states aggregated per bucket, ascending by bucket start.
    /// Every state in range contributes; nothing is truncated.
    async fn bucketed_states(
        &self,
        query: &BucketQuery<'_>,
    ) -> Result<Option<Vec<HistoryPoint>>>;

    /// Statistics rows with `start <= t < end`, ascending by period start.
    async fn statistics(
        &self,
        statistic_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        table: StatisticsTable,
        limit: usize,
    ) -> Result<Option<StatisticsRows>>;

    /// Entities with at least one state after `since`, most recent first.
    async fn recent_entities(
        &self,
        since: DateTime<Utc>,
        domain: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Entity>>;

    /// Metadata of the long-term statistics, ordered by id.
    async fn statistic_metadata(
        &self,
        domain: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StatisticMeta>>;

    /// Probe the backend. Never fails; problems are reported in the detail.
    async fn health(&self) -> DatabaseDetail;
}

/// Convert a recorder epoch timestamp (seconds as float) to a UTC time.
pub fn ts_to_datetime(ts: f64) -> Option<DateTime<Utc>> {
    if !ts.is_finite() {
        return None;
    }
    DateTime::from_timestamp_micros((ts * 1_000_000.0).round() as i64)
}

/// Convert a UTC time to a recorder epoch timestamp.
pub fn datetime_to_ts(t: DateTime<Utc>) -> f64 {
    t.timestamp_micros() as f64 / 1_000_000.0
}

/// Pull `unit_of_measurement` and `device_class` out of a recorder
/// attribute blob.
pub fn unit_and_class(
    attributes: Option<&serde_json::Map<String, serde_json::Value>>,
) -> (Option<String>, Option<String>) {
    let get = |key: &str| {
        attributes
            .and_then(|attrs| attrs.get(key))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    };
    (get("unit_of_measurement"), get("device_class"))
}

/// Recorder connection settings for database-backed tests, taken from
/// `HINDSIGHT_TEST_DATABASE_URL`.
#[cfg(test)]
pub(crate) fn test_database_config() -> Option<crate::config::DatabaseConfig> {
    let url = std::env::var("HINDSIGHT_TEST_DATABASE_URL").ok()?;
    let options: sqlx::postgres::PgConnectOptions = url.parse().ok()?;
    let password = url
        .split("://")
        .nth(1)
        .and_then(|rest| rest.split('@').next())
        .and_then(|auth| auth.split_once(':'))
        .map(|(_, p)| p.to_string())
        .unwrap_or_default();
    Some(crate::config::DatabaseConfig {
        host: options.get_host().to_string(),
        port: options.get_port(),
        name: options.get_database().unwrap_or("homeassistant").to_string(),
        user: options.get_username().to_string(),
        password,
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_timestamp_conversion() {
        let t: DateTime<Utc> = "2024-12-19T10:30:00.250Z".parse().unwrap();
        let ts = datetime_to_ts(t);
        assert_eq!(ts_to_datetime(ts), Some(t));
        assert_eq!(ts_to_datetime(f64::NAN), None);
    }

    #[test]
    fn test_unit_and_class() {
        let attrs = json!({"unit_of_measurement": "°C", "device_class": "temperature"});
        let (unit, class) = unit_and_class(attrs.as_object());
        assert_eq!(unit.as_deref(), Some("°C"));
        assert_eq!(class.as_deref(), Some("temperature"));
        assert_eq!(unit_and_class(None), (None, None));
    }
}

//! History (state) series types.

use crate::UnknownTag;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// A recorded state value.
///
/// Recorder states are strings; numeric ones are exposed as numbers and
/// everything else (`"on"`, `"open"`, ...) is kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(untagged)]
pub enum PointValue {
    Number(f64),
    Text(String),
}

impl PointValue {
    /// Interpret a raw recorder state string.
    pub fn from_state(state: &str) -> Self {
        match state.trim().parse::<f64>() {
            Ok(n) if n.is_finite() => PointValue::Number(n),
            _ => PointValue::Text(state.to_string()),
        }
    }

    /// The numeric value, if this point is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PointValue::Number(n) => Some(*n),
            PointValue::Text(_) => None,
        }
    }
}

impl From<f64> for PointValue {
    fn from(value: f64) -> Self {
        PointValue::Number(value)
    }
}

impl From<&str> for PointValue {
    fn from(value: &str) -> Self {
        PointValue::Text(value.to_string())
    }
}

/// One point of an entity's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct HistoryPoint {
    /// Timestamp of the state change (or bucket start for aggregated series)
    pub t: DateTime<Utc>,
    /// The value
    pub v: PointValue,
    /// State attributes, only present on raw points that carry them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub attributes: Option<serde_json::Map<String, serde_json::Value>>,
}

impl HistoryPoint {
    pub fn new(t: DateTime<Utc>, v: impl Into<PointValue>) -> Self {
        Self {
            t,
            v: v.into(),
            attributes: None,
        }
    }
}

/// Time interval for a history query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub enum Interval {
    #[serde(rename = "raw")]
    Raw,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[serde(rename = "1h")]
    Hour,
    #[serde(rename = "6h")]
    SixHours,
    #[serde(rename = "1d")]
    Day,
}

impl Interval {
    pub const ALL: [Interval; 7] = [
        Interval::Raw,
        Interval::FiveMinutes,
        Interval::FifteenMinutes,
        Interval::ThirtyMinutes,
        Interval::Hour,
        Interval::SixHours,
        Interval::Day,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::Raw => "raw",
            Interval::FiveMinutes => "5m",
            Interval::FifteenMinutes => "15m",
            Interval::ThirtyMinutes => "30m",
            Interval::Hour => "1h",
            Interval::SixHours => "6h",
            Interval::Day => "1d",
        }
    }

    /// Bucket width, or `None` for raw queries.
    pub fn width(&self) -> Option<TimeDelta> {
        match self {
            Interval::Raw => None,
            Interval::FiveMinutes => Some(TimeDelta::minutes(5)),
            Interval::FifteenMinutes => Some(TimeDelta::minutes(15)),
            Interval::ThirtyMinutes => Some(TimeDelta::minutes(30)),
            Interval::Hour => Some(TimeDelta::hours(1)),
            Interval::SixHours => Some(TimeDelta::hours(6)),
            Interval::Day => Some(TimeDelta::days(1)),
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = UnknownTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Interval::ALL
            .into_iter()
            .find(|i| i.as_str() == s)
            .ok_or_else(|| UnknownTag::new("interval", s))
    }
}

/// Aggregation applied to the numeric points of a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Mean,
    Min,
    Max,
    Sum,
    Last,
    First,
}

impl Aggregation {
    pub const ALL: [Aggregation; 6] = [
        Aggregation::Mean,
        Aggregation::Min,
        Aggregation::Max,
        Aggregation::Sum,
        Aggregation::Last,
        Aggregation::First,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregation::Mean => "mean",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
            Aggregation::Sum => "sum",
            Aggregation::Last => "last",
            Aggregation::First => "first",
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Aggregation {
    type Err = UnknownTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Aggregation::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| UnknownTag::new("aggregation", s))
    }
}

/// Result of the `get_history` tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct HistoryResult {
    pub entity_id: String,
    pub interval: Interval,
    pub aggregation: Aggregation,
    pub series: Vec<HistoryPoint>,
    pub count: usize,
    pub query_time: DateTime<Utc>,
    /// True when the series was synthesized instead of read from the recorder
    pub mock_data: bool,
}

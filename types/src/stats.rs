//! Long-term statistics types.
//!
//! The recorder keeps pre-aggregated statistics in two tables: a short-term
//! table with 5 minute rows and a long-term table with hourly rows. Coarser
//! periods are rolled up from the hourly rows.

use crate::UnknownTag;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Granularity of a statistics record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub enum Period {
    #[serde(rename = "5minute")]
    FiveMinute,
    #[serde(rename = "hour")]
    Hour,
    #[serde(rename = "day")]
    Day,
    #[serde(rename = "week")]
    Week,
    #[serde(rename = "month")]
    Month,
}

impl Period {
    pub const ALL: [Period; 5] = [
        Period::FiveMinute,
        Period::Hour,
        Period::Day,
        Period::Week,
        Period::Month,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Period::FiveMinute => "5minute",
            Period::Hour => "hour",
            Period::Day => "day",
            Period::Week => "week",
            Period::Month => "month",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = UnknownTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Period::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| UnknownTag::new("period", s))
    }
}

/// A column of a statistics record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum StatisticField {
    Mean,
    Min,
    Max,
    Sum,
}

impl StatisticField {
    pub const ALL: [StatisticField; 4] = [
        StatisticField::Mean,
        StatisticField::Min,
        StatisticField::Max,
        StatisticField::Sum,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StatisticField::Mean => "mean",
            StatisticField::Min => "min",
            StatisticField::Max => "max",
            StatisticField::Sum => "sum",
        }
    }
}

impl FromStr for StatisticField {
    type Err = UnknownTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StatisticField::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| UnknownTag::new("statistics field", s))
    }
}

/// One pre-aggregated statistics row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct StatisticRecord {
    /// Period start
    pub t: DateTime<Utc>,
    pub period: Period,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Cumulative sum as stored by the recorder (meters, energy)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sum: Option<f64>,
}

impl StatisticRecord {
    pub fn new(t: DateTime<Utc>, period: Period) -> Self {
        Self {
            t,
            period,
            mean: None,
            min: None,
            max: None,
            sum: None,
        }
    }

    /// Drop every column not listed in `fields`.
    pub fn retain_fields(&mut self, fields: &[StatisticField]) {
        if !fields.contains(&StatisticField::Mean) {
            self.mean = None;
        }
        if !fields.contains(&StatisticField::Min) {
            self.min = None;
        }
        if !fields.contains(&StatisticField::Max) {
            self.max = None;
        }
        if !fields.contains(&StatisticField::Sum) {
            self.sum = None;
        }
    }
}

/// Metadata of a long-term statistic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct StatisticMeta {
    pub statistic_id: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// Result of the `get_statistics` tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct StatisticsResult {
    pub statistic_id: String,
    pub period: Period,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub series: Vec<StatisticRecord>,
    pub count: usize,
    pub query_time: DateTime<Utc>,
    pub mock_data: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_tags() {
        for period in Period::ALL {
            assert_eq!(period.as_str().parse::<Period>(), Ok(period));
        }
        assert_eq!(
            "year".parse::<Period>().unwrap_err().to_string(),
            "unknown period 'year'"
        );
    }

    #[test]
    fn test_retain_fields() {
        let mut record = StatisticRecord {
            mean: Some(1.0),
            min: Some(0.5),
            max: Some(2.0),
            sum: Some(10.0),
            ..StatisticRecord::new("2024-01-01T00:00:00Z".parse().unwrap(), Period::Hour)
        };
        record.retain_fields(&[StatisticField::Max, StatisticField::Mean]);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["mean"], 1.0);
        assert_eq!(json["max"], 2.0);
        assert!(json.get("min").is_none());
        assert!(json.get("sum").is_none());
        assert_eq!(json["period"], "hour");
    }
}

//! In-memory recorder, used by tests and local development.

use super::{
    unit_and_class, BucketQuery, Recorder, Result, StateQuery, StatisticsRows, StatisticsTable,
    StorageError,
};
use crate::query::aggregate::bucketize;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hindsight_types::{domain_of, DatabaseDetail, Entity, HistoryPoint, PointValue, StatisticMeta, StatisticRecord};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Default)]
struct StoredStatistic {
    meta: Option<StatisticMeta>,
    short_term: Vec<StatisticRecord>,
    long_term: Vec<StatisticRecord>,
}

/// Recorder backed by in-memory series.
///
/// Rows are filtered the same way the PostgreSQL recorder filters them:
/// `unknown`, `unavailable` and empty states are never returned.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecorder {
    states: BTreeMap<String, Vec<HistoryPoint>>,
    statistics: HashMap<String, StoredStatistic>,
    latency: Option<Duration>,
    failing: bool,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add states for an entity. Points are kept sorted by time.
    pub fn with_states(mut self, entity_id: &str, points: Vec<HistoryPoint>) -> Self {
        let series = self.states.entry(entity_id.to_string()).or_default();
        series.extend(points);
        series.sort_by_key(|p| p.t);
        self
    }

    /// Add statistics rows to the table matching their period.
    pub fn with_statistics(mut self, meta: StatisticMeta, records: Vec<StatisticRecord>) -> Self {
        let stored = self.statistics.entry(meta.statistic_id.clone()).or_default();
        for record in records {
            match record.period {
                hindsight_types::Period::FiveMinute => stored.short_term.push(record),
                _ => stored.long_term.push(record),
            }
        }
        stored.short_term.sort_by_key(|r| r.t);
        stored.long_term.sort_by_key(|r| r.t);
        stored.meta = Some(meta);
        self
    }

    /// Delay every read, to exercise query timeouts.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make every read fail, to exercise the mock fallback.
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    async fn simulate(&self) -> Result<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing {
            return Err(StorageError::Simulated);
        }
        Ok(())
    }
}

fn is_recorded_value(value: &PointValue) -> bool {
    match value {
        PointValue::Number(_) => true,
        PointValue::Text(s) => !matches!(s.as_str(), "unknown" | "unavailable" | ""),
    }
}

#[async_trait]
impl Recorder for MemoryRecorder {
    async fn states(&self, query: &StateQuery<'_>) -> Result<Option<Vec<HistoryPoint>>> {
        self.simulate().await?;

        let Some(series) = self.states.get(query.entity_id) else {
            return Ok(None);
        };
        let points = series
            .iter()
            .filter(|p| p.t >= query.start && p.t < query.end)
            .filter(|p| is_recorded_value(&p.v))
            .take(query.limit)
            .map(|p| {
                let mut point = p.clone();
                if !query.include_attributes {
                    point.attributes = None;
                }
                point
            })
            .collect::<Vec<_>>();

        debug!("Memory recorder returned {} states of {}", points.len(), query.entity_id);
        Ok(Some(points))
    }

    async fn bucketed_states(
        &self,
        query: &BucketQuery<'_>,
    ) -> Result<Option<Vec<HistoryPoint>>> {
        self.simulate().await?;

        let Some(series) = self.states.get(query.entity_id) else {
            return Ok(None);
        };
        let buckets = bucketize(
            series,
            query.start,
            query.end,
            query.width,
            query.aggregation,
        );
        debug!(
            "Memory recorder aggregated {} buckets of {}",
            buckets.len(),
            query.entity_id
        );
        Ok(Some(buckets))
    }

    async fn statistics(
        &self,
        statistic_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        table: StatisticsTable,
        limit: usize,
    ) -> Result<Option<StatisticsRows>> {
        self.simulate().await?;

        let Some(stored) = self.statistics.get(statistic_id) else {
            return Ok(None);
        };
        let Some(meta) = stored.meta.clone() else {
            return Ok(None);
        };
        let rows = match table {
            StatisticsTable::ShortTerm => &stored.short_term,
            StatisticsTable::LongTerm => &stored.long_term,
        };
        let records = rows
            .iter()
            .filter(|r| r.t >= start && r.t < end)
            .take(limit)
            .cloned()
            .collect();
        Ok(Some(StatisticsRows { meta, records }))
    }

    async fn recent_entities(
        &self,
        since: DateTime<Utc>,
        domain: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Entity>> {
        self.simulate().await?;

        let mut entities: Vec<Entity> = self
            .states
            .iter()
            .filter(|(entity_id, _)| domain.is_none_or(|d| domain_of(entity_id) == d))
            .filter_map(|(entity_id, series)| {
                let latest = series.iter().rev().find(|p| p.t > since)?;
                let (unit, device_class) = unit_and_class(latest.attributes.as_ref());
                Some(Entity {
                    entity_id: entity_id.clone(),
                    last_seen: latest.t,
                    unit,
                    device_class,
                })
            })
            .collect();

        entities.sort_by(|a, b| {
            b.last_seen
                .cmp(&a.last_seen)
                .then_with(|| a.entity_id.cmp(&b.entity_id))
        });
        entities.truncate(limit);
        Ok(entities)
    }

    async fn statistic_metadata(
        &self,
        domain: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StatisticMeta>> {
        self.simulate().await?;

        let mut metas: Vec<StatisticMeta> = self
            .statistics
            .values()
            .filter_map(|s| s.meta.clone())
            .filter(|m| domain.is_none_or(|d| domain_of(&m.statistic_id) == d))
            .collect();
        metas.sort_by(|a, b| a.statistic_id.cmp(&b.statistic_id));
        metas.truncate(limit);
        Ok(metas)
    }

    async fn health(&self) -> DatabaseDetail {
        if self.failing {
            return DatabaseDetail::disconnected("memory recorder set to fail");
        }
        DatabaseDetail {
            connected: true,
            detail: format!("memory recorder with {} entities", self.states.len()),
            server_version: None,
            timescaledb: None,
        }
    }
}

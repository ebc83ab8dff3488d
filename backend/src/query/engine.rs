//! Query engine: validates requests, reads the recorder and shapes results.

use super::aggregate::{bucketize, rollup_statistics};
use super::{
    mock, QueryError, ENTITY_RECENCY_DAYS, MAX_ENTITY_LIMIT, MAX_RAW_POINTS,
    MAX_ROLLUP_SOURCE_ROWS,
};
use crate::storage::{BucketQuery, Recorder, StateQuery, StatisticsTable, StorageError};
use chrono::{DateTime, TimeDelta, Utc};
use hindsight_types::{
    Aggregation, DatabaseDetail, EntityListResult, HistoryPoint, HistoryResult, Interval, Period,
    StatisticField, StatisticsResult,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Limits applied to every query.
#[derive(Debug, Clone, Copy)]
pub struct QueryLimits {
    pub timeout: Duration,
    pub max_query_days: u32,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_query_days: 90,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HistoryRequest {
    pub entity_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub interval: Interval,
    pub aggregation: Aggregation,
    pub include_attributes: bool,
}

#[derive(Debug, Clone)]
pub struct StatisticsRequest {
    pub statistic_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub period: Period,
    /// Columns to return, all of them when `None`
    pub fields: Option<Vec<StatisticField>>,
}

#[derive(Debug, Clone)]
pub struct EntityFilter {
    pub domain: Option<String>,
    pub limit: usize,
}

/// Outcome of a recorder read guarded by the query timeout.
enum Fetched<T> {
    Data(T),
    /// The recorder failed; answer this call from mock data
    Fallback,
}

/// Executes tool queries against the recorder, or against the mock
/// generator when no recorder is attached.
#[derive(Clone)]
pub struct QueryEngine {
    recorder: Option<Arc<dyn Recorder>>,
    limits: QueryLimits,
}

impl QueryEngine {
    pub fn new(recorder: Option<Arc<dyn Recorder>>, limits: QueryLimits) -> Self {
        Self { recorder, limits }
    }

    /// Engine answering every query from the mock generator.
    pub fn mock(limits: QueryLimits) -> Self {
        Self::new(None, limits)
    }

    /// `start < end` and the span is within `max_query_days`.
    pub fn validate_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<(), QueryError> {
        if start >= end {
            return Err(QueryError::InvalidRange(format!(
                "start ({}) must be before end ({})",
                start.to_rfc3339(),
                end.to_rfc3339()
            )));
        }
        let max = TimeDelta::days(self.limits.max_query_days as i64);
        if end - start > max {
            return Err(QueryError::InvalidRange(format!(
                "range of {} days exceeds the maximum of {} days",
                (end - start).num_days(),
                self.limits.max_query_days
            )));
        }
        Ok(())
    }

    /// Run a recorder read under the query timeout.
    ///
    /// Storage errors degrade to `Fetched::Fallback`; only an expired
    /// timeout is reported to the caller.
    async fn guarded<T, F>(&self, what: &str, read: F) -> Result<Fetched<T>, QueryError>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        match tokio::time::timeout(self.limits.timeout, read).await {
            Ok(Ok(data)) => Ok(Fetched::Data(data)),
            Ok(Err(e)) => {
                warn!("Recorder read for {} failed, answering from mock data: {}", what, e);
                Ok(Fetched::Fallback)
            }
            Err(_) => {
                warn!(
                    "Recorder read for {} timed out after {}s",
                    what,
                    self.limits.timeout.as_secs()
                );
                Err(QueryError::Timeout(self.limits.timeout))
            }
        }
    }

    pub async fn get_history(&self, request: &HistoryRequest) -> Result<HistoryResult, QueryError> {
        self.validate_range(request.start, request.end)?;
        info!(
            "History of {} from {} to {} ({}, {})",
            request.entity_id, request.start, request.end, request.interval, request.aggregation
        );

        let Some(recorder) = &self.recorder else {
            return Ok(self.mock_history(request));
        };

        let read = async {
            match request.interval.width() {
                // Aggregated by the recorder, one row per non-empty bucket
                Some(width) => {
                    let query = BucketQuery {
                        entity_id: &request.entity_id,
                        start: request.start,
                        end: request.end,
                        width,
                        aggregation: request.aggregation,
                    };
                    recorder.bucketed_states(&query).await
                }
                None => {
                    let query = StateQuery {
                        entity_id: &request.entity_id,
                        start: request.start,
                        end: request.end,
                        limit: MAX_RAW_POINTS,
                        include_attributes: request.include_attributes,
                    };
                    let points = recorder.states(&query).await?;
                    Ok(points.map(|points| shape_history(points, request)))
                }
            }
        };

        match self.guarded(&request.entity_id, read).await? {
            Fetched::Data(Some(series)) => Ok(history_result(request, series, false)),
            Fetched::Data(None) => {
                debug!("No recorded states for {}", request.entity_id);
                Ok(history_result(request, Vec::new(), false))
            }
            Fetched::Fallback => Ok(self.mock_history(request)),
        }
    }

    fn mock_history(&self, request: &HistoryRequest) -> HistoryResult {
        let points = mock::series(
            &request.entity_id,
            request.start,
            request.end,
            request.interval,
        );
        history_result(request, shape_history(points, request), true)
    }

    pub async fn get_statistics(
        &self,
        request: &StatisticsRequest,
    ) -> Result<StatisticsResult, QueryError> {
        self.validate_range(request.start, request.end)?;
        info!(
            "Statistics of {} from {} to {} ({})",
            request.statistic_id, request.start, request.end, request.period
        );

        let Some(recorder) = &self.recorder else {
            return Ok(self.mock_statistics(request));
        };

        let (table, limit) = match request.period {
            Period::FiveMinute => (StatisticsTable::ShortTerm, MAX_RAW_POINTS),
            Period::Hour => (StatisticsTable::LongTerm, MAX_RAW_POINTS),
            Period::Day | Period::Week | Period::Month => {
                (StatisticsTable::LongTerm, MAX_ROLLUP_SOURCE_ROWS)
            }
        };
        let read = recorder.statistics(
            &request.statistic_id,
            request.start,
            request.end,
            table,
            limit,
        );

        match self.guarded(&request.statistic_id, read).await? {
            Fetched::Data(Some(rows)) => {
                let records = match request.period {
                    Period::Day | Period::Week | Period::Month => {
                        rollup_statistics(&rows.records, request.period)
                    }
                    _ => rows.records,
                };
                Ok(statistics_result(
                    request,
                    records,
                    rows.meta.unit,
                    Some(rows.meta.source),
                    false,
                ))
            }
            Fetched::Data(None) => {
                debug!("No statistics recorded for {}", request.statistic_id);
                Ok(statistics_result(request, Vec::new(), None, None, false))
            }
            Fetched::Fallback => Ok(self.mock_statistics(request)),
        }
    }

    fn mock_statistics(&self, request: &StatisticsRequest) -> StatisticsResult {
        let records = mock::statistics(
            &request.statistic_id,
            request.start,
            request.end,
            request.period,
        );
        statistics_result(
            request,
            records,
            mock::unit_of(&request.statistic_id),
            Some("recorder".to_string()),
            true,
        )
    }

    pub async fn list_entities(&self, filter: &EntityFilter) -> Result<EntityListResult, QueryError> {
        if filter.limit == 0 || filter.limit > MAX_ENTITY_LIMIT {
            return Err(QueryError::InvalidParameter(format!(
                "limit must be between 1 and {}, got {}",
                MAX_ENTITY_LIMIT, filter.limit
            )));
        }
        let now = Utc::now();
        let domain = filter.domain.as_deref();
        info!(
            "Listing up to {} entities (domain: {})",
            filter.limit,
            domain.unwrap_or("any")
        );

        let Some(recorder) = &self.recorder else {
            return Ok(Self::mock_entities(now, filter));
        };

        let since = now - TimeDelta::days(ENTITY_RECENCY_DAYS);
        let read = async {
            let entities = recorder.recent_entities(since, domain, filter.limit).await?;
            let statistics = recorder.statistic_metadata(domain, filter.limit).await?;
            Ok::<_, StorageError>((entities, statistics))
        };

        match self.guarded("entity list", read).await? {
            Fetched::Data((entities, statistics)) => Ok(EntityListResult {
                entity_count: entities.len(),
                statistic_count: statistics.len(),
                entities,
                statistics,
                query_time: now,
                mock_data: false,
            }),
            Fetched::Fallback => Ok(Self::mock_entities(now, filter)),
        }
    }

    fn mock_entities(now: DateTime<Utc>, filter: &EntityFilter) -> EntityListResult {
        let domain = filter.domain.as_deref();
        let mut entities = mock::entities(now, domain);
        entities.truncate(filter.limit);
        let mut statistics = mock::statistic_metadata(domain);
        statistics.truncate(filter.limit);
        EntityListResult {
            entity_count: entities.len(),
            statistic_count: statistics.len(),
            entities,
            statistics,
            query_time: now,
            mock_data: true,
        }
    }

    /// Probe the recorder.
    pub async fn database_health(&self) -> DatabaseDetail {
        match &self.recorder {
            Some(recorder) => recorder.health().await,
            None => DatabaseDetail::disconnected("no database pool, serving mock data"),
        }
    }
}

/// Restrict points to `[start, end)` in time order, then bucket them when
/// the interval asks for it.
fn shape_history(mut points: Vec<HistoryPoint>, request: &HistoryRequest) -> Vec<HistoryPoint> {
    match request.interval.width() {
        None => {
            points.retain(|p| p.t >= request.start && p.t < request.end);
            points.sort_by_key(|p| p.t);
            points.truncate(MAX_RAW_POINTS);
            points
        }
        Some(width) => bucketize(
            &points,
            request.start,
            request.end,
            width,
            request.aggregation,
        ),
    }
}

fn history_result(request: &HistoryRequest, series: Vec<HistoryPoint>, mock_data: bool) -> HistoryResult {
    HistoryResult {
        entity_id: request.entity_id.clone(),
        interval: request.interval,
        aggregation: request.aggregation,
        count: series.len(),
        series,
        query_time: Utc::now(),
        mock_data,
    }
}

fn statistics_result(
    request: &StatisticsRequest,
    mut records: Vec<hindsight_types::StatisticRecord>,
    unit: Option<String>,
    source: Option<String>,
    mock_data: bool,
) -> StatisticsResult {
    if let Some(fields) = &request.fields {
        for record in &mut records {
            record.retain_fields(fields);
        }
    }
    StatisticsResult {
        statistic_id: request.statistic_id.clone(),
        period: request.period,
        unit,
        source,
        count: records.len(),
        series: records,
        query_time: Utc::now(),
        mock_data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryRecorder;
    use hindsight_types::{PointValue, StatisticMeta, StatisticRecord};

    fn t(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn history(entity_id: &str, start: &str, end: &str, interval: Interval) -> HistoryRequest {
        HistoryRequest {
            entity_id: entity_id.to_string(),
            start: t(start),
            end: t(end),
            interval,
            aggregation: Aggregation::Mean,
            include_attributes: false,
        }
    }

    fn engine_with(recorder: MemoryRecorder) -> QueryEngine {
        QueryEngine::new(Some(Arc::new(recorder)), QueryLimits::default())
    }

    fn temperature_recorder() -> MemoryRecorder {
        MemoryRecorder::new().with_states(
            "sensor.temperature",
            vec![
                HistoryPoint::new(t("2024-12-19T00:00:00Z"), 20.0),
                HistoryPoint::new(t("2024-12-19T00:30:00Z"), 21.0),
                HistoryPoint::new(t("2024-12-19T00:59:00Z"), 22.0),
            ],
        )
    }

    #[tokio::test]
    async fn test_hourly_mean_from_recorder() {
        let engine = engine_with(temperature_recorder());
        let result = engine
            .get_history(&history(
                "sensor.temperature",
                "2024-12-19T00:00:00Z",
                "2024-12-19T01:00:00Z",
                Interval::Hour,
            ))
            .await
            .unwrap();
        assert!(!result.mock_data);
        assert_eq!(result.count, 1);
        assert_eq!(result.series[0].t, t("2024-12-19T00:00:00Z"));
        assert_eq!(result.series[0].v, PointValue::Number(21.0));
    }

    #[tokio::test]
    async fn test_bucketed_history_reads_every_state() {
        // One reading per second for a week, far more rows than a raw read returns
        let start = t("2024-12-19T00:00:00Z");
        let points = (0..7 * 86_400)
            .map(|s| HistoryPoint::new(start + TimeDelta::seconds(s), 1.0))
            .collect();
        let engine = engine_with(MemoryRecorder::new().with_states("sensor.power", points));

        let mut request = history(
            "sensor.power",
            "2024-12-19T00:00:00Z",
            "2024-12-26T00:00:00Z",
            Interval::Day,
        );
        request.aggregation = Aggregation::Sum;
        let result = engine.get_history(&request).await.unwrap();

        assert!(!result.mock_data);
        assert_eq!(result.count, 7);
        for (day, point) in result.series.iter().enumerate() {
            assert_eq!(point.t, start + TimeDelta::days(day as i64));
            assert_eq!(point.v, PointValue::Number(86_400.0));
        }
    }

    #[tokio::test]
    async fn test_raw_history_is_ordered_and_half_open() {
        let engine = engine_with(temperature_recorder());
        let result = engine
            .get_history(&history(
                "sensor.temperature",
                "2024-12-19T00:00:00Z",
                "2024-12-19T00:59:00Z",
                Interval::Raw,
            ))
            .await
            .unwrap();
        assert_eq!(result.count, 2);
        assert!(result.series[0].t < result.series[1].t);
    }

    #[tokio::test]
    async fn test_inverted_range_rejected_before_lookup() {
        let engine = engine_with(MemoryRecorder::new());
        let err = engine
            .get_history(&history(
                "sensor.anything",
                "2024-12-20T00:00:00Z",
                "2024-12-19T00:00:00Z",
                Interval::Raw,
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidRange(_)));

        let empty = engine
            .get_history(&history(
                "sensor.anything",
                "2024-12-19T00:00:00Z",
                "2024-12-19T00:00:00Z",
                Interval::Raw,
            ))
            .await
            .unwrap_err();
        assert!(matches!(empty, QueryError::InvalidRange(_)));
    }

    #[tokio::test]
    async fn test_range_limit() {
        let engine = QueryEngine::mock(QueryLimits {
            max_query_days: 7,
            ..QueryLimits::default()
        });
        let ok = history("sensor.x", "2024-12-01T00:00:00Z", "2024-12-08T00:00:00Z", Interval::Day);
        assert!(engine.get_history(&ok).await.is_ok());
        let too_long = history("sensor.x", "2024-12-01T00:00:00Z", "2024-12-08T00:00:01Z", Interval::Day);
        assert!(matches!(
            engine.get_history(&too_long).await,
            Err(QueryError::InvalidRange(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_entity_gives_empty_series() {
        let engine = engine_with(temperature_recorder());
        let result = engine
            .get_history(&history(
                "sensor.missing",
                "2024-12-19T00:00:00Z",
                "2024-12-19T01:00:00Z",
                Interval::Raw,
            ))
            .await
            .unwrap();
        assert!(result.series.is_empty());
        assert!(!result.mock_data);
    }

    #[tokio::test]
    async fn test_mock_mode_is_flagged_and_deterministic() {
        let engine = QueryEngine::mock(QueryLimits::default());
        let request = history(
            "sensor.temperature",
            "2024-12-19T00:00:00Z",
            "2024-12-20T00:00:00Z",
            Interval::Hour,
        );
        let a = engine.get_history(&request).await.unwrap();
        let b = engine.get_history(&request).await.unwrap();
        assert!(a.mock_data);
        assert_eq!(a.series, b.series);
        assert_eq!(a.count, 24);
    }

    #[tokio::test]
    async fn test_storage_failure_falls_back_to_mock() {
        let engine = engine_with(MemoryRecorder::new().failing());
        let result = engine
            .get_history(&history(
                "sensor.temperature",
                "2024-12-19T00:00:00Z",
                "2024-12-19T06:00:00Z",
                Interval::Hour,
            ))
            .await
            .unwrap();
        assert!(result.mock_data);
        assert_eq!(result.count, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_recorder_times_out() {
        let engine = QueryEngine::new(
            Some(Arc::new(
                temperature_recorder().with_latency(Duration::from_secs(60)),
            )),
            QueryLimits {
                timeout: Duration::from_secs(1),
                ..QueryLimits::default()
            },
        );
        let err = engine
            .get_history(&history(
                "sensor.temperature",
                "2024-12-19T00:00:00Z",
                "2024-12-19T01:00:00Z",
                Interval::Raw,
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_statistics_rollup_and_fields() {
        let meta = StatisticMeta {
            statistic_id: "sensor.energy".to_string(),
            source: "recorder".to_string(),
            unit: Some("kWh".to_string()),
        };
        let rows = (0..48)
            .map(|h| {
                let mut row = StatisticRecord::new(
                    t("2024-12-19T00:00:00Z") + TimeDelta::hours(h),
                    Period::Hour,
                );
                row.mean = Some(h as f64);
                row.min = Some(h as f64 - 1.0);
                row.max = Some(h as f64 + 1.0);
                row.sum = Some(h as f64 * 10.0);
                row
            })
            .collect();
        let engine = engine_with(MemoryRecorder::new().with_statistics(meta, rows));

        let request = StatisticsRequest {
            statistic_id: "sensor.energy".to_string(),
            start: t("2024-12-19T00:00:00Z"),
            end: t("2024-12-21T00:00:00Z"),
            period: Period::Day,
            fields: Some(vec![StatisticField::Max, StatisticField::Sum]),
        };
        let result = engine.get_statistics(&request).await.unwrap();
        assert!(!result.mock_data);
        assert_eq!(result.unit.as_deref(), Some("kWh"));
        assert_eq!(result.count, 2);
        assert_eq!(result.series[0].max, Some(24.0));
        assert_eq!(result.series[0].sum, Some(230.0));
        assert_eq!(result.series[0].mean, None);
        assert_eq!(result.series[1].sum, Some(470.0));
    }

    #[tokio::test]
    async fn test_list_entities_limit() {
        let engine = QueryEngine::mock(QueryLimits::default());
        for limit in [0, MAX_ENTITY_LIMIT + 1] {
            let err = engine
                .list_entities(&EntityFilter { domain: None, limit })
                .await
                .unwrap_err();
            assert!(matches!(err, QueryError::InvalidParameter(_)));
        }

        let result = engine
            .list_entities(&EntityFilter {
                domain: Some("sensor".to_string()),
                limit: 2,
            })
            .await
            .unwrap();
        assert!(result.mock_data);
        assert_eq!(result.entity_count, 2);
        assert!(result.entities.iter().all(|e| e.domain() == "sensor"));
    }

    #[tokio::test]
    async fn test_list_entities_from_recorder() {
        let now = Utc::now();
        let recorder = MemoryRecorder::new()
            .with_states(
                "sensor.recent",
                vec![HistoryPoint::new(now - TimeDelta::hours(1), 1.0)],
            )
            .with_states(
                "sensor.stale",
                vec![HistoryPoint::new(now - TimeDelta::days(8), 1.0)],
            );
        let engine = engine_with(recorder);
        let result = engine
            .list_entities(&EntityFilter {
                domain: None,
                limit: 100,
            })
            .await
            .unwrap();
        assert_eq!(result.entity_count, 1);
        assert_eq!(result.entities[0].entity_id, "sensor.recent");
    }
}

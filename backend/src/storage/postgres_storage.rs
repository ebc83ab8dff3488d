//! Recorder reads against the PostgreSQL recorder schema.

use super::{
    datetime_to_ts, ts_to_datetime, unit_and_class, BucketQuery, PoolManager, Recorder, Result,
    StateQuery, StatisticsRows, StatisticsTable, StorageError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hindsight_types::{
    Aggregation, DatabaseDetail, Entity, HistoryPoint, Period, PointValue, StatisticMeta,
    StatisticRecord,
};
use serde_json::{Map, Value};
use sqlx::postgres::PgRow;
use sqlx::Row;
use std::sync::Arc;
use tracing::{debug, warn};

/// States the recorder writes for entities without a usable value.
const STATE_FILTER: &str = "s.state IS NOT NULL AND s.state NOT IN ('unknown', 'unavailable', '')";

/// Matches plain decimal numbers, which is what numeric sensors record.
const NUMERIC_STATE: &str = r"s.state ~ '^\s*[-+]?([0-9]+\.?[0-9]*|\.[0-9]+)([eE][-+]?[0-9]+)?\s*$'";

/// Per-bucket aggregate over the numeric value `v` of the numeric states subquery.
fn aggregate_sql(aggregation: Aggregation) -> &'static str {
    match aggregation {
        Aggregation::Mean => "AVG(v)",
        Aggregation::Min => "MIN(v)",
        Aggregation::Max => "MAX(v)",
        Aggregation::Sum => "SUM(v)",
        Aggregation::First => "(array_agg(v ORDER BY ts))[1]",
        Aggregation::Last => "(array_agg(v ORDER BY ts DESC))[1]",
    }
}

/// Recorder backend reading from PostgreSQL.
pub struct PostgresRecorder {
    pool: Arc<PoolManager>,
}

impl PostgresRecorder {
    pub fn new(pool: Arc<PoolManager>) -> Self {
        Self { pool }
    }

    async fn entity_metadata_id(&self, entity_id: &str) -> Result<Option<i32>> {
        let id = sqlx::query_scalar("SELECT metadata_id FROM states_meta WHERE entity_id = $1")
            .bind(entity_id)
            .fetch_optional(self.pool.pool()?)
            .await?;
        Ok(id)
    }
}

fn parse_attributes(raw: Option<&str>) -> Option<Map<String, Value>> {
    let raw = raw?;
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Some(map),
        Ok(_) => None,
        Err(e) => {
            debug!("Ignoring unparsable shared_attrs: {}", e);
            None
        }
    }
}

fn row_time(row: &PgRow, column: &str) -> Result<DateTime<Utc>> {
    let ts: f64 = row.try_get(column)?;
    ts_to_datetime(ts).ok_or_else(|| StorageError::Decode(format!("{} out of range: {}", column, ts)))
}

#[async_trait]
impl Recorder for PostgresRecorder {
    async fn states(&self, query: &StateQuery<'_>) -> Result<Option<Vec<HistoryPoint>>> {
        let Some(metadata_id) = self.entity_metadata_id(query.entity_id).await? else {
            debug!("Entity {} not in states_meta", query.entity_id);
            return Ok(None);
        };

        let (columns, join) = if query.include_attributes {
            (
                ", sa.shared_attrs",
                " LEFT JOIN state_attributes sa ON sa.attributes_id = s.attributes_id",
            )
        } else {
            ("", "")
        };
        let sql = format!(
            "SELECT s.last_updated_ts, s.state{columns} \
             FROM states s{join} \
             WHERE s.metadata_id = $1 \
               AND s.last_updated_ts >= $2 AND s.last_updated_ts < $3 \
               AND {STATE_FILTER} \
             ORDER BY s.last_updated_ts \
             LIMIT $4"
        );

        let rows = sqlx::query(&sql)
            .bind(metadata_id)
            .bind(datetime_to_ts(query.start))
            .bind(datetime_to_ts(query.end))
            .bind(query.limit as i64)
            .fetch_all(self.pool.pool()?)
            .await?;

        if rows.len() == query.limit {
            warn!(
                "History of {} truncated at {} rows",
                query.entity_id, query.limit
            );
        }

        let mut points = Vec::with_capacity(rows.len());
        for row in rows {
            let state: String = row.try_get("state")?;
            let mut point = HistoryPoint::new(row_time(&row, "last_updated_ts")?, PointValue::from_state(&state));
            if query.include_attributes {
                let raw: Option<String> = row.try_get("shared_attrs")?;
                point.attributes = parse_attributes(raw.as_deref());
            }
            points.push(point);
        }

        debug!("Read {} states of {}", points.len(), query.entity_id);
        Ok(Some(points))
    }

    async fn bucketed_states(
        &self,
        query: &BucketQuery<'_>,
    ) -> Result<Option<Vec<HistoryPoint>>> {
        let Some(metadata_id) = self.entity_metadata_id(query.entity_id).await? else {
            debug!("Entity {} not in states_meta", query.entity_id);
            return Ok(None);
        };

        // The CASE keeps the cast away from non-numeric rows whatever order
        // the planner evaluates the filters in.
        let sql = format!(
            "SELECT floor((ts - $2) / $4)::bigint AS bucket, {aggregate}::double precision AS value \
             FROM ( \
                 SELECT s.last_updated_ts AS ts, \
                        CASE WHEN {NUMERIC_STATE} THEN s.state::double precision END AS v \
                 FROM states s \
                 WHERE s.metadata_id = $1 \
                   AND s.last_updated_ts >= $2 AND s.last_updated_ts < $3 \
                   AND {STATE_FILTER} AND {NUMERIC_STATE} \
             ) numeric_states \
             WHERE v IS NOT NULL \
             GROUP BY bucket \
             ORDER BY bucket",
            aggregate = aggregate_sql(query.aggregation)
        );

        let width_secs = query.width.num_milliseconds() as f64 / 1000.0;
        let rows = sqlx::query(&sql)
            .bind(metadata_id)
            .bind(datetime_to_ts(query.start))
            .bind(datetime_to_ts(query.end))
            .bind(width_secs)
            .fetch_all(self.pool.pool()?)
            .await?;

        let mut points = Vec::with_capacity(rows.len());
        for row in rows {
            let bucket: i64 = row.try_get("bucket")?;
            let value: Option<f64> = row.try_get("value")?;
            if let Some(value) = value {
                points.push(HistoryPoint::new(query.bucket_start(bucket), value));
            }
        }

        debug!(
            "Aggregated {} buckets of {} ({})",
            points.len(),
            query.entity_id,
            query.aggregation
        );
        Ok(Some(points))
    }

    async fn statistics(
        &self,
        statistic_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        table: StatisticsTable,
        limit: usize,
    ) -> Result<Option<StatisticsRows>> {
        let pool = self.pool.pool()?;
        let meta_row = sqlx::query(
            "SELECT id, source, unit_of_measurement FROM statistics_meta WHERE statistic_id = $1",
        )
        .bind(statistic_id)
        .fetch_optional(pool)
        .await?;
        let Some(meta_row) = meta_row else {
            debug!("Statistic {} not in statistics_meta", statistic_id);
            return Ok(None);
        };

        let metadata_id: i32 = meta_row.try_get("id")?;
        let meta = StatisticMeta {
            statistic_id: statistic_id.to_string(),
            source: meta_row.try_get::<Option<String>, _>("source")?.unwrap_or_default(),
            unit: meta_row.try_get("unit_of_measurement")?,
        };

        let period = match table {
            StatisticsTable::ShortTerm => Period::FiveMinute,
            StatisticsTable::LongTerm => Period::Hour,
        };
        let sql = format!(
            "SELECT start_ts, mean, min, max, sum FROM {} \
             WHERE metadata_id = $1 AND start_ts >= $2 AND start_ts < $3 \
             ORDER BY start_ts \
             LIMIT $4",
            table.table_name()
        );
        let rows = sqlx::query(&sql)
            .bind(metadata_id)
            .bind(datetime_to_ts(start))
            .bind(datetime_to_ts(end))
            .bind(limit as i64)
            .fetch_all(pool)
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let mut record = StatisticRecord::new(row_time(&row, "start_ts")?, period);
            record.mean = row.try_get("mean")?;
            record.min = row.try_get("min")?;
            record.max = row.try_get("max")?;
            record.sum = row.try_get("sum")?;
            records.push(record);
        }

        debug!(
            "Read {} rows of {} from {}",
            records.len(),
            statistic_id,
            table.table_name()
        );
        Ok(Some(StatisticsRows { meta, records }))
    }

    async fn recent_entities(
        &self,
        since: DateTime<Utc>,
        domain: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Entity>> {
        let rows = sqlx::query(
            r#"
            SELECT entity_id, last_updated_ts, shared_attrs FROM (
                SELECT DISTINCT ON (sm.entity_id)
                    sm.entity_id, s.last_updated_ts, sa.shared_attrs
                FROM states_meta sm
                JOIN states s ON s.metadata_id = sm.metadata_id
                LEFT JOIN state_attributes sa ON sa.attributes_id = s.attributes_id
                WHERE s.last_updated_ts > $1
                  AND ($2::text IS NULL OR split_part(sm.entity_id, '.', 1) = $2)
                ORDER BY sm.entity_id, s.last_updated_ts DESC
            ) latest
            ORDER BY last_updated_ts DESC, entity_id
            LIMIT $3
            "#,
        )
        .bind(datetime_to_ts(since))
        .bind(domain)
        .bind(limit as i64)
        .fetch_all(self.pool.pool()?)
        .await?;

        let mut entities = Vec::with_capacity(rows.len());
        for row in rows {
            let raw: Option<String> = row.try_get("shared_attrs")?;
            let attributes = parse_attributes(raw.as_deref());
            let (unit, device_class) = unit_and_class(attributes.as_ref());
            entities.push(Entity {
                entity_id: row.try_get("entity_id")?,
                last_seen: row_time(&row, "last_updated_ts")?,
                unit,
                device_class,
            });
        }
        Ok(entities)
    }

    async fn statistic_metadata(
        &self,
        domain: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StatisticMeta>> {
        let rows = sqlx::query(
            r#"
            SELECT statistic_id, source, unit_of_measurement
            FROM statistics_meta
            WHERE ($1::text IS NULL OR split_part(statistic_id, '.', 1) = $1)
            ORDER BY statistic_id
            LIMIT $2
            "#,
        )
        .bind(domain)
        .bind(limit as i64)
        .fetch_all(self.pool.pool()?)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(StatisticMeta {
                    statistic_id: row.try_get("statistic_id")?,
                    source: row.try_get::<Option<String>, _>("source")?.unwrap_or_default(),
                    unit: row.try_get("unit_of_measurement")?,
                })
            })
            .collect()
    }

    async fn health(&self) -> DatabaseDetail {
        self.pool.health().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_database_config;
    use chrono::TimeDelta;
    use std::time::Duration;

    async fn create_test_recorder() -> Option<PostgresRecorder> {
        let config = test_database_config()?;
        let pool = PoolManager::initialize(&config, Duration::from_secs(5))
            .await
            .ok()?;
        Some(PostgresRecorder::new(Arc::new(pool)))
    }

    #[test]
    fn test_first_and_last_are_time_ordered() {
        assert!(aggregate_sql(Aggregation::First).contains("ORDER BY ts)"));
        assert!(aggregate_sql(Aggregation::Last).contains("ORDER BY ts DESC"));
        assert_eq!(aggregate_sql(Aggregation::Sum), "SUM(v)");
    }

    #[test]
    fn test_parse_attributes() {
        let attrs = parse_attributes(Some(r#"{"unit_of_measurement": "W"}"#)).unwrap();
        assert_eq!(attrs["unit_of_measurement"], "W");
        assert!(parse_attributes(Some("[1, 2]")).is_none());
        assert!(parse_attributes(Some("{not json")).is_none());
        assert!(parse_attributes(None).is_none());
    }

    #[tokio::test]
    async fn test_unknown_entity_is_not_found() {
        let Some(recorder) = create_test_recorder().await else {
            eprintln!("Skipping test: HINDSIGHT_TEST_DATABASE_URL not set");
            return;
        };

        let end = Utc::now();
        let query = StateQuery {
            entity_id: "sensor.hindsight_does_not_exist",
            start: end - TimeDelta::days(1),
            end,
            limit: 10,
            include_attributes: false,
        };
        assert!(recorder.states(&query).await.unwrap().is_none());

        let buckets = BucketQuery {
            entity_id: query.entity_id,
            start: query.start,
            end,
            width: TimeDelta::hours(1),
            aggregation: Aggregation::Mean,
        };
        assert!(recorder.bucketed_states(&buckets).await.unwrap().is_none());

        let stats = recorder
            .statistics(
                "sensor.hindsight_does_not_exist",
                query.start,
                end,
                StatisticsTable::LongTerm,
                10,
            )
            .await
            .unwrap();
        assert!(stats.is_none());
    }

    #[tokio::test]
    async fn test_entity_listing_respects_limit() {
        let Some(recorder) = create_test_recorder().await else {
            eprintln!("Skipping test: HINDSIGHT_TEST_DATABASE_URL not set");
            return;
        };

        let since = Utc::now() - TimeDelta::days(7);
        let entities = recorder.recent_entities(since, None, 3).await.unwrap();
        assert!(entities.len() <= 3);
        for pair in entities.windows(2) {
            assert!(pair[0].last_seen >= pair[1].last_seen);
        }

        let sensors = recorder
            .recent_entities(since, Some("sensor"), 50)
            .await
            .unwrap();
        assert!(sensors.iter().all(|e| e.domain() == "sensor"));
    }
}

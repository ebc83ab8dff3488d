//! Bucketing of state series and roll-up of statistics rows.

use chrono::{DateTime, Datelike, NaiveTime, TimeDelta, Utc};
use hindsight_types::{Aggregation, HistoryPoint, Period, StatisticRecord};
use std::collections::BTreeMap;

/// Running aggregate of one bucket.
#[derive(Debug, Clone)]
struct Bucket {
    count: usize,
    sum: f64,
    min: f64,
    max: f64,
    first: (DateTime<Utc>, f64),
    last: (DateTime<Utc>, f64),
}

impl Bucket {
    fn new(t: DateTime<Utc>, v: f64) -> Self {
        Self {
            count: 1,
            sum: v,
            min: v,
            max: v,
            first: (t, v),
            last: (t, v),
        }
    }

    fn push(&mut self, t: DateTime<Utc>, v: f64) {
        self.count += 1;
        self.sum += v;
        self.min = self.min.min(v);
        self.max = self.max.max(v);
        if t < self.first.0 {
            self.first = (t, v);
        }
        if t >= self.last.0 {
            self.last = (t, v);
        }
    }

    fn value(&self, aggregation: Aggregation) -> f64 {
        match aggregation {
            Aggregation::Mean => self.sum / self.count as f64,
            Aggregation::Min => self.min,
            Aggregation::Max => self.max,
            Aggregation::Sum => self.sum,
            Aggregation::First => self.first.1,
            Aggregation::Last => self.last.1,
        }
    }
}

/// Partition `[start, end)` into buckets of `width` aligned to `start` and
/// aggregate the numeric points of each.
///
/// Buckets without numeric points are omitted. Each output point is stamped
/// with its bucket start.
pub fn bucketize(
    points: &[HistoryPoint],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    width: TimeDelta,
    aggregation: Aggregation,
) -> Vec<HistoryPoint> {
    let width_ms = width.num_milliseconds();
    if width_ms <= 0 {
        return Vec::new();
    }

    let mut buckets: BTreeMap<i64, Bucket> = BTreeMap::new();
    for point in points {
        if point.t < start || point.t >= end {
            continue;
        }
        let Some(v) = point.v.as_f64() else {
            continue;
        };
        let index = (point.t - start).num_milliseconds() / width_ms;
        buckets
            .entry(index)
            .and_modify(|b| b.push(point.t, v))
            .or_insert_with(|| Bucket::new(point.t, v));
    }

    buckets
        .into_iter()
        .map(|(index, bucket)| {
            let t = start + TimeDelta::milliseconds(index * width_ms);
            HistoryPoint::new(t, bucket.value(aggregation))
        })
        .collect()
}

/// Start of the UTC calendar period containing `t`. Weeks start on Monday.
pub fn period_start(t: DateTime<Utc>, period: Period) -> DateTime<Utc> {
    let date = t.date_naive();
    let midnight = |d: chrono::NaiveDate| d.and_time(NaiveTime::default()).and_utc();
    match period {
        Period::FiveMinute => {
            let secs = t.timestamp();
            DateTime::from_timestamp(secs - secs.rem_euclid(300), 0).unwrap_or(t)
        }
        Period::Hour => {
            let secs = t.timestamp();
            DateTime::from_timestamp(secs - secs.rem_euclid(3600), 0).unwrap_or(t)
        }
        Period::Day => midnight(date),
        Period::Week => {
            let offset = date.weekday().num_days_from_monday() as i64;
            midnight(date - TimeDelta::days(offset))
        }
        Period::Month => midnight(date.with_day(1).unwrap_or(date)),
    }
}

/// Roll hourly rows up into day, week or month rows.
///
/// Mean is the mean of the hourly means, min and max are the extremes, and
/// sum is the last cumulative sum of the period. Rows must be in time order.
pub fn rollup_statistics(records: &[StatisticRecord], period: Period) -> Vec<StatisticRecord> {
    let mut out: Vec<StatisticRecord> = Vec::new();
    let mut mean_acc: (f64, usize) = (0.0, 0);

    for record in records {
        let t = period_start(record.t, period);
        if out.last().is_none_or(|r| r.t != t) {
            finish_mean(out.last_mut(), mean_acc);
            mean_acc = (0.0, 0);
            out.push(StatisticRecord::new(t, period));
        }
        let Some(current) = out.last_mut() else {
            continue;
        };

        if let Some(mean) = record.mean {
            mean_acc.0 += mean;
            mean_acc.1 += 1;
        }
        if let Some(min) = record.min {
            current.min = Some(current.min.map_or(min, |m| m.min(min)));
        }
        if let Some(max) = record.max {
            current.max = Some(current.max.map_or(max, |m| m.max(max)));
        }
        if record.sum.is_some() {
            current.sum = record.sum;
        }
    }
    finish_mean(out.last_mut(), mean_acc);
    out
}

fn finish_mean(record: Option<&mut StatisticRecord>, (total, count): (f64, usize)) {
    if let Some(record) = record {
        if count > 0 {
            record.mean = Some(total / count as f64);
        }
    }
}

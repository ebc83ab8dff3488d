//! Synthetic recorder data for running without a database.
//!
//! Output is a pure function of the inputs: the noise generator is seeded
//! from the id and the requested range, never from the clock.

use super::aggregate::{period_start, rollup_statistics};
use super::{MAX_ROLLUP_SOURCE_ROWS, MAX_RAW_POINTS};
use chrono::{DateTime, TimeDelta, Timelike, Utc};
use hindsight_types::{
    domain_of, Entity, HistoryPoint, Interval, Period, PointValue, StatisticMeta, StatisticRecord,
};
use std::f64::consts::TAU;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

const BINARY_DOMAINS: [&str; 6] = [
    "binary_sensor",
    "switch",
    "light",
    "input_boolean",
    "lock",
    "fan",
];

/// Entities reported by `list_entities` in mock mode:
/// (entity id, unit, device class, has long-term statistics).
const MOCK_ENTITIES: [(&str, Option<&str>, Option<&str>, bool); 6] = [
    ("sensor.temperature", Some("°C"), Some("temperature"), true),
    ("sensor.humidity", Some("%"), Some("humidity"), true),
    ("sensor.pressure", Some("hPa"), Some("pressure"), true),
    ("sensor.power", Some("W"), Some("power"), true),
    ("binary_sensor.door", None, Some("door"), false),
    ("light.living_room", None, None, false),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Temperature,
    Humidity,
    Power,
    Binary,
    Generic,
}

fn shape_of(entity_id: &str) -> Shape {
    if BINARY_DOMAINS.contains(&domain_of(entity_id)) {
        return Shape::Binary;
    }
    let name = entity_id.to_ascii_lowercase();
    if name.contains("temp") {
        Shape::Temperature
    } else if name.contains("humid") {
        Shape::Humidity
    } else if name.contains("power") || name.contains("energy") || name.contains("watt") {
        Shape::Power
    } else {
        Shape::Generic
    }
}

/// FNV-1a over the id and both range bounds.
fn seed_for(id: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    id.bytes()
        .chain(start.timestamp().to_le_bytes())
        .chain(end.timestamp().to_le_bytes())
        .fold(FNV_OFFSET, |hash, byte| {
            (hash ^ byte as u64).wrapping_mul(FNV_PRIME)
        })
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// +1 at noon UTC, -1 at midnight.
fn daily_wave(t: DateTime<Utc>) -> f64 {
    let fraction = t.num_seconds_from_midnight() as f64 / 86_400.0;
    (TAU * (fraction - 0.25)).sin()
}

fn binary_on(t: DateTime<Utc>, seed: u64) -> bool {
    let toggle_secs = 900 + (seed % 2700) as i64;
    (t.timestamp().div_euclid(toggle_secs) as u64).wrapping_add(seed) % 2 == 0
}

fn numeric_sample(shape: Shape, t: DateTime<Utc>, seed: u64, rng: &mut fastrand::Rng) -> f64 {
    let noise = rng.f64() - 0.5;
    match shape {
        Shape::Temperature => 20.0 + 4.0 * daily_wave(t) + noise,
        Shape::Humidity => (50.0 - 10.0 * daily_wave(t) + 2.0 * noise).clamp(0.0, 100.0),
        Shape::Power => (120.0 + 400.0 * daily_wave(t).max(0.0) + 20.0 * noise).max(0.0),
        Shape::Binary => {
            if binary_on(t, seed) {
                1.0
            } else {
                0.0
            }
        }
        Shape::Generic => {
            let phase = TAU * t.timestamp() as f64 / 43_200.0;
            20.0 + (seed % 10) as f64 + 5.0 * phase.sin() + 2.0 * noise
        }
    }
}

fn sample(shape: Shape, t: DateTime<Utc>, seed: u64, rng: &mut fastrand::Rng) -> PointValue {
    match shape {
        Shape::Binary => PointValue::from(if binary_on(t, seed) { "on" } else { "off" }),
        _ => PointValue::Number(round2(numeric_sample(shape, t, seed, rng))),
    }
}

/// Spacing between samples: `base`, widened so `span` holds at most
/// `MAX_RAW_POINTS` samples.
fn sample_step(base: TimeDelta, span: TimeDelta) -> TimeDelta {
    let cap = MAX_RAW_POINTS as i64;
    let min_ms = (span.num_milliseconds() + cap - 1) / cap;
    TimeDelta::milliseconds(base.num_milliseconds().max(min_ms).max(1000))
}

/// A plausible series for `entity_id` over `[start, end)`.
///
/// Samples are 5 minutes apart for raw queries and a third of the bucket
/// width otherwise, so every bucket receives several samples.
pub fn series(
    entity_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    interval: Interval,
) -> Vec<HistoryPoint> {
    if end <= start {
        return Vec::new();
    }
    let base = interval
        .width()
        .map(|w| w / 3)
        .unwrap_or_else(|| TimeDelta::minutes(5));
    let step = sample_step(base, end - start);

    let seed = seed_for(entity_id, start, end);
    let mut rng = fastrand::Rng::with_seed(seed);
    let shape = shape_of(entity_id);

    let mut points = Vec::new();
    let mut t = start;
    while t < end && points.len() < MAX_RAW_POINTS {
        points.push(HistoryPoint::new(t, sample(shape, t, seed, &mut rng)));
        t += step;
    }
    points
}

/// Plausible statistics rows for `statistic_id` over `[start, end)`.
///
/// Rows are generated at the recorder's native granularity (5 minutes or
/// hourly) and rolled up for coarser periods, like real rows are.
pub fn statistics(
    statistic_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    period: Period,
) -> Vec<StatisticRecord> {
    let (native, step) = match period {
        Period::FiveMinute => (Period::FiveMinute, TimeDelta::minutes(5)),
        _ => (Period::Hour, TimeDelta::hours(1)),
    };
    let rollup = matches!(period, Period::Day | Period::Week | Period::Month);
    let cap = if rollup {
        MAX_ROLLUP_SOURCE_ROWS
    } else {
        MAX_RAW_POINTS
    };

    let seed = seed_for(statistic_id, start, end);
    let mut rng = fastrand::Rng::with_seed(seed);
    let shape = shape_of(statistic_id);
    let spread = if shape == Shape::Binary { 0.0 } else { 2.0 };
    let step_hours = step.num_seconds() as f64 / 3600.0;

    let mut t = period_start(start, native);
    if t < start {
        t += step;
    }
    let mut sum = 0.0;
    let mut rows = Vec::new();
    while t < end && rows.len() < cap {
        let mean = numeric_sample(shape, t, seed, &mut rng);
        sum += mean.abs() * step_hours;
        let mut row = StatisticRecord::new(t, native);
        row.mean = Some(round2(mean));
        row.min = Some(round2(mean - spread));
        row.max = Some(round2(mean + spread));
        row.sum = Some(round2(sum));
        rows.push(row);
        t += step;
    }

    if rollup {
        rollup_statistics(&rows, period)
    } else {
        rows
    }
}

/// Mock entities, most recently seen first.
pub fn entities(now: DateTime<Utc>, domain: Option<&str>) -> Vec<Entity> {
    MOCK_ENTITIES
        .iter()
        .enumerate()
        .filter(|(_, (id, ..))| domain.is_none_or(|d| domain_of(id) == d))
        .map(|(i, (id, unit, class, _))| Entity {
            entity_id: id.to_string(),
            last_seen: now - TimeDelta::minutes(2 * (i as i64 + 1)),
            unit: unit.map(str::to_string),
            device_class: class.map(str::to_string),
        })
        .collect()
}

/// Mock statistics metadata, ordered by id.
pub fn statistic_metadata(domain: Option<&str>) -> Vec<StatisticMeta> {
    let mut metas: Vec<StatisticMeta> = MOCK_ENTITIES
        .iter()
        .filter(|(id, _, _, has_stats)| *has_stats && domain.is_none_or(|d| domain_of(id) == d))
        .map(|(id, unit, ..)| StatisticMeta {
            statistic_id: id.to_string(),
            source: "recorder".to_string(),
            unit: unit.map(str::to_string),
        })
        .collect();
    metas.sort_by(|a, b| a.statistic_id.cmp(&b.statistic_id));
    metas
}

/// Unit of a mock statistic, if it is one of the known mock entities.
pub fn unit_of(statistic_id: &str) -> Option<String> {
    MOCK_ENTITIES
        .iter()
        .find(|(id, ..)| *id == statistic_id)
        .and_then(|(_, unit, ..)| unit.map(str::to_string))
}

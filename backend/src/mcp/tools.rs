//! Tool catalog and argument validation.

use crate::query::{
    parse_timestamp, EntityFilter, HistoryRequest, QueryEngine, QueryError, StatisticsRequest,
    DEFAULT_ENTITY_LIMIT,
};
use chrono::{DateTime, Utc};
use hindsight_types::{
    Aggregation, DatabaseMode, EffectiveConfig, HealthReport, Interval, Period, StatisticField,
    ToolDescriptor,
};
use serde_json::{json, Map, Value};
use std::str::FromStr;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// JSON type of a tool argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Integer,
    Boolean,
    StringArray,
}

impl FieldKind {
    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Integer => value.is_i64() || value.is_u64(),
            FieldKind::Boolean => value.is_boolean(),
            FieldKind::StringArray => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_string)),
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            FieldKind::String => "a string",
            FieldKind::Integer => "an integer",
            FieldKind::Boolean => "a boolean",
            FieldKind::StringArray => "an array of strings",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum FieldDefault {
    Str(&'static str),
    Int(i64),
    Bool(bool),
}

/// One argument of a tool.
#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    pub description: &'static str,
    /// Accepted values, listed in the schema
    pub values: &'static [&'static str],
    pub default: Option<FieldDefault>,
}

impl Field {
    const fn required(name: &'static str, kind: FieldKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: true,
            description,
            values: &[],
            default: None,
        }
    }

    const fn optional(name: &'static str, kind: FieldKind, description: &'static str) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }

    const fn one_of(self, values: &'static [&'static str]) -> Self {
        Self { values, ..self }
    }

    const fn with_default(self, default: FieldDefault) -> Self {
        Self {
            default: Some(default),
            ..self
        }
    }

    fn schema(&self) -> Value {
        let mut schema = Map::new();
        let type_name = match self.kind {
            FieldKind::String => "string",
            FieldKind::Integer => "integer",
            FieldKind::Boolean => "boolean",
            FieldKind::StringArray => "array",
        };
        schema.insert("type".into(), json!(type_name));
        schema.insert("description".into(), json!(self.description));
        if !self.values.is_empty() {
            let values = json!(self.values);
            if self.kind == FieldKind::StringArray {
                schema.insert("items".into(), json!({"type": "string", "enum": values}));
            } else {
                schema.insert("enum".into(), values);
            }
        }
        match self.default {
            Some(FieldDefault::Str(s)) => {
                schema.insert("default".into(), json!(s));
            }
            Some(FieldDefault::Int(i)) => {
                schema.insert("default".into(), json!(i));
            }
            Some(FieldDefault::Bool(b)) => {
                schema.insert("default".into(), json!(b));
            }
            None => {}
        }
        Value::Object(schema)
    }
}

const INTERVALS: &[&str] = &["raw", "5m", "15m", "30m", "1h", "6h", "1d"];
const AGGREGATIONS: &[&str] = &["mean", "min", "max", "sum", "last", "first"];
const PERIODS: &[&str] = &["5minute", "hour", "day", "week", "month"];
const STATISTIC_FIELDS: &[&str] = &["mean", "min", "max", "sum"];

const GET_HISTORY_FIELDS: &[Field] = &[
    Field::required(
        "entity_id",
        FieldKind::String,
        "The entity to query (e.g., 'sensor.temperature')",
    ),
    Field::required(
        "start",
        FieldKind::String,
        "Start of the range, ISO 8601 (inclusive)",
    ),
    Field::required("end", FieldKind::String, "End of the range, ISO 8601 (exclusive)"),
    Field::optional(
        "interval",
        FieldKind::String,
        "Bucket width, or 'raw' for the recorded states",
    )
    .one_of(INTERVALS)
    .with_default(FieldDefault::Str("1h")),
    Field::optional(
        "aggregation",
        FieldKind::String,
        "Aggregation applied to each bucket",
    )
    .one_of(AGGREGATIONS)
    .with_default(FieldDefault::Str("mean")),
    Field::optional(
        "include_attributes",
        FieldKind::Boolean,
        "Include state attributes on raw points",
    )
    .with_default(FieldDefault::Bool(false)),
];

const GET_STATISTICS_FIELDS: &[Field] = &[
    Field::required(
        "statistic_id",
        FieldKind::String,
        "The statistic to query (e.g., 'sensor.energy')",
    ),
    Field::required(
        "start",
        FieldKind::String,
        "Start of the range, ISO 8601 (inclusive)",
    ),
    Field::required("end", FieldKind::String, "End of the range, ISO 8601 (exclusive)"),
    Field::optional("period", FieldKind::String, "Statistics period")
        .one_of(PERIODS)
        .with_default(FieldDefault::Str("hour")),
    Field::optional(
        "fields",
        FieldKind::StringArray,
        "Columns to return (default: all)",
    )
    .one_of(STATISTIC_FIELDS),
];

const LIST_ENTITIES_FIELDS: &[Field] = &[
    Field::optional(
        "domain",
        FieldKind::String,
        "Only entities of this domain (e.g., 'sensor')",
    ),
    Field::optional(
        "limit",
        FieldKind::Integer,
        "Maximum number of entities to return (1-500)",
    )
    .with_default(FieldDefault::Int(DEFAULT_ENTITY_LIMIT as i64)),
];

/// The fixed set of tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    GetHistory,
    GetStatistics,
    ListEntities,
    HealthCheck,
}

impl Tool {
    pub const ALL: [Tool; 4] = [
        Tool::GetHistory,
        Tool::GetStatistics,
        Tool::ListEntities,
        Tool::HealthCheck,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Tool::GetHistory => "get_history",
            Tool::GetStatistics => "get_statistics",
            Tool::ListEntities => "list_entities",
            Tool::HealthCheck => "health_check",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Tool::GetHistory => {
                "Get the state history of an entity, raw or aggregated into time buckets"
            }
            Tool::GetStatistics => {
                "Get long-term statistics (mean, min, max, sum) of a sensor"
            }
            Tool::ListEntities => {
                "List entities recorded in the last 7 days, plus available statistics"
            }
            Tool::HealthCheck => "Check server and database health",
        }
    }

    pub fn fields(&self) -> &'static [Field] {
        match self {
            Tool::GetHistory => GET_HISTORY_FIELDS,
            Tool::GetStatistics => GET_STATISTICS_FIELDS,
            Tool::ListEntities => LIST_ENTITIES_FIELDS,
            Tool::HealthCheck => &[],
        }
    }

    pub fn from_name(name: &str) -> Option<Tool> {
        Tool::ALL.into_iter().find(|t| t.name() == name)
    }

    /// JSON Schema of the arguments.
    pub fn input_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .fields()
            .iter()
            .map(|f| (f.name.to_string(), f.schema()))
            .collect();
        let required: Vec<&str> = self
            .fields()
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name)
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false
        })
    }

    pub fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// Check `args` against `fields`: an object, no unknown keys, required keys
/// present, types matching. `null` counts as absent.
pub fn validate_arguments(fields: &[Field], args: Value) -> Result<Map<String, Value>, ToolError> {
    let mut args = match args {
        Value::Null => Map::new(),
        Value::Object(map) => map,
        other => {
            return Err(ToolError::InvalidArguments(format!(
                "arguments must be an object, got {}",
                json_type(&other)
            )))
        }
    };
    args.retain(|_, v| !v.is_null());

    if let Some(unknown) = args.keys().find(|k| !fields.iter().any(|f| f.name == k.as_str())) {
        return Err(ToolError::InvalidArguments(format!(
            "unknown argument '{}'",
            unknown
        )));
    }
    for field in fields {
        match args.get(field.name) {
            None if field.required => {
                return Err(ToolError::InvalidArguments(format!(
                    "missing required argument '{}'",
                    field.name
                )))
            }
            Some(value) if !field.kind.matches(value) => {
                return Err(ToolError::InvalidArguments(format!(
                    "argument '{}' must be {}",
                    field.name,
                    field.kind.describe()
                )))
            }
            _ => {}
        }
    }
    Ok(args)
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn str_arg<'a>(args: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    args.get(name).and_then(Value::as_str)
}

fn required_str<'a>(args: &'a Map<String, Value>, name: &str) -> Result<&'a str, ToolError> {
    str_arg(args, name)
        .ok_or_else(|| ToolError::InvalidArguments(format!("missing required argument '{}'", name)))
}

fn timestamp_arg(args: &Map<String, Value>, name: &str) -> Result<DateTime<Utc>, ToolError> {
    let raw = required_str(args, name)?;
    parse_timestamp(raw).ok_or_else(|| {
        QueryError::InvalidParameter(format!("{} is not a valid timestamp: '{}'", name, raw)).into()
    })
}

/// Parse an optional tag argument, falling back to `default`.
fn tag_arg<T>(args: &Map<String, Value>, name: &str, default: T) -> Result<T, ToolError>
where
    T: FromStr<Err = hindsight_types::UnknownTag>,
{
    match str_arg(args, name) {
        Some(raw) => raw
            .parse()
            .map_err(|e: hindsight_types::UnknownTag| QueryError::InvalidParameter(e.to_string()).into()),
        None => Ok(default),
    }
}

/// Parse `start` and `end` and check the range, before any other argument
/// is looked at.
fn range_args(
    engine: &QueryEngine,
    args: &Map<String, Value>,
) -> Result<(DateTime<Utc>, DateTime<Utc>), ToolError> {
    let start = timestamp_arg(args, "start")?;
    let end = timestamp_arg(args, "end")?;
    engine.validate_range(start, end)?;
    Ok((start, end))
}

fn history_request(
    engine: &QueryEngine,
    args: &Map<String, Value>,
) -> Result<HistoryRequest, ToolError> {
    let (start, end) = range_args(engine, args)?;
    Ok(HistoryRequest {
        entity_id: required_str(args, "entity_id")?.to_string(),
        start,
        end,
        interval: tag_arg(args, "interval", Interval::Hour)?,
        aggregation: tag_arg(args, "aggregation", Aggregation::Mean)?,
        include_attributes: args
            .get("include_attributes")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

fn statistics_request(
    engine: &QueryEngine,
    args: &Map<String, Value>,
) -> Result<StatisticsRequest, ToolError> {
    let (start, end) = range_args(engine, args)?;
    let fields = match args.get("fields").and_then(Value::as_array) {
        Some(items) => Some(
            items
                .iter()
                .filter_map(Value::as_str)
                .map(|s| {
                    StatisticField::from_str(s)
                        .map_err(|e| ToolError::from(QueryError::InvalidParameter(e.to_string())))
                })
                .collect::<Result<Vec<_>, _>>()?,
        ),
        None => None,
    };
    Ok(StatisticsRequest {
        statistic_id: required_str(args, "statistic_id")?.to_string(),
        start,
        end,
        period: tag_arg(args, "period", Period::Hour)?,
        fields,
    })
}

fn entity_filter(args: &Map<String, Value>) -> Result<EntityFilter, ToolError> {
    let limit = match args.get("limit") {
        Some(value) => {
            let limit = value.as_i64().unwrap_or(-1);
            usize::try_from(limit).map_err(|_| {
                QueryError::InvalidParameter(format!("limit must be positive, got {}", value))
            })?
        }
        None => DEFAULT_ENTITY_LIMIT,
    };
    Ok(EntityFilter {
        domain: str_arg(args, "domain").map(str::to_string),
        limit,
    })
}

/// Static tool table bound to the query engine.
#[derive(Clone)]
pub struct ToolRegistry {
    engine: QueryEngine,
    config: EffectiveConfig,
}

impl ToolRegistry {
    pub fn new(engine: QueryEngine, config: EffectiveConfig) -> Self {
        Self { engine, config }
    }

    pub fn list(&self) -> Vec<ToolDescriptor> {
        Tool::ALL.iter().map(Tool::descriptor).collect()
    }

    pub fn len(&self) -> usize {
        Tool::ALL.len()
    }

    pub fn is_empty(&self) -> bool {
        Tool::ALL.is_empty()
    }

    /// Validate the arguments and run the tool. The result is the tool's
    /// structured output, before MCP content wrapping.
    pub async fn invoke(&self, name: &str, args: Value) -> Result<Value, ToolError> {
        let Some(tool) = Tool::from_name(name) else {
            warn!("MCP: Unknown tool: {}", name);
            return Err(ToolError::UnknownTool(name.to_string()));
        };
        let args = validate_arguments(tool.fields(), args)?;
        info!("MCP: Calling tool {}", tool.name());

        match tool {
            Tool::GetHistory => {
                let request = history_request(&self.engine, &args)?;
                to_value(self.engine.get_history(&request).await?)
            }
            Tool::GetStatistics => {
                let request = statistics_request(&self.engine, &args)?;
                to_value(self.engine.get_statistics(&request).await?)
            }
            Tool::ListEntities => to_value(self.engine.list_entities(&entity_filter(&args)?).await?),
            Tool::HealthCheck => to_value(self.health_check().await),
        }
    }

    /// Report server status, database status and effective configuration.
    pub async fn health_check(&self) -> HealthReport {
        let detail = self.engine.database_health().await;
        let database = if detail.connected {
            DatabaseMode::Connected
        } else {
            DatabaseMode::MockMode
        };
        HealthReport {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now(),
            database,
            database_detail: detail,
            read_only: self.config.read_only,
            timescaledb: self.config.timescaledb,
            configuration: self.config.clone(),
            tool_count: self.len(),
            sessions: None,
            mock_data: database == DatabaseMode::MockMode,
        }
    }
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value, ToolError> {
    serde_json::to_value(value).map_err(|e| ToolError::Internal(e.to_string()))
}

//! Configuration management.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use garde::Validate;
use hindsight_types::EffectiveConfig;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variables understood by the server and the config key each
/// one sets. These are the names Home Assistant add-ons and libpq use, so
/// they are not prefixed.
const ENV_KEYS: &[(&str, &str)] = &[
    ("PGHOST", "database.host"),
    ("PGPORT", "database.port"),
    ("PGDATABASE", "database.name"),
    ("PGUSER", "database.user"),
    ("PGPASSWORD", "database.password"),
    ("MCP_READ_ONLY", "database.read_only"),
    ("MCP_ENABLE_TIMESCALEDB", "database.timescaledb"),
    ("MCP_QUERY_TIMEOUT", "query.timeout_secs"),
    ("MCP_MAX_QUERY_DAYS", "query.max_query_days"),
    ("LOG_LEVEL", "logging.log_level"),
    ("MCP_PORT", "server.port"),
];

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Application configuration. Matches the TOML file format.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct Config {
    #[serde(default)]
    #[garde(dive)]
    pub server: ServerConfig,
    #[serde(default)]
    #[garde(dive)]
    pub database: DatabaseConfig,
    #[serde(default)]
    #[garde(dive)]
    pub query: QueryConfig,
    #[serde(default)]
    #[garde(dive)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    #[garde(range(min = 1))]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

/// Recorder database connection settings.
#[derive(Clone, Serialize, Deserialize, Validate)]
pub struct DatabaseConfig {
    #[serde(default = "default_host", deserialize_with = "lenient_string")]
    #[garde(length(min = 1))]
    pub host: String,
    #[serde(default = "default_db_port")]
    #[garde(range(min = 1))]
    pub port: u16,
    #[serde(default = "default_db_name", deserialize_with = "lenient_string")]
    #[garde(length(min = 1))]
    pub name: String,
    #[serde(default = "default_db_user", deserialize_with = "lenient_string")]
    #[garde(length(min = 1))]
    pub user: String,
    #[serde(default, deserialize_with = "lenient_string")]
    #[garde(skip)]
    pub password: String,
    /// Open every transaction read-only
    #[serde(default = "default_true", deserialize_with = "lenient_bool")]
    #[garde(skip)]
    pub read_only: bool,
    /// Probe for the timescaledb extension
    #[serde(default, deserialize_with = "lenient_bool")]
    #[garde(skip)]
    pub timescaledb: bool,
    #[serde(default = "default_min_connections")]
    #[garde(range(max = 100))]
    pub min_connections: u32,
    #[serde(default = "default_max_connections")]
    #[garde(range(min = 1, max = 100))]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_db_port(),
            name: default_db_name(),
            user: default_db_user(),
            password: String::new(),
            read_only: true,
            timescaledb: false,
            min_connections: default_min_connections(),
            max_connections: default_max_connections(),
        }
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("read_only", &self.read_only)
            .field("timescaledb", &self.timescaledb)
            .field("min_connections", &self.min_connections)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct QueryConfig {
    /// Upper bound for one storage round-trip, in seconds
    #[serde(default = "default_timeout_secs")]
    #[garde(range(min = 1, max = 600))]
    pub timeout_secs: u64,
    /// Longest accepted `end - start`, in days
    #[serde(default = "default_max_query_days")]
    #[garde(range(min = 1, max = 3650))]
    pub max_query_days: u32,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_query_days: default_max_query_days(),
        }
    }
}

impl QueryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct LoggingConfig {
    /// Path to log file (if set, logs will be written to file in addition to stdout)
    #[serde(default)]
    #[garde(skip)]
    pub log_file: Option<PathBuf>,
    /// Log level (trace, debug, info, warn, error)
    /// If not set, uses RUST_LOG environment variable or defaults to "info"
    #[serde(default, deserialize_with = "lenient_opt_string")]
    #[garde(custom(validate_log_level))]
    pub log_level: Option<String>,
}

fn default_port() -> u16 {
    hindsight_types::DEFAULT_PORT
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_db_port() -> u16 {
    5432
}

fn default_db_name() -> String {
    "homeassistant".to_string()
}

fn default_db_user() -> String {
    "homeassistant".to_string()
}

fn default_true() -> bool {
    true
}

fn default_min_connections() -> u32 {
    2
}

fn default_max_connections() -> u32 {
    10
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_query_days() -> u32 {
    90
}

fn validate_log_level(value: &Option<String>, _context: &()) -> garde::Result {
    match value {
        Some(level) if !LOG_LEVELS.contains(&level.to_ascii_lowercase().as_str()) => Err(
            garde::Error::new(format!("must be one of {}", LOG_LEVELS.join(", "))),
        ),
        _ => Ok(()),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Scalar::Bool(b) => b.to_string(),
            Scalar::Int(i) => i.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Text(s) => s,
        }
    }
}

/// Accept numbers and booleans for string settings. Environment values are
/// parsed eagerly, so `PGPASSWORD=1234` arrives as an integer.
fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Scalar::deserialize(deserializer).map(Scalar::into_string)
}

fn lenient_opt_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Option::<Scalar>::deserialize(deserializer).map(|v| v.map(Scalar::into_string))
}

/// Accept `true`/`false` in any case as well as `1`/`0` and `yes`/`no`.
fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    match Scalar::deserialize(deserializer)? {
        Scalar::Bool(b) => Ok(b),
        Scalar::Int(i) => Ok(i != 0),
        Scalar::Float(f) => Ok(f != 0.0),
        Scalar::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "invalid boolean '{}'",
                other
            ))),
        },
    }
}

impl Config {
    /// Load configuration with full priority chain: CLI args > env vars > config files > defaults.
    ///
    /// Config files are searched in this order (later wins):
    /// 1. `config.toml` in user config directory (~/.config/hindsight/ on Linux)
    /// 2. `.hindsight.toml` in current directory
    /// 3. the file passed with `--config`
    pub fn from_figment(port: Option<u16>, config_file: Option<&Path>) -> anyhow::Result<Self> {
        let local_config = std::env::current_dir()
            .ok()
            .map(|d| d.join(".hindsight.toml"));
        let user_config = directories::ProjectDirs::from("", "", "hindsight")
            .map(|dirs| dirs.config_dir().join("config.toml"));

        // 1. Start with defaults
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        // 2. Merge user config file if it exists
        if let Some(ref path) = user_config {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            }
        }

        // 3. Merge local config file if it exists
        if let Some(ref path) = local_config {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            }
        }

        // 4. An explicit config file must exist
        if let Some(path) = config_file {
            anyhow::ensure!(path.exists(), "config file {} not found", path.display());
            figment = figment.merge(Toml::file(path));
        }

        // 5. Merge the fixed environment variable table
        figment = figment.merge(Env::raw().filter_map(|key| {
            ENV_KEYS
                .iter()
                .find(|(var, _)| key.as_str().eq_ignore_ascii_case(var))
                .map(|(_, path)| (*path).into())
        }));

        // 6. Merge CLI arguments (highest priority)
        if let Some(p) = port {
            figment = figment.merge(Serialized::default("server.port", p));
        }

        let config: Config = figment.extract()?;
        config.validated()
    }

    /// Run the validation rules. Invalid configuration aborts startup.
    pub fn validated(self) -> anyhow::Result<Self> {
        if let Err(report) = Validate::validate(&self) {
            anyhow::bail!("invalid configuration: {}", report);
        }
        anyhow::ensure!(
            self.database.min_connections <= self.database.max_connections,
            "invalid configuration: database.min_connections ({}) exceeds database.max_connections ({})",
            self.database.min_connections,
            self.database.max_connections
        );
        Ok(self)
    }

    /// The configuration as reported by `health_check`, without the password.
    pub fn effective(&self) -> EffectiveConfig {
        EffectiveConfig {
            host: self.database.host.clone(),
            port: self.database.port,
            database: self.database.name.clone(),
            user: self.database.user.clone(),
            read_only: self.database.read_only,
            timescaledb: self.database.timescaledb,
            query_timeout: self.query.timeout_secs,
            max_query_days: self.query.max_query_days,
            min_connections: self.database.min_connections,
            max_connections: self.database.max_connections,
        }
    }
}

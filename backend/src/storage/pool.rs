//! Connection pool lifecycle for the recorder database.

use super::{Result, StorageError};
use crate::config::DatabaseConfig;
use hindsight_types::DatabaseDetail;
use parking_lot::RwLock;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Application name reported to PostgreSQL (visible in `pg_stat_activity`).
pub const APPLICATION_NAME: &str = "hindsight";

/// Upper bound for the connectivity probe run by `health()`.
pub const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Upper bound for the probe run while initializing.
const STARTUP_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Recorder tables the query layer reads from.
const RECORDER_TABLES: [&str; 6] = [
    "states",
    "states_meta",
    "state_attributes",
    "statistics",
    "statistics_short_term",
    "statistics_meta",
];

/// Lifecycle of the pool. `Absent` is never stored on a manager; it is what
/// `AppState::pool_state` reports when no manager exists at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Absent,
    Initializing,
    Ready,
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Database unavailable: {0}")]
    Unavailable(String),
}

/// Owns the PostgreSQL connection pool.
pub struct PoolManager {
    pool: PgPool,
    state: RwLock<PoolState>,
    timescaledb: bool,
}

impl PoolManager {
    /// Build the pool and probe the database once.
    ///
    /// On any failure the pool is dropped and `PoolError::Unavailable` is
    /// returned so the caller can fall back to mock mode.
    pub async fn initialize(
        config: &DatabaseConfig,
        query_timeout: Duration,
    ) -> std::result::Result<Self, PoolError> {
        info!(
            "Connecting to PostgreSQL at {}:{}/{} as {} (pool {}..={}, read-only: {})",
            config.host,
            config.port,
            config.name,
            config.user,
            config.min_connections,
            config.max_connections,
            config.read_only
        );

        let pool = PgPoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections)
            .acquire_timeout(query_timeout)
            .connect_lazy_with(Self::connect_options(config, query_timeout));

        let manager = Self {
            pool,
            state: RwLock::new(PoolState::Initializing),
            timescaledb: config.timescaledb,
        };

        let probe = sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(&manager.pool);
        match tokio::time::timeout(STARTUP_PROBE_TIMEOUT, probe).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                manager.pool.close().await;
                return Err(PoolError::Unavailable(e.to_string()));
            }
            Err(_) => {
                manager.pool.close().await;
                return Err(PoolError::Unavailable(format!(
                    "no answer within {}s",
                    STARTUP_PROBE_TIMEOUT.as_secs()
                )));
            }
        }

        *manager.state.write() = PoolState::Ready;
        info!("PostgreSQL connection established");

        manager.check_tables().await;
        if manager.timescaledb {
            match manager.timescaledb_installed().await {
                Ok(true) => info!("TimescaleDB extension detected"),
                Ok(false) => warn!("TimescaleDB enabled in configuration but extension not found"),
                Err(e) => warn!("Could not check for TimescaleDB: {}", e),
            }
        }

        Ok(manager)
    }

    /// Connection options for every pooled connection.
    ///
    /// Each session carries the application name and a statement timeout;
    /// read-only mode makes every transaction read-only at the server.
    pub fn connect_options(config: &DatabaseConfig, query_timeout: Duration) -> PgConnectOptions {
        let mut options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.name)
            .username(&config.user)
            .application_name(APPLICATION_NAME)
            .options([("statement_timeout", query_timeout.as_millis().to_string())]);

        if !config.password.is_empty() {
            options = options.password(&config.password);
        }
        if config.read_only {
            options = options.options([("default_transaction_read_only", "on")]);
        }
        options
    }

    pub fn state(&self) -> PoolState {
        *self.state.read()
    }

    /// The pool, unless it has been shut down.
    pub fn pool(&self) -> Result<&PgPool> {
        match self.state() {
            PoolState::Ready => Ok(&self.pool),
            _ => Err(StorageError::Closed),
        }
    }

    /// Close all connections. Calling this more than once is harmless.
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.write();
            if *state == PoolState::Closed {
                return;
            }
            *state = PoolState::Closed;
        }
        self.pool.close().await;
        info!("PostgreSQL connection pool closed");
    }

    /// Probe connectivity within `HEALTH_PROBE_TIMEOUT`.
    pub async fn health(&self) -> DatabaseDetail {
        let pool = match self.pool() {
            Ok(pool) => pool,
            Err(e) => return DatabaseDetail::disconnected(e.to_string()),
        };

        let probe = async {
            sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(pool).await?;
            let version: String = sqlx::query_scalar("SHOW server_version")
                .fetch_one(pool)
                .await?;
            Ok::<_, sqlx::Error>(version)
        };

        let version = match tokio::time::timeout(HEALTH_PROBE_TIMEOUT, probe).await {
            Ok(Ok(version)) => version,
            Ok(Err(e)) => {
                warn!("Database health probe failed: {}", e);
                return DatabaseDetail::disconnected(format!("probe failed: {}", e));
            }
            Err(_) => {
                warn!("Database health probe timed out");
                return DatabaseDetail::disconnected(format!(
                    "probe timed out after {}s",
                    HEALTH_PROBE_TIMEOUT.as_secs()
                ));
            }
        };

        let timescaledb = if self.timescaledb {
            self.timescaledb_installed().await.ok()
        } else {
            None
        };

        DatabaseDetail {
            connected: true,
            detail: format!("connected ({} idle of {})", self.pool.num_idle(), self.pool.size()),
            server_version: Some(version),
            timescaledb,
        }
    }

    async fn timescaledb_installed(&self) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM pg_extension WHERE extname = 'timescaledb'",
        )
        .fetch_one(self.pool()?)
        .await?;
        Ok(count > 0)
    }

    /// Log which recorder tables are present. Missing tables are not fatal;
    /// queries against them fail and fall back to mock data.
    async fn check_tables(&self) {
        let Ok(pool) = self.pool() else {
            return;
        };
        let found: std::result::Result<Vec<String>, _> = sqlx::query_scalar(
            "SELECT table_name::text FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_name = ANY($1)",
        )
        .bind(&RECORDER_TABLES[..])
        .fetch_all(pool)
        .await;

        match found {
            Ok(found) => {
                for table in RECORDER_TABLES {
                    if found.iter().any(|t| t == table) {
                        debug!("Recorder table '{}' present", table);
                    } else {
                        warn!("Recorder table '{}' not found", table);
                    }
                }
                info!(
                    "Found {} of {} recorder tables",
                    found.len(),
                    RECORDER_TABLES.len()
                );
            }
            Err(e) => warn!("Could not inspect recorder tables: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_database_config;

    #[tokio::test]
    async fn test_unreachable_database_is_unavailable() {
        let config = DatabaseConfig {
            host: "127.0.0.1".to_string(),
            // Nothing listens on the discard port
            port: 9,
            ..DatabaseConfig::default()
        };
        let result = PoolManager::initialize(&config, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(PoolError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_initialize_and_shutdown() {
        let Some(config) = test_database_config() else {
            eprintln!("Skipping test: HINDSIGHT_TEST_DATABASE_URL not set");
            return;
        };

        let manager = PoolManager::initialize(&config, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(manager.state(), PoolState::Ready);

        let detail = manager.health().await;
        assert!(detail.connected);
        assert!(detail.server_version.is_some());

        manager.shutdown().await;
        manager.shutdown().await;
        assert_eq!(manager.state(), PoolState::Closed);
        assert!(!manager.health().await.connected);
    }

    #[tokio::test]
    async fn test_read_only_rejects_writes() {
        let Some(config) = test_database_config() else {
            eprintln!("Skipping test: HINDSIGHT_TEST_DATABASE_URL not set");
            return;
        };

        let manager = PoolManager::initialize(&config, Duration::from_secs(5))
            .await
            .unwrap();
        let result = sqlx::query("CREATE TEMP TABLE hindsight_write_probe (id int)")
            .execute(manager.pool().unwrap())
            .await;
        assert!(result.is_err());
        manager.shutdown().await;
    }
}

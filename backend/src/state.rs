//! Application state management.

use crate::config::Config;
use crate::mcp::{SessionManager, ToolRegistry, DEFAULT_KEEPALIVE};
use crate::query::{QueryEngine, QueryLimits};
use crate::storage::{PoolManager, PoolState, PostgresRecorder, Recorder};
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Tool table bound to the query engine
    registry: ToolRegistry,
    /// Open streaming sessions
    sessions: SessionManager,
    /// Connection pool, absent in mock mode
    pool: Option<Arc<PoolManager>>,
}

impl AppState {
    /// Create state around an optional recorder.
    pub fn new(
        config: &Config,
        recorder: Option<Arc<dyn Recorder>>,
        pool: Option<Arc<PoolManager>>,
    ) -> Self {
        let limits = QueryLimits {
            timeout: config.query.timeout(),
            max_query_days: config.query.max_query_days,
        };
        let registry = ToolRegistry::new(QueryEngine::new(recorder, limits), config.effective());
        let sessions = SessionManager::new(registry.list(), DEFAULT_KEEPALIVE);
        Self {
            inner: Arc::new(AppStateInner {
                registry,
                sessions,
                pool,
            }),
        }
    }

    /// Connect to the recorder database, or fall back to mock mode when it
    /// cannot be reached.
    pub async fn from_config(config: &Config) -> Self {
        match PoolManager::initialize(&config.database, config.query.timeout()).await {
            Ok(pool) => {
                let pool = Arc::new(pool);
                let recorder: Arc<dyn Recorder> = Arc::new(PostgresRecorder::new(pool.clone()));
                Self::new(config, Some(recorder), Some(pool))
            }
            Err(e) => {
                warn!("{}. Serving mock data", e);
                Self::new(config, None, None)
            }
        }
    }

    /// State without a database. Every tool answers with mock data.
    pub fn mock(config: &Config) -> Self {
        Self::new(config, None, None)
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.inner.registry
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.inner.sessions
    }

    pub fn is_mock(&self) -> bool {
        self.inner.pool.is_none()
    }

    /// Lifecycle of the database pool, `Absent` in mock mode.
    pub fn pool_state(&self) -> PoolState {
        self.inner
            .pool
            .as_ref()
            .map_or(PoolState::Absent, |pool| pool.state())
    }

    /// Close every session, then the pool.
    pub async fn shutdown(&self) {
        info!("Shutting down");
        self.inner.sessions.shutdown().await;
        if let Some(pool) = &self.inner.pool {
            pool.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryRecorder;

    #[tokio::test]
    async fn test_mock_state_has_no_pool() {
        let state = AppState::mock(&Config::default());
        assert!(state.is_mock());
        assert_eq!(state.pool_state(), PoolState::Absent);
        assert_eq!(state.sessions().session_count().await, 0);
    }

    #[tokio::test]
    async fn test_recorder_without_pool() {
        let recorder: Arc<dyn Recorder> = Arc::new(MemoryRecorder::new());
        let state = AppState::new(&Config::default(), Some(recorder), None);
        assert_eq!(state.pool_state(), PoolState::Absent);
        assert!(state.registry().health_check().await.database_detail.connected);
    }
}

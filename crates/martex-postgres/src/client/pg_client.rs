use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use deadpool::managed::{Hook, Pool};
use derive_more::{Deref, DerefMut};
use diesel_async::pooled_connection::{AsyncDieselConnectionManager, ManagerConfig};
use diesel_async::scoped_futures::ScopedBoxFuture;
use diesel_async::{AsyncConnection, RunQueryDsl};

use super::custom_hooks;
use crate::{
    ConnectionPool, PgConfig, PgError, PgResult, PooledConnection, TRACING_TARGET_CONNECTION,
};

/// Acquisitions slower than this are logged with the pool state.
const SLOW_ACQUIRE: Duration = Duration::from_millis(250);

/// Connection counts of the pool at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PgPoolStatus {
    /// Configured maximum.
    pub max_size: usize,
    /// Open connections.
    pub size: usize,
    /// Open connections not handed out.
    pub available: usize,
    /// Callers waiting for a connection.
    pub waiting: usize,
}

impl PgPoolStatus {
    /// Returns the number of connections handed out.
    #[inline]
    pub fn in_use(&self) -> usize {
        self.size.saturating_sub(self.available)
    }

    /// Returns whether every connection is handed out or callers are queueing.
    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.waiting > 0 || (self.size >= self.max_size && self.available == 0)
    }
}

fn build_pool(config: &PgConfig) -> PgResult<ConnectionPool> {
    let mut manager_config = ManagerConfig::default();
    manager_config.custom_setup = Box::new(custom_hooks::setup_callback);
    let manager =
        AsyncDieselConnectionManager::new_with_config(&config.database_url, manager_config);

    Pool::builder(manager)
        .max_size(config.max_connections as usize)
        .wait_timeout(Some(config.acquire_timeout()))
        .create_timeout(Some(config.acquire_timeout()))
        .recycle_timeout(config.idle_timeout())
        .runtime(deadpool::Runtime::Tokio1)
        .post_create(Hook::sync_fn(custom_hooks::post_create))
        .pre_recycle(Hook::sync_fn(custom_hooks::pre_recycle))
        .build()
        .map_err(|e| PgError::Unexpected(format!("Failed to build connection pool: {e}").into()))
}

/// Pooled client for the report database.
///
/// Clones share one pool.
#[derive(Clone)]
pub struct PgClient {
    inner: Arc<PgClientInner>,
}

struct PgClientInner {
    pool: ConnectionPool,
    config: PgConfig,
}

impl PgClient {
    /// Creates the pool; no connection is opened until the first checkout.
    pub fn new(config: PgConfig) -> PgResult<Self> {
        let pool = build_pool(&config).inspect_err(|e| {
            tracing::error!(
                target: TRACING_TARGET_CONNECTION,
                database_url = %config.database_url_masked(),
                error = %e,
                "Failed to create connection pool"
            );
        })?;

        tracing::info!(
            target: TRACING_TARGET_CONNECTION,
            database_url = %config.database_url_masked(),
            max_connections = config.max_connections,
            "Database pool created"
        );

        Ok(Self {
            inner: Arc::new(PgClientInner { pool, config }),
        })
    }

    /// Checks out a connection and runs `SELECT 1`.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_CONNECTION)]
    pub async fn ping(&self) -> PgResult<()> {
        let mut conn = self.get_pooled_connection().await?;
        diesel::sql_query("SELECT 1").execute(&mut *conn).await?;

        tracing::debug!(target: TRACING_TARGET_CONNECTION, "Database is reachable");
        Ok(())
    }

    /// Checks out a connection, waiting up to the acquire timeout.
    pub async fn get_connection(&self) -> PgResult<PgConn> {
        let started = Instant::now();
        let conn = self.get_pooled_connection().await.inspect_err(|e| {
            tracing::error!(
                target: TRACING_TARGET_CONNECTION,
                error = %e,
                status = ?self.pool_status(),
                "Failed to check out a database connection"
            );
        })?;

        let elapsed = started.elapsed();
        if elapsed > SLOW_ACQUIRE {
            tracing::warn!(
                target: TRACING_TARGET_CONNECTION,
                elapsed_ms = elapsed.as_millis() as u64,
                status = ?self.pool_status(),
                "Slow database connection checkout"
            );
        }

        Ok(PgConn::new(conn))
    }

    pub(crate) async fn get_pooled_connection(&self) -> PgResult<PooledConnection> {
        self.inner.pool.get().await.map_err(PgError::from)
    }

    /// Returns the pool counters.
    pub fn pool_status(&self) -> PgPoolStatus {
        let status = self.inner.pool.status();
        PgPoolStatus {
            max_size: status.max_size,
            size: status.size,
            available: status.available,
            waiting: status.waiting,
        }
    }

    /// Returns the configuration of the pool.
    #[inline]
    pub fn config(&self) -> &PgConfig {
        &self.inner.config
    }
}

impl fmt::Debug for PgClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgClient")
            .field("config", &self.inner.config)
            .field("status", &self.pool_status())
            .finish()
    }
}

/// A checked-out connection; every repository trait is implemented on it.
///
/// ```ignore
/// let mut conn = pg_client.get_connection().await?;
/// let context = conn.load_report_context(report_id).await?;
/// ```
#[derive(Deref, DerefMut)]
pub struct PgConn {
    #[deref]
    #[deref_mut]
    conn: PooledConnection,
}

impl PgConn {
    /// Wraps a pooled connection.
    pub fn new(conn: PooledConnection) -> Self {
        Self { conn }
    }

    /// Runs `f` in a transaction, committing on `Ok` and rolling back on `Err`.
    pub async fn transaction<'a, T, E, F>(&mut self, f: F) -> Result<T, E>
    where
        F: for<'r> FnOnce(&'r mut PooledConnection) -> ScopedBoxFuture<'a, 'r, Result<T, E>>
            + Send
            + 'a,
        T: Send + 'a,
        E: From<diesel::result::Error> + Send + 'a,
    {
        self.conn.transaction(f).await
    }
}

impl fmt::Debug for PgConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgConn").finish_non_exhaustive()
    }
}

//! Connection pool cache
//!
//! One sqlx-backed [`DatabaseConnection`] per relational data source, created
//! on first use and authenticated with a ping before it is cached.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::PoolPolicy;
use crate::connectors::dialect::Dialect;
use crate::connectors::relational::{PROBE_SQL, execute_statement};
use crate::connectors::trait_::ConnectorError;

/// Id used for throwaway connections opened by [`ConnectionPool::test_connection`].
/// It is never cached.
pub const TEST_CONNECTION_ID: Uuid = Uuid::nil();

/// Where to connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    pub dialect: Dialect,
    pub url: String,
}

type Slot = Arc<OnceCell<DatabaseConnection>>;

/// Cache of authenticated connection pools keyed by data source id
pub struct ConnectionPool {
    policy: PoolPolicy,
    slots: Mutex<HashMap<Uuid, Slot>>,
}

impl ConnectionPool {
    pub fn new(policy: PoolPolicy) -> Self {
        Self {
            policy,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<Uuid, Slot>> {
        self.slots
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    fn options(&self, target: &ConnectTarget) -> ConnectOptions {
        let mut opt = ConnectOptions::new(target.url.clone());
        opt.max_connections(self.policy.max_connections)
            .min_connections(self.policy.min_connections)
            .acquire_timeout(self.policy.acquire_timeout())
            .connect_timeout(self.policy.acquire_timeout())
            .idle_timeout(self.policy.idle_timeout())
            .sqlx_logging(true)
            .sqlx_logging_level(log::LevelFilter::Debug);
        opt
    }

    /// Connect and authenticate. A pool that fails its ping is closed.
    async fn open(&self, target: &ConnectTarget) -> Result<DatabaseConnection, ConnectorError> {
        let backend = target.dialect.name();
        let conn = Database::connect(self.options(target))
            .await
            .map_err(|e| ConnectorError::Connection {
                backend,
                details: e.to_string(),
            })?;

        if let Err(e) = conn.ping().await {
            if let Err(close_err) = conn.close().await {
                debug!(backend, error = %close_err, "Failed to close unauthenticated pool");
            }
            return Err(ConnectorError::Connection {
                backend,
                details: e.to_string(),
            });
        }

        Ok(conn)
    }

    /// Return the cached connection for `id`, creating it if needed.
    ///
    /// Concurrent first calls for the same id share one connect attempt. A
    /// failed attempt caches nothing.
    #[instrument(skip(self, target), fields(backend = %target.dialect))]
    pub async fn create_connection(
        &self,
        id: Uuid,
        target: &ConnectTarget,
    ) -> Result<DatabaseConnection, ConnectorError> {
        if id == TEST_CONNECTION_ID {
            return Err(ConnectorError::Configuration {
                details: "the test connection id cannot be cached".to_string(),
            });
        }

        let slot = self.slots().entry(id).or_default().clone();
        let conn = slot
            .get_or_try_init(|| async {
                let conn = self.open(target).await?;
                info!(data_source_id = %id, "Opened connection pool");
                Ok::<_, ConnectorError>(conn)
            })
            .await?;
        Ok(conn.clone())
    }

    pub fn get_connection(&self, id: Uuid) -> Option<DatabaseConnection> {
        self.slots().get(&id).and_then(|slot| slot.get().cloned())
    }

    /// Close and evict the pool for `id`. Unknown ids are a no-op.
    pub async fn close_connection(&self, id: Uuid) -> Result<(), ConnectorError> {
        let slot = self.slots().remove(&id);
        let Some(conn) = slot.and_then(|slot| slot.get().cloned()) else {
            return Ok(());
        };

        conn.close().await.map_err(|e| ConnectorError::Connection {
            backend: "pool",
            details: format!("failed to close pool for {}: {}", id, e),
        })?;
        info!(data_source_id = %id, "Closed connection pool");
        Ok(())
    }

    /// Close every cached pool. Failures are logged and do not stop the sweep.
    pub async fn close_all(&self) {
        let drained: Vec<(Uuid, Slot)> = self.slots().drain().collect();
        for (id, slot) in drained {
            if let Some(conn) = slot.get().cloned() {
                if let Err(e) = conn.close().await {
                    warn!(data_source_id = %id, error = %e, "Failed to close connection pool");
                }
            }
        }
    }

    /// Number of authenticated pools currently cached.
    pub fn cached_len(&self) -> usize {
        self.slots()
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    /// Open a throwaway connection, probe it and close it again.
    ///
    /// The connection is never cached and is closed on every exit path,
    /// including cancellation of the returned future.
    #[instrument(skip(self, target), fields(backend = %target.dialect, id = %TEST_CONNECTION_ID))]
    pub async fn test_connection(&self, target: &ConnectTarget) -> Result<(), ConnectorError> {
        let conn = self.open(target).await?;
        let guard = scopeguard::guard(conn, |conn| {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = conn.close().await;
                });
            }
        });

        let outcome = execute_statement(
            &guard,
            target.dialect,
            target.dialect.name(),
            PROBE_SQL,
            &[],
        )
        .await
        .map(|_| ());

        let conn = scopeguard::ScopeGuard::into_inner(guard);
        if let Err(e) = conn.close().await {
            debug!(error = %e, "Failed to close test connection");
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_policy() -> PoolPolicy {
        PoolPolicy {
            acquire_timeout_ms: 500,
            ..PoolPolicy::default()
        }
    }

    fn unreachable_target() -> ConnectTarget {
        ConnectTarget {
            dialect: Dialect::Postgres,
            url: "postgres://nobody@127.0.0.1:1/none".to_string(),
        }
    }

    fn sqlite_target() -> ConnectTarget {
        ConnectTarget {
            dialect: Dialect::Sqlite,
            url: "sqlite::memory:".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_connection_is_idempotent() {
        let pool = ConnectionPool::new(quick_policy());
        let id = Uuid::new_v4();

        pool.create_connection(id, &sqlite_target()).await.unwrap();
        pool.create_connection(id, &sqlite_target()).await.unwrap();
        assert_eq!(pool.cached_len(), 1);
        assert!(pool.get_connection(id).is_some());

        pool.close_connection(id).await.unwrap();
        assert_eq!(pool.cached_len(), 0);
        assert!(pool.get_connection(id).is_none());
    }

    #[tokio::test]
    async fn test_concurrent_first_use_shares_one_pool() {
        let pool = Arc::new(ConnectionPool::new(quick_policy()));
        let id = Uuid::new_v4();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                tokio::spawn(async move { pool.create_connection(id, &sqlite_target()).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(pool.cached_len(), 1);
        pool.close_all().await;
        assert_eq!(pool.cached_len(), 0);
    }

    #[tokio::test]
    async fn test_failed_connect_is_not_cached() {
        let pool = ConnectionPool::new(quick_policy());
        let id = Uuid::new_v4();

        let err = pool
            .create_connection(id, &unreachable_target())
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Connection { backend: "postgres", .. }));
        assert_eq!(pool.cached_len(), 0);
        assert!(pool.get_connection(id).is_none());
    }

    #[tokio::test]
    async fn test_sentinel_id_is_never_cached() {
        let pool = ConnectionPool::new(quick_policy());
        let err = pool
            .create_connection(TEST_CONNECTION_ID, &sqlite_target())
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Configuration { .. }));

        pool.test_connection(&sqlite_target()).await.unwrap();
        assert_eq!(pool.cached_len(), 0);
    }

    #[tokio::test]
    async fn test_test_connection_reports_failure() {
        let pool = ConnectionPool::new(quick_policy());
        assert!(pool.test_connection(&unreachable_target()).await.is_err());
        assert_eq!(pool.cached_len(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_pool_times_out_on_acquire() {
        use sea_orm::TransactionTrait;
        use std::time::{Duration, Instant};

        let dir = tempfile::tempdir().unwrap();
        let target = ConnectTarget {
            dialect: Dialect::Sqlite,
            url: format!("sqlite://{}?mode=rwc", dir.path().join("pool.db").display()),
        };
        let pool = ConnectionPool::new(PoolPolicy {
            max_connections: 1,
            min_connections: 0,
            acquire_timeout_ms: 200,
            ..PoolPolicy::default()
        });
        let id = Uuid::new_v4();
        let conn = pool.create_connection(id, &target).await.unwrap();

        let held = conn.begin().await.unwrap();
        let started = Instant::now();
        let err = execute_statement(&conn, Dialect::Sqlite, "sqlite", PROBE_SQL, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Query { backend: "sqlite", .. }));
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(150), "returned after {:?}", waited);
        assert!(waited < Duration::from_secs(5), "returned after {:?}", waited);

        held.rollback().await.unwrap();
        execute_statement(&conn, Dialect::Sqlite, "sqlite", PROBE_SQL, &[])
            .await
            .unwrap();
        pool.close_all().await;
    }

    #[tokio::test]
    async fn test_close_unknown_id_is_noop() {
        let pool = ConnectionPool::new(quick_policy());
        pool.close_connection(Uuid::new_v4()).await.unwrap();
    }
}

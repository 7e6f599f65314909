//! Engine facade
//!
//! Wires the connection pool, data source registry, task store and sync
//! manager together and exposes the operations callers use.

use std::sync::Arc;

use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::connectors::{ColumnInfo, Dialect, QueryResult, RelationalParams};
use crate::datasource::{
    ConnectTarget, ConnectionPool, ConnectorContext, DataSource, DataSourceConfig, DataSourceKind,
    DataSourcePatch, DataSourceRegistry, NewDataSource,
};
use crate::error::{EngineError, Result};
use crate::repositories::{DataSourceRepository, SyncTaskRepository};
use crate::sync::{
    NewSyncTask, SyncEvent, SyncManager, SyncResult, SyncTaskConfig, SyncTaskPatch,
    SyncTaskStore, TaskStatus, ValueTransform,
};

/// Outcome of a connectivity probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionTestResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub struct Engine {
    pool: Arc<ConnectionPool>,
    registry: Arc<DataSourceRegistry>,
    manager: SyncManager,
}

impl Engine {
    /// Build the engine on top of an open configuration store and load the
    /// persisted data sources and tasks.
    pub async fn init(config: &AppConfig, db: DatabaseConnection) -> Result<Self> {
        Self::init_with_transform(config, db, None).await
    }

    pub async fn init_with_transform(
        config: &AppConfig,
        db: DatabaseConnection,
        transform: Option<Arc<dyn ValueTransform>>,
    ) -> Result<Self> {
        let pool = Arc::new(ConnectionPool::new(config.pool));
        let context = ConnectorContext {
            pool: pool.clone(),
            host_db: db.clone(),
            rest_timeout: config.sync.rest_timeout(),
        };

        let registry = Arc::new(DataSourceRegistry::new(
            DataSourceRepository::new(db.clone()),
            context,
        ));
        let store = Arc::new(SyncTaskStore::new(SyncTaskRepository::new(db)));

        let sources = registry.init().await?;
        let tasks = store.init().await?;

        let mut manager = SyncManager::new(store, registry.clone(), &config.sync);
        if let Some(transform) = transform {
            manager = manager.with_transform(transform);
        }

        info!(sources, tasks, "Sync engine ready");
        Ok(Self {
            pool,
            registry,
            manager,
        })
    }

    pub fn registry(&self) -> &Arc<DataSourceRegistry> {
        &self.registry
    }

    pub fn manager(&self) -> &SyncManager {
        &self.manager
    }

    /// Probe connection parameters without registering anything.
    ///
    /// Relational probes use a throwaway connection that is never cached and
    /// report the driver's failure message.
    #[instrument(skip(self, params))]
    pub async fn test_connection(
        &self,
        kind: DataSourceKind,
        params: JsonValue,
    ) -> ConnectionTestResult {
        let outcome = match kind {
            DataSourceKind::Mysql => self.probe_relational(Dialect::MySql, params).await,
            DataSourceKind::Postgres => self.probe_relational(Dialect::Postgres, params).await,
            DataSourceKind::Rest | DataSourceKind::Main => {
                let config = DataSourceConfig::new("connection-test", kind, params);
                match DataSource::new(config, self.registry.context()) {
                    Ok(source) => {
                        if source.test().await {
                            Ok(())
                        } else {
                            Err(EngineError::Connection(format!(
                                "{} connection test failed",
                                kind
                            )))
                        }
                    }
                    Err(e) => Err(e),
                }
            }
        };

        match outcome {
            Ok(()) => ConnectionTestResult {
                success: true,
                message: None,
            },
            Err(e) => ConnectionTestResult {
                success: false,
                message: Some(e.to_string()),
            },
        }
    }

    async fn probe_relational(&self, dialect: Dialect, params: JsonValue) -> Result<()> {
        let params: RelationalParams = serde_json::from_value(params)
            .map_err(|e| EngineError::Config(format!("invalid {} parameters: {}", dialect, e)))?;
        let target = ConnectTarget {
            dialect,
            url: params.connection_url(dialect)?,
        };
        Ok(self.pool.test_connection(&target).await?)
    }

    pub async fn create_data_source(&self, new: NewDataSource) -> Result<DataSourceConfig> {
        let config = self.registry.add_data_source(new).await?;
        Ok(config.redacted())
    }

    pub async fn update_data_source(
        &self,
        id: Uuid,
        patch: DataSourcePatch,
    ) -> Result<DataSourceConfig> {
        let config = self.registry.update_data_source(id, patch).await?;
        Ok(config.redacted())
    }

    pub async fn delete_data_source(&self, id: Uuid) -> Result<()> {
        self.registry.remove_data_source(id).await
    }

    /// Registered data sources with secrets masked.
    pub async fn list_data_sources(&self) -> Vec<DataSourceConfig> {
        self.registry
            .list_data_sources()
            .await
            .iter()
            .map(DataSourceConfig::redacted)
            .collect()
    }

    #[instrument(skip(self, sql, params))]
    pub async fn execute_query(
        &self,
        id: Uuid,
        sql: &str,
        params: &[JsonValue],
    ) -> Result<QueryResult> {
        let source = self.registry.get_data_source(id).await?;
        source.query(sql, params).await
    }

    /// Table names of a relational (or host) data source.
    pub async fn list_tables(&self, id: Uuid) -> Result<Vec<String>> {
        let source = self.registry.get_data_source(id).await?;
        let dialect = source.dialect().ok_or_else(|| {
            EngineError::Unsupported(format!(
                "data source '{}' ({}) has no tables",
                source.name(),
                source.kind()
            ))
        })?;

        let result = source.query(dialect.list_tables_sql(), &[]).await?;
        Ok(result
            .rows
            .iter()
            .filter_map(|row| dialect.table_name_from_row(row))
            .collect())
    }

    /// Column layout of `table`.
    pub async fn describe_table(&self, id: Uuid, table: &str) -> Result<Vec<ColumnInfo>> {
        let source = self.registry.get_data_source(id).await?;
        let dialect = source.dialect().ok_or_else(|| {
            EngineError::Unsupported(format!(
                "data source '{}' ({}) has no tables",
                source.name(),
                source.kind()
            ))
        })?;

        let (sql, params) = dialect.describe_table_sql(table);
        let result = source.query(&sql, &params).await?;
        Ok(result
            .rows
            .iter()
            .filter_map(|row| dialect.column_from_row(row))
            .collect())
    }

    pub async fn create_task(&self, new: NewSyncTask) -> Result<SyncTaskConfig> {
        self.manager.create_task(new).await
    }

    pub async fn update_task(&self, id: Uuid, patch: SyncTaskPatch) -> Result<SyncTaskConfig> {
        self.manager.update_task(id, patch).await
    }

    pub async fn delete_task(&self, id: Uuid) -> Result<()> {
        self.manager.delete_task(id).await
    }

    pub async fn get_task(&self, id: Uuid) -> Result<SyncTaskConfig> {
        self.manager.get_task(id).await
    }

    pub async fn get_all_tasks(&self) -> Vec<SyncTaskConfig> {
        self.manager.get_all_tasks().await
    }

    pub async fn run_task(&self, id: Uuid) -> Result<SyncResult> {
        self.manager.run_task(id).await
    }

    pub async fn get_task_status(&self, id: Uuid) -> Option<TaskStatus> {
        self.manager.get_task_status(id).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.manager.subscribe()
    }

    /// Close every external connection pool.
    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }
}

//! Data source registry
//!
//! In-memory map of live [`DataSource`]s mirroring the `data_sources` table.
//! Writers hold the map's write lock across the storage call, so readers never
//! observe an entry without its row (or a row change without its entry).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::datasource::{
    ConnectorContext, DataSource, DataSourceConfig, DataSourcePatch, NewDataSource,
};
use crate::error::{EngineError, Result};
use crate::repositories::DataSourceRepository;

pub struct DataSourceRegistry {
    repo: DataSourceRepository,
    context: ConnectorContext,
    sources: RwLock<HashMap<Uuid, Arc<DataSource>>>,
}

impl DataSourceRegistry {
    pub fn new(repo: DataSourceRepository, context: ConnectorContext) -> Self {
        Self {
            repo,
            context,
            sources: RwLock::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &ConnectorContext {
        &self.context
    }

    /// Load every persisted data source. Rows that cannot be bound to a
    /// connector are logged and skipped. Returns the number loaded.
    #[instrument(skip(self))]
    pub async fn init(&self) -> Result<usize> {
        let rows = self.repo.list().await?;
        let mut sources = self.sources.write().await;
        sources.clear();

        for row in rows {
            let id = row.id;
            let name = row.name.clone();
            match DataSourceConfig::try_from(row)
                .and_then(|config| DataSource::new(config, &self.context))
            {
                Ok(source) => {
                    sources.insert(id, Arc::new(source));
                }
                Err(e) => {
                    warn!(data_source_id = %id, name = %name, error = %e, "Skipping data source that cannot be loaded");
                }
            }
        }

        info!(count = sources.len(), "Data source registry initialized");
        Ok(sources.len())
    }

    /// Validate, persist and register a new data source.
    #[instrument(skip(self, new), fields(name = %new.name, kind = %new.kind))]
    pub async fn add_data_source(&self, new: NewDataSource) -> Result<DataSourceConfig> {
        let config = new.into_config()?;
        let source = DataSource::new(config.clone(), &self.context)?;

        let mut sources = self.sources.write().await;
        self.repo.insert(&config).await?;
        sources.insert(config.id, Arc::new(source));

        info!(data_source_id = %config.id, "Data source registered");
        Ok(config)
    }

    /// Apply `patch`, persist it and swap in a freshly built instance. Any
    /// pool held by the previous instance is closed.
    #[instrument(skip(self, patch))]
    pub async fn update_data_source(
        &self,
        id: Uuid,
        patch: DataSourcePatch,
    ) -> Result<DataSourceConfig> {
        let mut sources = self.sources.write().await;

        let mut config = match sources.get(&id) {
            Some(existing) => existing.config().clone(),
            None => match self.repo.find(id).await? {
                Some(row) => DataSourceConfig::try_from(row)?,
                None => return Err(EngineError::data_source_not_found(id)),
            },
        };
        patch.apply(&mut config)?;
        let source = DataSource::new(config.clone(), &self.context)?;

        self.repo.update(&config).await?;
        if let Some(previous) = sources.remove(&id) {
            if let Err(e) = previous.disconnect().await {
                warn!(data_source_id = %id, error = %e, "Failed to close previous connection");
            }
        }
        sources.insert(id, Arc::new(source));

        info!(data_source_id = %id, "Data source updated");
        Ok(config)
    }

    /// Delete the row, drop the live entry and tear down its connection.
    #[instrument(skip(self))]
    pub async fn remove_data_source(&self, id: Uuid) -> Result<()> {
        let mut sources = self.sources.write().await;
        let deleted = self.repo.delete(id).await?;
        let removed = sources.remove(&id);
        drop(sources);

        if !deleted && removed.is_none() {
            return Err(EngineError::data_source_not_found(id));
        }
        if let Some(source) = removed {
            if let Err(e) = source.disconnect().await {
                warn!(data_source_id = %id, error = %e, "Failed to close connection of removed data source");
            }
        }

        info!(data_source_id = %id, "Data source removed");
        Ok(())
    }

    pub async fn get_data_source(&self, id: Uuid) -> Result<Arc<DataSource>> {
        self.sources
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::data_source_not_found(id))
    }

    /// Configurations of every live data source, ordered by name.
    pub async fn list_data_sources(&self) -> Vec<DataSourceConfig> {
        let mut configs: Vec<DataSourceConfig> = self
            .sources
            .read()
            .await
            .values()
            .map(|source| source.config().clone())
            .collect();
        configs.sort_by(|a, b| a.name.cmp(&b.name));
        configs
    }

    /// Record a successful sync against the data source. The live connector
    /// is kept, so no reconnect happens.
    pub async fn touch_last_sync(&self, id: Uuid, time: DateTime<Utc>) -> Result<()> {
        let mut sources = self.sources.write().await;
        self.repo.set_last_sync_time(id, time).await?;
        if let Some(existing) = sources.get(&id).cloned() {
            let mut config = existing.config().clone();
            config.last_sync_time = Some(time);
            sources.insert(
                id,
                Arc::new(DataSource::with_connector(config, existing.connector())),
            );
        }
        Ok(())
    }

    /// Disconnect every live data source.
    pub async fn shutdown(&self) {
        let sources: Vec<Arc<DataSource>> =
            self.sources.read().await.values().cloned().collect();
        for source in sources {
            if let Err(e) = source.disconnect().await {
                warn!(data_source_id = %source.id(), error = %e, "Failed to disconnect data source");
            }
        }
        self.context.pool.close_all().await;
    }
}

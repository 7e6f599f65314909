//! Sync manager
//!
//! Orchestrates task runs: at most one run per task at a time, status
//! bookkeeping in the task store, and lifecycle events for listeners.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use metrics::counter;
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::SyncSettings;
use crate::datasource::{DataSource, DataSourceRegistry};
use crate::error::{EngineError, Result};
use crate::sync::store::SyncTaskStore;
use crate::sync::transform::{PlaceholderTransform, ValueTransform};
use crate::sync::worker::SyncWorker;
use crate::sync::{
    NewSyncTask, SyncEvent, SyncResult, SyncTaskConfig, SyncTaskPatch, TaskStatus,
};

type RunTable = Arc<Mutex<HashMap<Uuid, DateTime<Utc>>>>;

fn lock_runs(runs: &RunTable) -> MutexGuard<'_, HashMap<Uuid, DateTime<Utc>>> {
    runs.lock().unwrap_or_else(|poison| poison.into_inner())
}

pub struct SyncManager {
    store: Arc<SyncTaskStore>,
    registry: Arc<DataSourceRegistry>,
    transform: Arc<dyn ValueTransform>,
    batch_size: u64,
    runs: RunTable,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncManager {
    pub fn new(
        store: Arc<SyncTaskStore>,
        registry: Arc<DataSourceRegistry>,
        settings: &SyncSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(settings.event_capacity.max(1));
        Self {
            store,
            registry,
            transform: Arc::new(PlaceholderTransform),
            batch_size: settings.batch_size,
            runs: Arc::new(Mutex::new(HashMap::new())),
            events,
        }
    }

    /// Replace the value transform applied to mapped fields.
    pub fn with_transform(mut self, transform: Arc<dyn ValueTransform>) -> Self {
        self.transform = transform;
        self
    }

    pub fn store(&self) -> &Arc<SyncTaskStore> {
        &self.store
    }

    /// Listen for run lifecycle events. Slow listeners lose the oldest events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub async fn create_task(&self, new: NewSyncTask) -> Result<SyncTaskConfig> {
        let task = self.store.create(new).await?;
        info!(task_id = %task.id, name = %task.name, "Sync task created");
        Ok(task)
    }

    pub async fn update_task(&self, id: Uuid, patch: SyncTaskPatch) -> Result<SyncTaskConfig> {
        self.store.update(id, patch).await
    }

    pub async fn delete_task(&self, id: Uuid) -> Result<()> {
        if self.is_running(id) {
            return Err(EngineError::Conflict(format!(
                "sync task {} is running and cannot be deleted",
                id
            )));
        }
        self.store.delete(id).await?;
        info!(task_id = %id, "Sync task deleted");
        Ok(())
    }

    pub async fn get_task(&self, id: Uuid) -> Result<SyncTaskConfig> {
        self.store
            .get(id)
            .await
            .ok_or_else(|| EngineError::task_not_found(id))
    }

    pub async fn get_all_tasks(&self) -> Vec<SyncTaskConfig> {
        self.store.all().await
    }

    /// `Running` while a run is in progress in this process, otherwise the
    /// persisted status. `None` for an unknown task.
    pub async fn get_task_status(&self, id: Uuid) -> Option<TaskStatus> {
        if self.is_running(id) {
            return Some(TaskStatus::Running);
        }
        self.store.get(id).await.map(|task| task.status)
    }

    pub fn is_running(&self, id: Uuid) -> bool {
        lock_runs(&self.runs).contains_key(&id)
    }

    /// Run a task to completion.
    ///
    /// Record-level and source failures are reported in the returned result
    /// and mark the task `failed`. Errors are returned for a missing task, a
    /// concurrent run, an unusable data source, or a storage failure. Dropping
    /// the future mid-run also leaves the task `failed`.
    #[instrument(skip(self), fields(task_id = %id))]
    pub async fn run_task(&self, id: Uuid) -> Result<SyncResult> {
        let task = self.get_task(id).await?;
        let started_at = Utc::now();

        {
            let mut runs = lock_runs(&self.runs);
            if runs.contains_key(&id) {
                return Err(EngineError::AlreadyRunning(id));
            }
            runs.insert(id, started_at);
        }
        let _slot = scopeguard::guard((self.runs.clone(), id), |(runs, id)| {
            lock_runs(&runs).remove(&id);
        });

        if !self.store.try_mark_running(id).await? {
            return Err(EngineError::AlreadyRunning(id));
        }
        // Released as failed on drop until a finish is stored.
        let claim = scopeguard::guard((self.store.clone(), id), |(store, id)| {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    match store.finish(id, TaskStatus::Failed, None).await {
                        Ok(()) => warn!(task_id = %id, "Sync run abandoned; task marked failed"),
                        Err(e) => warn!(task_id = %id, error = %e, "Failed to release abandoned run"),
                    }
                });
            }
        });

        let source = match self.resolve_source(&task).await {
            Ok(source) => source,
            Err(e) => {
                warn!(error = %e, "Sync run cannot start");
                counter!("sync_runs_total", "status" => "failed").increment(1);
                self.store.finish(id, TaskStatus::Failed, None).await?;
                scopeguard::ScopeGuard::into_inner(claim);
                return Err(e);
            }
        };

        info!(data_source_id = %source.id(), "Sync run started");
        let _ = self.events.send(SyncEvent::RunStarted {
            task_id: id,
            started_at,
        });

        let data_source_id = task.data_source_id;
        let worker = SyncWorker::new(task, source, self.transform.clone(), self.batch_size);
        let result = worker.run().await;

        let persisted = if result.is_success() {
            let stored = self
                .store
                .finish(id, TaskStatus::Completed, Some(started_at))
                .await;
            if let Err(e) = self.registry.touch_last_sync(data_source_id, started_at).await {
                warn!(data_source_id = %data_source_id, error = %e, "Failed to record data source sync time");
            }
            stored
        } else {
            self.store.finish(id, TaskStatus::Failed, None).await
        };

        counter!("sync_runs_total", "status" => result.status.as_str()).increment(1);
        info!(
            status = result.status.as_str(),
            total = result.total_records,
            failed = result.failed_records,
            "Sync run finished"
        );
        let _ = self.events.send(SyncEvent::RunCompleted {
            result: result.clone(),
        });

        persisted?;
        scopeguard::ScopeGuard::into_inner(claim);
        Ok(result)
    }

    async fn resolve_source(&self, task: &SyncTaskConfig) -> Result<Arc<DataSource>> {
        let source = self.registry.get_data_source(task.data_source_id).await?;
        if !source.is_enabled() {
            return Err(EngineError::Config(format!(
                "data source '{}' is disabled",
                source.name()
            )));
        }
        Ok(source)
    }
}

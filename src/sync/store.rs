//! Sync task store
//!
//! Persistent task definitions with an in-memory mirror. Storage is written
//! first and the mirror follows, so a reload always rebuilds the same state.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::repositories::SyncTaskRepository;
use crate::sync::{NewSyncTask, SyncTaskConfig, SyncTaskPatch, TaskStatus};

pub struct SyncTaskStore {
    repo: SyncTaskRepository,
    tasks: RwLock<HashMap<Uuid, SyncTaskConfig>>,
}

impl SyncTaskStore {
    pub fn new(repo: SyncTaskRepository) -> Self {
        Self {
            repo,
            tasks: RwLock::new(HashMap::new()),
        }
    }

    /// Load every task. Tasks left `running` by a previous process are marked
    /// `failed` in storage before they are mirrored.
    #[instrument(skip(self))]
    pub async fn init(&self) -> Result<usize> {
        let reset = self.repo.fail_stale_running().await?;
        if reset > 0 {
            warn!(count = reset, "Marked interrupted sync tasks as failed");
        }

        let rows = self.repo.list().await?;
        let mut tasks = self.tasks.write().await;
        tasks.clear();
        for row in rows {
            let id = row.id;
            match SyncTaskConfig::try_from(row) {
                Ok(task) => {
                    tasks.insert(id, task);
                }
                Err(e) => warn!(task_id = %id, error = %e, "Skipping sync task that cannot be loaded"),
            }
        }

        info!(count = tasks.len(), "Sync task store initialized");
        Ok(tasks.len())
    }

    pub async fn create(&self, new: NewSyncTask) -> Result<SyncTaskConfig> {
        new.validate()?;
        let task = SyncTaskConfig {
            id: Uuid::new_v4(),
            name: new.name,
            data_source_id: new.data_source_id,
            source_table: new.source_table,
            target_table: new.target_table,
            sync_mode: new.sync_mode,
            schedule: new.schedule,
            mapping: new.mapping,
            filter: new.filter,
            key_fields: new.key_fields,
            last_sync_time: None,
            status: TaskStatus::Idle,
        };

        let mut tasks = self.tasks.write().await;
        self.repo.insert(&task).await?;
        tasks.insert(task.id, task.clone());
        Ok(task)
    }

    pub async fn update(&self, id: Uuid, patch: SyncTaskPatch) -> Result<SyncTaskConfig> {
        patch.validate()?;
        let mut tasks = self.tasks.write().await;
        let mut task = tasks
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::task_not_found(id))?;

        if let Some(name) = patch.name {
            task.name = name;
        }
        if let Some(data_source_id) = patch.data_source_id {
            task.data_source_id = data_source_id;
        }
        if let Some(source_table) = patch.source_table {
            task.source_table = source_table;
        }
        if let Some(target_table) = patch.target_table {
            task.target_table = target_table;
        }
        if let Some(sync_mode) = patch.sync_mode {
            task.sync_mode = sync_mode;
        }
        if let Some(schedule) = patch.schedule {
            task.schedule = schedule;
        }
        if let Some(mapping) = patch.mapping {
            task.mapping = mapping;
        }
        if let Some(filter) = patch.filter {
            task.filter = filter;
        }
        if let Some(key_fields) = patch.key_fields {
            task.key_fields = key_fields;
        }

        self.repo.update_definition(&task).await?;
        tasks.insert(id, task.clone());
        Ok(task)
    }

    /// Delete a task. A running task cannot be deleted.
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        if self.repo.delete_if_idle(id).await? == 0 {
            return match self.repo.find(id).await? {
                Some(_) => Err(EngineError::Conflict(format!(
                    "sync task {} is running and cannot be deleted",
                    id
                ))),
                None => {
                    tasks.remove(&id);
                    Err(EngineError::task_not_found(id))
                }
            };
        }
        tasks.remove(&id);
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Option<SyncTaskConfig> {
        self.tasks.read().await.get(&id).cloned()
    }

    /// Every task, ordered by name.
    pub async fn all(&self) -> Vec<SyncTaskConfig> {
        let mut tasks: Vec<SyncTaskConfig> = self.tasks.read().await.values().cloned().collect();
        tasks.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        tasks
    }

    /// Compare-and-set the persisted status to `running`. Returns `false` when
    /// another run already holds the task.
    pub async fn try_mark_running(&self, id: Uuid) -> Result<bool> {
        let mut tasks = self.tasks.write().await;
        if !tasks.contains_key(&id) {
            return Err(EngineError::task_not_found(id));
        }
        let claimed = self.repo.try_mark_running(id).await?;
        if claimed {
            if let Some(task) = tasks.get_mut(&id) {
                task.status = TaskStatus::Running;
            }
        }
        Ok(claimed)
    }

    /// Record the end of a run.
    pub async fn finish(
        &self,
        id: Uuid,
        status: TaskStatus,
        last_sync_time: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        self.repo.finish(id, status, last_sync_time).await?;
        if let Some(task) = tasks.get_mut(&id) {
            task.status = status;
            if last_sync_time.is_some() {
                task.last_sync_time = last_sync_time;
            }
        }
        Ok(())
    }
}

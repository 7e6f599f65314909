//! # SyncTask Repository
//!
//! SeaORM operations for the sync_tasks table, including the compare-and-set
//! status transition that guards against concurrent runs across processes.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::models::sync_task::{ActiveModel, Column, Entity, Model};
use crate::sync::{SyncTaskConfig, TaskStatus};

/// Repository for sync task rows
#[derive(Debug, Clone)]
pub struct SyncTaskRepository {
    db: DatabaseConnection,
}

impl SyncTaskRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn list(&self) -> Result<Vec<Model>> {
        Ok(Entity::find()
            .order_by_asc(Column::Name)
            .all(&self.db)
            .await?)
    }

    pub async fn find(&self, id: Uuid) -> Result<Option<Model>> {
        Ok(Entity::find_by_id(id).one(&self.db).await?)
    }

    pub async fn insert(&self, task: &SyncTaskConfig) -> Result<Model> {
        let now = Utc::now().fixed_offset();
        let row = ActiveModel {
            id: Set(task.id),
            name: Set(task.name.clone()),
            data_source_id: Set(task.data_source_id),
            source_table: Set(task.source_table.clone()),
            target_table: Set(task.target_table.clone()),
            sync_mode: Set(task.sync_mode.as_str().to_string()),
            schedule: Set(task.schedule.clone()),
            mapping: Set(mapping_json(task)?),
            filter: Set(task.filter.clone()),
            key_fields: Set(key_fields_json(task)?),
            last_sync_time: Set(task.last_sync_time.map(|t| t.fixed_offset())),
            status: Set(task.status.as_str().to_string()),
            created_at: Set(now),
            updated_at: Set(now),
        };
        Ok(row.insert(&self.db).await?)
    }

    /// Overwrite the configurable columns. Status and last sync time are
    /// owned by the run lifecycle and left untouched.
    pub async fn update_definition(&self, task: &SyncTaskConfig) -> Result<Model> {
        let row = ActiveModel {
            id: sea_orm::ActiveValue::Unchanged(task.id),
            name: Set(task.name.clone()),
            data_source_id: Set(task.data_source_id),
            source_table: Set(task.source_table.clone()),
            target_table: Set(task.target_table.clone()),
            sync_mode: Set(task.sync_mode.as_str().to_string()),
            schedule: Set(task.schedule.clone()),
            mapping: Set(mapping_json(task)?),
            filter: Set(task.filter.clone()),
            key_fields: Set(key_fields_json(task)?),
            updated_at: Set(Utc::now().fixed_offset()),
            ..Default::default()
        };

        row.update(&self.db).await.map_err(|e| match e {
            sea_orm::DbErr::RecordNotUpdated => EngineError::task_not_found(task.id),
            other => other.into(),
        })
    }

    /// Delete a task unless it is running. Returns the number of rows removed.
    pub async fn delete_if_idle(&self, id: Uuid) -> Result<u64> {
        let result = Entity::delete_many()
            .filter(Column::Id.eq(id))
            .filter(Column::Status.ne(TaskStatus::Running.as_str()))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }

    /// Atomically move a task to `running` unless it already is.
    pub async fn try_mark_running(&self, id: Uuid) -> Result<bool> {
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(TaskStatus::Running.as_str()))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.ne(TaskStatus::Running.as_str()))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// Record the end of a run. `last_sync_time` is only written when given.
    pub async fn finish(
        &self,
        id: Uuid,
        status: TaskStatus,
        last_sync_time: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut update = Entity::update_many()
            .col_expr(Column::Status, Expr::value(status.as_str()))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()));
        if let Some(time) = last_sync_time {
            update = update.col_expr(Column::LastSyncTime, Expr::value(time.fixed_offset()));
        }
        update.filter(Column::Id.eq(id)).exec(&self.db).await?;
        Ok(())
    }

    /// Mark every task persisted as `running` as `failed`.
    pub async fn fail_stale_running(&self) -> Result<u64> {
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(TaskStatus::Failed.as_str()))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Status.eq(TaskStatus::Running.as_str()))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }
}

fn mapping_json(task: &SyncTaskConfig) -> Result<JsonValue> {
    serde_json::to_value(&task.mapping)
        .map_err(|e| EngineError::Config(format!("cannot encode mapping: {}", e)))
}

fn key_fields_json(task: &SyncTaskConfig) -> Result<Option<JsonValue>> {
    if task.key_fields.is_empty() {
        return Ok(None);
    }
    serde_json::to_value(&task.key_fields)
        .map(Some)
        .map_err(|e| EngineError::Config(format!("cannot encode key fields: {}", e)))
}

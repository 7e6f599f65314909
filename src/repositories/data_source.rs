//! # DataSource Repository
//!
//! SeaORM operations for the data_sources table.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

use crate::datasource::DataSourceConfig;
use crate::error::{EngineError, Result, is_unique_violation};
use crate::models::data_source::{ActiveModel, Column, Entity, Model};

/// Repository for data source rows
#[derive(Debug, Clone)]
pub struct DataSourceRepository {
    db: DatabaseConnection,
}

impl DataSourceRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// All rows ordered by name
    pub async fn list(&self) -> Result<Vec<Model>> {
        Ok(Entity::find()
            .order_by_asc(Column::Name)
            .all(&self.db)
            .await?)
    }

    pub async fn find(&self, id: Uuid) -> Result<Option<Model>> {
        Ok(Entity::find_by_id(id).one(&self.db).await?)
    }

    /// Insert a new row. A duplicate name is a conflict.
    pub async fn insert(&self, config: &DataSourceConfig) -> Result<Model> {
        let row = ActiveModel {
            id: Set(config.id),
            name: Set(config.name.clone()),
            kind: Set(config.kind.as_str().to_string()),
            config: Set(config.params.clone()),
            enabled: Set(config.enabled),
            last_sync_time: Set(config.last_sync_time.map(|t| t.fixed_offset())),
            created_at: Set(config.created_at.fixed_offset()),
            updated_at: Set(config.updated_at.fixed_offset()),
        };

        row.insert(&self.db)
            .await
            .map_err(|e| name_conflict(e, &config.name))
    }

    /// Overwrite the editable columns of an existing row.
    pub async fn update(&self, config: &DataSourceConfig) -> Result<Model> {
        let row = ActiveModel {
            id: sea_orm::ActiveValue::Unchanged(config.id),
            name: Set(config.name.clone()),
            kind: Set(config.kind.as_str().to_string()),
            config: Set(config.params.clone()),
            enabled: Set(config.enabled),
            updated_at: Set(config.updated_at.fixed_offset()),
            ..Default::default()
        };

        row.update(&self.db)
            .await
            .map_err(|e| name_conflict(e, &config.name))
    }

    /// Delete a row, returning whether it existed.
    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = Entity::delete_by_id(id).exec(&self.db).await?;
        Ok(result.rows_affected > 0)
    }

    pub async fn set_last_sync_time(&self, id: Uuid, time: DateTime<Utc>) -> Result<bool> {
        let result = Entity::update_many()
            .col_expr(Column::LastSyncTime, Expr::value(time.fixed_offset()))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }
}

fn name_conflict(error: sea_orm::DbErr, name: &str) -> EngineError {
    if is_unique_violation(&error) {
        return EngineError::Conflict(format!("a data source named '{}' already exists", name));
    }
    match error {
        sea_orm::DbErr::RecordNotUpdated => {
            EngineError::Config("data source not found".to_string())
        }
        other => other.into(),
    }
}

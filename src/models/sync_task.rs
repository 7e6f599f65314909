//! SyncTask entity model
//!
//! SeaORM entity for the sync_tasks table. `mapping` and `key_fields` are
//! stored as JSON arrays.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Persisted sync task configuration
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "sync_tasks")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub name: String,

    /// Data source the rows are read from (and upserted into)
    pub data_source_id: Uuid,

    pub source_table: String,

    pub target_table: String,

    /// full or incremental
    pub sync_mode: String,

    /// Opaque trigger expression, interpreted by the external scheduler only
    pub schedule: Option<String>,

    /// Ordered field mappings
    #[sea_orm(column_type = "JsonBinary")]
    pub mapping: JsonValue,

    /// Raw predicate appended as a WHERE clause
    pub filter: Option<String>,

    /// Conflict key columns of the target table
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub key_fields: Option<JsonValue>,

    pub last_sync_time: Option<DateTimeWithTimeZone>,

    /// idle, running, failed or completed
    pub status: String,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

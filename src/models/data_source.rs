//! DataSource entity model
//!
//! SeaORM entity for the data_sources table. The `config` column holds the
//! backend-specific connection parameters as JSON.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Persisted data source configuration
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "data_sources")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Unique display name
    #[sea_orm(unique)]
    pub name: String,

    /// Backend kind: mysql, postgres, rest or main
    pub kind: String,

    /// Connection parameters
    #[sea_orm(column_type = "JsonBinary")]
    pub config: JsonValue,

    pub enabled: bool,

    /// Start time of the last successful sync that read from this source
    pub last_sync_time: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

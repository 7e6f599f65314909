//! Migration to create the sync_tasks table.
//!
//! A sync task copies rows from a source table of one data source into a
//! target table, remapping fields through the JSON `mapping` column.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncTasks::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(SyncTasks::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(SyncTasks::Name).text().not_null())
                    .col(ColumnDef::new(SyncTasks::DataSourceId).uuid().not_null())
                    .col(ColumnDef::new(SyncTasks::SourceTable).text().not_null())
                    .col(ColumnDef::new(SyncTasks::TargetTable).text().not_null())
                    .col(
                        ColumnDef::new(SyncTasks::SyncMode)
                            .text()
                            .not_null()
                            .default("full"),
                    )
                    .col(ColumnDef::new(SyncTasks::Schedule).text().null())
                    .col(ColumnDef::new(SyncTasks::Mapping).json_binary().not_null())
                    .col(ColumnDef::new(SyncTasks::Filter).text().null())
                    .col(ColumnDef::new(SyncTasks::KeyFields).json_binary().null())
                    .col(
                        ColumnDef::new(SyncTasks::LastSyncTime)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncTasks::Status)
                            .text()
                            .not_null()
                            .default("idle"),
                    )
                    .col(
                        ColumnDef::new(SyncTasks::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(SyncTasks::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sync_tasks_data_source_id")
                    .table(SyncTasks::Table)
                    .col(SyncTasks::DataSourceId)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_sync_tasks_data_source_id")
                    .table(SyncTasks::Table)
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(SyncTasks::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SyncTasks {
    Table,
    Id,
    Name,
    DataSourceId,
    SourceTable,
    TargetTable,
    SyncMode,
    Schedule,
    Mapping,
    Filter,
    KeyFields,
    LastSyncTime,
    Status,
    CreatedAt,
    UpdatedAt,
}

//! Database migrations for the data source and sync task configuration store.

pub use sea_orm_migration::prelude::*;

mod m2026_10_01_000001_create_data_sources;
mod m2026_10_01_000002_create_sync_tasks;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2026_10_01_000001_create_data_sources::Migration),
            Box::new(m2026_10_01_000002_create_sync_tasks::Migration),
        ]
    }
}

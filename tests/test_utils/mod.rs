//! Test utilities for database testing.
//!
//! In-memory SQLite databases with migrations applied, plus helpers for
//! seeding the host database with source and target tables.

use anyhow::Result;
use datasync::config::AppConfig;
use datasync::datasource::{DataSourceKind, NewDataSource};
use datasync::Engine;
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Statement};
use serde_json::json;
use uuid::Uuid;

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

/// Builds an engine over `db` with default settings.
#[allow(dead_code)]
pub async fn setup_engine(db: &DatabaseConnection) -> Result<Engine> {
    Ok(Engine::init(&AppConfig::default(), db.clone()).await?)
}

/// Runs raw SQL against the test database.
#[allow(dead_code)]
pub async fn exec(db: &DatabaseConnection, sql: &str) -> Result<()> {
    db.execute(Statement::from_string(db.get_database_backend(), sql.to_string()))
        .await?;
    Ok(())
}

/// Creates an `orders` source table with three rows and an empty
/// `orders_copy` target keyed by `order_id`.
#[allow(dead_code)]
pub async fn seed_orders(db: &DatabaseConnection) -> Result<()> {
    exec(
        db,
        "CREATE TABLE orders (id INTEGER PRIMARY KEY, status TEXT, amount INTEGER, updated_at TEXT)",
    )
    .await?;
    exec(
        db,
        "INSERT INTO orders (id, status, amount, updated_at) VALUES \
         (1, 'paid', 100, '2020-01-01T00:00:00.000Z'), \
         (2, 'pending', 250, '2020-01-01T00:00:00.000Z'), \
         (3, 'paid', 75, '2020-01-01T00:00:00.000Z')",
    )
    .await?;
    exec(
        db,
        "CREATE TABLE orders_copy (order_id INTEGER PRIMARY KEY, state TEXT, amount INTEGER)",
    )
    .await?;
    Ok(())
}

/// Registers the host database as a `main` data source.
#[allow(dead_code)]
pub async fn register_main_source(engine: &Engine, name: &str) -> Result<Uuid> {
    let config = engine
        .create_data_source(NewDataSource::new(name, DataSourceKind::Main, json!({})))
        .await?;
    Ok(config.id)
}

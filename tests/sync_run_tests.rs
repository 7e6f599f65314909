//! End-to-end sync runs against the host database.

use std::time::{Duration, Instant};

use anyhow::Result;
use datasync::datasource::DataSourcePatch;
use datasync::sync::{
    FieldMapping, NewSyncTask, RunStatus, SyncEvent, SyncMode, SyncTaskPatch, TaskStatus,
};
use datasync::{Engine, EngineError};
use serde_json::{Value as JsonValue, json};
use uuid::Uuid;

#[path = "test_utils/mod.rs"]
mod test_utils;
use test_utils::{exec, register_main_source, seed_orders, setup_engine, setup_test_db};

fn orders_task(data_source_id: Uuid) -> NewSyncTask {
    NewSyncTask {
        name: "orders-copy".to_string(),
        data_source_id,
        source_table: "orders".to_string(),
        target_table: "orders_copy".to_string(),
        sync_mode: SyncMode::Full,
        schedule: None,
        mapping: vec![
            FieldMapping::new("id", "order_id"),
            FieldMapping::new("status", "state").with_transform("STATUS_${value}"),
            FieldMapping::new("amount", "amount"),
        ],
        filter: None,
        key_fields: Vec::new(),
    }
}

async fn copied_rows(engine: &Engine, source_id: Uuid) -> Result<Vec<JsonValue>> {
    Ok(engine
        .execute_query(
            source_id,
            "SELECT order_id, state, amount FROM orders_copy ORDER BY order_id",
            &[],
        )
        .await?
        .rows)
}

#[tokio::test]
async fn full_sync_copies_and_transforms_rows() -> Result<()> {
    let db = setup_test_db().await?;
    seed_orders(&db).await?;
    let engine = setup_engine(&db).await?;
    let source_id = register_main_source(&engine, "host").await?;
    let task = engine.create_task(orders_task(source_id)).await?;

    let result = engine.run_task(task.id).await?;
    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(result.total_records, 3);
    assert_eq!(result.success_records, 3);
    assert_eq!(result.failed_records, 0);
    assert!(result.error.is_none());
    assert!(result.end_time >= result.start_time);

    assert_eq!(
        copied_rows(&engine, source_id).await?,
        vec![
            json!({"order_id": 1, "state": "STATUS_paid", "amount": 100}),
            json!({"order_id": 2, "state": "STATUS_pending", "amount": 250}),
            json!({"order_id": 3, "state": "STATUS_paid", "amount": 75}),
        ]
    );

    let stored = engine.get_task(task.id).await?;
    assert_eq!(stored.status, TaskStatus::Completed);
    assert!(stored.last_sync_time.is_some());
    assert_eq!(
        engine.get_task_status(task.id).await,
        Some(TaskStatus::Completed)
    );

    let source = engine.registry().get_data_source(source_id).await?;
    assert_eq!(source.config().last_sync_time, stored.last_sync_time);
    Ok(())
}

#[tokio::test]
async fn rerun_overwrites_instead_of_duplicating() -> Result<()> {
    let db = setup_test_db().await?;
    seed_orders(&db).await?;
    let engine = setup_engine(&db).await?;
    let source_id = register_main_source(&engine, "host").await?;
    let task = engine.create_task(orders_task(source_id)).await?;

    engine.run_task(task.id).await?;
    exec(&db, "UPDATE orders SET status = 'refunded' WHERE id = 2").await?;
    let second = engine.run_task(task.id).await?;
    assert_eq!(second.status, RunStatus::Success);
    assert_eq!(second.total_records, 3);

    let rows = copied_rows(&engine, source_id).await?;
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[1]["state"], json!("STATUS_refunded"));
    Ok(())
}

#[tokio::test]
async fn filter_limits_the_source_rows() -> Result<()> {
    let db = setup_test_db().await?;
    seed_orders(&db).await?;
    let engine = setup_engine(&db).await?;
    let source_id = register_main_source(&engine, "host").await?;

    let mut new = orders_task(source_id);
    new.filter = Some("status = 'paid'".to_string());
    let task = engine.create_task(new).await?;

    let result = engine.run_task(task.id).await?;
    assert_eq!(result.total_records, 2);
    let ids: Vec<JsonValue> = copied_rows(&engine, source_id)
        .await?
        .into_iter()
        .map(|row| row["order_id"].clone())
        .collect();
    assert_eq!(ids, vec![json!(1), json!(3)]);
    Ok(())
}

#[tokio::test]
async fn incremental_run_only_reads_rows_changed_since_last_sync() -> Result<()> {
    let db = setup_test_db().await?;
    seed_orders(&db).await?;
    let engine = setup_engine(&db).await?;
    let source_id = register_main_source(&engine, "host").await?;

    let mut new = orders_task(source_id);
    new.sync_mode = SyncMode::Incremental;
    let task = engine.create_task(new).await?;

    let first = engine.run_task(task.id).await?;
    assert_eq!(first.total_records, 3);

    exec(
        &db,
        "INSERT INTO orders (id, status, amount, updated_at) \
         VALUES (4, 'paid', 40, '2999-01-01T00:00:00.000Z')",
    )
    .await?;
    let second = engine.run_task(task.id).await?;
    assert_eq!(second.status, RunStatus::Success);
    assert_eq!(second.total_records, 1);
    assert_eq!(copied_rows(&engine, source_id).await?.len(), 4);
    Ok(())
}

#[tokio::test]
async fn empty_source_table_succeeds_with_zero_records() -> Result<()> {
    let db = setup_test_db().await?;
    seed_orders(&db).await?;
    exec(&db, "DELETE FROM orders").await?;
    let engine = setup_engine(&db).await?;
    let source_id = register_main_source(&engine, "host").await?;
    let task = engine.create_task(orders_task(source_id)).await?;

    let result = engine.run_task(task.id).await?;
    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(result.total_records, 0);
    assert_eq!(
        engine.get_task_status(task.id).await,
        Some(TaskStatus::Completed)
    );
    Ok(())
}

#[tokio::test]
async fn record_failures_are_counted_not_fatal() -> Result<()> {
    let db = setup_test_db().await?;
    seed_orders(&db).await?;
    exec(&db, "DROP TABLE orders_copy").await?;
    exec(
        &db,
        "CREATE TABLE orders_copy (order_id INTEGER PRIMARY KEY, state TEXT, \
         amount INTEGER CHECK (amount < 200))",
    )
    .await?;
    let engine = setup_engine(&db).await?;
    let source_id = register_main_source(&engine, "host").await?;
    let task = engine.create_task(orders_task(source_id)).await?;

    let result = engine.run_task(task.id).await?;
    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(result.total_records, 3);
    assert_eq!(result.success_records, 2);
    assert_eq!(result.failed_records, 1);
    Ok(())
}

#[tokio::test]
async fn missing_source_table_fails_the_run() -> Result<()> {
    let db = setup_test_db().await?;
    seed_orders(&db).await?;
    let engine = setup_engine(&db).await?;
    let source_id = register_main_source(&engine, "host").await?;
    let task = engine.create_task(orders_task(source_id)).await?;
    engine
        .update_task(
            task.id,
            SyncTaskPatch {
                source_table: Some("no_such_table".to_string()),
                ..Default::default()
            },
        )
        .await?;

    let result = engine.run_task(task.id).await?;
    assert_eq!(result.status, RunStatus::Failed);
    assert!(result.error.as_deref().unwrap_or_default().contains("source query failed"));

    let stored = engine.get_task(task.id).await?;
    assert_eq!(stored.status, TaskStatus::Failed);
    assert!(stored.last_sync_time.is_none());
    Ok(())
}

#[tokio::test]
async fn missing_data_source_marks_task_failed() -> Result<()> {
    let db = setup_test_db().await?;
    let engine = setup_engine(&db).await?;
    let task = engine.create_task(orders_task(Uuid::new_v4())).await?;

    let err = engine.run_task(task.id).await.unwrap_err();
    assert!(matches!(err, EngineError::Config(_)), "got {err:?}");
    assert_eq!(engine.get_task_status(task.id).await, Some(TaskStatus::Failed));
    Ok(())
}

#[tokio::test]
async fn disabled_data_source_cannot_be_synced() -> Result<()> {
    let db = setup_test_db().await?;
    seed_orders(&db).await?;
    let engine = setup_engine(&db).await?;
    let source_id = register_main_source(&engine, "host").await?;
    engine
        .update_data_source(
            source_id,
            DataSourcePatch {
                enabled: Some(false),
                ..Default::default()
            },
        )
        .await?;
    let task = engine.create_task(orders_task(source_id)).await?;

    let err = engine.run_task(task.id).await.unwrap_err();
    assert!(err.to_string().contains("disabled"));
    assert_eq!(engine.get_task_status(task.id).await, Some(TaskStatus::Failed));
    Ok(())
}

#[tokio::test]
async fn unknown_task_is_a_config_error() -> Result<()> {
    let db = setup_test_db().await?;
    let engine = setup_engine(&db).await?;
    assert!(matches!(
        engine.run_task(Uuid::new_v4()).await,
        Err(EngineError::Config(_))
    ));
    Ok(())
}

#[tokio::test]
async fn concurrent_runs_of_one_task_are_rejected() -> Result<()> {
    let db = setup_test_db().await?;
    seed_orders(&db).await?;
    let engine = setup_engine(&db).await?;
    let source_id = register_main_source(&engine, "host").await?;
    let task = engine.create_task(orders_task(source_id)).await?;

    let (first, second) = tokio::join!(engine.run_task(task.id), engine.run_task(task.id));
    let outcomes = [first, second];
    let succeeded = outcomes.iter().filter(|r| r.is_ok()).count();
    let rejected = outcomes
        .iter()
        .filter(|r| matches!(r, Err(EngineError::AlreadyRunning(id)) if *id == task.id))
        .count();
    assert_eq!(succeeded, 1);
    assert_eq!(rejected, 1);

    assert_eq!(
        engine.get_task_status(task.id).await,
        Some(TaskStatus::Completed)
    );
    assert!(engine.run_task(task.id).await.is_ok());
    Ok(())
}

#[tokio::test]
async fn running_task_cannot_be_deleted_and_idle_task_can() -> Result<()> {
    let db = setup_test_db().await?;
    seed_orders(&db).await?;
    let engine = setup_engine(&db).await?;
    let source_id = register_main_source(&engine, "host").await?;
    let task = engine.create_task(orders_task(source_id)).await?;

    assert!(engine.manager().store().try_mark_running(task.id).await?);
    assert!(matches!(
        engine.delete_task(task.id).await,
        Err(EngineError::Conflict(_))
    ));
    assert!(matches!(
        engine.run_task(task.id).await,
        Err(EngineError::AlreadyRunning(_))
    ));

    engine
        .manager()
        .store()
        .finish(task.id, TaskStatus::Idle, None)
        .await?;
    engine.delete_task(task.id).await?;
    assert!(engine.get_all_tasks().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn listeners_receive_run_lifecycle_events() -> Result<()> {
    let db = setup_test_db().await?;
    seed_orders(&db).await?;
    let engine = setup_engine(&db).await?;
    let source_id = register_main_source(&engine, "host").await?;
    let task = engine.create_task(orders_task(source_id)).await?;

    let mut events = engine.subscribe();
    let result = engine.run_task(task.id).await?;

    match events.recv().await? {
        SyncEvent::RunStarted { task_id, .. } => assert_eq!(task_id, task.id),
        other => panic!("expected RunStarted, got {other:?}"),
    }
    match events.recv().await? {
        SyncEvent::RunCompleted { result: completed } => assert_eq!(completed, result),
        other => panic!("expected RunCompleted, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn cancelled_run_leaves_task_failed_and_rerunnable() -> Result<()> {
    let db = setup_test_db().await?;
    seed_orders(&db).await?;
    let engine = setup_engine(&db).await?;
    let source_id = register_main_source(&engine, "host").await?;
    let task = engine.create_task(orders_task(source_id)).await?;

    let mut events = engine.subscribe();
    let mut run = Box::pin(engine.run_task(task.id));
    tokio::select! {
        biased;
        event = events.recv() => match event? {
            SyncEvent::RunStarted { task_id, .. } => assert_eq!(task_id, task.id),
            other => panic!("expected RunStarted, got {other:?}"),
        },
        outcome = &mut run => panic!("run finished before it could be cancelled: {outcome:?}"),
    }
    drop(run);

    let deadline = Instant::now() + Duration::from_secs(5);
    while engine.get_task_status(task.id).await != Some(TaskStatus::Failed) {
        assert!(Instant::now() < deadline, "task was not released after cancellation");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!engine.manager().is_running(task.id));
    assert_eq!(engine.get_task(task.id).await?.status, TaskStatus::Failed);

    let result = engine.run_task(task.id).await?;
    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(result.success_records, 3);
    assert_eq!(
        engine.get_task_status(task.id).await,
        Some(TaskStatus::Completed)
    );
    Ok(())
}

#[tokio::test]
async fn host_tables_are_listed() -> Result<()> {
    let db = setup_test_db().await?;
    seed_orders(&db).await?;
    let engine = setup_engine(&db).await?;
    let source_id = register_main_source(&engine, "host").await?;

    let tables = engine.list_tables(source_id).await?;
    assert!(tables.contains(&"orders".to_string()));
    assert!(tables.contains(&"orders_copy".to_string()));
    assert!(tables.contains(&"sync_tasks".to_string()));
    Ok(())
}

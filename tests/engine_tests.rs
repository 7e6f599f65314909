//! Engine-level probes and queries that do not involve sync runs.

use anyhow::Result;
use datasync::datasource::{DataSourceKind, NewDataSource};
use datasync::EngineError;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[path = "test_utils/mod.rs"]
mod test_utils;
use test_utils::{register_main_source, setup_engine, setup_test_db};

#[tokio::test]
async fn probe_of_unreachable_database_reports_failure() -> Result<()> {
    let db = setup_test_db().await?;
    let engine = setup_engine(&db).await?;

    let result = engine
        .test_connection(
            DataSourceKind::Postgres,
            json!({"host": "127.0.0.1", "port": 1, "user": "u", "database": "none"}),
        )
        .await;
    assert!(!result.success);
    assert!(result.message.is_some());
    Ok(())
}

#[tokio::test]
async fn probe_with_malformed_params_reports_failure() -> Result<()> {
    let db = setup_test_db().await?;
    let engine = setup_engine(&db).await?;

    let result = engine
        .test_connection(DataSourceKind::Mysql, json!({"port": 3306}))
        .await;
    assert!(!result.success);
    Ok(())
}

#[tokio::test]
async fn probe_of_host_database_succeeds() -> Result<()> {
    let db = setup_test_db().await?;
    let engine = setup_engine(&db).await?;

    let result = engine.test_connection(DataSourceKind::Main, json!({})).await;
    assert!(result.success);
    assert!(result.message.is_none());
    Ok(())
}

#[tokio::test]
async fn rest_source_can_be_probed_and_queried() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/customers"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{"id": 1}, {"id": 2}])),
        )
        .mount(&server)
        .await;

    let db = setup_test_db().await?;
    let engine = setup_engine(&db).await?;

    let params = json!({"baseUrl": server.uri()});
    assert!(
        engine
            .test_connection(DataSourceKind::Rest, params.clone())
            .await
            .success
    );

    let source = engine
        .create_data_source(NewDataSource::new("crm", DataSourceKind::Rest, params))
        .await?;
    let result = engine.execute_query(source.id, "GET /customers", &[]).await?;
    assert_eq!(result.rows, vec![json!({"id": 1}), json!({"id": 2})]);

    let err = engine.list_tables(source.id).await.unwrap_err();
    assert!(matches!(err, EngineError::Unsupported(_)));
    Ok(())
}

#[tokio::test]
async fn host_statement_failures_surface_as_query_errors() -> Result<()> {
    let db = setup_test_db().await?;
    let engine = setup_engine(&db).await?;
    let source_id = register_main_source(&engine, "host").await?;

    let err = engine
        .execute_query(source_id, "SELECT * FROM missing_table", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Query(_)), "got {err:?}");
    assert_eq!(err.code(), "QUERY_ERROR");
    Ok(())
}

//! Sync worker
//!
//! Executes one pass of a task: page through the source table, remap each
//! record and upsert it into the target table. Record-level failures are
//! counted and the pass continues; anything else aborts the pass with a
//! `failed` result that keeps the counts reached so far.
//!
//! Pages use LIMIT/OFFSET, so rows inserted or deleted in the source while a
//! pass is in progress can be skipped or seen twice.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use metrics::counter;
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, info, instrument, warn};

use crate::connectors::Dialect;
use crate::datasource::DataSource;
use crate::error::{EngineError, Result};
use crate::sync::transform::{TransformError, ValueTransform, json_kind};
use crate::sync::{RunStatus, SyncMode, SyncResult, SyncTaskConfig};

#[derive(Debug, Default, Clone, Copy)]
struct Counts {
    total: u64,
    success: u64,
    failed: u64,
}

pub struct SyncWorker {
    task: SyncTaskConfig,
    source: Arc<DataSource>,
    transform: Arc<dyn ValueTransform>,
    batch_size: u64,
}

impl SyncWorker {
    pub fn new(
        task: SyncTaskConfig,
        source: Arc<DataSource>,
        transform: Arc<dyn ValueTransform>,
        batch_size: u64,
    ) -> Self {
        Self {
            task,
            source,
            transform,
            batch_size: batch_size.max(1),
        }
    }

    /// Source query without pagination.
    pub fn build_query(&self) -> String {
        let mut conditions = Vec::new();
        if let Some(filter) = self.task.filter.as_deref().filter(|f| !f.trim().is_empty()) {
            conditions.push(filter.to_string());
        }
        if self.task.sync_mode == SyncMode::Incremental {
            if let Some(since) = self.task.last_sync_time {
                conditions.push(format!(
                    "updated_at > '{}'",
                    since.to_rfc3339_opts(SecondsFormat::Millis, true)
                ));
            }
        }

        let mut query = format!("SELECT * FROM {}", self.task.source_table);
        if !conditions.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&conditions.join(" AND "));
        }
        query
    }

    /// Build the target record for one source record.
    ///
    /// Unmapped source fields are dropped and missing ones become `null`
    /// before any transform runs. A transform that cannot be applied keeps the
    /// original value.
    pub fn transform_record(
        &self,
        record: &JsonValue,
    ) -> std::result::Result<Map<String, JsonValue>, TransformError> {
        let source = record.as_object().ok_or(TransformError::NotAnObject {
            kind: json_kind(record),
        })?;

        let mut target = Map::new();
        for mapping in &self.task.mapping {
            let value = source
                .get(&mapping.source_field)
                .cloned()
                .unwrap_or(JsonValue::Null);
            let value = match &mapping.transform {
                Some(template) => match self.transform.apply(template, &value) {
                    Ok(transformed) => transformed,
                    Err(e) => {
                        warn!(task_id = %self.task.id, field = %mapping.source_field, error = %e, "Transform failed; keeping original value");
                        value
                    }
                },
                None => value,
            };
            target.insert(mapping.target_field.clone(), value);
        }

        if target.is_empty() {
            return Err(TransformError::EmptyRecord);
        }
        Ok(target)
    }

    /// Run one pass. Never returns an error; failures are reported in the result.
    #[instrument(skip(self), fields(task_id = %self.task.id, data_source_id = %self.source.id(), mode = self.task.sync_mode.as_str()))]
    pub async fn run(&self) -> SyncResult {
        let start_time = Utc::now();
        let mut counts = Counts::default();
        let outcome = self.execute(&mut counts).await;
        let end_time = Utc::now();

        counter!("sync_records_total", "outcome" => "success").increment(counts.success);
        counter!("sync_records_total", "outcome" => "failed").increment(counts.failed);

        let (status, error) = match outcome {
            Ok(()) => {
                info!(
                    total = counts.total,
                    success = counts.success,
                    failed = counts.failed,
                    "Sync pass completed"
                );
                (RunStatus::Success, None)
            }
            Err(e) => {
                warn!(
                    total = counts.total,
                    success = counts.success,
                    failed = counts.failed,
                    error = %e,
                    "Sync pass aborted"
                );
                (RunStatus::Failed, Some(e.to_string()))
            }
        };

        SyncResult {
            task_id: self.task.id,
            start_time,
            end_time,
            status,
            total_records: counts.total,
            success_records: counts.success,
            failed_records: counts.failed,
            error,
        }
    }

    async fn execute(&self, counts: &mut Counts) -> Result<()> {
        let dialect = self.source.dialect().ok_or_else(|| {
            EngineError::SyncRun(format!(
                "data source '{}' ({}) cannot be used as a table source",
                self.source.name(),
                self.source.kind()
            ))
        })?;

        let keys = self.task.conflict_keys();
        if keys.is_empty() {
            return Err(EngineError::SyncRun(
                "task has no field mapping to derive a conflict key from".to_string(),
            ));
        }
        let upsert = self.upsert_statement(dialect, &keys);
        let base = self.build_query();

        let mut offset = 0u64;
        loop {
            let page = dialect.paginate(&base, self.batch_size, offset);
            let batch = self
                .source
                .query(&page, &[])
                .await
                .map_err(|e| EngineError::SyncRun(format!("source query failed: {}", e)))?;
            if batch.is_empty() {
                break;
            }
            debug!(offset, rows = batch.len(), "Fetched source batch");

            for record in &batch.rows {
                counts.total += 1;
                match self.sync_record(&upsert, record).await {
                    Ok(()) => counts.success += 1,
                    Err(e) => {
                        counts.failed += 1;
                        debug!(error = %e, "Record failed");
                    }
                }
            }

            offset += self.batch_size;
        }

        Ok(())
    }

    fn upsert_statement(&self, dialect: Dialect, keys: &[String]) -> String {
        let columns: Vec<&str> = self
            .task
            .mapping
            .iter()
            .map(|m| m.target_field.as_str())
            .collect();
        let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
        dialect.upsert_sql(&self.task.target_table, &columns, &keys)
    }

    async fn sync_record(&self, upsert: &str, record: &JsonValue) -> Result<()> {
        let mut target = self.transform_record(record)?;
        let values: Vec<JsonValue> = self
            .task
            .mapping
            .iter()
            .map(|m| target.remove(&m.target_field).unwrap_or(JsonValue::Null))
            .collect();
        self.source.query(upsert, &values).await?;
        Ok(())
    }
}

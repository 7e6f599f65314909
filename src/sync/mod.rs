//! # Sync engine
//!
//! Task configuration types, the value transform, the persistent task store,
//! the per-run worker and the orchestrating manager.

pub mod manager;
pub mod store;
pub mod transform;
pub mod worker;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::sync_task;

pub use manager::SyncManager;
pub use store::SyncTaskStore;
pub use transform::{PlaceholderTransform, TransformError, ValueTransform};
pub use worker::SyncWorker;

/// How a run selects source rows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Every row, every run
    #[default]
    Full,
    /// Rows whose `updated_at` is newer than the task's last successful sync
    Incremental,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Full => "full",
            SyncMode::Incremental => "incremental",
        }
    }
}

impl FromStr for SyncMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(SyncMode::Full),
            "incremental" => Ok(SyncMode::Incremental),
            other => Err(EngineError::Config(format!("unknown sync mode '{}'", other))),
        }
    }
}

/// Lifecycle status of a task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Idle,
    Running,
    Failed,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Idle => "idle",
            TaskStatus::Running => "running",
            TaskStatus::Failed => "failed",
            TaskStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(TaskStatus::Idle),
            "running" => Ok(TaskStatus::Running),
            "failed" => Ok(TaskStatus::Failed),
            "completed" => Ok(TaskStatus::Completed),
            other => Err(EngineError::Config(format!("unknown task status '{}'", other))),
        }
    }
}

/// One source-to-target field mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMapping {
    pub source_field: String,
    pub target_field: String,
    /// Template containing the `${value}` placeholder
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,
}

impl FieldMapping {
    pub fn new(source_field: impl Into<String>, target_field: impl Into<String>) -> Self {
        Self {
            source_field: source_field.into(),
            target_field: target_field.into(),
            transform: None,
        }
    }

    pub fn with_transform(mut self, template: impl Into<String>) -> Self {
        self.transform = Some(template.into());
        self
    }
}

/// A configured copy job from a source table into a target table
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncTaskConfig {
    pub id: Uuid,
    pub name: String,
    pub data_source_id: Uuid,
    pub source_table: String,
    pub target_table: String,
    pub sync_mode: SyncMode,
    pub schedule: Option<String>,
    pub mapping: Vec<FieldMapping>,
    pub filter: Option<String>,
    pub key_fields: Vec<String>,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub status: TaskStatus,
}

impl SyncTaskConfig {
    /// Conflict key of the target table: `key_fields`, or the first mapped target field.
    pub fn conflict_keys(&self) -> Vec<String> {
        if !self.key_fields.is_empty() {
            return self.key_fields.clone();
        }
        self.mapping
            .first()
            .map(|m| vec![m.target_field.clone()])
            .unwrap_or_default()
    }
}

impl TryFrom<sync_task::Model> for SyncTaskConfig {
    type Error = EngineError;

    fn try_from(model: sync_task::Model) -> Result<Self, Self::Error> {
        let mapping: Vec<FieldMapping> = serde_json::from_value(model.mapping).map_err(|e| {
            EngineError::Config(format!("task {} has malformed mapping: {}", model.id, e))
        })?;
        let key_fields: Vec<String> = match model.key_fields {
            Some(value) => serde_json::from_value(value).map_err(|e| {
                EngineError::Config(format!("task {} has malformed key fields: {}", model.id, e))
            })?,
            None => Vec::new(),
        };

        Ok(Self {
            id: model.id,
            name: model.name,
            data_source_id: model.data_source_id,
            source_table: model.source_table,
            target_table: model.target_table,
            sync_mode: model.sync_mode.parse()?,
            schedule: model.schedule,
            mapping,
            filter: model.filter,
            key_fields,
            last_sync_time: model.last_sync_time.map(|t| t.with_timezone(&Utc)),
            status: model.status.parse()?,
        })
    }
}

/// Input for creating a task
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSyncTask {
    pub name: String,
    pub data_source_id: Uuid,
    pub source_table: String,
    pub target_table: String,
    #[serde(default)]
    pub sync_mode: SyncMode,
    #[serde(default)]
    pub schedule: Option<String>,
    pub mapping: Vec<FieldMapping>,
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub key_fields: Vec<String>,
}

impl NewSyncTask {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.name.trim().is_empty() {
            return Err(EngineError::Config("task name cannot be empty".to_string()));
        }
        if self.source_table.trim().is_empty() || self.target_table.trim().is_empty() {
            return Err(EngineError::Config(
                "source and target tables are required".to_string(),
            ));
        }
        validate_mapping(&self.mapping)
    }
}

/// Partial update for a task. The id is immutable.
///
/// Nullable fields use a double option: absent leaves the value unchanged,
/// `null` clears it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncTaskPatch {
    pub name: Option<String>,
    pub data_source_id: Option<Uuid>,
    pub source_table: Option<String>,
    pub target_table: Option<String>,
    pub sync_mode: Option<SyncMode>,
    #[serde(default, deserialize_with = "double_option")]
    pub schedule: Option<Option<String>>,
    pub mapping: Option<Vec<FieldMapping>>,
    #[serde(default, deserialize_with = "double_option")]
    pub filter: Option<Option<String>>,
    pub key_fields: Option<Vec<String>>,
}

impl SyncTaskPatch {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(EngineError::Config("task name cannot be empty".to_string()));
        }
        if let Some(mapping) = &self.mapping {
            validate_mapping(mapping)?;
        }
        Ok(())
    }
}

fn validate_mapping(mapping: &[FieldMapping]) -> Result<(), EngineError> {
    if mapping.is_empty() {
        return Err(EngineError::Config(
            "at least one field mapping is required".to_string(),
        ));
    }
    for (i, m) in mapping.iter().enumerate() {
        if m.source_field.is_empty() || m.target_field.is_empty() {
            return Err(EngineError::Config(format!(
                "mapping {} has an empty field name",
                i
            )));
        }
        if mapping[..i].iter().any(|prev| prev.target_field == m.target_field) {
            return Err(EngineError::Config(format!(
                "target field '{}' is mapped more than once",
                m.target_field
            )));
        }
    }
    Ok(())
}

fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Outcome of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }
}

/// Summary of one run. `total_records == success_records + failed_records`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub task_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: RunStatus,
    pub total_records: u64,
    pub success_records: u64,
    pub failed_records: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncResult {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}

/// Run lifecycle notifications
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    RunStarted {
        task_id: Uuid,
        started_at: DateTime<Utc>,
    },
    RunCompleted { result: SyncResult },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_task(mapping: Vec<FieldMapping>) -> NewSyncTask {
        NewSyncTask {
            name: "orders".to_string(),
            data_source_id: Uuid::new_v4(),
            source_table: "orders".to_string(),
            target_table: "orders_copy".to_string(),
            sync_mode: SyncMode::Full,
            schedule: None,
            mapping,
            filter: None,
            key_fields: Vec::new(),
        }
    }

    #[test]
    fn test_mapping_validation() {
        assert!(new_task(vec![FieldMapping::new("id", "order_id")]).validate().is_ok());
        assert!(new_task(Vec::new()).validate().is_err());
        assert!(
            new_task(vec![
                FieldMapping::new("id", "order_id"),
                FieldMapping::new("legacy_id", "order_id"),
            ])
            .validate()
            .is_err()
        );
    }

    #[test]
    fn test_conflict_keys_default_to_first_target_field() {
        let mut task = SyncTaskConfig {
            id: Uuid::new_v4(),
            name: "t".to_string(),
            data_source_id: Uuid::new_v4(),
            source_table: "a".to_string(),
            target_table: "b".to_string(),
            sync_mode: SyncMode::Full,
            schedule: None,
            mapping: vec![
                FieldMapping::new("id", "order_id"),
                FieldMapping::new("total", "amount"),
            ],
            filter: None,
            key_fields: Vec::new(),
            last_sync_time: None,
            status: TaskStatus::Idle,
        };
        assert_eq!(task.conflict_keys(), vec!["order_id".to_string()]);

        task.key_fields = vec!["amount".to_string()];
        assert_eq!(task.conflict_keys(), vec!["amount".to_string()]);
    }

    #[test]
    fn test_patch_distinguishes_absent_and_null() {
        let patch: SyncTaskPatch = serde_json::from_value(json!({"filter": null})).unwrap();
        assert_eq!(patch.filter, Some(None));
        assert_eq!(patch.schedule, None);

        let patch: SyncTaskPatch =
            serde_json::from_value(json!({"schedule": "0 * * * *"})).unwrap();
        assert_eq!(patch.schedule, Some(Some("0 * * * *".to_string())));
        assert!(patch.filter.is_none());
    }

    #[test]
    fn test_unknown_mode_is_config_error() {
        let err = "hourly".parse::<SyncMode>().unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_field_mapping_wire_shape() {
        let mapping: FieldMapping = serde_json::from_value(json!({
            "sourceField": "status",
            "targetField": "state",
            "transform": "STATUS_${value}"
        }))
        .unwrap();
        assert_eq!(
            mapping,
            FieldMapping::new("status", "state").with_transform("STATUS_${value}")
        );
    }
}

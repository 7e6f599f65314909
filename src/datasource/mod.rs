//! # Data sources
//!
//! A [`DataSource`] binds one persisted [`DataSourceConfig`] to the connector
//! selected by its kind. Construction is the only place a kind is dispatched
//! on, and it fails fast on malformed parameters.

pub mod pool;
pub mod registry;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

use crate::connectors::{
    Connector, Dialect, HostConnector, QueryResult, RelationalConnector, RelationalParams,
    RestConnector, RestParams,
};
use crate::error::{EngineError, Result};
use crate::models::data_source;

pub use pool::{ConnectTarget, ConnectionPool, TEST_CONNECTION_ID};
pub use registry::DataSourceRegistry;

const MASK: &str = "******";
const SECRET_KEYS: &[&str] = &["password", "token"];

/// Backend kind of a data source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSourceKind {
    Mysql,
    Postgres,
    Rest,
    /// The host application's own database
    Main,
}

impl DataSourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSourceKind::Mysql => "mysql",
            DataSourceKind::Postgres => "postgres",
            DataSourceKind::Rest => "rest",
            DataSourceKind::Main => "main",
        }
    }
}

impl fmt::Display for DataSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataSourceKind {
    type Err = EngineError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mysql" => Ok(DataSourceKind::Mysql),
            "postgres" | "postgresql" => Ok(DataSourceKind::Postgres),
            "rest" => Ok(DataSourceKind::Rest),
            "main" => Ok(DataSourceKind::Main),
            other => Err(EngineError::Config(format!(
                "unsupported data source type '{}'",
                other
            ))),
        }
    }
}

/// Persisted description of a data source
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceConfig {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: DataSourceKind,
    /// Backend-specific connection parameters
    pub params: JsonValue,
    pub enabled: bool,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DataSourceConfig {
    /// A fresh, enabled configuration with a new id.
    pub fn new(name: impl Into<String>, kind: DataSourceKind, params: JsonValue) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind,
            params,
            enabled: true,
            last_sync_time: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Copy with secrets in `params` masked, for logs and listings.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if let Some(object) = copy.params.as_object_mut() {
            redact_params(object);
        }
        copy
    }
}

fn redact_params(params: &mut Map<String, JsonValue>) {
    for key in SECRET_KEYS {
        if let Some(value) = params.get_mut(*key) {
            if !value.is_null() {
                *value = JsonValue::String(MASK.to_string());
            }
        }
    }

    if let Some(JsonValue::String(raw)) = params.get_mut("url") {
        if let Ok(mut parsed) = url::Url::parse(raw) {
            if parsed.password().is_some() && parsed.set_password(Some(MASK)).is_ok() {
                *raw = parsed.to_string();
            }
        }
    }

    if let Some(JsonValue::Object(headers)) = params.get_mut("headers") {
        for (name, value) in headers.iter_mut() {
            if name.eq_ignore_ascii_case("authorization") {
                *value = JsonValue::String(MASK.to_string());
            }
        }
    }
}

impl TryFrom<data_source::Model> for DataSourceConfig {
    type Error = EngineError;

    fn try_from(model: data_source::Model) -> Result<Self> {
        Ok(Self {
            id: model.id,
            name: model.name,
            kind: model.kind.parse()?,
            params: model.config,
            enabled: model.enabled,
            last_sync_time: model.last_sync_time.map(|t| t.with_timezone(&Utc)),
            created_at: model.created_at.with_timezone(&Utc),
            updated_at: model.updated_at.with_timezone(&Utc),
        })
    }
}

/// Input for registering a data source
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDataSource {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: DataSourceKind,
    #[serde(default = "empty_object")]
    pub params: JsonValue,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl NewDataSource {
    pub fn new(name: impl Into<String>, kind: DataSourceKind, params: JsonValue) -> Self {
        Self {
            name: name.into(),
            kind,
            params,
            enabled: true,
        }
    }

    pub(crate) fn into_config(self) -> Result<DataSourceConfig> {
        if self.name.trim().is_empty() {
            return Err(EngineError::Config(
                "data source name cannot be empty".to_string(),
            ));
        }
        let mut config = DataSourceConfig::new(self.name, self.kind, self.params);
        config.enabled = self.enabled;
        Ok(config)
    }
}

/// Partial update for a data source. The id is immutable.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourcePatch {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<DataSourceKind>,
    pub params: Option<JsonValue>,
    pub enabled: Option<bool>,
}

impl DataSourcePatch {
    pub(crate) fn apply(self, config: &mut DataSourceConfig) -> Result<()> {
        if let Some(name) = self.name {
            if name.trim().is_empty() {
                return Err(EngineError::Config(
                    "data source name cannot be empty".to_string(),
                ));
            }
            config.name = name;
        }
        if let Some(kind) = self.kind {
            config.kind = kind;
        }
        if let Some(params) = self.params {
            config.params = params;
        }
        if let Some(enabled) = self.enabled {
            config.enabled = enabled;
        }
        config.updated_at = Utc::now();
        Ok(())
    }
}

fn empty_object() -> JsonValue {
    JsonValue::Object(Map::new())
}

fn default_enabled() -> bool {
    true
}

/// Shared resources handed to connector constructors
#[derive(Clone)]
pub struct ConnectorContext {
    pub pool: Arc<ConnectionPool>,
    pub host_db: DatabaseConnection,
    pub rest_timeout: Duration,
}

/// A live data source: configuration plus its connector
pub struct DataSource {
    config: DataSourceConfig,
    connector: Arc<dyn Connector>,
}

impl DataSource {
    /// Build the connector for `config.kind`. No connection is opened.
    pub fn new(config: DataSourceConfig, context: &ConnectorContext) -> Result<Self> {
        let connector = build_connector(&config, context)?;
        Ok(Self { config, connector })
    }

    /// Bind a configuration to an already-built connector.
    pub fn with_connector(config: DataSourceConfig, connector: Arc<dyn Connector>) -> Self {
        Self { config, connector }
    }

    pub fn id(&self) -> Uuid {
        self.config.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn kind(&self) -> DataSourceKind {
        self.config.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn config(&self) -> &DataSourceConfig {
        &self.config
    }

    pub(crate) fn connector(&self) -> Arc<dyn Connector> {
        self.connector.clone()
    }

    pub async fn connect(&self) -> Result<()> {
        Ok(self.connector.connect().await?)
    }

    pub async fn disconnect(&self) -> Result<()> {
        Ok(self.connector.disconnect().await?)
    }

    pub async fn query(&self, statement: &str, params: &[JsonValue]) -> Result<QueryResult> {
        Ok(self.connector.query(statement, params).await?)
    }

    pub async fn test(&self) -> bool {
        self.connector.test().await
    }

    pub fn dialect(&self) -> Option<Dialect> {
        self.connector.dialect()
    }
}

impl fmt::Debug for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSource")
            .field("config", &self.config.redacted())
            .finish_non_exhaustive()
    }
}

fn build_connector(
    config: &DataSourceConfig,
    context: &ConnectorContext,
) -> Result<Arc<dyn Connector>> {
    let connector: Arc<dyn Connector> = match config.kind {
        DataSourceKind::Mysql => Arc::new(RelationalConnector::new(
            config.id,
            Dialect::MySql,
            &parse_params::<RelationalParams>(config)?,
            context.pool.clone(),
        )?),
        DataSourceKind::Postgres => Arc::new(RelationalConnector::new(
            config.id,
            Dialect::Postgres,
            &parse_params::<RelationalParams>(config)?,
            context.pool.clone(),
        )?),
        DataSourceKind::Rest => Arc::new(RestConnector::new(
            &parse_params::<RestParams>(config)?,
            context.rest_timeout,
        )?),
        DataSourceKind::Main => Arc::new(HostConnector::new(context.host_db.clone())),
    };
    Ok(connector)
}

fn parse_params<T: serde::de::DeserializeOwned>(config: &DataSourceConfig) -> Result<T> {
    serde_json::from_value(config.params.clone()).map_err(|e| {
        EngineError::Config(format!(
            "invalid {} parameters for data source '{}': {}",
            config.kind, config.name, e
        ))
    })
}

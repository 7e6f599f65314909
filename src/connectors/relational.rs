//! Relational connector
//!
//! MySQL and PostgreSQL backends. Sessions are sqlx pools owned by the shared
//! [`ConnectionPool`], keyed by data source id, so every DataSource bound to
//! the same id reuses one authenticated pool.

use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::{DatabaseConnection, FromQueryResult, Statement};
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::connectors::dialect::Dialect;
use crate::connectors::trait_::{Connector, ConnectorError, QueryResult};
use crate::datasource::pool::{ConnectTarget, ConnectionPool};

/// Statement used to probe a live session
pub const PROBE_SQL: &str = "SELECT 1";

/// Connection parameters for relational backends.
///
/// Either a full `url` or discrete host/port/credential fields. `options` are
/// appended to the connection URL as query parameters (e.g. `sslmode`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationalParams {
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    #[serde(alias = "username")]
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    #[serde(default)]
    pub options: Map<String, JsonValue>,
}

impl RelationalParams {
    /// Build the driver connection URL for `dialect`.
    pub fn connection_url(&self, dialect: Dialect) -> Result<String, ConnectorError> {
        let scheme = match dialect {
            Dialect::MySql => "mysql",
            Dialect::Postgres => "postgres",
            Dialect::Sqlite => "sqlite",
        };
        let invalid = |details: String| ConnectorError::Configuration { details };

        let mut url = match (&self.url, &self.host) {
            (Some(raw), _) => {
                Url::parse(raw).map_err(|e| invalid(format!("invalid connection url: {}", e)))?
            }
            (None, Some(host)) => {
                let mut url = Url::parse(&format!("{}://{}", scheme, host))
                    .map_err(|e| invalid(format!("invalid host '{}': {}", host, e)))?;
                url.set_port(self.port)
                    .map_err(|_| invalid("cannot set port on connection url".to_string()))?;
                if let Some(database) = &self.database {
                    url.set_path(database);
                }
                url
            }
            (None, None) => {
                return Err(invalid(
                    "relational data source requires 'url' or 'host'".to_string(),
                ));
            }
        };

        if let Some(user) = &self.user {
            url.set_username(user)
                .map_err(|_| invalid("cannot set username on connection url".to_string()))?;
        }
        if let Some(password) = &self.password {
            url.set_password(Some(password))
                .map_err(|_| invalid("cannot set password on connection url".to_string()))?;
        }
        if !self.options.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.options {
                match value {
                    JsonValue::String(s) => pairs.append_pair(key, s),
                    other => pairs.append_pair(key, &other.to_string()),
                };
            }
        }

        Ok(url.to_string())
    }
}

/// Connector over a MySQL or PostgreSQL database
pub struct RelationalConnector {
    id: Uuid,
    dialect: Dialect,
    target: ConnectTarget,
    pool: Arc<ConnectionPool>,
}

impl RelationalConnector {
    /// Create a connector for data source `id`. No connection is opened.
    pub fn new(
        id: Uuid,
        dialect: Dialect,
        params: &RelationalParams,
        pool: Arc<ConnectionPool>,
    ) -> Result<Self, ConnectorError> {
        let url = params.connection_url(dialect)?;
        Ok(Self {
            id,
            dialect,
            target: ConnectTarget { dialect, url },
            pool,
        })
    }

    async fn session(&self) -> Result<DatabaseConnection, ConnectorError> {
        match self.pool.get_connection(self.id) {
            Some(conn) => Ok(conn),
            None => self.pool.create_connection(self.id, &self.target).await,
        }
    }
}

#[async_trait]
impl Connector for RelationalConnector {
    async fn connect(&self) -> Result<(), ConnectorError> {
        self.pool.create_connection(self.id, &self.target).await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ConnectorError> {
        self.pool.close_connection(self.id).await
    }

    async fn query(
        &self,
        statement: &str,
        params: &[JsonValue],
    ) -> Result<QueryResult, ConnectorError> {
        let conn = self.session().await?;
        execute_statement(&conn, self.dialect, self.dialect.name(), statement, params).await
    }

    async fn test(&self) -> bool {
        let outcome = match self.pool.get_connection(self.id) {
            Some(conn) => {
                execute_statement(&conn, self.dialect, self.dialect.name(), PROBE_SQL, &[])
                    .await
                    .map(|_| ())
            }
            None => self.pool.test_connection(&self.target).await,
        };

        match outcome {
            Ok(()) => true,
            Err(err) => {
                debug!(data_source_id = %self.id, error = %err, "Relational connection test failed");
                false
            }
        }
    }

    fn dialect(&self) -> Option<Dialect> {
        Some(self.dialect)
    }
}

/// Execute `sql` on `conn`, returning rows as JSON objects.
///
/// Statements that produce no rows (inserts, updates) yield an empty result.
pub(crate) async fn execute_statement(
    conn: &DatabaseConnection,
    dialect: Dialect,
    backend: &'static str,
    sql: &str,
    params: &[JsonValue],
) -> Result<QueryResult, ConnectorError> {
    let values: Vec<sea_orm::Value> = params.iter().map(json_to_value).collect();
    let statement = Statement::from_sql_and_values(dialect.backend(), sql, values);

    let rows = JsonValue::find_by_statement(statement)
        .all(conn)
        .await
        .map_err(|err| {
            warn!(backend = backend, error = %err, "Statement execution failed");
            ConnectorError::Query {
                backend,
                details: err.to_string(),
            }
        })?;

    Ok(QueryResult::from_rows(rows))
}

/// Convert a JSON parameter into a bindable database value.
pub(crate) fn json_to_value(value: &JsonValue) -> sea_orm::Value {
    match value {
        JsonValue::Null => sea_orm::Value::String(None),
        JsonValue::Bool(b) => sea_orm::Value::Bool(Some(*b)),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => sea_orm::Value::BigInt(Some(i)),
            None => sea_orm::Value::Double(n.as_f64()),
        },
        JsonValue::String(s) => sea_orm::Value::String(Some(Box::new(s.clone()))),
        other => sea_orm::Value::Json(Some(Box::new(other.clone()))),
    }
}

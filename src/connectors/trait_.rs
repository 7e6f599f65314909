//! Connector trait definition
//!
//! Defines the capability surface every backend adapter implements: session
//! lifecycle, statement execution and a non-raising connectivity probe.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::connectors::dialect::Dialect;

/// Connector-specific error types for structured error handling
#[derive(Debug, Clone)]
pub enum ConnectorError {
    /// Opening or authenticating a session failed
    Connection {
        backend: &'static str,
        details: String,
    },
    /// Statement execution failed
    Query {
        backend: &'static str,
        details: String,
    },
    /// HTTP error from an upstream REST endpoint
    Http { status: u16, body: Option<String> },
    /// Transport-level failure talking to an HTTP endpoint
    Network { details: String },
    /// Connection parameters are missing or malformed
    Configuration { details: String },
}

impl std::fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectorError::Connection { backend, details } => {
                write!(f, "{} connection failed: {}", backend, details)
            }
            ConnectorError::Query { backend, details } => {
                write!(f, "{} query failed: {}", backend, details)
            }
            ConnectorError::Http { status, body } => {
                write!(
                    f,
                    "REST request failed: {} {}",
                    status,
                    body.as_deref().unwrap_or("No body")
                )
            }
            ConnectorError::Network { details } => {
                write!(f, "REST request failed: {}", details)
            }
            ConnectorError::Configuration { details } => {
                write!(f, "Configuration error: {}", details)
            }
        }
    }
}

impl std::error::Error for ConnectorError {}

/// Rows and column names returned by [`Connector::query`].
///
/// Relational rows are JSON objects keyed by column name. REST rows are the
/// decoded response items and may be any JSON value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub rows: Vec<JsonValue>,
    pub columns: Vec<String>,
}

impl QueryResult {
    /// Build a result whose column list is taken from the first object row.
    pub fn from_rows(rows: Vec<JsonValue>) -> Self {
        let columns = rows
            .first()
            .and_then(|row| row.as_object())
            .map(|object| object.keys().cloned().collect())
            .unwrap_or_default();
        Self { rows, columns }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a session with the backend. A no-op for stateless backends.
    async fn connect(&self) -> Result<(), ConnectorError>;

    /// Release the session opened by [`Connector::connect`].
    async fn disconnect(&self) -> Result<(), ConnectorError>;

    /// Execute a statement with positional parameters.
    async fn query(
        &self,
        statement: &str,
        params: &[JsonValue],
    ) -> Result<QueryResult, ConnectorError>;

    /// Probe connectivity. Never raises; any failure yields `false`.
    async fn test(&self) -> bool;

    /// SQL dialect used to build statements for this backend, if any.
    fn dialect(&self) -> Option<Dialect>;
}

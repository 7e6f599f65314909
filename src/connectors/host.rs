//! Host-native connector
//!
//! Runs statements against the application's own database. The connection is
//! owned by the host, so `connect` and `disconnect` do nothing.

use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DatabaseConnection};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::connectors::dialect::Dialect;
use crate::connectors::relational::{PROBE_SQL, execute_statement};
use crate::connectors::trait_::{Connector, ConnectorError, QueryResult};

const BACKEND: &str = "main";

#[derive(Clone)]
pub struct HostConnector {
    db: DatabaseConnection,
}

impl HostConnector {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Connector for HostConnector {
    async fn connect(&self) -> Result<(), ConnectorError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ConnectorError> {
        Ok(())
    }

    async fn query(
        &self,
        statement: &str,
        params: &[JsonValue],
    ) -> Result<QueryResult, ConnectorError> {
        let dialect = Dialect::from_backend(self.db.get_database_backend());
        execute_statement(&self.db, dialect, BACKEND, statement, params).await
    }

    async fn test(&self) -> bool {
        match self.query(PROBE_SQL, &[]).await {
            Ok(_) => true,
            Err(err) => {
                debug!(error = %err, "Host database probe failed");
                false
            }
        }
    }

    fn dialect(&self) -> Option<Dialect> {
        Some(Dialect::from_backend(self.db.get_database_backend()))
    }
}

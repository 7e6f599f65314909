//! # Error Handling
//!
//! Error taxonomy shared by the connectors, the data source registry and the
//! sync engine. Record-level failures never surface here; they are tallied
//! into [`crate::sync::SyncResult`] counts instead.

use thiserror::Error;
use uuid::Uuid;

use crate::connectors::ConnectorError;
use crate::sync::transform::TransformError;

/// Convenience alias used across the engine.
pub type Result<T, E = EngineError> = std::result::Result<T, E>;

/// Errors surfaced by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Establishing or authenticating a backend session failed
    #[error("{0}")]
    Connection(String),
    /// A well-formed statement failed to execute
    #[error("{0}")]
    Query(String),
    /// Unknown backend type, malformed parameters, or a missing task / data source
    #[error("configuration error: {0}")]
    Config(String),
    /// A record could not be transformed
    #[error(transparent)]
    Transform(#[from] TransformError),
    /// A run aborted outside the per-record scope
    #[error("sync run failed: {0}")]
    SyncRun(String),
    /// A unique constraint or state precondition was violated
    #[error("conflict: {0}")]
    Conflict(String),
    /// A run for the task is already in progress
    #[error("sync task {0} is already running")]
    AlreadyRunning(Uuid),
    /// The backend cannot perform the requested operation
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    /// The configuration store failed
    #[error("storage error: {0}")]
    Storage(#[source] sea_orm::DbErr),
}

impl EngineError {
    pub fn task_not_found(id: Uuid) -> Self {
        EngineError::Config(format!("sync task not found: {}", id))
    }

    pub fn data_source_not_found(id: Uuid) -> Self {
        EngineError::Config(format!("data source not found: {}", id))
    }

    /// Short machine-readable code, stable across message changes
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Connection(_) => "CONNECTION_ERROR",
            EngineError::Query(_) => "QUERY_ERROR",
            EngineError::Config(_) => "CONFIG_ERROR",
            EngineError::Transform(_) => "TRANSFORM_ERROR",
            EngineError::SyncRun(_) => "SYNC_RUN_ERROR",
            EngineError::Conflict(_) => "CONFLICT",
            EngineError::AlreadyRunning(_) => "ALREADY_RUNNING",
            EngineError::Unsupported(_) => "UNSUPPORTED",
            EngineError::Storage(_) => "STORAGE_ERROR",
        }
    }
}

impl From<ConnectorError> for EngineError {
    fn from(error: ConnectorError) -> Self {
        let message = error.to_string();
        match error {
            ConnectorError::Connection { .. } | ConnectorError::Network { .. } => {
                EngineError::Connection(message)
            }
            ConnectorError::Query { .. } | ConnectorError::Http { .. } => {
                EngineError::Query(message)
            }
            ConnectorError::Configuration { details } => EngineError::Config(details),
        }
    }
}

impl From<sea_orm::DbErr> for EngineError {
    fn from(error: sea_orm::DbErr) -> Self {
        if is_unique_violation(&error) {
            tracing::debug!(?error, "Unique constraint violation detected");
            return EngineError::Conflict("resource already exists".to_string());
        }
        EngineError::Storage(error)
    }
}

pub(crate) fn is_unique_violation(error: &sea_orm::DbErr) -> bool {
    use sea_orm::RuntimeErr;

    const PG_UNIQUE: &str = "23505";
    const MYSQL_DUPLICATE_CODES: &[&str] = &["1022", "1062", "1169", "1586"];
    const SQLITE_DUPLICATE_CODES: &[&str] = &["1555", "2067"];

    let runtime_err = match error {
        sea_orm::DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | sea_orm::DbErr::Exec(RuntimeErr::SqlxError(sqlx_err)) => sqlx_err,
        _ => return false,
    };

    let Some(db_error) = runtime_err.as_database_error() else {
        return false;
    };

    if db_error.is_unique_violation() {
        return true;
    }

    db_error.code().is_some_and(|code| {
        let code = code.as_ref();
        code == PG_UNIQUE
            || MYSQL_DUPLICATE_CODES.contains(&code)
            || SQLITE_DUPLICATE_CODES.contains(&code)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_error_mapping() {
        let err: EngineError = ConnectorError::Connection {
            backend: "mysql",
            details: "refused".to_string(),
        }
        .into();
        assert!(matches!(err, EngineError::Connection(_)));
        assert_eq!(err.to_string(), "mysql connection failed: refused");

        let err: EngineError = ConnectorError::Http {
            status: 503,
            body: Some("Service Unavailable".to_string()),
        }
        .into();
        assert!(matches!(err, EngineError::Query(_)));
        assert_eq!(err.code(), "QUERY_ERROR");

        let err: EngineError = ConnectorError::Configuration {
            details: "missing host".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), "configuration error: missing host");
    }

    #[test]
    fn test_not_found_helpers_are_config_errors() {
        let id = Uuid::new_v4();
        let err = EngineError::task_not_found(id);
        assert_eq!(err.code(), "CONFIG_ERROR");
        assert!(err.to_string().contains(&id.to_string()));

        let err = EngineError::data_source_not_found(id);
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_non_unique_db_error_maps_to_storage() {
        let err: EngineError = sea_orm::DbErr::RecordNotFound("x".to_string()).into();
        assert!(matches!(err, EngineError::Storage(_)));
        assert_eq!(err.code(), "STORAGE_ERROR");
    }
}

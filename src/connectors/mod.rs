//! Connectors module
//!
//! This module provides the backend adapters behind every data source:
//! - The `Connector` trait defining the capability surface of a backend
//! - SQL dialect helpers used to build statements for relational backends
//! - Relational (MySQL, PostgreSQL), REST and host-native implementations

pub mod dialect;
pub mod host;
pub mod relational;
pub mod rest;
pub mod trait_;

pub use dialect::{ColumnInfo, Dialect};
pub use host::HostConnector;
pub use relational::{RelationalConnector, RelationalParams};
pub use rest::{RestAuthMode, RestConnector, RestParams};
pub use trait_::{Connector, ConnectorError, QueryResult};

//! # datasync
//!
//! Copies records from external MySQL, PostgreSQL or REST data sources (or
//! the host database itself) into target tables, with per-field remapping and
//! single-placeholder value transforms.

pub mod config;
pub mod connectors;
pub mod datasource;
pub mod db;
pub mod engine;
pub mod error;
pub mod models;
pub mod repositories;
pub mod sync;
pub mod telemetry;
pub use migration;

pub use engine::{ConnectionTestResult, Engine};
pub use error::{EngineError, Result};

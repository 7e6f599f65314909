//! # Data Models
//!
//! SeaORM entities for the configuration store.

pub mod data_source;
pub mod sync_task;

pub use data_source::Entity as DataSource;
pub use sync_task::Entity as SyncTask;

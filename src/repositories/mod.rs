//! # Repository Layer
//!
//! Repositories encapsulating SeaORM operations for the engine's two
//! configuration tables.

pub mod data_source;
pub mod sync_task;

pub use data_source::DataSourceRepository;
pub use sync_task::SyncTaskRepository;

//! Database façade: configuration, resource construction and coordinated recovery.

mod config;
mod database;

pub use config::{DatabaseConfig, ResourceConfig, DECISION_LOG_FILE};
pub use database::Database;

//! Datasource Router Library
//!
//! This library manages several named SQL data sources (SQLite, PostgreSQL,
//! MySQL) side by side and routes each transactional unit of work to the
//! source it names, falling back to a single default source.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routing;

pub use config::Config;
pub use error::DbError;
pub use routing::{SourceRegistry, TransactionContext, TransactionRouter};

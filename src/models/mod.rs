//! Data models for the datasource router.
//!
//! This module re-exports all model types used throughout the crate.

pub mod query;
pub mod source;

pub use query::{QueryParam, Row};
pub use source::{DatabaseType, SourceSummary, UnitOfWorkInfo, UnitOfWorkState};

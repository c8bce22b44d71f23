//! Database abstraction layer.
//!
//! This module provides the physical side of routing:
//! - Database-specific connection pools and transactions
//! - Parameter binding
//! - Row decoding to JSON maps
//! - Dispatch macros over the per-backend enums

#[macro_use]
pub mod macros;
pub mod params;
pub mod pool;
pub mod types;

pub use pool::{DbPool, DbTransaction};
pub use types::RowToJson;

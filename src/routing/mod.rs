//! Data source routing.
//!
//! This module provides the logical side of routing:
//! - Named data source handles with dialect and vendor metadata
//! - The source registry (exactly one default, package ownership)
//! - Per-source session factories and units of work
//! - Per-context transaction tracking
//! - The transaction router (join or own, commit or roll back)

pub mod context;
pub mod handle;
pub mod registry;
pub mod router;
pub mod session;

pub use context::TransactionContext;
pub use handle::DataSourceHandle;
pub use registry::{SourceRegistry, SourceRegistryBuilder};
pub use router::{Session, TransactionRouter};
pub use session::{SessionFactory, SessionStats, UnitOfWork};

//! Error types for the datasource router.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Configuration errors (duplicate or unknown sources, default misconfiguration) are
//! fatal at startup; runtime errors carry enough context for the caller to retry.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Data source '{name}' is already registered")]
    DuplicateSource { name: String },

    #[error("Package '{package}' is already owned by data source '{owner}'")]
    DuplicatePackage { package: String, owner: String },

    #[error("Unknown data source: {name}")]
    UnknownSource { name: String },

    #[error("Data source '{attempted}' cannot be default: '{existing}' is already the default")]
    MultipleDefaults { existing: String, attempted: String },

    #[error("No default data source configured")]
    NoDefaultConfigured,

    #[error("Connection pool exhausted for '{source_name}' after {waited_secs}s")]
    PoolExhausted { source_name: String, waited_secs: u64 },

    #[error("Unit of work already closed: {unit_of_work}")]
    AlreadyClosed { unit_of_work: String },

    #[error("Transaction on '{source_name}' rolled back: {message}")]
    TransactionFailure {
        source_name: String,
        message: String,
    },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Timeout: {operation} exceeded {elapsed_ms}ms")]
    Timeout {
        operation: String,
        elapsed_ms: u64,
    },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    pub fn duplicate_source(name: impl Into<String>) -> Self {
        Self::DuplicateSource { name: name.into() }
    }

    pub fn duplicate_package(package: impl Into<String>, owner: impl Into<String>) -> Self {
        Self::DuplicatePackage {
            package: package.into(),
            owner: owner.into(),
        }
    }

    pub fn unknown_source(name: impl Into<String>) -> Self {
        Self::UnknownSource { name: name.into() }
    }

    pub fn multiple_defaults(existing: impl Into<String>, attempted: impl Into<String>) -> Self {
        Self::MultipleDefaults {
            existing: existing.into(),
            attempted: attempted.into(),
        }
    }

    /// Create a pool exhausted error for the named source.
    pub fn pool_exhausted(source_name: impl Into<String>, waited_secs: u64) -> Self {
        Self::PoolExhausted {
            source_name: source_name.into(),
            waited_secs,
        }
    }

    pub fn already_closed(unit_of_work: impl Into<String>) -> Self {
        Self::AlreadyClosed {
            unit_of_work: unit_of_work.into(),
        }
    }

    /// Create a transaction failure carrying the first recorded failure message.
    pub fn transaction_failure(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TransactionFailure {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, elapsed: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            Self::PoolExhausted { .. } => {
                Some("Retry with backoff or raise max_connections / acquire_timeout")
            }
            Self::NoDefaultConfigured => Some("Mark exactly one source with ?default=true"),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::Timeout { .. }
                | Self::PoolExhausted { .. }
                | Self::AlreadyClosed { .. }
        )
    }

    /// Check if this error stems from registry configuration.
    ///
    /// These are fatal: the process should not start with them.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::DuplicateSource { .. }
                | Self::DuplicatePackage { .. }
                | Self::UnknownSource { .. }
                | Self::MultipleDefaults { .. }
                | Self::NoDefaultConfigured
        )
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            // The pool's acquire timeout is not carried by the error
            sqlx::Error::PoolTimedOut => DbError::connection(
                "Timed out waiting for a pooled connection",
                "Raise max_connections or acquire_timeout for this source",
            ),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

//! A named physical data source.

use crate::config::{DEFAULT_ACQUIRE_TIMEOUT_SECS, SourceConfig};
use crate::db::DbPool;
use crate::error::{DbError, DbResult};
use crate::models::DatabaseType;
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

/// One physical connection pool plus its dialect and vendor metadata.
///
/// Handles are created once at startup and owned by the
/// [`SourceRegistry`](super::SourceRegistry); the pool is drained at shutdown.
#[derive(Debug)]
pub struct DataSourceHandle {
    name: String,
    pool: DbPool,
    dialect: String,
    vendor_properties: HashMap<String, String>,
    packages: Vec<String>,
    persistence_unit: String,
    acquire_timeout: Duration,
}

impl DataSourceHandle {
    /// Wrap an existing pool. Dialect defaults to the backend's display name.
    pub fn new(name: impl Into<String>, pool: DbPool) -> Self {
        let name = name.into();
        Self {
            dialect: pool.db_type().display_name().to_string(),
            persistence_unit: format!("{name}PersistenceUnit"),
            name,
            pool,
            vendor_properties: HashMap::new(),
            packages: Vec::new(),
            acquire_timeout: Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
        }
    }

    /// Build the pool described by `config` and wrap it.
    pub async fn connect(config: &SourceConfig) -> DbResult<Self> {
        let db_type = DatabaseType::from_connection_string(&config.connection_string)
            .ok_or_else(|| {
                DbError::invalid_input(format!("Unknown database type for source '{}'", config.name))
            })?;

        info!(source = %config.name, db_type = %db_type, "Connecting data source");
        let pool = DbPool::connect(db_type, &config.connection_string, &config.pool_options).await?;

        let mut handle = Self::new(config.name.clone(), pool)
            .with_packages(config.packages.iter().cloned())
            .with_acquire_timeout(Duration::from_secs(
                config.pool_options.acquire_timeout_or_default(),
            ));
        if let Some(dialect) = &config.dialect {
            handle = handle.with_dialect(dialect.clone());
        }
        if let Some(unit) = &config.persistence_unit {
            handle = handle.with_persistence_unit(unit.clone());
        }
        for (key, value) in &config.vendor_properties {
            handle = handle.with_vendor_property(key.clone(), value.clone());
        }
        Ok(handle)
    }

    pub fn with_dialect(mut self, dialect: impl Into<String>) -> Self {
        self.dialect = dialect.into();
        self
    }

    pub fn with_vendor_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vendor_properties.insert(key.into(), value.into());
        self
    }

    /// Add repository/entity package prefixes owned by this source.
    pub fn with_packages<I, S>(mut self, packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for package in packages {
            let package = package.into();
            let package = package.trim().trim_end_matches('.');
            if !package.is_empty() && !self.packages.iter().any(|p| p == package) {
                self.packages.push(package.to_string());
            }
        }
        self
    }

    pub fn with_persistence_unit(mut self, unit: impl Into<String>) -> Self {
        self.persistence_unit = unit.into();
        self
    }

    /// Pool acquire timeout, reported in `PoolExhausted` errors.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn db_type(&self) -> DatabaseType {
        self.pool.db_type()
    }

    pub fn dialect(&self) -> &str {
        &self.dialect
    }

    pub fn vendor_properties(&self) -> &HashMap<String, String> {
        &self.vendor_properties
    }

    pub fn vendor_property(&self, key: &str) -> Option<&str> {
        self.vendor_properties.get(key).map(String::as_str)
    }

    pub fn packages(&self) -> &[String] {
        &self.packages
    }

    pub fn persistence_unit(&self) -> &str {
        &self.persistence_unit
    }

    pub fn acquire_timeout(&self) -> Duration {
        self.acquire_timeout
    }

    /// Drain the pool.
    pub async fn close(&self) {
        info!(source = %self.name, "Closing data source");
        self.pool.close().await;
    }
}

/// Dotted-prefix match: `com.app` covers `com.app` and `com.app.repo` but not `com.application`.
pub(crate) fn package_has_prefix(package: &str, prefix: &str) -> bool {
    match package.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('.'),
        None => false,
    }
}

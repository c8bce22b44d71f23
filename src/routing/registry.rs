//! Registry of named data sources.
//!
//! Sources are registered on a [`SourceRegistryBuilder`] during startup and
//! frozen by [`SourceRegistryBuilder::finalize`]. The resulting
//! [`SourceRegistry`] is read-only: no hot add or remove.

use crate::config::SourceConfig;
use crate::error::{DbError, DbResult};
use crate::models::SourceSummary;
use crate::routing::handle::package_has_prefix;
use crate::routing::{DataSourceHandle, SessionFactory};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

/// Mutable registration phase of a [`SourceRegistry`].
#[derive(Debug, Default)]
pub struct SourceRegistryBuilder {
    sources: HashMap<String, Arc<SessionFactory>>,
    default_name: Option<String>,
    /// Package prefix to owning source
    packages: HashMap<String, String>,
}

impl SourceRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle. All checks run before anything is inserted.
    pub fn register(&mut self, handle: DataSourceHandle, is_default: bool) -> DbResult<()> {
        let name = handle.name().to_string();

        if self.sources.contains_key(&name) {
            return Err(DbError::duplicate_source(name));
        }
        if is_default {
            if let Some(existing) = &self.default_name {
                return Err(DbError::multiple_defaults(existing.clone(), name));
            }
        }
        if let Some((package, owner)) = handle
            .packages()
            .iter()
            .find_map(|p| self.packages.get(p).map(|owner| (p, owner)))
        {
            return Err(DbError::duplicate_package(package.clone(), owner.clone()));
        }

        for package in handle.packages() {
            self.packages.insert(package.clone(), name.clone());
        }
        if is_default {
            self.default_name = Some(name.clone());
        }

        info!(
            source = %name,
            db_type = %handle.db_type(),
            dialect = %handle.dialect(),
            is_default = is_default,
            packages = handle.packages().len(),
            "Data source registered"
        );
        self.sources
            .insert(name, Arc::new(SessionFactory::new(Arc::new(handle))));
        Ok(())
    }

    /// Freeze the registry. Fails with `NoDefaultConfigured` if no source was
    /// registered as default.
    pub fn finalize(self) -> DbResult<SourceRegistry> {
        let default_name = self.default_name.ok_or(DbError::NoDefaultConfigured)?;

        // Longest prefix first so the first hit is the most specific.
        let mut packages: Vec<(String, String)> = self.packages.into_iter().collect();
        packages.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));

        info!(
            sources = self.sources.len(),
            default = %default_name,
            "Source registry finalized"
        );
        Ok(SourceRegistry {
            sources: self.sources,
            default_name,
            packages,
        })
    }

    /// Release every pool registered so far, for aborted startups.
    pub async fn close_all(self) {
        for factory in self.sources.values() {
            factory.handle().close().await;
        }
    }
}

/// Immutable set of named data sources with exactly one default.
#[derive(Debug)]
pub struct SourceRegistry {
    sources: HashMap<String, Arc<SessionFactory>>,
    default_name: String,
    packages: Vec<(String, String)>,
}

impl SourceRegistry {
    pub fn builder() -> SourceRegistryBuilder {
        SourceRegistryBuilder::new()
    }

    /// Connect every configured source and finalize.
    ///
    /// On any failure the pools opened so far are closed before returning.
    pub async fn connect_all(configs: &[SourceConfig]) -> DbResult<Self> {
        let mut builder = SourceRegistryBuilder::new();
        for config in configs {
            let registered = match DataSourceHandle::connect(config).await {
                Ok(handle) => {
                    let pool = handle.pool().clone();
                    builder.register(handle, config.is_default).map_err(|e| (e, Some(pool)))
                }
                Err(e) => Err((e, None)),
            };
            if let Err((e, rejected_pool)) = registered {
                error!(source = %config.name, error = %e, "Failed to register data source");
                if let Some(pool) = rejected_pool {
                    pool.close().await;
                }
                builder.close_all().await;
                return Err(e);
            }
        }

        if builder.default_name.is_none() {
            builder.close_all().await;
            return Err(DbError::NoDefaultConfigured);
        }
        builder.finalize()
    }

    /// Resolve a source by name, or the default when `name` is `None`.
    pub fn resolve(&self, name: Option<&str>) -> DbResult<Arc<DataSourceHandle>> {
        self.session_factory(name)
            .map(|factory| Arc::clone(factory.handle()))
    }

    /// The session factory for a source, or the default's when `name` is `None`.
    pub fn session_factory(&self, name: Option<&str>) -> DbResult<Arc<SessionFactory>> {
        let name = name.unwrap_or(&self.default_name);
        self.sources
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::unknown_source(name))
    }

    /// Name of the source owning `package`: longest dotted-prefix match, else the default.
    pub fn source_name_for_package(&self, package: &str) -> &str {
        self.packages
            .iter()
            .find(|(prefix, _)| package_has_prefix(package, prefix))
            .map(|(_, owner)| owner.as_str())
            .unwrap_or(&self.default_name)
    }

    pub fn resolve_for_package(&self, package: &str) -> DbResult<Arc<DataSourceHandle>> {
        self.resolve(Some(self.source_name_for_package(package)))
    }

    pub fn default_name(&self) -> &str {
        &self.default_name
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    /// Registered source names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sources.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Always false once finalized; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Describe every source, sorted by name (no secrets exposed).
    pub fn summaries(&self) -> Vec<SourceSummary> {
        let mut summaries: Vec<SourceSummary> = self
            .sources
            .values()
            .map(|factory| {
                let handle = factory.handle();
                SourceSummary {
                    name: handle.name().to_string(),
                    db_type: handle.db_type(),
                    dialect: handle.dialect().to_string(),
                    persistence_unit: handle.persistence_unit().to_string(),
                    is_default: handle.name() == self.default_name,
                    packages: handle.packages().to_vec(),
                }
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    /// Drain every pool. Called once at shutdown.
    pub async fn close_all(&self) {
        for name in self.names() {
            if let Some(factory) = self.sources.get(&name) {
                factory.handle().close().await;
            }
        }
        info!("All data sources closed");
    }
}

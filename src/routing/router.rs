//! Transaction routing.
//!
//! [`TransactionRouter::with_transaction`] resolves a source, then either joins
//! the unit of work already active for that source in the caller's
//! [`TransactionContext`] or opens and owns a new one.
//!
//! # Join vs. own
//!
//! - The owning scope commits on success and rolls back on failure, then
//!   removes the unit from the context.
//! - A joining scope never commits or rolls back. If its closure fails, the
//!   shared unit is marked rollback-only (first failure wins) and the owner's
//!   eventual commit turns into a rollback returning `TransactionFailure`.
//! - Two owning scopes for one source never overlap within a context: a
//!   sibling that finds no active unit waits for the current owner to finish
//!   and then opens its own.
//! - Dropping the owning future (task cancellation, `tokio::time::timeout`)
//!   discards the transaction; sqlx rolls it back before the connection is
//!   handed out again, and the context entry is cleared.

use crate::error::{DbError, DbResult};
use crate::models::{QueryParam, Row, UnitOfWorkState};
use crate::routing::{SessionFactory, SourceRegistry, TransactionContext, UnitOfWork};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Handle to the unit of work a routed closure runs in.
#[derive(Debug, Clone)]
pub struct Session {
    uow: Arc<UnitOfWork>,
    context: TransactionContext,
}

impl Session {
    /// Name of the data source this session is bound to.
    pub fn source(&self) -> &str {
        self.uow.source()
    }

    pub fn unit_of_work_id(&self) -> &str {
        self.uow.id()
    }

    pub fn state(&self) -> UnitOfWorkState {
        self.uow.state()
    }

    /// The context to pass to nested routed calls.
    pub fn context(&self) -> &TransactionContext {
        &self.context
    }

    pub async fn execute(&self, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        self.uow.execute(sql, params).await
    }

    pub async fn fetch_all(&self, sql: &str, params: &[QueryParam]) -> DbResult<Vec<Row>> {
        self.uow.fetch_all(sql, params).await
    }

    /// Force the owning scope to roll back even if every closure succeeds.
    pub fn set_rollback_only(&self) {
        self.uow.set_rollback_only();
    }

    pub fn is_rollback_only(&self) -> bool {
        self.uow.is_rollback_only()
    }
}

/// Rolls back and unregisters an owned unit of work if the owning future is
/// dropped before it finishes. Idempotent after a normal commit or rollback.
struct OwnedScope {
    context: TransactionContext,
    uow: Arc<UnitOfWork>,
    factory: Arc<SessionFactory>,
}

impl Drop for OwnedScope {
    fn drop(&mut self) {
        self.context.remove(self.uow.source(), self.uow.id());
        if self.uow.abandon() {
            self.factory.record_abandoned();
            warn!(
                unit_of_work = %self.uow.id(),
                source = %self.uow.source(),
                "Unit of work dropped before completion, rolled back"
            );
        }
    }
}

/// Routes transactional closures to the data source they name.
#[derive(Debug, Clone)]
pub struct TransactionRouter {
    registry: Arc<SourceRegistry>,
    timeout: Option<Duration>,
}

impl TransactionRouter {
    pub fn new(registry: Arc<SourceRegistry>) -> Self {
        Self {
            registry,
            timeout: None,
        }
    }

    /// Bound every owned transaction by `timeout`. Expiry rolls back and fails
    /// with `Timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Run `f` in a transaction on `source` (the default source when `None`).
    ///
    /// Errors returned by `f` come back unchanged, after rollback has finished.
    /// Router errors (`UnknownSource`, `PoolExhausted`, commit failures) are
    /// converted into `E`.
    pub async fn with_transaction<T, E, F, Fut>(
        &self,
        ctx: &TransactionContext,
        source: Option<&str>,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<DbError> + Display,
    {
        let factory = self.registry.session_factory(source)?;

        if let Some(uow) = ctx.active(factory.source_name()) {
            return Self::join(ctx, uow, f).await;
        }

        // Held until this scope ends, so a sibling owner on the same context
        // and source waits instead of opening a second live unit.
        let _owner = ctx.lock_source(factory.source_name()).await;
        let uow = Arc::new(factory.open_session().await?);
        ctx.register(Arc::clone(&uow));
        let _scope = OwnedScope {
            context: ctx.clone(),
            uow: Arc::clone(&uow),
            factory: Arc::clone(&factory),
        };

        let session = Session {
            uow: Arc::clone(&uow),
            context: ctx.clone(),
        };
        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, f(session)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        unit_of_work = %uow.id(),
                        source = %uow.source(),
                        timeout = ?limit,
                        "Transaction timed out"
                    );
                    Err(DbError::timeout(format!("transaction on '{}'", uow.source()), limit).into())
                }
            },
            None => f(session).await,
        };

        let result = Self::complete(&factory, &uow, outcome).await;
        ctx.remove(uow.source(), uow.id());
        result
    }

    /// Run `f` in a transaction on the default source.
    pub async fn with_default_transaction<T, E, F, Fut>(
        &self,
        ctx: &TransactionContext,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<DbError> + Display,
    {
        self.with_transaction(ctx, None, f).await
    }

    /// Run `f` in a transaction on the source owning `package`.
    pub async fn with_package_transaction<T, E, F, Fut>(
        &self,
        ctx: &TransactionContext,
        package: &str,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<DbError> + Display,
    {
        let source = self.registry.source_name_for_package(package).to_string();
        self.with_transaction(ctx, Some(&source), f).await
    }

    async fn join<T, E, F, Fut>(ctx: &TransactionContext, uow: Arc<UnitOfWork>, f: F) -> Result<T, E>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        debug!(
            unit_of_work = %uow.id(),
            source = %uow.source(),
            "Joining active unit of work"
        );
        let session = Session {
            uow: Arc::clone(&uow),
            context: ctx.clone(),
        };
        let result = f(session).await;
        if let Err(e) = &result {
            uow.mark_failed(e);
            debug!(
                unit_of_work = %uow.id(),
                source = %uow.source(),
                error = %e,
                "Joined scope failed, unit of work marked rollback-only"
            );
        }
        result
    }

    /// Commit or roll back an owned unit of work according to `outcome`.
    async fn complete<T, E>(
        factory: &SessionFactory,
        uow: &UnitOfWork,
        outcome: Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<DbError> + Display,
    {
        match outcome {
            Ok(value) if !uow.is_rollback_only() => {
                factory.close_session(uow, true).await?;
                Ok(value)
            }
            Ok(_) => {
                let reason = uow
                    .first_failure()
                    .unwrap_or_else(|| "unit of work marked rollback-only".to_string());
                if let Err(e) = factory.close_session(uow, false).await {
                    warn!(unit_of_work = %uow.id(), error = %e, "Rollback failed");
                }
                Err(DbError::transaction_failure(uow.source(), reason).into())
            }
            Err(e) => {
                if let Err(rollback_err) = factory.close_session(uow, false).await {
                    warn!(
                        unit_of_work = %uow.id(),
                        error = %rollback_err,
                        original_error = %e,
                        "Rollback failed"
                    );
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolOptions;
    use crate::db::DbPool;
    use crate::models::DatabaseType;
    use crate::routing::DataSourceHandle;

    async fn router() -> TransactionRouter {
        let mut builder = SourceRegistry::builder();
        for (name, is_default) in [("primary", true), ("secondary", false)] {
            let pool =
                DbPool::connect(DatabaseType::SQLite, "sqlite::memory:", &PoolOptions::default())
                    .await
                    .unwrap();
            builder
                .register(DataSourceHandle::new(name, pool), is_default)
                .unwrap();
        }
        TransactionRouter::new(Arc::new(builder.finalize().unwrap()))
    }

    #[tokio::test]
    async fn test_default_source_selected() {
        let router = router().await;
        let ctx = TransactionContext::new();
        let source = router
            .with_transaction(&ctx, None, |s| async move { Ok::<_, DbError>(s.source().to_string()) })
            .await
            .unwrap();
        assert_eq!(source, "primary");
        assert!(ctx.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_source_fails_before_fn_runs() {
        let router = router().await;
        let ctx = TransactionContext::new();
        let mut ran = false;
        let result = router
            .with_transaction(&ctx, Some("missing"), |_| {
                ran = true;
                async { Ok::<_, DbError>(()) }
            })
            .await;
        assert!(matches!(result, Err(DbError::UnknownSource { .. })));
        assert!(!ran);
    }

    #[tokio::test]
    async fn test_session_rollback_only_converts_commit() {
        let router = router().await;
        let ctx = TransactionContext::new();
        let result = router
            .with_transaction(&ctx, Some("secondary"), |s| async move {
                s.set_rollback_only();
                Ok::<_, DbError>(())
            })
            .await;
        assert!(matches!(result, Err(DbError::TransactionFailure { .. })));
        let stats = router
            .registry()
            .session_factory(Some("secondary"))
            .unwrap()
            .stats();
        assert_eq!(stats.rolled_back, 1);
        assert_eq!(stats.committed, 0);
    }

    #[tokio::test]
    async fn test_different_sources_do_not_join() {
        let router = router().await;
        let ctx = TransactionContext::new();
        let inner_router = router.clone();
        let ids = router
            .with_transaction(&ctx, Some("primary"), |outer| async move {
                let outer_id = outer.unit_of_work_id().to_string();
                let inner_id = inner_router
                    .with_transaction(outer.context(), Some("secondary"), |inner| async move {
                        Ok::<_, DbError>(inner.unit_of_work_id().to_string())
                    })
                    .await?;
                assert_eq!(outer.context().active_sources(), vec!["primary"]);
                Ok::<_, DbError>((outer_id, inner_id))
            })
            .await
            .unwrap();
        assert_ne!(ids.0, ids.1);
    }
}

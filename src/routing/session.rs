//! Session factory and unit of work.
//!
//! A [`SessionFactory`] exists once per data source and turns pool checkouts
//! into [`UnitOfWork`]s. A unit of work owns exactly one connection with an
//! open transaction until it is committed, rolled back or dropped.

use crate::db::DbTransaction;
use crate::error::{DbError, DbResult};
use crate::models::{QueryParam, Row, UnitOfWorkInfo, UnitOfWorkState};
use crate::routing::DataSourceHandle;
use chrono::{DateTime, Utc};
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// One logical transaction's connection and state.
pub struct UnitOfWork {
    id: String,
    source: String,
    started_at: DateTime<Utc>,
    transaction: tokio::sync::Mutex<Option<DbTransaction>>,
    state: AtomicU8,
    rollback_only: AtomicBool,
    /// First failure recorded by a joined scope; later failures are ignored.
    first_failure: Mutex<Option<String>>,
}

impl UnitOfWork {
    fn new(source: impl Into<String>) -> Self {
        Self {
            id: generate_unit_of_work_id(),
            source: source.into(),
            started_at: Utc::now(),
            transaction: tokio::sync::Mutex::new(None),
            state: AtomicU8::new(encode_state(UnitOfWorkState::Idle)),
            rollback_only: AtomicBool::new(false),
            first_failure: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Name of the data source this unit is bound to.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn state(&self) -> UnitOfWorkState {
        decode_state(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: UnitOfWorkState) {
        self.state.store(encode_state(state), Ordering::Release);
    }

    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only.load(Ordering::Acquire)
    }

    /// Force the owning scope to roll back instead of committing.
    pub fn set_rollback_only(&self) {
        self.rollback_only.store(true, Ordering::Release);
    }

    /// Mark rollback-only and record `reason` if no failure was recorded yet.
    pub fn mark_failed(&self, reason: impl Display) {
        self.set_rollback_only();
        if let Ok(mut failure) = self.first_failure.lock() {
            if failure.is_none() {
                *failure = Some(reason.to_string());
            }
        }
    }

    pub fn first_failure(&self) -> Option<String> {
        self.first_failure
            .lock()
            .ok()
            .and_then(|failure| failure.clone())
    }

    pub fn info(&self) -> UnitOfWorkInfo {
        UnitOfWorkInfo {
            id: self.id.clone(),
            source: self.source.clone(),
            started_at: self.started_at,
            state: self.state(),
            rollback_only: self.is_rollback_only(),
        }
    }

    /// Execute a statement inside this unit's transaction.
    pub async fn execute(&self, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        let mut slot = self.transaction.lock().await;
        let tx = slot
            .as_mut()
            .ok_or_else(|| DbError::already_closed(&self.id))?;
        let rows_affected = tx.execute(sql, params).await?;
        debug!(
            unit_of_work = %self.id,
            source = %self.source,
            sql = %sql,
            rows_affected = rows_affected,
            "Executed in unit of work"
        );
        Ok(rows_affected)
    }

    /// Run a query inside this unit's transaction.
    pub async fn fetch_all(&self, sql: &str, params: &[QueryParam]) -> DbResult<Vec<Row>> {
        let mut slot = self.transaction.lock().await;
        let tx = slot
            .as_mut()
            .ok_or_else(|| DbError::already_closed(&self.id))?;
        let rows = tx.fetch_all(sql, params).await?;
        debug!(
            unit_of_work = %self.id,
            source = %self.source,
            sql = %sql,
            row_count = rows.len(),
            "Queried in unit of work"
        );
        Ok(rows)
    }

    async fn take_transaction(&self) -> Option<DbTransaction> {
        self.transaction.lock().await.take()
    }

    /// Drop the transaction without awaiting, for cancellation paths.
    ///
    /// sqlx rolls back a dropped transaction before the connection is reused.
    /// Returns true if a live transaction was discarded.
    pub(crate) fn abandon(&self) -> bool {
        let discarded = match self.transaction.try_lock() {
            Ok(mut slot) => slot.take().is_some(),
            // A statement future still holds the slot; it is dropped with the last Arc.
            Err(_) => self.state().is_active(),
        };
        if !self.state().is_closed() {
            self.set_state(UnitOfWorkState::RolledBack);
        }
        discarded
    }
}

impl std::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("state", &self.state())
            .field("rollback_only", &self.is_rollback_only())
            .finish_non_exhaustive()
    }
}

/// Counters for one factory's connection lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Connections checked out (one per opened unit of work)
    pub acquired: u64,
    pub committed: u64,
    pub rolled_back: u64,
}

/// Produces units of work bound to one data source.
#[derive(Debug)]
pub struct SessionFactory {
    handle: Arc<DataSourceHandle>,
    acquired: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
}

impl SessionFactory {
    pub fn new(handle: Arc<DataSourceHandle>) -> Self {
        Self {
            handle,
            acquired: AtomicU64::new(0),
            committed: AtomicU64::new(0),
            rolled_back: AtomicU64::new(0),
        }
    }

    pub fn handle(&self) -> &Arc<DataSourceHandle> {
        &self.handle
    }

    pub fn source_name(&self) -> &str {
        self.handle.name()
    }

    /// Check out a connection and begin a transaction on it.
    ///
    /// Blocks up to the pool's acquire timeout; expiry fails with `PoolExhausted`.
    pub async fn open_session(&self) -> DbResult<UnitOfWork> {
        let uow = UnitOfWork::new(self.source_name());

        let tx = self.handle.pool().begin().await.map_err(|e| match e {
            sqlx::Error::PoolTimedOut => {
                warn!(source = %self.source_name(), "Connection pool exhausted");
                DbError::pool_exhausted(self.source_name(), self.handle.acquire_timeout().as_secs())
            }
            other => DbError::from(other),
        })?;
        self.acquired.fetch_add(1, Ordering::AcqRel);

        // The slot is fresh, so nothing else can hold the lock yet.
        if let Ok(mut slot) = uow.transaction.try_lock() {
            *slot = Some(tx);
        }
        uow.set_state(UnitOfWorkState::Active);

        info!(
            unit_of_work = %uow.id,
            source = %self.source_name(),
            pool_size = self.handle.pool().size(),
            pool_idle = self.handle.pool().num_idle(),
            "Unit of work opened"
        );
        Ok(uow)
    }

    /// Commit or roll back `uow` and return its connection to the pool.
    ///
    /// Fails with `AlreadyClosed` if the unit was already closed.
    pub async fn close_session(&self, uow: &UnitOfWork, commit: bool) -> DbResult<()> {
        if uow.source() != self.source_name() {
            return Err(DbError::invalid_input(format!(
                "Unit of work {} belongs to '{}', not '{}'",
                uow.id(),
                uow.source(),
                self.source_name()
            )));
        }

        let tx = uow
            .take_transaction()
            .await
            .ok_or_else(|| DbError::already_closed(uow.id()))?;

        if commit {
            match tx.commit().await {
                Ok(()) => {
                    uow.set_state(UnitOfWorkState::Committed);
                    self.committed.fetch_add(1, Ordering::AcqRel);
                    info!(unit_of_work = %uow.id(), source = %self.source_name(), "Unit of work committed");
                    Ok(())
                }
                Err(e) => {
                    // A failed COMMIT leaves nothing applied
                    uow.set_state(UnitOfWorkState::RolledBack);
                    self.rolled_back.fetch_add(1, Ordering::AcqRel);
                    warn!(unit_of_work = %uow.id(), source = %self.source_name(), error = %e, "Commit failed");
                    Err(e)
                }
            }
        } else {
            let result = tx.rollback().await;
            uow.set_state(UnitOfWorkState::RolledBack);
            self.rolled_back.fetch_add(1, Ordering::AcqRel);
            info!(unit_of_work = %uow.id(), source = %self.source_name(), "Unit of work rolled back");
            result
        }
    }

    /// Count a rollback performed by dropping the transaction.
    pub(crate) fn record_abandoned(&self) {
        self.rolled_back.fetch_add(1, Ordering::AcqRel);
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            acquired: self.acquired.load(Ordering::Acquire),
            committed: self.committed.load(Ordering::Acquire),
            rolled_back: self.rolled_back.load(Ordering::Acquire),
        }
    }
}

fn encode_state(state: UnitOfWorkState) -> u8 {
    match state {
        UnitOfWorkState::Idle => 0,
        UnitOfWorkState::Active => 1,
        UnitOfWorkState::Committed => 2,
        UnitOfWorkState::RolledBack => 3,
    }
}

fn decode_state(raw: u8) -> UnitOfWorkState {
    match raw {
        0 => UnitOfWorkState::Idle,
        1 => UnitOfWorkState::Active,
        2 => UnitOfWorkState::Committed,
        _ => UnitOfWorkState::RolledBack,
    }
}

fn generate_unit_of_work_id() -> String {
    format!("uow_{}", uuid::Uuid::new_v4().simple())
}

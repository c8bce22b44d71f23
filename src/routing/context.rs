//! Per-execution-context transaction bookkeeping.

use crate::models::UnitOfWorkInfo;
use crate::routing::UnitOfWork;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OwnedMutexGuard;

/// Maps source name to the unit of work active in one execution context.
///
/// Each task (or logical call chain) owns its own context and passes it down
/// explicitly; clones share the same map. Nested routed calls on a source that
/// already has an entry join that unit instead of opening a second connection.
#[derive(Debug, Clone, Default)]
pub struct TransactionContext {
    active: Arc<Mutex<HashMap<String, Arc<UnitOfWork>>>>,
    /// One owner slot per source; the guard lives as long as the owning scope.
    owners: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl TransactionContext {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Arc<UnitOfWork>>> {
        // No code path panics while holding this lock; recover the map regardless.
        self.active
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// The active unit of work for `source`, if any.
    pub fn active(&self, source: &str) -> Option<Arc<UnitOfWork>> {
        self.entries()
            .get(source)
            .filter(|uow| uow.state().is_active())
            .cloned()
    }

    /// Wait until no other scope in this context owns a unit on `source`.
    pub(crate) async fn lock_source(&self, source: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut owners = self
                .owners
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            Arc::clone(owners.entry(source.to_string()).or_default())
        };
        slot.lock_owned().await
    }

    pub(crate) fn register(&self, uow: Arc<UnitOfWork>) {
        self.entries().insert(uow.source().to_string(), uow);
    }

    /// Remove the entry for `source` only if it still refers to `unit_of_work_id`.
    pub(crate) fn remove(&self, source: &str, unit_of_work_id: &str) -> bool {
        let mut entries = self.entries();
        match entries.get(source) {
            Some(uow) if uow.id() == unit_of_work_id => {
                entries.remove(source);
                true
            }
            _ => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Sources with an open unit of work, sorted by name.
    pub fn active_sources(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries().keys().cloned().collect();
        names.sort();
        names
    }

    /// Snapshot of every registered unit of work.
    pub fn snapshot(&self) -> Vec<UnitOfWorkInfo> {
        let mut infos: Vec<UnitOfWorkInfo> = self.entries().values().map(|uow| uow.info()).collect();
        infos.sort_by(|a, b| a.source.cmp(&b.source));
        infos
    }
}

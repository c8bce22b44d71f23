//! Database dispatch macros for reducing code duplication.
//!
//! Pools and transactions are wrapped in per-backend enums; these macros expand
//! to the matching `match` so each call site reads as one arm per backend.

/// Dispatch over `DbPool` variants.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(pool, {
///     MySql(p) => p.close().await,
///     Postgres(p) => p.close().await,
///     SQLite(p) => p.close().await,
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($pool:expr, { $($variant:ident($p:ident) => $body:expr),+ $(,)? }) => {
        match $pool {
            $(
                $crate::db::pool::DbPool::$variant($p) => $body,
            )+
        }
    };
}

/// Dispatch over `DbTransaction` variants.
#[macro_export]
macro_rules! impl_tx_dispatch {
    ($tx:expr, { $($variant:ident($t:ident) => $body:expr),+ $(,)? }) => {
        match $tx {
            $(
                $crate::db::pool::DbTransaction::$variant($t) => $body,
            )+
        }
    };
}

pub use impl_db_dispatch;
pub use impl_tx_dispatch;

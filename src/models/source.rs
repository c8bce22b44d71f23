//! Data source and unit-of-work models.

use serde::{Deserialize, Serialize};

/// Supported database types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    PostgreSQL,
    /// Includes MariaDB
    MySQL,
    SQLite,
}

impl DatabaseType {
    /// Parse database type from a connection string.
    pub fn from_connection_string(connection_string: &str) -> Option<Self> {
        let lower = connection_string.to_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Some(Self::PostgreSQL)
        } else if lower.starts_with("mysql://") || lower.starts_with("mariadb://") {
            Some(Self::MySQL)
        } else if lower.starts_with("sqlite:") {
            Some(Self::SQLite)
        } else {
            None
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::MySQL => "MySQL",
            Self::SQLite => "SQLite",
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Source information for introspection (no secrets exposed).
#[derive(Debug, Clone, Serialize)]
pub struct SourceSummary {
    pub name: String,
    pub db_type: DatabaseType,
    pub dialect: String,
    pub persistence_unit: String,
    pub is_default: bool,
    pub packages: Vec<String>,
}

/// Lifecycle state of a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitOfWorkState {
    /// Created, connection not yet acquired
    Idle,
    Active,
    Committed,
    RolledBack,
}

impl UnitOfWorkState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Check if the unit of work has ended (committed or rolled back).
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }
}

impl std::fmt::Display for UnitOfWorkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Committed => "committed",
            Self::RolledBack => "rolled_back",
        };
        f.write_str(s)
    }
}

/// Snapshot of a unit of work registered in a transaction context.
#[derive(Debug, Clone, Serialize)]
pub struct UnitOfWorkInfo {
    pub id: String,
    pub source: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub state: UnitOfWorkState,
    pub rollback_only: bool,
}

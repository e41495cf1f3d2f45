//! Execution engine types: applied-migration records, status state
//! machine and the error surface commands match on.

mod crdb;

pub use crdb::Engine;

use crate::classify::MigrationMode;
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Schema reserved for scurry's own bookkeeping in the target database.
pub const RESERVED_SCHEMA: &str = "_scurry_";
pub const MIGRATIONS_TABLE: &str = "migrations";

/// Lifecycle of a migration row in `_scurry_.migrations`.
///
/// `pending -> succeeded` is the happy path; `pending -> failed` on any
/// statement error; `failed -> pending` when the operator retries;
/// `failed|pending -> recovered` when the operator marks it done after
/// manual remediation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MigrationStatus {
    Pending,
    Succeeded,
    Failed,
    Recovered,
}

impl MigrationStatus {
    /// Statuses that satisfy a `depends_on` edge.
    pub fn is_complete(self) -> bool {
        matches!(self, MigrationStatus::Succeeded | MigrationStatus::Recovered)
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MigrationStatus::Pending => "pending",
            MigrationStatus::Succeeded => "succeeded",
            MigrationStatus::Failed => "failed",
            MigrationStatus::Recovered => "recovered",
        })
    }
}

impl FromStr for MigrationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MigrationStatus::Pending),
            "succeeded" => Ok(MigrationStatus::Succeeded),
            "failed" => Ok(MigrationStatus::Failed),
            "recovered" => Ok(MigrationStatus::Recovered),
            other => Err(format!("unknown migration status `{}`", other)),
        }
    }
}

/// One row of `_scurry_.migrations`.
#[derive(Clone, Debug)]
pub struct AppliedMigration {
    pub name: String,
    /// Empty when the migration was marked applied without execution.
    pub checksum: String,
    pub mode: MigrationMode,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: MigrationStatus,
    pub failed_statement: Option<String>,
    pub error_msg: Option<String>,
    pub depends_on: Vec<String>,
}

/// Why execution refused to start.
#[derive(Clone, Debug)]
pub enum Precondition {
    FailedMigration { name: String },
    PendingMigration { name: String },
    UnmetDependency { migration: String, dependency: String },
    ConcurrentAsync { pending: String },
}

impl fmt::Display for Precondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Precondition::FailedMigration { name } => write!(
                f,
                "migration {} previously failed; run `scurry migration recover`",
                name
            ),
            Precondition::PendingMigration { name } => write!(
                f,
                "migration {} is pending from another session; run `scurry migration recover`",
                name
            ),
            Precondition::UnmetDependency {
                migration,
                dependency,
            } => write!(
                f,
                "migration {} depends on {}, which has not completed",
                migration, dependency
            ),
            Precondition::ConcurrentAsync { pending } => write!(
                f,
                "async migration {} is still pending; wait for it before starting another",
                pending
            ),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("could not connect to the database: {0}")]
    Connect(#[source] tokio_postgres::Error),
    #[error("database error: {0}")]
    Db(#[from] tokio_postgres::Error),
    #[error("{0}")]
    Precondition(Precondition),
    #[error("migration {migration} failed at statement {number}: {source}")]
    Apply {
        migration: String,
        /// 1-based statement position, matching what the row records.
        number: usize,
        statement: String,
        #[source]
        source: tokio_postgres::Error,
    },
    #[error("operation cancelled")]
    Cancelled,
}

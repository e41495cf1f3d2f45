//! Command implementations. Each subcommand is a struct implementing
//! `Command`; `main` prints the returned `Outcome`.

use crate::context::AppContext;
use anyhow::Result;
use std::path::PathBuf;

pub mod dump;
pub mod lint;
pub mod migration;
pub mod push;
pub mod validate;

pub use dump::DumpSchema;
pub use lint::LintSchema;
pub use migration::{
    AdoptMigrations, ExecuteMigrations, GenMigration, RecoverMigrations, RefreshTableSizes,
    RegenCheckpoints,
};
pub use push::Push;
pub use validate::Validate;

/// Trait for executable commands.
#[allow(async_fn_in_trait)]
pub trait Command {
    async fn execute(&self, ctx: &AppContext) -> Result<Outcome>;
}

pub enum Outcome {
    NothingToDo,
    MigrationGenerated {
        name: String,
        path: PathBuf,
        mode: crate::classify::MigrationMode,
    },
    AppliedMigrations {
        applied: usize,
        kicked_async: usize,
    },
    DryRun,
    Recovered,
    Aborted,
    CheckpointsWritten {
        count: usize,
    },
    TableSizesWritten {
        tables: usize,
    },
    Pushed {
        statements: usize,
    },
    Dumped {
        path: PathBuf,
    },
    Valid,
    LintClean,
    LintIssues {
        count: usize,
    },
    Unimplemented,
}

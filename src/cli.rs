use crate::commands::{
    AdoptMigrations, Command, DumpSchema, ExecuteMigrations, GenMigration, LintSchema, Outcome,
    Push, RecoverMigrations, RefreshTableSizes, RegenCheckpoints, Validate,
};
use crate::context::AppContext;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Turn debugging information on
    #[arg(short, long)]
    pub debug: bool,

    /// Connection string for the target database (defaults to CRDB_URL)
    #[arg(global = true, long)]
    pub db_url: Option<String>,

    /// Directory holding generated migrations
    #[arg(global = true, long, default_value = "migrations")]
    pub migrations: PathBuf,

    /// Directory holding the schema definition files
    #[arg(global = true, long, default_value = "schema")]
    pub definitions: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    Migration {
        #[command(subcommand)]
        command: Option<MigrationCommands>,
    },
    /// Diff the definitions against a live database and apply directly
    Push {
        /// Print the statements without executing them
        #[arg(long)]
        dry_run: bool,
        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,
    },
    /// Write the live database's canonical schema to a file
    Dump { file: PathBuf },
    /// Check that the definitions parse, resolve and apply cleanly
    Validate,
    /// Run the schema lint rules over the definitions
    Lint,
}

#[derive(Subcommand)]
pub enum MigrationCommands {
    /// Compute the diff and write a new migration
    Gen {
        /// Name for the migration (prompted when omitted)
        #[arg(long)]
        name: Option<String>,
        /// Override the definitions directory
        #[arg(long)]
        definitions: Option<PathBuf>,
    },
    /// Apply pending migrations in timestamp order
    Execute {
        /// Show what would run without touching the database
        #[arg(long)]
        dry_run: bool,
        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,
        /// Also run migrations classified as async
        #[arg(long)]
        include_async: bool,
        /// Per-statement timeout, e.g. 30s or 5m
        #[arg(long, value_parser = crate::commands::migration::parse_duration)]
        statement_timeout: Option<std::time::Duration>,
    },
    /// Record migrations as applied without executing them
    Adopt {
        /// Migration to adopt; everything unapplied when omitted
        migration: Option<String>,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Resolve failed or crashed migrations interactively
    Recover,
    /// Replay all migrations and rewrite every checkpoint
    CheckpointRegen,
    /// Refresh the table-size oracle from the live database
    TableSizes {
        /// Row count at which a table counts as large
        #[arg(long)]
        large_table_threshold: Option<i64>,
    },
}

pub async fn run_cli(cli: Cli, cancel: CancellationToken) -> Result<Outcome> {
    let ctx = AppContext::new(
        cli.db_url.clone(),
        cli.migrations.clone(),
        cli.definitions.clone(),
        cancel,
    );

    match cli.command {
        Some(Commands::Migration { command }) => match command {
            Some(MigrationCommands::Gen { name, definitions }) => {
                GenMigration { name, definitions }.execute(&ctx).await
            }
            Some(MigrationCommands::Execute {
                dry_run,
                force,
                include_async,
                statement_timeout,
            }) => {
                ExecuteMigrations {
                    dry_run,
                    force,
                    include_async,
                    statement_timeout,
                }
                .execute(&ctx)
                .await
            }
            Some(MigrationCommands::Adopt { migration, yes }) => {
                AdoptMigrations { migration, yes }.execute(&ctx).await
            }
            Some(MigrationCommands::Recover) => RecoverMigrations.execute(&ctx).await,
            Some(MigrationCommands::CheckpointRegen) => RegenCheckpoints.execute(&ctx).await,
            Some(MigrationCommands::TableSizes {
                large_table_threshold,
            }) => {
                RefreshTableSizes {
                    large_table_threshold,
                }
                .execute(&ctx)
                .await
            }
            None => {
                eprintln!("No migration subcommand specified");
                Ok(Outcome::Unimplemented)
            }
        },
        Some(Commands::Push { dry_run, force }) => Push { dry_run, force }.execute(&ctx).await,
        Some(Commands::Dump { file }) => DumpSchema { file }.execute(&ctx).await,
        Some(Commands::Validate) => Validate.execute(&ctx).await,
        Some(Commands::Lint) => LintSchema.execute(&ctx).await,
        None => Ok(Outcome::Unimplemented),
    }
}

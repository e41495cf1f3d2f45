//! `scurry migration recover`: the interactive state machine for failed
//! and crashed-pending migrations.

use crate::classify::MigrationMode;
use crate::commands::{Command, Outcome};
use crate::context::AppContext;
use crate::engine::{AppliedMigration, Engine, EngineError, MigrationStatus};
use anyhow::{anyhow, Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Select};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

pub struct RecoverMigrations;

const OPTIONS: &[&str] = &[
    "Try again",
    "Mark as succeeded",
    "Run manual SQL",
    "Abort",
];

impl Command for RecoverMigrations {
    async fn execute(&self, ctx: &AppContext) -> Result<Outcome> {
        if !ctx.interactive() {
            return Err(anyhow!(
                "recovery is interactive and needs a terminal; fix the row in _scurry_.migrations manually or re-run from a TTY"
            ));
        }

        let store = ctx.store();
        let migrations = store.load_migrations()?;
        let engine = ctx.engine().await?;

        loop {
            let broken = find_broken(&engine).await?;
            let Some(row) = broken else {
                println!("No failed or pending migrations.");
                return Ok(Outcome::NothingToDo);
            };

            describe(&row);
            if row.status == MigrationStatus::Pending {
                let proceed = Confirm::new()
                    .with_prompt(
                        "This migration is still pending; the process that started it may \
                         still be running. Continue anyway?",
                    )
                    .default(false)
                    .interact()?;
                if !proceed {
                    return Ok(Outcome::Aborted);
                }
            }

            let choice = Select::new()
                .with_prompt(format!("Recover {}", row.name))
                .items(OPTIONS)
                .default(0)
                .interact()?;

            match choice {
                // try again: reset to pending with the on-disk checksum,
                // re-run from the first statement
                0 => {
                    let Some(script) = migrations.iter().find(|m| m.name == row.name) else {
                        println!(
                            "{} migration {} is not on disk; it cannot be re-run",
                            style("error:").red(),
                            row.name
                        );
                        continue;
                    };
                    match engine.retry(script, None).await {
                        Ok(()) => {
                            println!("{} {}", style("succeeded").green(), row.name);
                        }
                        Err(EngineError::Apply {
                            number, statement, ..
                        }) => {
                            println!(
                                "{} statement {} failed again:\n  {}",
                                style("error:").red(),
                                number,
                                statement
                            );
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                // mark as succeeded without executing anything
                1 => {
                    engine.mark_recovered(&row.name).await?;
                    println!("{} {} marked as recovered", style("✓").green(), row.name);
                }
                // free-form SQL, validated before it runs
                2 => {
                    let sql: String = Input::new()
                        .with_prompt("SQL to execute")
                        .interact_text()
                        .context("reading SQL")?;
                    if let Err(e) = Parser::parse_sql(&PostgreSqlDialect {}, &sql) {
                        println!("{} {}", style("parse error:").red(), e);
                        continue;
                    }
                    match engine.run_manual_sql(&sql).await {
                        Ok(()) => println!("{}", style("ok").green()),
                        Err(e) => println!("{} {}", style("error:").red(), e),
                    }
                }
                _ => return Ok(Outcome::Aborted),
            }
        }
    }
}

async fn find_broken(engine: &Engine) -> Result<Option<AppliedMigration>> {
    let applied = engine.applied_migrations().await?;
    Ok(applied.into_iter().find(|a| {
        a.status == MigrationStatus::Failed
            || (a.status == MigrationStatus::Pending && a.mode == MigrationMode::Sync)
    }))
}

fn describe(row: &AppliedMigration) {
    println!(
        "\n{} {} ({}, started {})",
        style(row.status.to_string()).red().bold(),
        row.name,
        row.mode,
        row.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if let Some(stmt) = &row.failed_statement {
        println!("  failed statement: {}", stmt);
    }
    if let Some(msg) = &row.error_msg {
        println!("  error: {}", msg);
    }
}

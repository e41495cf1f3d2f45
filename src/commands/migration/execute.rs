//! `scurry migration execute`: apply pending migrations to the target
//! database in timestamp order, with crash-safe tracking.

use super::expected_schema;
use crate::checkpoint::{write_checkpoint, Checkpoint};
use crate::classify::MigrationMode;
use crate::commands::{Command, Outcome};
use crate::context::AppContext;
use crate::engine::Engine;
use crate::sql::render_single_line;
use crate::store::MigrationScript;
use anyhow::{Context, Result};
use console::style;
use dialoguer::Confirm;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::info;

pub struct ExecuteMigrations {
    pub dry_run: bool,
    pub force: bool,
    pub include_async: bool,
    pub statement_timeout: Option<Duration>,
}

impl Command for ExecuteMigrations {
    async fn execute(&self, ctx: &AppContext) -> Result<Outcome> {
        let store = ctx.store();
        let migrations = store.load_migrations()?;
        let engine = ctx.engine().await?;

        for name in engine.poll_async().await? {
            println!(
                "{} async migration {} completed",
                style("✓").green(),
                name
            );
        }

        let applied = engine.applied_migrations().await?;
        let by_name: BTreeMap<&str, _> = applied.iter().map(|a| (a.name.as_str(), a)).collect();

        // checksum drift on already-applied migrations is a warning, not
        // an error: the SQL already ran
        for m in &migrations {
            if let Some(row) = by_name.get(m.name.as_str()) {
                if !row.checksum.is_empty() && row.checksum != m.checksum {
                    eprintln!(
                        "{} migration {} changed on disk after being applied",
                        style("warning:").yellow().bold(),
                        m.name
                    );
                }
            }
        }

        let mut pending: Vec<&MigrationScript> = migrations
            .iter()
            .filter(|m| !by_name.contains_key(m.name.as_str()))
            .collect();

        if !self.include_async {
            if let Some(pos) = pending.iter().position(|m| m.mode == MigrationMode::Async) {
                let skipped = pending.split_off(pos);
                println!(
                    "Stopping before async migration {} (re-run with --include-async)",
                    skipped[0].name
                );
            }
        }

        if pending.is_empty() {
            println!("No pending migrations.");
            return Ok(Outcome::NothingToDo);
        }

        Engine::check_preconditions(&applied, &pending)?;

        if self.dry_run {
            for m in &pending {
                println!("{} {} ({})", style("would apply").cyan(), m.name, m.mode);
                println!("{}\n", m.sql.trim_end());
            }
            return Ok(Outcome::DryRun);
        }

        if !self.force {
            if !ctx.interactive() {
                anyhow::bail!(
                    "refusing to apply {} migration(s) without a terminal; pass --force",
                    pending.len()
                );
            }
            let ok = Confirm::new()
                .with_prompt(format!("Apply {} migration(s)?", pending.len()))
                .default(false)
                .interact()
                .context("reading confirmation")?;
            if !ok {
                return Ok(Outcome::Aborted);
            }
        }

        let mut applied_count = 0usize;
        let mut kicked_async = 0usize;
        let mut last_sync: Option<String> = None;

        for m in &pending {
            match m.mode {
                MigrationMode::Sync => {
                    engine.execute_sync(m, self.statement_timeout).await?;
                    println!("{} {}", style("applied").green(), m.name);
                    applied_count += 1;
                    last_sync = Some(m.name.clone());
                }
                MigrationMode::Async => {
                    engine.execute_async(m, self.statement_timeout).await?;
                    println!(
                        "{} {} (running in the background)",
                        style("kicked").cyan(),
                        m.name
                    );
                    kicked_async += 1;
                    // later migrations that depend on this one have to
                    // wait for a future run
                    break;
                }
            }
        }

        if let Some(name) = last_sync {
            if let Err(e) = self.write_checkpoint_for(ctx, &migrations, &name).await {
                tracing::warn!(error = %e, "could not write checkpoint");
            }
        }

        engine.shutdown();
        Ok(Outcome::AppliedMigrations {
            applied: applied_count,
            kicked_async,
        })
    }
}

impl ExecuteMigrations {
    /// After a successful sync run, snapshot the canonical schema at the
    /// last applied migration and persist it locally plus to the remote
    /// cache when one is configured.
    async fn write_checkpoint_for(
        &self,
        ctx: &AppContext,
        migrations: &[MigrationScript],
        last_applied: &str,
    ) -> Result<()> {
        let upto = match migrations.iter().position(|m| m.name == last_applied) {
            Some(i) => &migrations[..=i],
            None => return Ok(()),
        };
        let schema = expected_schema(ctx, upto).await?;
        let canonical = render_single_line(&schema.statements);
        let checkpoint = Checkpoint::create(upto, &canonical);
        write_checkpoint(&ctx.store(), last_applied, &checkpoint)?;
        info!(migration = last_applied, "checkpoint written");
        if let Some(cache) = ctx.remote_cache() {
            cache.put(&checkpoint).await?;
        }
        Ok(())
    }
}

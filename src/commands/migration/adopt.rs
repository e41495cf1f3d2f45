//! `scurry migration adopt`: record migrations as applied without
//! executing them. The row is written with an empty checksum, which is
//! how later runs know not to compare it against the file on disk.

use crate::commands::{Command, Outcome};
use crate::context::AppContext;
use crate::store::MigrationScript;
use anyhow::{Context, Result};
use console::style;
use dialoguer::Confirm;
use std::collections::BTreeSet;

pub struct AdoptMigrations {
    /// A single migration to adopt; everything unapplied when omitted.
    pub migration: Option<String>,
    pub yes: bool,
}

impl Command for AdoptMigrations {
    async fn execute(&self, ctx: &AppContext) -> Result<Outcome> {
        let store = ctx.store();
        let migrations = store.load_migrations()?;
        let engine = ctx.engine().await?;

        let recorded: BTreeSet<String> = engine
            .applied_migrations()
            .await?
            .into_iter()
            .map(|a| a.name)
            .collect();

        let targets: Vec<&MigrationScript> = match &self.migration {
            Some(name) => {
                let found = migrations
                    .iter()
                    .find(|m| &m.name == name)
                    .with_context(|| format!("migration {} is not on disk", name))?;
                vec![found]
            }
            None => migrations
                .iter()
                .filter(|m| !recorded.contains(&m.name))
                .collect(),
        };

        if targets.is_empty() {
            println!("Nothing to adopt.");
            engine.shutdown();
            return Ok(Outcome::NothingToDo);
        }

        if !self.yes {
            if !ctx.interactive() {
                anyhow::bail!(
                    "refusing to adopt {} migration(s) without a terminal; pass --yes",
                    targets.len()
                );
            }
            let ok = Confirm::new()
                .with_prompt(format!(
                    "Mark {} migration(s) as applied without executing them?",
                    targets.len()
                ))
                .default(false)
                .interact()?;
            if !ok {
                engine.shutdown();
                return Ok(Outcome::Aborted);
            }
        }

        let mut count = 0usize;
        for m in targets {
            if recorded.contains(&m.name) {
                println!("{} {} already recorded", style("skip").dim(), m.name);
                continue;
            }
            engine.mark_applied_without_execution(m).await?;
            println!("{} {}", style("adopted").green(), m.name);
            count += 1;
        }
        engine.shutdown();

        Ok(Outcome::AppliedMigrations {
            applied: count,
            kicked_async: 0,
        })
    }
}

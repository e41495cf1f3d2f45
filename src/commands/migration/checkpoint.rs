//! `scurry migration checkpoint-regen`: replay every migration through
//! the shadow database and rewrite the checkpoint in each directory.

use crate::canonical::{dump_create_statements, parse_dump};
use crate::checkpoint::{write_checkpoint, Checkpoint};
use crate::commands::{Command, Outcome};
use crate::context::AppContext;
use crate::sql::{render_single_line, split_statements};
use anyhow::{Context, Result};
use console::style;

pub struct RegenCheckpoints;

impl Command for RegenCheckpoints {
    async fn execute(&self, ctx: &AppContext) -> Result<Outcome> {
        let store = ctx.store();
        let migrations = store.load_migrations()?;
        if migrations.is_empty() {
            println!("No migrations to checkpoint.");
            return Ok(Outcome::NothingToDo);
        }

        // one shadow borrow for the whole incremental replay
        let client = ctx.shadow.client().await?;
        let mut written = 0usize;
        let result: Result<()> = async {
            for (i, m) in migrations.iter().enumerate() {
                for stmt in split_statements(&m.sql) {
                    client
                        .execute(&stmt)
                        .await
                        .with_context(|| format!("replaying migration {}", m.name))?;
                }
                let dump = dump_create_statements(&client.client)
                    .await
                    .context("dumping canonical schema")?;
                let schema = parse_dump(&dump)?;
                let canonical = render_single_line(&schema.statements);
                let checkpoint = Checkpoint::create(&migrations[..=i], &canonical);
                write_checkpoint(&store, &m.name, &checkpoint)?;
                println!("{} {}", style("checkpointed").green(), m.name);
                written += 1;
            }
            Ok(())
        }
        .await;
        client.close().await;
        result?;

        if let Some(cache) = ctx.remote_cache() {
            // push the newest snapshot so other machines skip replay too
            let last = migrations.last().expect("nonempty");
            if let Ok(raw) = std::fs::read_to_string(store.checkpoint_file(&last.name)) {
                if let Ok(cp) = Checkpoint::parse(&raw) {
                    if let Err(e) = cache.put(&cp).await {
                        tracing::warn!(error = %e, "could not publish checkpoint");
                    }
                }
            }
        }

        Ok(Outcome::CheckpointsWritten { count: written })
    }
}

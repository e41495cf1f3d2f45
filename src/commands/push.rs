//! `scurry push`: diff the local definitions against a live database and
//! apply the result directly, without writing a migration file.

use super::migration::read_definitions;
use crate::canonical::{canonicalize, dump_create_statements, parse_dump};
use crate::classify::classify;
use crate::commands::{Command, Outcome};
use crate::context::AppContext;
use crate::diff::compare;
use crate::generate::generate_migration;
use crate::report::DiagnosticReport;
use crate::sql::parse_sql;
use anyhow::{anyhow, Context, Result};
use console::style;
use dialoguer::Confirm;

pub struct Push {
    pub dry_run: bool,
    pub force: bool,
}

impl Command for Push {
    async fn execute(&self, ctx: &AppContext) -> Result<Outcome> {
        let raw = read_definitions(&ctx.definitions_dir)?;
        let parsed = parse_sql(&raw).context("parsing schema definitions")?;
        let local = canonicalize(&ctx.shadow, parsed)
            .await
            .context("canonicalizing schema definitions")?;

        let engine = ctx.engine().await?;
        let dump = dump_create_statements(engine.client())
            .await
            .context("dumping live schema")?;
        let remote = parse_dump(&dump).context("parsing live schema")?;

        let diffs = compare(&local, &remote);
        if diffs.is_empty() {
            println!("Live schema already matches the definitions.");
            engine.shutdown();
            return Ok(Outcome::NothingToDo);
        }

        for diff in &diffs {
            let marker = if diff.dangerous {
                style("!").red().bold()
            } else {
                style("~").dim()
            };
            println!("  {} {}", marker, diff.description);
        }

        let sizes = ctx.store().load_table_sizes()?;
        let classification = classify(&diffs, &sizes);
        let generated = match generate_migration(&diffs, &remote, classification.mode) {
            Ok(g) => g,
            Err(e) => {
                let mut report = DiagnosticReport::new("push", &e);
                report.local_schema = Some(local.render());
                report.remote_schema = Some(remote.render());
                let path = report.write()?;
                return Err(anyhow!(e))
                    .context(format!("generating push (diagnostics: {})", path.display()));
            }
        };

        for warning in &generated.warnings {
            eprintln!("{} {}", style("warning:").yellow().bold(), warning);
        }

        if self.dry_run {
            println!("{}", generated.sql);
            engine.shutdown();
            return Ok(Outcome::DryRun);
        }

        if !self.force {
            if !ctx.interactive() {
                anyhow::bail!(
                    "refusing to push {} statement(s) without a terminal; pass --force",
                    generated.statements.len()
                );
            }
            let ok = Confirm::new()
                .with_prompt(format!(
                    "Apply {} statement(s) directly to the database?",
                    generated.statements.len()
                ))
                .default(false)
                .interact()?;
            if !ok {
                engine.shutdown();
                return Ok(Outcome::Aborted);
            }
        }

        let count = generated.statements.len();
        for stmt in &generated.statements {
            engine
                .run_manual_sql(&format!("{};", stmt))
                .await
                .with_context(|| format!("executing `{}`", stmt))?;
        }
        engine.shutdown();

        Ok(Outcome::Pushed { statements: count })
    }
}

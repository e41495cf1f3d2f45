//! `scurry migration gen`: diff the local definitions against the
//! expected schema and write a new migration.

use super::{expected_schema, read_definitions};
use crate::canonical::canonicalize;
use crate::classify::classify;
use crate::commands::{Command, Outcome};
use crate::context::AppContext;
use crate::diff::compare;
use crate::generate::generate_migration;
use crate::report::DiagnosticReport;
use crate::sql::parse_sql;
use crate::store::{Header, Store};
use anyhow::{anyhow, Context, Result};
use console::style;
use dialoguer::Input;

pub struct GenMigration {
    pub name: Option<String>,
    pub definitions: Option<std::path::PathBuf>,
}

impl Command for GenMigration {
    async fn execute(&self, ctx: &AppContext) -> Result<Outcome> {
        let definitions_dir = self
            .definitions
            .clone()
            .unwrap_or_else(|| ctx.definitions_dir.clone());

        let raw = read_definitions(&definitions_dir)?;
        let parsed = parse_sql(&raw).context("parsing schema definitions")?;
        let local = canonicalize(&ctx.shadow, parsed)
            .await
            .context("canonicalizing schema definitions")?;

        let store = ctx.store();
        let migrations = store.load_migrations()?;
        let remote = expected_schema(ctx, &migrations)
            .await
            .context("building expected schema from migrations")?;

        let diffs = compare(&local, &remote);
        if diffs.is_empty() {
            println!("No schema changes detected.");
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

        let sizes = store.load_table_sizes()?;
        let classification = classify(&diffs, &sizes);
        for reason in &classification.reasons {
            println!("  {} {}", style("async:").yellow(), reason);
        }

        let generated = match generate_migration(&diffs, &remote, classification.mode) {
            Ok(g) => g,
            Err(e) => {
                let mut report = DiagnosticReport::new("generate", &e);
                report.local_schema = Some(local.render());
                report.remote_schema = Some(remote.render());
                report.statements = diffs
                    .iter()
                    .flat_map(|d| d.statements.iter().map(|s| s.to_string()))
                    .collect();
                let path = report.write()?;
                return Err(anyhow!(e)).context(format!(
                    "generating migration (diagnostics: {})",
                    path.display()
                ));
            }
        };

        for warning in &generated.warnings {
            eprintln!("{} {}", style("warning:").yellow().bold(), warning);
        }

        let slug = match &self.name {
            Some(name) => name.clone(),
            None => {
                if !ctx.interactive() {
                    return Err(anyhow!(
                        "no migration name given and no terminal to ask on; pass --name <slug>"
                    ));
                }
                Input::new()
                    .with_prompt("Migration name")
                    .interact_text()
                    .context("reading migration name")?
            }
        };

        let name = Store::new_migration_name(&slug)?;
        let header = Header {
            mode: classification.mode,
            depends_on: Vec::new(),
        };
        let path = store.write_migration(&name, &generated.sql, &header)?;
        store.write_schema(&local.render())?;

        Ok(Outcome::MigrationGenerated {
            name,
            path,
            mode: classification.mode,
        })
    }
}

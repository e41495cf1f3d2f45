//! `scurry lint`: run the schema lint rules over the definitions.

use super::migration::read_definition_files;
use crate::commands::{Command, Outcome};
use crate::context::AppContext;
use crate::lint::{lint_schema, parse_suppressions};
use crate::schema::Schema;
use crate::sql::parse_sql;
use anyhow::{Context, Result};
use console::style;

pub struct LintSchema;

impl Command for LintSchema {
    async fn execute(&self, ctx: &AppContext) -> Result<Outcome> {
        let files = read_definition_files(&ctx.definitions_dir)?;
        let mut suppressions = Vec::new();
        let mut raw = String::new();
        for (_, text) in &files {
            suppressions.extend(parse_suppressions(text));
            raw.push_str(text);
            if !raw.ends_with('\n') {
                raw.push('\n');
            }
        }
        let parsed = parse_sql(&raw).context("parsing schema definitions")?;
        let schema = Schema::new(parsed).context("building schema model")?;

        let issues = lint_schema(&schema, &suppressions);
        if issues.is_empty() {
            println!("{} no lint issues", style("✓").green());
            return Ok(Outcome::LintClean);
        }

        for issue in &issues {
            eprintln!(
                "{} [{}] {}",
                style("lint:").yellow().bold(),
                issue.rule,
                issue.message
            );
        }
        Ok(Outcome::LintIssues {
            count: issues.len(),
        })
    }
}

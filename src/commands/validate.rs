//! `scurry validate`: parse the definitions, check model invariants and
//! dependencies, and prove they apply cleanly to an empty database.

use super::migration::read_definitions;
use crate::canonical::canonicalize;
use crate::commands::{Command, Outcome};
use crate::context::AppContext;
use crate::depgraph::check_dependencies;
use crate::schema::{referenced_enum_values, Schema};
use crate::sql::parse_sql;
use anyhow::{anyhow, Context, Result};
use console::style;

pub struct Validate;

impl Command for Validate {
    async fn execute(&self, ctx: &AppContext) -> Result<Outcome> {
        let raw = read_definitions(&ctx.definitions_dir)?;
        let parsed = parse_sql(&raw).context("parsing schema definitions")?;
        let schema = Schema::new(parsed).context("building schema model")?;

        check_dependencies(&schema).context("resolving object references")?;

        // enum values referenced by checks and defaults must exist
        for table in &schema.tables {
            for (type_name, value) in referenced_enum_values(table) {
                if let Some(values) = schema.enum_values(&type_name) {
                    if !values.iter().any(|v| v == &value) {
                        return Err(anyhow!(
                            "table {} references enum value '{}', which {} does not define",
                            table.name.qualify(),
                            value,
                            type_name
                        ));
                    }
                }
            }
        }

        // ground truth: the engine itself accepts the definitions
        let canonical = canonicalize(&ctx.shadow, schema.statements.clone())
            .await
            .context("applying definitions to an empty shadow database")?;

        println!(
            "{} {}",
            style("valid:").green().bold(),
            canonical.describe()
        );
        Ok(Outcome::Valid)
    }
}

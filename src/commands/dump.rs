//! `scurry dump`: write the live database's canonical schema to a file.

use crate::canonical::{dump_create_statements, parse_dump};
use crate::commands::{Command, Outcome};
use crate::context::AppContext;
use anyhow::{Context, Result};
use std::path::PathBuf;

pub struct DumpSchema {
    pub file: PathBuf,
}

impl Command for DumpSchema {
    async fn execute(&self, ctx: &AppContext) -> Result<Outcome> {
        let engine = ctx.engine().await?;
        let dump = dump_create_statements(engine.client())
            .await
            .context("dumping live schema")?;
        engine.shutdown();

        let schema = parse_dump(&dump).context("parsing live schema")?;
        std::fs::write(&self.file, schema.render())
            .with_context(|| format!("writing {}", self.file.display()))?;
        println!("{}", schema.describe());

        Ok(Outcome::Dumped {
            path: self.file.clone(),
        })
    }
}

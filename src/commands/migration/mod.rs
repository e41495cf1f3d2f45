//! Migration subcommands and the shared expected-schema machinery.

mod adopt;
mod checkpoint;
mod execute;
mod gen;
mod recover;
mod table_sizes;

pub use adopt::AdoptMigrations;
pub use checkpoint::RegenCheckpoints;
pub use execute::ExecuteMigrations;
pub use gen::GenMigration;
pub use recover::RecoverMigrations;
pub use table_sizes::RefreshTableSizes;

use crate::canonical::{dump_create_statements, parse_dump, CanonicalError};
use crate::checkpoint::{latest_valid_checkpoint, migrations_hash, Checkpoint};
use crate::context::AppContext;
use crate::depgraph::order_statements;
use crate::schema::Schema;
use crate::sql::{parse_sql, split_statements};
use crate::store::MigrationScript;
use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, info};

/// Builds the schema the migrations directory is expected to produce.
///
/// Fast paths first: the newest valid local checkpoint, then the remote
/// cache keyed by the migrations-hash. A checkpoint covering a prefix
/// seeds the shadow database and only the remaining migrations replay.
/// With no usable checkpoint, every migration replays.
pub async fn expected_schema(
    ctx: &AppContext,
    migrations: &[MigrationScript],
) -> Result<Schema> {
    if migrations.is_empty() {
        return Ok(Schema::empty());
    }

    let store = ctx.store();
    if let Some((idx, cp)) = latest_valid_checkpoint(&store, migrations) {
        if idx + 1 == migrations.len() {
            debug!(checkpoint = %migrations[idx].name, "expected schema from checkpoint");
            return Ok(parse_dump(&cp.schema_sql)?);
        }
        debug!(checkpoint = %migrations[idx].name, "replaying from checkpoint");
        return replay(ctx, Some(&cp), &migrations[idx + 1..]).await;
    }

    if let Some(cache) = ctx.remote_cache() {
        let hash = migrations_hash(migrations);
        if let Some(cp) = cache.get(&hash).await {
            info!("expected schema from remote cache");
            return Ok(parse_dump(&cp.schema_sql)?);
        }
    }

    replay(ctx, None, migrations).await
}

/// Replays migrations through the shadow database, optionally seeded
/// with a checkpoint's canonical schema, and dumps the result.
async fn replay(
    ctx: &AppContext,
    seed: Option<&Checkpoint>,
    migrations: &[MigrationScript],
) -> Result<Schema> {
    let client = ctx.shadow.client().await?;
    let result = replay_on(&client, seed, migrations).await;
    client.close().await;
    result
}

async fn replay_on(
    client: &crate::shadow::ShadowClient,
    seed: Option<&Checkpoint>,
    migrations: &[MigrationScript],
) -> Result<Schema> {
    if let Some(cp) = seed {
        // canonical dumps are already dependency-clean, but ordering is
        // cheap and keeps partially hand-edited checkpoints working
        let statements = order_statements(parse_sql(&cp.schema_sql)?)?;
        for stmt in &statements {
            client.execute(&format!("{};", stmt)).await?;
        }
    }
    for m in migrations {
        for stmt in split_statements(&m.sql) {
            client
                .execute(&stmt)
                .await
                .with_context(|| format!("replaying migration {}", m.name))?;
        }
    }
    let dump = dump_create_statements(&client.client)
        .await
        .map_err(CanonicalError::Dump)?;
    Ok(parse_dump(&dump)?)
}

/// Reads every `.sql` file under the definitions directory, sorted by
/// path for determinism.
pub fn read_definitions(dir: &Path) -> Result<String> {
    let files = read_definition_files(dir)?;
    let mut combined = String::new();
    for (_, text) in files {
        combined.push_str(&text);
        if !combined.ends_with('\n') {
            combined.push('\n');
        }
    }
    Ok(combined)
}

/// Per-file contents, sorted by path. The lint pass needs file
/// boundaries because suppression directives live in file headers.
pub fn read_definition_files(dir: &Path) -> Result<Vec<(std::path::PathBuf, String)>> {
    let mut files = Vec::new();
    collect_sql_files(dir, &mut files)?;
    files.sort();
    files
        .into_iter()
        .map(|path| {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("could not read {}", path.display()))?;
            Ok((path, text))
        })
        .collect()
}

fn collect_sql_files(dir: &Path, out: &mut Vec<std::path::PathBuf>) -> Result<()> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("could not read definitions directory {}", dir.display()))?;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_sql_files(&path, out)?;
        } else if path.extension().map(|e| e == "sql").unwrap_or(false) {
            out.push(path);
        }
    }
    Ok(())
}

/// Parses a human duration: `300ms`, `30s`, `5m`, `2h` or plain seconds.
pub fn parse_duration(s: &str) -> Result<std::time::Duration, String> {
    let s = s.trim();
    let (digits, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(pos) => s.split_at(pos),
        None => (s, "s"),
    };
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration `{}`", s))?;
    let millis = match unit.trim() {
        "ms" => value,
        "s" | "" => value * 1_000,
        "m" => value * 60_000,
        "h" => value * 3_600_000,
        other => return Err(format!("unknown duration unit `{}`", other)),
    };
    Ok(std::time::Duration::from_millis(millis))
}

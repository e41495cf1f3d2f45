//! Canonicalization through the shadow database.
//!
//! Raw DDL is applied to an empty instance in dependency order, then the
//! engine's own CREATE-statement dump is read back and re-parsed. The
//! resulting schema is insensitive to whitespace, statement order and the
//! defaults the engine fills in.

use crate::depgraph::{order_statements, DependencyError};
use crate::schema::{Schema, SchemaError};
use crate::shadow::{ShadowError, ShadowPool};
use crate::sql::{parse_sql, ParseError, Statement};
use thiserror::Error;
use tokio_postgres::Client;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CanonicalError {
    #[error(transparent)]
    Dependency(#[from] DependencyError),
    #[error(transparent)]
    Shadow(#[from] ShadowError),
    #[error("dump query failed: {0}")]
    Dump(#[from] tokio_postgres::Error),
    #[error("could not re-parse the engine dump: {0}")]
    Reparse(#[from] ParseError),
    #[error("engine dump is not a valid schema: {0}")]
    Model(#[from] SchemaError),
}

/// Schemas the engine owns; they never appear in a canonical dump.
const SYSTEM_SCHEMAS: &[&str] = &[
    "public",
    "crdb_internal",
    "information_schema",
    "pg_catalog",
    "pg_extension",
    crate::engine::RESERVED_SCHEMA,
];

/// Applies the statements to an empty shadow database and reads back the
/// canonical schema.
pub async fn canonicalize(
    pool: &ShadowPool,
    statements: Vec<Statement>,
) -> Result<Schema, CanonicalError> {
    let ordered = order_statements(statements)?;
    let client = pool.client().await?;
    let result = canonicalize_on(&client, &ordered).await;
    client.close().await;
    result
}

async fn canonicalize_on(
    client: &crate::shadow::ShadowClient,
    ordered: &[Statement],
) -> Result<Schema, CanonicalError> {
    for stmt in ordered {
        client.execute(&format!("{};", stmt)).await?;
    }
    let dump = dump_create_statements(&client.client).await?;
    debug!(statements = ordered.len(), "canonicalized schema");
    parse_dump(&dump)
}

/// Parses an engine dump into the schema model.
pub fn parse_dump(dump: &str) -> Result<Schema, CanonicalError> {
    let parsed = parse_sql(dump)?;
    Ok(Schema::new(parsed)?)
}

/// Reads the engine's CREATE statements for everything in the current
/// database: schemas, then types, sequences, tables (which carry their
/// indexes and foreign keys), and routines. Trigger re-emission is
/// best-effort and rides on the table dump where the engine includes it.
pub async fn dump_create_statements(client: &Client) -> Result<String, tokio_postgres::Error> {
    let mut parts: Vec<String> = Vec::new();

    let schema_rows = client
        .query(
            "SELECT schema_name FROM [SHOW SCHEMAS] ORDER BY schema_name",
            &[],
        )
        .await?;
    for row in schema_rows {
        let name: String = row.get(0);
        if !SYSTEM_SCHEMAS.contains(&name.as_str()) {
            parts.push(format!("CREATE SCHEMA {};", crate::sql::quote_ident(&name)));
        }
    }

    for source in [
        "SHOW CREATE ALL TYPES",
        "SHOW CREATE ALL SEQUENCES",
        "SHOW CREATE ALL TABLES",
        "SHOW CREATE ALL ROUTINES",
    ] {
        match client
            .query(&format!("SELECT create_statement FROM [{}]", source), &[])
            .await
        {
            Ok(rows) => {
                for row in rows {
                    let stmt: String = row.get(0);
                    let stmt = stmt.trim().to_string();
                    if stmt.ends_with(';') {
                        parts.push(stmt);
                    } else {
                        parts.push(format!("{};", stmt));
                    }
                }
            }
            Err(e) => {
                // older engine versions lack some of these dump forms
                debug!(source, error = %e, "dump source unavailable");
            }
        }
    }

    Ok(normalize_dump(&parts.join("\n")))
}

/// The engine annotates literals with `:::type`; the plain cast form is
/// equivalent and round-trips through the parser.
pub fn normalize_dump(text: &str) -> String {
    text.replace(":::", "::")
}

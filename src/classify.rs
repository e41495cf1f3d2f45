//! Sync/async migration classification.
//!
//! A migration is asynchronous when any of its differences implies a
//! long-running backfill on a large table. The size oracle comes from
//! `table_sizes.yaml`, refreshed with `scurry migration table-sizes`.

use crate::diff::Difference;
use crate::sql::{AlterTableOp, Statement, TableConstraint};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_LARGE_TABLE_THRESHOLD: i64 = 100_000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationMode {
    #[default]
    Sync,
    Async,
}

impl fmt::Display for MigrationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MigrationMode::Sync => "sync",
            MigrationMode::Async => "async",
        })
    }
}

impl FromStr for MigrationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sync" => Ok(MigrationMode::Sync),
            "async" => Ok(MigrationMode::Async),
            other => Err(format!("unknown migration mode `{}`", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TableSize {
    pub rows: i64,
    pub size_bytes: i64,
}

/// The large-table oracle: row counts and approximate sizes keyed by
/// qualified table name.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TableSizes {
    pub threshold: i64,
    #[serde(default)]
    pub tables: BTreeMap<String, TableSize>,
}

impl Default for TableSizes {
    fn default() -> Self {
        TableSizes {
            threshold: DEFAULT_LARGE_TABLE_THRESHOLD,
            tables: BTreeMap::new(),
        }
    }
}

impl TableSizes {
    pub fn is_large(&self, qualified_name: &str) -> bool {
        self.tables
            .get(qualified_name)
            .map(|t| t.rows >= self.threshold)
            .unwrap_or(false)
    }
}

#[derive(Clone, Debug)]
pub struct Classification {
    pub mode: MigrationMode,
    pub reasons: Vec<String>,
}

/// Applies the async rules to a set of differences. If any rule matches,
/// the whole migration is async.
pub fn classify(diffs: &[Difference], sizes: &TableSizes) -> Classification {
    let mut reasons = Vec::new();
    for diff in diffs {
        for stmt in &diff.statements {
            match stmt {
                Statement::CreateIndex(ci) => {
                    let table = ci.table.qualify().to_string();
                    if sizes.is_large(&table) {
                        reasons.push(format!(
                            "CREATE INDEX {} on large table {}",
                            ci.name, table
                        ));
                    }
                }
                Statement::AlterTable(at) => {
                    let table = at.name.qualify().to_string();
                    if !sizes.is_large(&table) {
                        continue;
                    }
                    match &at.op {
                        AlterTableOp::AddColumn(col)
                            if col.not_null && col.default.is_some() =>
                        {
                            reasons.push(format!(
                                "ADD COLUMN {} NOT NULL DEFAULT on large table {}",
                                col.name, table
                            ));
                        }
                        AlterTableOp::SetNotNull(col) => {
                            reasons.push(format!(
                                "SET NOT NULL on column {} of large table {}",
                                col, table
                            ));
                        }
                        AlterTableOp::AddConstraint(c) => match c {
                            TableConstraint::ForeignKey {
                                name, not_valid, ..
                            }
                            | TableConstraint::Check {
                                name, not_valid, ..
                            } if !*not_valid => {
                                reasons.push(format!(
                                    "ADD CONSTRAINT {} validates existing rows on large table {}",
                                    name.as_deref().unwrap_or("(unnamed)"),
                                    table
                                ));
                            }
                            // UNIQUE additions build their index under
                            // the engine's own online schema change
                            _ => {}
                        },
                        AlterTableOp::AlterColumnType { column, .. } => {
                            reasons.push(format!(
                                "ALTER COLUMN {} TYPE rewrites large table {}",
                                column, table
                            ));
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }
    }

    Classification {
        mode: if reasons.is_empty() {
            MigrationMode::Sync
        } else {
            MigrationMode::Async
        },
        reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::compare;
    use crate::schema::Schema;
    use crate::sql::parse_sql;

    fn schema_of(sql: &str) -> Schema {
        Schema::new(parse_sql(sql).unwrap()).unwrap()
    }

    fn sizes_with(table: &str, rows: i64) -> TableSizes {
        let mut sizes = TableSizes::default();
        sizes.tables.insert(
            table.to_string(),
            TableSize {
                rows,
                size_bytes: rows * 100,
            },
        );
        sizes
    }

    #[test]
    fn create_index_on_large_table_is_async() {
        let local = schema_of("CREATE TABLE t (a INT, INDEX a_idx (a))");
        let remote = schema_of("CREATE TABLE t (a INT)");
        let diffs = compare(&local, &remote);
        let c = classify(&diffs, &sizes_with("public.t", 1_000_000));
        assert_eq!(c.mode, MigrationMode::Async);
        assert!(!c.reasons.is_empty());
    }

    #[test]
    fn create_index_on_small_table_is_sync() {
        let local = schema_of("CREATE TABLE t (a INT, INDEX a_idx (a))");
        let remote = schema_of("CREATE TABLE t (a INT)");
        let diffs = compare(&local, &remote);
        let c = classify(&diffs, &sizes_with("public.t", 10));
        assert_eq!(c.mode, MigrationMode::Sync);
    }

    #[test]
    fn create_table_is_sync_regardless_of_sizes() {
        let local = schema_of("CREATE TABLE t (a INT)");
        let remote = Schema::empty();
        let diffs = compare(&local, &remote);
        let c = classify(&diffs, &sizes_with("public.t", 1_000_000));
        assert_eq!(c.mode, MigrationMode::Sync);
    }

    #[test]
    fn any_async_rule_wins() {
        let local = schema_of(
            "CREATE TABLE small (a INT);
             CREATE TABLE big (a INT, b INT NOT NULL DEFAULT 0)",
        );
        let remote = schema_of(
            "CREATE TABLE small (a INT);
             CREATE TABLE big (a INT)",
        );
        let diffs = compare(&local, &remote);
        let c = classify(&diffs, &sizes_with("public.big", 500_000));
        assert_eq!(c.mode, MigrationMode::Async);
    }

    #[test]
    fn yaml_round_trip() {
        let sizes = sizes_with("public.t", 42);
        let text = serde_yaml::to_string(&sizes).unwrap();
        let back: TableSizes = serde_yaml::from_str(&text).unwrap();
        assert_eq!(back.threshold, DEFAULT_LARGE_TABLE_THRESHOLD);
        assert_eq!(back.tables["public.t"].rows, 42);
    }
}

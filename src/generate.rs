//! The migration generator: turns a set of differences into an ordered,
//! transaction-aware statement list plus rendered SQL and warnings.
//!
//! Ordering: additive and modifying statements are topologically ordered
//! (each difference's internal sequence is preserved with chain edges);
//! removals run afterwards in reverse dependency order, so a table
//! always drops before the type it uses.
//!
//! The engine cannot run certain statement pairs in one transaction; the
//! rules are a table of `(prev, next)` predicates so new engine versions
//! add entries instead of growing an if/else chain.

use crate::classify::MigrationMode;
use crate::depgraph::{
    created_tables, kind_priority, primary_name, split_forward_references_with, statement_deps,
    DependencyError,
};
use crate::diff::{Difference, DifferenceKind};
use crate::schema::Schema;
use crate::sql::normalize::walk_expr;
use crate::sql::*;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug)]
pub struct Generated {
    pub statements: Vec<Statement>,
    pub sql: String,
    pub warnings: Vec<String>,
}

impl Generated {
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

/// Generates the migration for a set of differences against the remote
/// schema. `mode` affects constraint emission: async migrations add
/// foreign keys and checks as `NOT VALID` and validate them at the end.
pub fn generate_migration(
    diffs: &[Difference],
    remote: &Schema,
    mode: MigrationMode,
) -> Result<Generated, DependencyError> {
    let mut warnings = warnings_for(diffs, remote);

    let (removals, changes): (Vec<&Difference>, Vec<&Difference>) =
        diffs.iter().partition(|d| is_removal(d.kind));

    let mut ordered = order_changes(&changes, mode)?;
    ordered.extend(order_removals(&removals, remote));

    let with_boundaries = insert_boundaries(ordered);
    let sql = render_statements(&with_boundaries);
    warnings.sort();

    Ok(Generated {
        statements: with_boundaries,
        sql,
        warnings,
    })
}

fn is_removal(kind: DifferenceKind) -> bool {
    matches!(
        kind,
        DifferenceKind::SchemaRemoved
            | DifferenceKind::TypeRemoved
            | DifferenceKind::SequenceRemoved
            | DifferenceKind::TableRemoved
            | DifferenceKind::ViewRemoved
            | DifferenceKind::RoutineRemoved
            | DifferenceKind::TriggerRemoved
    )
}

fn warnings_for(diffs: &[Difference], remote: &Schema) -> Vec<String> {
    let mut warnings = Vec::new();
    for diff in diffs {
        if diff.dangerous {
            warnings.push(format!("destructive change: {}", diff.description));
        }
        if diff.kind == DifferenceKind::ColumnTypeChanged {
            for stmt in &diff.statements {
                if let Statement::AlterTable(at) = stmt {
                    if let AlterTableOp::AlterColumnType {
                        column, data_type, ..
                    } = &at.op
                    {
                        let table = at.name.qualify();
                        let lossy = remote
                            .table(&table)
                            .and_then(|t| t.column(column))
                            .map(|c| base_type(&c.data_type) != base_type(data_type))
                            .unwrap_or(false);
                        if lossy {
                            warnings.push(format!(
                                "possibly lossy conversion of {}.{} to {}; consider `ALTER TABLE {} ALTER COLUMN {} SET DATA TYPE {} USING {}::{}`",
                                table, column, data_type, table, column, data_type, column, data_type
                            ));
                        }
                    }
                }
            }
        }
    }
    warnings
}

fn base_type(dt: &sqlparser::ast::DataType) -> String {
    let text = dt.to_string().to_uppercase();
    text.split('(').next().unwrap_or_default().trim().to_string()
}

/// Orders the additive/modifying statements: dependency edges from the
/// provides/requires sets plus chain edges that preserve each
/// difference's internal sequence.
fn order_changes(
    changes: &[&Difference],
    mode: MigrationMode,
) -> Result<Vec<Statement>, DependencyError> {
    let materialized: Vec<Vec<Statement>> =
        changes.iter().map(|d| materialize(d, mode)).collect();
    // foreign keys between tables created in this migration become
    // ALTERs so cyclic schemas stay linearizable
    let created = {
        let all: Vec<Statement> = materialized.iter().flatten().cloned().collect();
        created_tables(&all)
    };

    let mut items: Vec<Statement> = Vec::new();
    let mut chains: Vec<(usize, usize)> = Vec::new();
    for statements in materialized {
        let statements = split_forward_references_with(statements, &created);
        let start = items.len();
        for (offset, stmt) in statements.into_iter().enumerate() {
            if offset > 0 {
                chains.push((start + offset - 1, start + offset));
            }
            items.push(stmt);
        }
    }

    let deps: Vec<_> = items.iter().map(statement_deps).collect();
    let mut providers: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (i, d) in deps.iter().enumerate() {
        for p in &d.provides {
            providers.entry(p.as_str()).or_default().push(i);
        }
    }

    let mut edges: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); items.len()];
    let mut indegree = vec![0usize; items.len()];
    for (i, d) in deps.iter().enumerate() {
        for name in &d.requires {
            if let Some(sources) = providers.get(name.as_str()) {
                for &src in sources {
                    if src != i && edges[src].insert(i) {
                        indegree[i] += 1;
                    }
                }
            }
        }
    }
    for (a, b) in chains {
        if edges[a].insert(b) {
            indegree[b] += 1;
        }
    }

    let sort_key = |i: usize| (kind_priority(&items[i]), primary_name(&items[i]), i);
    let mut ready: BTreeSet<(u8, String, usize)> = (0..items.len())
        .filter(|&i| indegree[i] == 0)
        .map(sort_key)
        .collect();

    let mut order = Vec::with_capacity(items.len());
    while let Some(head) = ready.iter().next().cloned() {
        ready.remove(&head);
        let i = head.2;
        order.push(i);
        for &next in &edges[i] {
            indegree[next] -= 1;
            if indegree[next] == 0 {
                ready.insert(sort_key(next));
            }
        }
    }
    if order.len() != items.len() {
        let stuck = (0..items.len())
            .find(|&i| indegree[i] > 0)
            .map(|i| primary_name(&items[i]))
            .unwrap_or_default();
        return Err(DependencyError::Cycle(stuck));
    }

    let mut by_index: Vec<Option<Statement>> = items.into_iter().map(Some).collect();
    Ok(order
        .into_iter()
        .map(|i| by_index[i].take().expect("each index emitted once"))
        .collect())
}

/// A difference's statements, adjusted for the migration mode: async
/// migrations add validating constraints as NOT VALID and validate them
/// as a separate, backgroundable step.
fn materialize(diff: &Difference, mode: MigrationMode) -> Vec<Statement> {
    if mode == MigrationMode::Sync {
        return diff.statements.clone();
    }
    let mut out = Vec::with_capacity(diff.statements.len());
    for stmt in &diff.statements {
        match stmt {
            Statement::AlterTable(at) => match &at.op {
                AlterTableOp::AddConstraint(TableConstraint::ForeignKey {
                    name: Some(cname),
                    not_valid: false,
                    ..
                })
                | AlterTableOp::AddConstraint(TableConstraint::Check {
                    name: Some(cname),
                    not_valid: false,
                    ..
                }) => {
                    let mut flagged = at.clone();
                    if let AlterTableOp::AddConstraint(c) = &mut flagged.op {
                        match c {
                            TableConstraint::ForeignKey { not_valid, .. }
                            | TableConstraint::Check { not_valid, .. } => *not_valid = true,
                            _ => {}
                        }
                    }
                    out.push(Statement::AlterTable(flagged));
                    out.push(Statement::AlterTable(AlterTable {
                        name: at.name.clone(),
                        op: AlterTableOp::ValidateConstraint(cname.clone()),
                    }));
                }
                _ => out.push(stmt.clone()),
            },
            _ => out.push(stmt.clone()),
        }
    }
    out
}

/// Removals in reverse dependency order: triggers and views first, then
/// tables (children before the tables they reference), then routines,
/// sequences, types and schemas.
fn order_removals(removals: &[&Difference], remote: &Schema) -> Vec<Statement> {
    let mut buckets: BTreeMap<u8, Vec<&Difference>> = BTreeMap::new();
    for diff in removals {
        let rank = match diff.kind {
            DifferenceKind::TriggerRemoved => 0,
            DifferenceKind::ViewRemoved => 1,
            DifferenceKind::TableRemoved => 2,
            DifferenceKind::RoutineRemoved => 3,
            DifferenceKind::SequenceRemoved => 4,
            DifferenceKind::TypeRemoved => 5,
            DifferenceKind::SchemaRemoved => 6,
            _ => 7,
        };
        buckets.entry(rank).or_default().push(diff);
    }

    let mut out = Vec::new();
    for (rank, mut bucket) in buckets {
        bucket.sort_by(|a, b| a.object.cmp(&b.object));
        if rank == 2 {
            out.extend(order_table_drops(&bucket, remote));
        } else {
            for diff in bucket {
                out.extend(diff.statements.iter().cloned());
            }
        }
    }
    out
}

/// Tables referencing other dropped tables must drop first. A referential
/// cycle among the dropped tables falls back to name order with CASCADE.
fn order_table_drops(bucket: &[&Difference], remote: &Schema) -> Vec<Statement> {
    let dropped: BTreeSet<&str> = bucket.iter().map(|d| d.object.as_str()).collect();

    // edges: table -> tables it references via FK (that are also dropped)
    let mut refs: BTreeMap<&str, BTreeSet<String>> = BTreeMap::new();
    for diff in bucket {
        let mut targets = BTreeSet::new();
        if let Some(table) = remote
            .tables
            .iter()
            .find(|t| t.name.qualify().to_string() == diff.object)
        {
            for c in &table.constraints {
                if let TableConstraint::ForeignKey { foreign_table, .. } = c {
                    let target = foreign_table.qualify().to_string();
                    if target != diff.object && dropped.contains(target.as_str()) {
                        targets.insert(target);
                    }
                }
            }
        }
        refs.insert(diff.object.as_str(), targets);
    }

    // peel tables nobody else still references
    let mut remaining: Vec<&Difference> = bucket.to_vec();
    let mut ordered = Vec::new();
    while !remaining.is_empty() {
        let referenced: BTreeSet<String> = remaining
            .iter()
            .flat_map(|d| refs.get(d.object.as_str()).into_iter().flatten().cloned())
            .collect();
        let (free, rest): (Vec<_>, Vec<_>) = remaining
            .into_iter()
            .partition(|d| !referenced.contains(&d.object));
        if free.is_empty() {
            // cycle: drop in name order with CASCADE
            for diff in rest {
                for stmt in &diff.statements {
                    if let Statement::Drop(d) = stmt {
                        let mut d = d.clone();
                        d.cascade = true;
                        ordered.push(Statement::Drop(d));
                    } else {
                        ordered.push(stmt.clone());
                    }
                }
            }
            return ordered;
        }
        for diff in free {
            ordered.extend(diff.statements.iter().cloned());
        }
        remaining = rest;
    }
    ordered
}

// Transaction-boundary rules. Each entry decides whether `next` may not
// share a transaction with an already-emitted `prev`.

struct BoundaryRule {
    #[allow(dead_code)]
    name: &'static str,
    applies: fn(&Statement, &Statement) -> bool,
}

const BOUNDARY_RULES: &[BoundaryRule] = &[
    BoundaryRule {
        name: "enum value referenced after ALTER TYPE ADD VALUE",
        applies: enum_value_then_use,
    },
    BoundaryRule {
        name: "schema change follows constraint addition on same table",
        applies: constraint_then_same_table,
    },
    BoundaryRule {
        name: "column type rewrite shares table with other work",
        applies: column_rewrite_conflict,
    },
    BoundaryRule {
        name: "column re-added after drop",
        applies: drop_then_readd_column,
    },
    BoundaryRule {
        name: "partial index predicate uses column from this migration",
        applies: new_column_then_partial_index,
    },
];

fn stmt_table(stmt: &Statement) -> Option<QualifiedName> {
    match stmt {
        Statement::AlterTable(at) => Some(at.name.qualify()),
        Statement::CreateIndex(ci) => Some(ci.table.qualify()),
        Statement::CreateTrigger(t) => Some(t.table.qualify()),
        Statement::Drop(d) => match d.kind {
            ObjectKind::Index | ObjectKind::Trigger => d.table.as_ref().map(|t| t.qualify()),
            ObjectKind::Table => Some(d.name.qualify()),
            _ => None,
        },
        _ => None,
    }
}

fn enum_value_then_use(prev: &Statement, next: &Statement) -> bool {
    let Statement::AlterType(at) = prev else {
        return false;
    };
    let AlterTypeOp::AddValue { value, .. } = &at.op else {
        return false;
    };
    let member = at.name.qualify().member(value);
    statement_deps(next).requires.contains(&member)
}

fn constraint_then_same_table(prev: &Statement, next: &Statement) -> bool {
    let Statement::AlterTable(at) = prev else {
        return false;
    };
    let AlterTableOp::AddConstraint(
        TableConstraint::ForeignKey { .. } | TableConstraint::Check { .. },
    ) = &at.op
    else {
        return false;
    };
    stmt_table(next) == Some(at.name.qualify())
}

fn is_column_rewrite(stmt: &Statement) -> Option<QualifiedName> {
    match stmt {
        Statement::AlterTable(at) if matches!(at.op, AlterTableOp::AlterColumnType { .. }) => {
            Some(at.name.qualify())
        }
        _ => None,
    }
}

fn column_rewrite_conflict(prev: &Statement, next: &Statement) -> bool {
    if let Some(table) = is_column_rewrite(prev) {
        if stmt_table(next) == Some(table) {
            return true;
        }
    }
    if let Some(table) = is_column_rewrite(next) {
        if stmt_table(prev) == Some(table) {
            return true;
        }
    }
    false
}

fn drop_then_readd_column(prev: &Statement, next: &Statement) -> bool {
    let Statement::AlterTable(p) = prev else {
        return false;
    };
    let Statement::AlterTable(n) = next else {
        return false;
    };
    let AlterTableOp::DropColumn(dropped) = &p.op else {
        return false;
    };
    let AlterTableOp::AddColumn(col) = &n.op else {
        return false;
    };
    p.name.qualify() == n.name.qualify() && dropped == &col.name
}

fn new_column_then_partial_index(prev: &Statement, next: &Statement) -> bool {
    let Statement::CreateIndex(ci) = next else {
        return false;
    };
    let Some(predicate) = &ci.index.predicate else {
        return false;
    };
    let table = ci.table.qualify();
    let mut predicate_cols = BTreeSet::new();
    walk_expr(predicate, &mut |e| {
        if let sqlparser::ast::Expr::Identifier(id) = e {
            predicate_cols.insert(table.member(&id.value));
        }
    });
    statement_deps(prev)
        .provides
        .iter()
        .any(|p| predicate_cols.contains(p))
}

/// Inserts `COMMIT; BEGIN;` pairs wherever a rule matches `next` against
/// any statement since the last boundary. The executor opens the initial
/// transaction, so no leading BEGIN is emitted.
fn insert_boundaries(ordered: Vec<Statement>) -> Vec<Statement> {
    let mut out: Vec<Statement> = Vec::with_capacity(ordered.len());
    let mut window_start = 0usize;
    for stmt in ordered {
        let conflict = out[window_start..].iter().any(|prev| {
            BOUNDARY_RULES
                .iter()
                .any(|rule| (rule.applies)(prev, &stmt))
        });
        if conflict && !out.is_empty() {
            out.push(Statement::Commit);
            out.push(Statement::Begin);
            window_start = out.len();
        }
        out.push(stmt);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{classify, TableSizes};
    use crate::diff::compare;
    use crate::schema::Schema;
    use crate::sql::parse_sql;

    fn schema_of(sql: &str) -> Schema {
        Schema::new(parse_sql(sql).unwrap()).unwrap()
    }

    fn texts(g: &Generated) -> Vec<String> {
        g.statements.iter().map(|s| s.to_string()).collect()
    }

    fn gen(local: &str, remote: &str) -> Generated {
        let local = schema_of(local);
        let remote = schema_of(remote);
        let diffs = compare(&local, &remote);
        let c = classify(&diffs, &TableSizes::default());
        generate_migration(&diffs, &remote, c.mode).unwrap()
    }

    #[test]
    fn new_enum_column_and_index_in_order() {
        let g = gen(
            "CREATE TYPE user_status AS ENUM ('active', 'inactive', 'suspended');
             CREATE TABLE users (
                 id INT PRIMARY KEY,
                 name TEXT NOT NULL,
                 status user_status NOT NULL DEFAULT 'active',
                 INDEX status_idx (status)
             );",
            "CREATE TABLE users (id INT PRIMARY KEY, name TEXT NOT NULL);",
        );
        let t = texts(&g);
        assert_eq!(t.len(), 3, "got: {:#?}", t);
        assert!(t[0].starts_with("CREATE TYPE user_status"));
        assert!(t[1].starts_with("ALTER TABLE users ADD COLUMN status"));
        assert!(t[2].starts_with("CREATE INDEX status_idx ON users"));
    }

    #[test]
    fn narrowing_indexed_column_brackets_the_rewrite() {
        let g = gen(
            "CREATE TABLE users (id INT PRIMARY KEY, email VARCHAR(100), INDEX email_idx (email));",
            "CREATE TABLE users (id INT PRIMARY KEY, email VARCHAR(200), INDEX email_idx (email));",
        );
        let t = texts(&g);
        assert_eq!(t.len(), 7, "got: {:#?}", t);
        assert!(t[0].starts_with("DROP INDEX"));
        assert_eq!(t[1], "COMMIT");
        assert_eq!(t[2], "BEGIN");
        assert!(t[3].contains("SET DATA TYPE VARCHAR(100)"));
        assert_eq!(t[4], "COMMIT");
        assert_eq!(t[5], "BEGIN");
        assert!(t[6].starts_with("CREATE INDEX email_idx"));
    }

    #[test]
    fn widening_needs_no_boundaries() {
        let g = gen(
            "CREATE TABLE users (id INT PRIMARY KEY, email VARCHAR(200), INDEX email_idx (email));",
            "CREATE TABLE users (id INT PRIMARY KEY, email VARCHAR(100), INDEX email_idx (email));",
        );
        let t = texts(&g);
        assert_eq!(t.len(), 1, "got: {:#?}", t);
    }

    #[test]
    fn enum_value_then_check_is_split() {
        let g = gen(
            "CREATE TYPE user_status AS ENUM ('active', 'inactive', 'suspended');
             CREATE TABLE users (
                 id INT PRIMARY KEY,
                 status user_status,
                 CONSTRAINT not_suspended CHECK (status != 'suspended'::user_status)
             );",
            "CREATE TYPE user_status AS ENUM ('active', 'inactive');
             CREATE TABLE users (id INT PRIMARY KEY, status user_status);",
        );
        let t = texts(&g);
        assert_eq!(t.len(), 4, "got: {:#?}", t);
        assert!(t[0].starts_with("ALTER TYPE public.user_status ADD VALUE 'suspended'"));
        assert_eq!(t[1], "COMMIT");
        assert_eq!(t[2], "BEGIN");
        assert!(t[3].contains("ADD CONSTRAINT not_suspended CHECK"));
    }

    #[test]
    fn drop_table_before_drop_type() {
        let g = gen(
            "",
            "CREATE TYPE status AS ENUM ('a');
             CREATE TABLE users (id INT PRIMARY KEY, s status);",
        );
        let t = texts(&g);
        assert_eq!(t.len(), 2, "got: {:#?}", t);
        assert!(t[0].starts_with("DROP TABLE"));
        assert!(t[1].starts_with("DROP TYPE"));
    }

    #[test]
    fn dropped_child_table_goes_first() {
        let g = gen(
            "",
            "CREATE TABLE parents (id INT PRIMARY KEY);
             CREATE TABLE children (id INT PRIMARY KEY, p INT, CONSTRAINT fk_p FOREIGN KEY (p) REFERENCES parents (id));",
        );
        let t = texts(&g);
        assert_eq!(t[0], "DROP TABLE public.children");
        assert_eq!(t[1], "DROP TABLE public.parents");
    }

    #[test]
    fn dangerous_changes_warn() {
        let g = gen("CREATE TABLE t (a INT)", "CREATE TABLE t (a INT, b INT)");
        assert_eq!(g.warnings.len(), 1);
        assert!(g.warnings[0].contains("destructive"));
    }

    #[test]
    fn lossy_type_change_suggests_using() {
        let g = gen("CREATE TABLE t (a STRING)", "CREATE TABLE t (a INT)");
        assert!(
            g.warnings.iter().any(|w| w.contains("USING")),
            "warnings: {:?}",
            g.warnings
        );
    }

    #[test]
    fn determinism_over_repeated_runs() {
        let local = "CREATE TABLE b (id INT PRIMARY KEY);
                     CREATE TABLE a (id INT PRIMARY KEY);
                     CREATE TABLE c (id INT PRIMARY KEY);";
        let first = gen(local, "");
        for _ in 0..5 {
            let again = gen(local, "");
            assert_eq!(texts(&first), texts(&again));
        }
        assert!(texts(&first)[0].contains("a"));
    }
}

//! Name resolution and dependency ordering.
//!
//! Every statement exposes two sets of qualified names: what it provides
//! (objects, columns, constraint and index names as `schema.object` or
//! `schema.object.member` strings) and what it requires. Kahn's algorithm
//! over those sets produces a deterministic execution order.

use crate::schema::Schema;
use crate::sql::normalize::walk_expr;
use crate::sql::*;
use sqlparser::ast::{DataType, Expr, FunctionArg, FunctionArgExpr, FunctionArguments, Value};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DependencyError {
    #[error("dependency cycle involving {0}")]
    Cycle(String),
    #[error("{statement} requires {missing}, which is not defined")]
    Missing { statement: String, missing: String },
}

#[derive(Clone, Debug, Default)]
pub struct StatementDeps {
    pub provides: BTreeSet<String>,
    pub requires: BTreeSet<String>,
}

/// Functions the engine ships; calls to these never create a routine
/// dependency.
const BUILTIN_FUNCTIONS: &[&str] = &[
    "abs",
    "array_length",
    "btrim",
    "coalesce",
    "concat",
    "current_database",
    "current_date",
    "current_schema",
    "current_timestamp",
    "current_user",
    "date_trunc",
    "extract",
    "gen_random_uuid",
    "greatest",
    "if",
    "ifnull",
    "least",
    "left",
    "length",
    "lower",
    "md5",
    "now",
    "nullif",
    "random",
    "right",
    "round",
    "substring",
    "to_char",
    "trim",
    "unique_rowid",
    "upper",
    "uuid_generate_v4",
];

/// Sequence-manipulating builtins whose literal argument names a sequence.
const SEQUENCE_FUNCTIONS: &[&str] = &["nextval", "currval", "setval"];

/// Type names that are built into the engine. Anything else parsed as a
/// custom type creates a type dependency.
const BUILTIN_TYPES: &[&str] = &[
    "bool",
    "boolean",
    "bytea",
    "bytes",
    "date",
    "decimal",
    "float",
    "float4",
    "float8",
    "inet",
    "int",
    "int2",
    "int4",
    "int8",
    "integer",
    "interval",
    "json",
    "jsonb",
    "numeric",
    "oid",
    "real",
    "regclass",
    "serial",
    "serial2",
    "serial4",
    "serial8",
    "smallint",
    "bigint",
    "string",
    "text",
    "time",
    "timetz",
    "timestamp",
    "timestamptz",
    "uuid",
    "varchar",
];

pub fn is_builtin_type(name: &str) -> bool {
    BUILTIN_TYPES.contains(&name.to_lowercase().as_str())
}

fn is_builtin_function(name: &str) -> bool {
    let lower = name.to_lowercase();
    BUILTIN_FUNCTIONS.contains(&lower.as_str()) || SEQUENCE_FUNCTIONS.contains(&lower.as_str())
}

fn qualified_from_parts(parts: &[String]) -> QualifiedName {
    match parts.len() {
        0 => QualifiedName::public("?"),
        1 => QualifiedName::public(&parts[0]),
        _ => QualifiedName::new(&parts[parts.len() - 2], &parts[parts.len() - 1]),
    }
}

fn object_name_parts(name: &sqlparser::ast::ObjectName) -> Vec<String> {
    name.0.iter().map(|i| i.value.clone()).collect()
}

/// Dependencies contributed by a data type: a type dependency for any
/// non-builtin named type.
fn data_type_deps(data_type: &DataType, out: &mut BTreeSet<String>) {
    if let DataType::Custom(name, _) = data_type {
        let parts = object_name_parts(name);
        if parts.len() > 1 || !is_builtin_type(&parts[0]) {
            out.insert(qualified_from_parts(&parts).to_string());
        }
    }
}

/// Walks an expression collecting dependencies per the rules in the
/// module docs: identifiers become column references under `table`, casts
/// to user types become type deps (plus an enum-value dep when the
/// operand is a string literal), sequence builtins contribute the
/// sequence named by their literal argument, other non-builtin function
/// applications contribute a routine dep.
pub fn expr_deps(expr: &Expr, table: Option<&QualifiedName>, out: &mut BTreeSet<String>) {
    walk_expr(expr, &mut |e| match e {
        Expr::Identifier(id) => {
            if let Some(t) = table {
                out.insert(t.member(&id.value));
            }
        }
        Expr::CompoundIdentifier(parts) => {
            // `table.column` or `schema.table.column`
            let vals: Vec<String> = parts.iter().map(|p| p.value.clone()).collect();
            if vals.len() >= 2 {
                let qn = qualified_from_parts(&vals[..vals.len() - 1]);
                out.insert(qn.member(&vals[vals.len() - 1]));
            }
        }
        Expr::Cast {
            expr: inner,
            data_type,
            ..
        } => {
            data_type_deps(data_type, out);
            if let DataType::Custom(name, _) = data_type {
                let parts = object_name_parts(name);
                if parts.len() > 1 || !is_builtin_type(&parts[0]) {
                    if let Expr::Value(Value::SingleQuotedString(s)) = inner.as_ref() {
                        out.insert(qualified_from_parts(&parts).member(s));
                    }
                }
            }
        }
        Expr::TypedString { data_type, .. } => {
            data_type_deps(data_type, out);
        }
        Expr::Function(f) => {
            let parts = object_name_parts(&f.name);
            let fname = parts.last().cloned().unwrap_or_default();
            if SEQUENCE_FUNCTIONS.contains(&fname.to_lowercase().as_str()) {
                if let Some(seq) = sequence_argument(f) {
                    out.insert(seq.to_string());
                }
            } else if !is_builtin_function(&fname) {
                out.insert(qualified_from_parts(&parts).to_string());
            }
        }
        _ => {}
    });
}

/// Extracts the sequence name from `nextval('seq')`, accepting an
/// optional `::regclass` cast on or inside the literal.
fn sequence_argument(f: &sqlparser::ast::Function) -> Option<QualifiedName> {
    let FunctionArguments::List(list) = &f.args else {
        return None;
    };
    let first = list.args.first()?;
    let FunctionArg::Unnamed(FunctionArgExpr::Expr(expr)) = first else {
        return None;
    };
    // unwrap any stack of casts (`'seq'::STRING::REGCLASS`)
    let mut expr = expr;
    while let Expr::Cast { expr: inner, .. } = expr {
        expr = inner.as_ref();
    }
    let literal = match expr {
        Expr::Value(Value::SingleQuotedString(s)) => s.clone(),
        _ => return None,
    };
    let trimmed = literal
        .strip_suffix("::regclass")
        .unwrap_or(&literal)
        .trim()
        .trim_matches('"');
    let parts: Vec<String> = trimmed.split('.').map(|s| s.to_string()).collect();
    Some(qualified_from_parts(&parts))
}

fn schema_dep(name: &Name, out: &mut BTreeSet<String>) {
    if let Some(s) = &name.schema {
        if s != DEFAULT_SCHEMA {
            out.insert(s.clone());
        }
    }
}

/// Provides/requires for a single statement.
pub fn statement_deps(stmt: &Statement) -> StatementDeps {
    let mut d = StatementDeps::default();
    match stmt {
        Statement::CreateSchema(s) => {
            d.provides.insert(s.name.clone());
        }
        Statement::CreateType(t) => {
            let qn = t.name.qualify();
            schema_dep(&t.name, &mut d.requires);
            d.provides.insert(qn.to_string());
            if let TypeBody::Enum(labels) = &t.body {
                for l in labels {
                    d.provides.insert(qn.member(l));
                }
            }
            if let TypeBody::Composite(fields) = &t.body {
                for (_, dt) in fields {
                    data_type_deps(dt, &mut d.requires);
                }
            }
        }
        Statement::CreateSequence(s) => {
            schema_dep(&s.name, &mut d.requires);
            d.provides.insert(s.name.qualify().to_string());
        }
        Statement::CreateTable(t) => {
            let qn = t.name.qualify();
            schema_dep(&t.name, &mut d.requires);
            d.provides.insert(qn.to_string());
            for col in &t.columns {
                d.provides.insert(qn.member(&col.name));
                data_type_deps(&col.data_type, &mut d.requires);
                if let Some(def) = &col.default {
                    expr_deps(def, Some(&qn), &mut d.requires);
                }
                if let Some(c) = &col.computed {
                    expr_deps(&c.expr, Some(&qn), &mut d.requires);
                }
            }
            for c in &t.constraints {
                if let Some(n) = c.name() {
                    d.provides.insert(qn.member(n));
                }
                constraint_deps(c, &qn, &mut d.requires);
            }
            for i in &t.indexes {
                d.provides.insert(qn.member(&i.name));
                index_deps(i, &qn, &mut d.requires);
            }
        }
        Statement::CreateIndex(ci) => {
            let tn = ci.table.qualify();
            schema_dep(&ci.table, &mut d.requires);
            d.requires.insert(tn.to_string());
            d.provides.insert(tn.member(&ci.name));
            index_deps(&ci.index, &tn, &mut d.requires);
        }
        Statement::CreateView(v) => {
            schema_dep(&v.name, &mut d.requires);
            d.provides.insert(v.name.qualify().to_string());
            // the defining query is raw text; references resolve against
            // the provides index at ordering time
        }
        Statement::CreateRoutine(r) => {
            schema_dep(&r.name, &mut d.requires);
            d.provides.insert(r.name.qualify().to_string());
            for p in &r.params {
                data_type_deps(&p.data_type, &mut d.requires);
            }
            if let Some(ret) = &r.returns {
                data_type_deps(ret, &mut d.requires);
            }
        }
        Statement::CreateTrigger(t) => {
            let tn = t.table.qualify();
            d.requires.insert(tn.to_string());
            d.requires.insert(t.function.qualify().to_string());
            d.provides.insert(tn.member(&t.name));
            if let Some(w) = &t.when {
                expr_deps(w, Some(&tn), &mut d.requires);
            }
        }
        Statement::AlterTable(at) => {
            let qn = at.name.qualify();
            d.requires.insert(qn.to_string());
            match &at.op {
                AlterTableOp::AddColumn(col) => {
                    d.provides.insert(qn.member(&col.name));
                    data_type_deps(&col.data_type, &mut d.requires);
                    if let Some(def) = &col.default {
                        expr_deps(def, Some(&qn), &mut d.requires);
                    }
                    if let Some(c) = &col.computed {
                        expr_deps(&c.expr, Some(&qn), &mut d.requires);
                    }
                }
                AlterTableOp::AddConstraint(c) => {
                    if let Some(n) = c.name() {
                        d.provides.insert(qn.member(n));
                    }
                    constraint_deps(c, &qn, &mut d.requires);
                }
                AlterTableOp::AlterColumnType {
                    column,
                    data_type,
                    using,
                } => {
                    d.requires.insert(qn.member(column));
                    data_type_deps(data_type, &mut d.requires);
                    if let Some(u) = using {
                        expr_deps(u, Some(&qn), &mut d.requires);
                    }
                }
                AlterTableOp::SetDefault(column, expr) => {
                    d.requires.insert(qn.member(column));
                    expr_deps(expr, Some(&qn), &mut d.requires);
                }
                AlterTableOp::DropColumn(column)
                | AlterTableOp::SetNotNull(column)
                | AlterTableOp::DropNotNull(column)
                | AlterTableOp::DropDefault(column)
                | AlterTableOp::SetVisible(column)
                | AlterTableOp::SetNotVisible(column) => {
                    d.requires.insert(qn.member(column));
                }
                AlterTableOp::AlterPrimaryKey(columns) => {
                    for col in columns {
                        expr_deps(&col.expr, Some(&qn), &mut d.requires);
                    }
                }
                AlterTableOp::DropConstraint(_)
                | AlterTableOp::ValidateConstraint(_)
                | AlterTableOp::SetStorageParams(_)
                | AlterTableOp::ResetStorageParams(_) => {}
            }
        }
        Statement::AlterType(at) => {
            let qn = at.name.qualify();
            d.requires.insert(qn.to_string());
            if let AlterTypeOp::AddValue { value, .. } = &at.op {
                d.provides.insert(qn.member(value));
            }
        }
        Statement::AlterSequence(s) => {
            d.requires.insert(s.name.qualify().to_string());
        }
        // Drops are ordered by the generator from the remote schema's
        // reverse dependency order, and transaction control is inserted
        // after ordering.
        Statement::Drop(_) | Statement::Begin | Statement::Commit => {}
    }
    d
}

fn constraint_deps(c: &TableConstraint, table: &QualifiedName, out: &mut BTreeSet<String>) {
    match c {
        TableConstraint::ForeignKey {
            foreign_table,
            referred_columns,
            ..
        } => {
            let fqn = foreign_table.qualify();
            out.insert(fqn.to_string());
            for rc in referred_columns {
                out.insert(fqn.member(rc));
            }
        }
        TableConstraint::Check { expr, .. } => {
            expr_deps(expr, Some(table), out);
        }
        TableConstraint::PrimaryKey { columns, .. } | TableConstraint::Unique { columns, .. } => {
            for col in columns {
                expr_deps(&col.expr, Some(table), out);
            }
        }
    }
}

fn index_deps(i: &IndexDef, table: &QualifiedName, out: &mut BTreeSet<String>) {
    for col in &i.columns {
        expr_deps(&col.expr, Some(table), out);
    }
    for s in &i.storing {
        out.insert(table.member(s));
    }
    if let Some(p) = &i.predicate {
        expr_deps(p, Some(table), out);
    }
}

/// Ordering priority of a statement kind, the first tie-breaker. Alters,
/// index creation and view creation share one tier; within it, ties fall
/// through to the lexicographic name.
pub fn kind_priority(stmt: &Statement) -> u8 {
    match stmt {
        Statement::CreateSchema(_) => 0,
        Statement::CreateType(_) => 1,
        Statement::CreateSequence(_) => 2,
        Statement::CreateRoutine(_) => 3,
        Statement::CreateTable(_) => 4,
        Statement::AlterTable(_)
        | Statement::AlterType(_)
        | Statement::AlterSequence(_)
        | Statement::CreateIndex(_)
        | Statement::CreateView(_) => 5,
        Statement::CreateTrigger(_) => 6,
        Statement::Drop(_) => 7,
        Statement::Begin | Statement::Commit => 8,
    }
}

/// The statement's primary object name, the second tie-breaker.
pub fn primary_name(stmt: &Statement) -> String {
    match stmt {
        Statement::CreateSchema(s) => s.name.clone(),
        Statement::CreateType(t) => t.name.qualify().to_string(),
        Statement::CreateSequence(s) => s.name.qualify().to_string(),
        Statement::CreateTable(t) => t.name.qualify().to_string(),
        Statement::CreateIndex(i) => i.table.qualify().member(&i.name),
        Statement::CreateView(v) => v.name.qualify().to_string(),
        Statement::CreateRoutine(r) => r.signature(),
        Statement::CreateTrigger(t) => t.table.qualify().member(&t.name),
        Statement::AlterTable(a) => a.name.qualify().to_string(),
        Statement::AlterType(a) => a.name.qualify().to_string(),
        Statement::AlterSequence(a) => a.name.qualify().to_string(),
        Statement::Drop(d) => d.name.qualify().to_string(),
        Statement::Begin => String::from("begin"),
        Statement::Commit => String::from("commit"),
    }
}

/// Replaces foreign keys that point at tables created in the same batch
/// with `ALTER TABLE … ADD CONSTRAINT` statements appended after every
/// CREATE TABLE. Self-referential keys stay inline; this is the
/// two-pass emission that keeps cyclic schemas linearizable.
pub fn split_forward_references(stmts: Vec<Statement>) -> Vec<Statement> {
    let created = created_tables(&stmts);
    split_forward_references_with(stmts, &created)
}

/// The tables a statement batch creates, for forward-reference splitting
/// across batches.
pub fn created_tables(stmts: &[Statement]) -> BTreeSet<QualifiedName> {
    stmts
        .iter()
        .filter_map(|s| match s {
            Statement::CreateTable(t) => Some(t.name.qualify()),
            _ => None,
        })
        .collect()
}

/// As `split_forward_references`, but against an externally supplied set
/// of tables being created (the caller may be batching statements in
/// groups).
pub fn split_forward_references_with(
    stmts: Vec<Statement>,
    created: &BTreeSet<QualifiedName>,
) -> Vec<Statement> {
    let mut out = Vec::with_capacity(stmts.len());
    let mut deferred = Vec::new();
    for stmt in stmts {
        match stmt {
            Statement::CreateTable(mut t) => {
                let own = t.name.qualify();
                let (kept, split): (Vec<_>, Vec<_>) =
                    t.constraints.into_iter().partition(|c| match c {
                        TableConstraint::ForeignKey { foreign_table, .. } => {
                            let target = foreign_table.qualify();
                            target == own || !created.contains(&target)
                        }
                        _ => true,
                    });
                t.constraints = kept;
                for c in split {
                    deferred.push(Statement::AlterTable(AlterTable {
                        name: t.name.clone(),
                        op: AlterTableOp::AddConstraint(c),
                    }));
                }
                out.push(Statement::CreateTable(t));
            }
            other => out.push(other),
        }
    }
    out.extend(deferred);
    out
}

/// Kahn's algorithm with deterministic tie-breaking: kind priority, then
/// lexicographic primary name, then input position.
pub fn order_statements(stmts: Vec<Statement>) -> Result<Vec<Statement>, DependencyError> {
    let stmts = split_forward_references(stmts);
    let deps: Vec<StatementDeps> = stmts.iter().map(statement_deps).collect();

    // provider index: name -> statement positions providing it
    let mut providers: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (i, d) in deps.iter().enumerate() {
        for p in &d.provides {
            providers.entry(p.as_str()).or_default().push(i);
        }
    }

    let mut edges: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); stmts.len()];
    let mut indegree = vec![0usize; stmts.len()];
    for (i, d) in deps.iter().enumerate() {
        let mut wanted: BTreeSet<&str> = d.requires.iter().map(String::as_str).collect();
        // view queries and routine bodies are raw text; resolve them
        // against everything the batch provides
        match &stmts[i] {
            Statement::CreateView(v) => collect_text_refs(&v.query, &providers, &mut wanted),
            Statement::CreateRoutine(r) => collect_text_refs(&r.body, &providers, &mut wanted),
            _ => {}
        }
        for name in wanted {
            if let Some(sources) = providers.get(name) {
                for &src in sources {
                    if src != i && edges[src].insert(i) {
                        indegree[i] += 1;
                    }
                }
            }
        }
    }

    let sort_key = |i: usize| {
        (
            kind_priority(&stmts[i]),
            primary_name(&stmts[i]),
            i,
        )
    };

    let mut ready: BTreeSet<(u8, String, usize)> = (0..stmts.len())
        .filter(|&i| indegree[i] == 0)
        .map(sort_key)
        .collect();

    let mut order = Vec::with_capacity(stmts.len());
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

    if order.len() != stmts.len() {
        let stuck = (0..stmts.len())
            .find(|&i| indegree[i] > 0)
            .map(|i| primary_name(&stmts[i]))
            .unwrap_or_default();
        return Err(DependencyError::Cycle(stuck));
    }

    let mut by_index: Vec<Option<Statement>> = stmts.into_iter().map(Some).collect();
    Ok(order
        .into_iter()
        .map(|i| by_index[i].take().expect("each index emitted once"))
        .collect())
}

/// Scans raw SQL text (view queries, routine bodies) for references to
/// names the batch provides.
fn collect_text_refs<'a>(
    text: &str,
    providers: &'a BTreeMap<&'a str, Vec<usize>>,
    wanted: &mut BTreeSet<&'a str>,
) {
    let mut idents: Vec<String> = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
            current.push(c);
        } else if !current.is_empty() {
            idents.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        idents.push(current);
    }
    for ident in idents {
        let lower = ident.to_lowercase();
        let candidates = [lower.clone(), format!("{}.{}", DEFAULT_SCHEMA, lower)];
        for cand in candidates {
            if let Some((key, _)) = providers.get_key_value(cand.as_str()) {
                wanted.insert(*key);
            }
        }
    }
}

/// Validates that every requirement of every statement in the schema is
/// satisfied within it (or is a builtin). This is the I1 check.
pub fn check_dependencies(schema: &Schema) -> Result<(), DependencyError> {
    let deps: Vec<StatementDeps> = schema.statements.iter().map(statement_deps).collect();
    let mut provided: BTreeSet<String> = BTreeSet::new();
    provided.insert(DEFAULT_SCHEMA.to_string());
    for d in &deps {
        provided.extend(d.provides.iter().cloned());
    }
    for (i, d) in deps.iter().enumerate() {
        for r in &d.requires {
            if !provided.contains(r) {
                return Err(DependencyError::Missing {
                    statement: primary_name(&schema.statements[i]),
                    missing: r.clone(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::parse_sql;

    #[test]
    fn table_provides_columns_and_requires_types() {
        let stmts = parse_sql(
            "CREATE TABLE users (id INT PRIMARY KEY, status user_status NOT NULL DEFAULT 'active')",
        )
        .unwrap();
        let d = statement_deps(&stmts[0]);
        assert!(d.provides.contains("public.users"));
        assert!(d.provides.contains("public.users.status"));
        assert!(d.requires.contains("public.user_status"));
    }

    #[test]
    fn enum_literal_cast_requires_value() {
        let stmts = parse_sql(
            "ALTER TABLE t ADD CONSTRAINT c CHECK (status != 'suspended'::user_status)",
        )
        .unwrap();
        let d = statement_deps(&stmts[0]);
        assert!(d.requires.contains("public.user_status.suspended"));
    }

    #[test]
    fn nextval_requires_sequence() {
        let stmts = parse_sql(
            "CREATE TABLE t (id INT DEFAULT nextval('app.t_seq::regclass'))",
        )
        .unwrap();
        let d = statement_deps(&stmts[0]);
        assert!(d.requires.contains("app.t_seq"));
    }

    #[test]
    fn orders_types_before_tables() {
        let stmts = parse_sql(
            "CREATE TABLE users (id INT PRIMARY KEY, status user_status);
             CREATE TYPE user_status AS ENUM ('active');",
        )
        .unwrap();
        let ordered = order_statements(stmts).unwrap();
        assert!(matches!(ordered[0], Statement::CreateType(_)));
        assert!(matches!(ordered[1], Statement::CreateTable(_)));
    }

    #[test]
    fn mutually_referential_fks_split() {
        let stmts = parse_sql(
            "CREATE TABLE a (id INT PRIMARY KEY, b_id INT, CONSTRAINT fk_b FOREIGN KEY (b_id) REFERENCES b (id));
             CREATE TABLE b (id INT PRIMARY KEY, a_id INT, CONSTRAINT fk_a FOREIGN KEY (a_id) REFERENCES a (id));",
        )
        .unwrap();
        let ordered = order_statements(stmts).unwrap();
        assert_eq!(ordered.len(), 4);
        assert!(matches!(ordered[0], Statement::CreateTable(_)));
        assert!(matches!(ordered[1], Statement::CreateTable(_)));
        assert!(matches!(ordered[2], Statement::AlterTable(_)));
        assert!(matches!(ordered[3], Statement::AlterTable(_)));
    }

    #[test]
    fn deterministic_tie_break_is_lexicographic() {
        let stmts = parse_sql(
            "CREATE TABLE zebra (id INT);
             CREATE TABLE apple (id INT);",
        )
        .unwrap();
        let ordered = order_statements(stmts).unwrap();
        assert_eq!(primary_name(&ordered[0]), "public.apple");
        assert_eq!(primary_name(&ordered[1]), "public.zebra");
    }

    #[test]
    fn view_orders_after_referenced_table() {
        let stmts = parse_sql(
            "CREATE VIEW v AS SELECT id FROM users;
             CREATE TABLE users (id INT PRIMARY KEY);",
        )
        .unwrap();
        let ordered = order_statements(stmts).unwrap();
        assert!(matches!(ordered[0], Statement::CreateTable(_)));
        assert!(matches!(ordered[1], Statement::CreateView(_)));
    }
}

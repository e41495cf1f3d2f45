//! The schema model: a typed container of everything a set of DDL
//! statements defines, with resolved names.
//!
//! Schemas are pure values. They are built once from parsed statements and
//! never mutated afterwards; the differ produces fresh statements instead
//! of editing the model.

use crate::sql::normalize::{name_table_constraints, walk_expr};
use crate::sql::*;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("duplicate definition of {kind} {name}")]
    DuplicateObject { kind: &'static str, name: String },
    #[error("{stmt} references table {table}, which is not defined")]
    UnknownTable { stmt: String, table: String },
    #[error("duplicate constraint or index name `{name}` on table {table}")]
    DuplicateConstraintName { table: String, name: String },
    #[error("computed column {table}.{column} references unknown column `{referenced}`")]
    ComputedColumnReference {
        table: String,
        column: String,
        referenced: String,
    },
    #[error("`{tag}` cannot appear in a schema definition")]
    UnsupportedInDefinition { tag: String },
}

/// Identity key for routines: name plus parameter-type signature, since
/// overloads are distinct objects.
pub type RoutineKey = String;

#[derive(Clone, Debug, Default)]
pub struct Schema {
    pub schemas: Vec<CreateSchema>,
    pub types: Vec<CreateType>,
    pub sequences: Vec<CreateSequence>,
    pub tables: Vec<CreateTable>,
    pub views: Vec<CreateView>,
    pub routines: Vec<CreateRoutine>,
    pub triggers: Vec<CreateTrigger>,
    /// Original statements in input order, for faithful re-dumping.
    pub statements: Vec<Statement>,
}

impl Schema {
    pub fn empty() -> Schema {
        Schema::default()
    }

    /// Groups statements by kind and resolves object identity. Standalone
    /// `CREATE INDEX` and `ALTER TABLE … ADD CONSTRAINT` statements are
    /// folded into their tables so comparison is uniform; this is also
    /// the shape canonical dumps arrive in.
    pub fn new(statements: Vec<Statement>) -> Result<Schema, SchemaError> {
        let mut schema = Schema {
            statements: statements.clone(),
            ..Schema::default()
        };

        // objects first, so indexes and constraints can fold into their
        // tables regardless of where they appear in the input
        let mut folds = Vec::new();
        for stmt in statements {
            let tag = stmt.tag();
            match stmt {
                Statement::CreateSchema(s) => schema.schemas.push(s),
                Statement::CreateType(t) => schema.types.push(t),
                Statement::CreateSequence(s) => schema.sequences.push(s),
                Statement::CreateTable(mut t) => {
                    name_table_constraints(&mut t);
                    schema.tables.push(t);
                }
                Statement::CreateView(v) => schema.views.push(v),
                Statement::CreateRoutine(r) => schema.routines.push(r),
                Statement::CreateTrigger(t) => schema.triggers.push(t),
                other @ (Statement::CreateIndex(_) | Statement::AlterTable(_)) => {
                    folds.push(other)
                }
                Statement::AlterType(_)
                | Statement::AlterSequence(_)
                | Statement::Drop(_)
                | Statement::Begin
                | Statement::Commit => {
                    return Err(SchemaError::UnsupportedInDefinition {
                        tag: tag.to_string(),
                    })
                }
            }
        }

        for stmt in folds {
            match stmt {
                Statement::CreateIndex(ci) => {
                    let table = schema.table_mut(&ci.table).ok_or_else(|| {
                        SchemaError::UnknownTable {
                            stmt: "CREATE INDEX".to_string(),
                            table: ci.table.qualify().to_string(),
                        }
                    })?;
                    table.indexes.push(ci.index);
                }
                Statement::AlterTable(at) => {
                    let table_name = at.name.qualify().to_string();
                    let table = schema.table_mut(&at.name).ok_or_else(|| {
                        SchemaError::UnknownTable {
                            stmt: "ALTER TABLE".to_string(),
                            table: table_name.clone(),
                        }
                    })?;
                    match at.op {
                        AlterTableOp::AddConstraint(c) => {
                            table.constraints.push(c);
                            name_table_constraints(table);
                        }
                        // Canonical dumps validate the constraints they
                        // just added; the model treats them as valid.
                        AlterTableOp::ValidateConstraint(name) => {
                            for c in &mut table.constraints {
                                match c {
                                    TableConstraint::ForeignKey {
                                        name: Some(n),
                                        not_valid,
                                        ..
                                    }
                                    | TableConstraint::Check {
                                        name: Some(n),
                                        not_valid,
                                        ..
                                    } if *n == name => *not_valid = false,
                                    _ => {}
                                }
                            }
                        }
                        other => {
                            return Err(SchemaError::UnsupportedInDefinition {
                                tag: format!("ALTER TABLE {}", other),
                            })
                        }
                    }
                }
                _ => unreachable!("only index and alter statements are deferred"),
            }
        }

        schema.check_duplicates()?;
        schema.check_table_invariants()?;
        Ok(schema)
    }

    fn table_mut(&mut self, name: &Name) -> Option<&mut CreateTable> {
        let target = name.qualify();
        self.tables.iter_mut().find(|t| t.name.qualify() == target)
    }

    pub fn table(&self, name: &QualifiedName) -> Option<&CreateTable> {
        self.tables.iter().find(|t| &t.name.qualify() == name)
    }

    pub fn schema_map(&self) -> BTreeMap<String, &CreateSchema> {
        self.schemas.iter().map(|s| (s.name.clone(), s)).collect()
    }

    pub fn type_map(&self) -> BTreeMap<QualifiedName, &CreateType> {
        self.types.iter().map(|t| (t.name.qualify(), t)).collect()
    }

    pub fn sequence_map(&self) -> BTreeMap<QualifiedName, &CreateSequence> {
        self.sequences
            .iter()
            .map(|s| (s.name.qualify(), s))
            .collect()
    }

    pub fn table_map(&self) -> BTreeMap<QualifiedName, &CreateTable> {
        self.tables.iter().map(|t| (t.name.qualify(), t)).collect()
    }

    pub fn view_map(&self) -> BTreeMap<QualifiedName, &CreateView> {
        self.views.iter().map(|v| (v.name.qualify(), v)).collect()
    }

    pub fn routine_map(&self) -> BTreeMap<RoutineKey, &CreateRoutine> {
        self.routines
            .iter()
            .map(|r| (r.signature(), r))
            .collect()
    }

    /// Triggers are identified by `(table, trigger name)`.
    pub fn trigger_map(&self) -> BTreeMap<(QualifiedName, String), &CreateTrigger> {
        self.triggers
            .iter()
            .map(|t| ((t.table.qualify(), t.name.clone()), t))
            .collect()
    }

    /// The enum value set of a type, when the type is an enum.
    pub fn enum_values(&self, name: &QualifiedName) -> Option<&[String]> {
        self.type_map().get(name).and_then(|t| match &t.body {
            TypeBody::Enum(labels) => Some(labels.as_slice()),
            TypeBody::Composite(_) => None,
        })
    }

    fn check_duplicates(&self) -> Result<(), SchemaError> {
        fn check<K: Ord + std::fmt::Debug>(
            keys: impl Iterator<Item = K>,
            kind: &'static str,
        ) -> Result<(), SchemaError> {
            let mut seen = std::collections::BTreeSet::new();
            for k in keys {
                let label = format!("{:?}", k);
                if !seen.insert(label.clone()) {
                    return Err(SchemaError::DuplicateObject { kind, name: label });
                }
            }
            Ok(())
        }
        check(self.schemas.iter().map(|s| s.name.clone()), "schema")?;
        check(self.types.iter().map(|t| t.name.qualify()), "type")?;
        check(self.sequences.iter().map(|s| s.name.qualify()), "sequence")?;
        check(self.tables.iter().map(|t| t.name.qualify()), "table")?;
        check(self.views.iter().map(|v| v.name.qualify()), "view")?;
        check(self.routines.iter().map(|r| r.signature()), "routine")?;
        check(
            self.triggers
                .iter()
                .map(|t| (t.table.qualify(), t.name.clone())),
            "trigger",
        )?;
        Ok(())
    }

    /// Per-table invariants: unique constraint/index names, and computed
    /// columns referencing only columns of the same table.
    fn check_table_invariants(&self) -> Result<(), SchemaError> {
        for table in &self.tables {
            let qualified = table.name.qualify().to_string();
            let mut names = std::collections::BTreeSet::new();
            for n in table
                .constraints
                .iter()
                .filter_map(|c| c.name())
                .chain(table.indexes.iter().map(|i| i.name.as_str()))
            {
                if !names.insert(n.to_string()) {
                    return Err(SchemaError::DuplicateConstraintName {
                        table: qualified,
                        name: n.to_string(),
                    });
                }
            }

            let columns: std::collections::BTreeSet<&str> =
                table.columns.iter().map(|c| c.name.as_str()).collect();
            for col in &table.columns {
                if let Some(computed) = &col.computed {
                    let mut bad = None;
                    walk_expr(&computed.expr, &mut |e| {
                        if let sqlparser::ast::Expr::Identifier(id) = e {
                            if !columns.contains(id.value.as_str()) && bad.is_none() {
                                bad = Some(id.value.clone());
                            }
                        }
                    });
                    if let Some(referenced) = bad {
                        return Err(SchemaError::ComputedColumnReference {
                            table: qualified,
                            column: col.name.clone(),
                            referenced,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Re-renders the schema the way `schema.sql` is written.
    pub fn render(&self) -> String {
        crate::sql::render_statements(&self.statements)
    }

    /// Human-oriented summary used by a few commands.
    pub fn describe(&self) -> String {
        format!(
            "{} table(s), {} type(s), {} sequence(s), {} view(s), {} routine(s), {} trigger(s)",
            self.tables.len(),
            self.types.len(),
            self.sequences.len(),
            self.views.len(),
            self.routines.len(),
            self.triggers.len()
        )
    }
}

/// Looks up the enum values a CHECK or DEFAULT on this table references,
/// used to enforce that referenced values exist in their type.
pub fn referenced_enum_values(table: &CreateTable) -> Vec<(QualifiedName, String)> {
    let mut out = Vec::new();
    let mut exprs: Vec<&sqlparser::ast::Expr> = Vec::new();
    for col in &table.columns {
        if let Some(d) = &col.default {
            exprs.push(d);
        }
    }
    for c in &table.constraints {
        if let TableConstraint::Check { expr, .. } = c {
            exprs.push(expr);
        }
    }
    for expr in exprs {
        walk_expr(expr, &mut |e| {
            if let sqlparser::ast::Expr::Cast {
                expr: inner,
                data_type,
                ..
            } = e
            {
                if let sqlparser::ast::DataType::Custom(name, _) = data_type {
                    if let sqlparser::ast::Expr::Value(
                        sqlparser::ast::Value::SingleQuotedString(s),
                    ) = inner.as_ref()
                    {
                        let parts: Vec<String> =
                            name.0.iter().map(|i| i.value.clone()).collect();
                        let qn = match parts.len() {
                            1 => QualifiedName::public(&parts[0]),
                            _ => QualifiedName::new(&parts[parts.len() - 2], &parts[parts.len() - 1]),
                        };
                        out.push((qn, s.clone()));
                    }
                }
            }
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::parse_sql;

    fn schema_of(sql: &str) -> Schema {
        Schema::new(parse_sql(sql).unwrap()).unwrap()
    }

    #[test]
    fn groups_and_resolves_names() {
        let s = schema_of(
            "CREATE SCHEMA app;
             CREATE TYPE status AS ENUM ('a');
             CREATE TABLE app.users (id INT PRIMARY KEY);
             CREATE INDEX id_idx ON app.users (id);",
        );
        assert_eq!(s.schemas.len(), 1);
        assert_eq!(s.types.len(), 1);
        let users = s.table(&QualifiedName::new("app", "users")).unwrap();
        assert_eq!(users.indexes.len(), 1);
        assert!(s.type_map().contains_key(&QualifiedName::public("status")));
    }

    #[test]
    fn folds_add_constraint() {
        let s = schema_of(
            "CREATE TABLE a (id INT PRIMARY KEY, b_id INT);
             CREATE TABLE b (id INT PRIMARY KEY);
             ALTER TABLE a ADD CONSTRAINT fk_b_id FOREIGN KEY (b_id) REFERENCES b (id);",
        );
        let a = s.table(&QualifiedName::public("a")).unwrap();
        assert!(a
            .constraints
            .iter()
            .any(|c| matches!(c, TableConstraint::ForeignKey { name: Some(n), .. } if n == "fk_b_id")));
    }

    #[test]
    fn duplicate_index_names_rejected() {
        let err = Schema::new(
            parse_sql(
                "CREATE TABLE t (a INT, b INT, INDEX x (a), INDEX x (b))",
            )
            .unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateConstraintName { .. }));
    }

    #[test]
    fn computed_column_must_reference_own_table() {
        let err = Schema::new(
            parse_sql("CREATE TABLE t (a INT, b INT AS (missing + 1) STORED)").unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::ComputedColumnReference { .. }));
    }
}

//! The schema differ.
//!
//! `compare(local, remote)` walks every object class and produces typed
//! `Difference` records. Each record carries the statements that would
//! implement it in isolation; global ordering and transaction boundaries
//! are the generator's job.
//!
//! Convention throughout: `local` is the desired schema, `remote` is what
//! currently exists. Only-in-local is an addition, only-in-remote a
//! removal.

mod tables;

pub use tables::compare_tables;

use crate::schema::Schema;
use crate::sql::normalize::expr_text;
use crate::sql::*;
use std::collections::BTreeSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DifferenceKind {
    SchemaAdded,
    SchemaRemoved,
    TypeAdded,
    TypeRemoved,
    TypeModified,
    SequenceAdded,
    SequenceRemoved,
    SequenceModified,
    TableAdded,
    TableRemoved,
    TableModified,
    TableColumnModified,
    ColumnTypeChanged,
    RoutineAdded,
    RoutineRemoved,
    RoutineModified,
    ViewAdded,
    ViewRemoved,
    ViewModified,
    TriggerAdded,
    TriggerRemoved,
    TriggerModified,
}

/// One atomic change between two schemas.
#[derive(Clone, Debug)]
pub struct Difference {
    pub kind: DifferenceKind,
    /// Qualified name of the object the change applies to.
    pub object: String,
    pub description: String,
    /// Statements implementing the change in isolation, in order.
    pub statements: Vec<Statement>,
    /// Destructive changes the operator should be warned about.
    pub dangerous: bool,
}

impl Difference {
    fn new(
        kind: DifferenceKind,
        object: impl Into<String>,
        description: impl Into<String>,
        statements: Vec<Statement>,
    ) -> Difference {
        Difference {
            kind,
            object: object.into(),
            description: description.into(),
            statements,
            dangerous: false,
        }
    }

    fn dangerous(mut self) -> Difference {
        self.dangerous = true;
        self
    }
}

/// Compares two schemas and returns every difference, grouped by object
/// class in a deterministic order.
pub fn compare(local: &Schema, remote: &Schema) -> Vec<Difference> {
    let mut diffs = Vec::new();
    compare_schemas(local, remote, &mut diffs);
    compare_types(local, remote, &mut diffs);
    compare_sequences(local, remote, &mut diffs);
    compare_all_tables(local, remote, &mut diffs);
    compare_views(local, remote, &mut diffs);
    compare_routines(local, remote, &mut diffs);
    compare_triggers(local, remote, &mut diffs);
    diffs
}

fn compare_schemas(local: &Schema, remote: &Schema, diffs: &mut Vec<Difference>) {
    let l = local.schema_map();
    let r = remote.schema_map();
    for (name, s) in &l {
        if name.as_str() == DEFAULT_SCHEMA {
            continue;
        }
        if !r.contains_key(name) {
            diffs.push(Difference::new(
                DifferenceKind::SchemaAdded,
                name.clone(),
                format!("schema {} added", name),
                vec![Statement::CreateSchema((*s).clone())],
            ));
        }
    }
    for name in r.keys() {
        if name.as_str() == DEFAULT_SCHEMA {
            continue;
        }
        if !l.contains_key(name) {
            diffs.push(
                Difference::new(
                    DifferenceKind::SchemaRemoved,
                    name.clone(),
                    format!("schema {} removed", name),
                    vec![Statement::Drop(Drop {
                        kind: ObjectKind::Schema,
                        name: Name::unqualified(name),
                        table: None,
                        if_exists: false,
                        cascade: false,
                    })],
                )
                .dangerous(),
            );
        }
    }
}

fn compare_types(local: &Schema, remote: &Schema, diffs: &mut Vec<Difference>) {
    let l = local.type_map();
    let r = remote.type_map();
    for (name, t) in &l {
        match r.get(name) {
            None => diffs.push(Difference::new(
                DifferenceKind::TypeAdded,
                name.to_string(),
                format!("type {} added", name),
                vec![Statement::CreateType((*t).clone())],
            )),
            Some(rt) => compare_type(name, t, rt, diffs),
        }
    }
    for (name, _) in &r {
        if !l.contains_key(name) {
            diffs.push(Difference::new(
                DifferenceKind::TypeRemoved,
                name.to_string(),
                format!("type {} removed", name),
                vec![Statement::Drop(Drop {
                    kind: ObjectKind::Type,
                    name: name.to_name(),
                    table: None,
                    if_exists: false,
                    cascade: false,
                })],
            ));
        }
    }
}

fn compare_type(
    name: &QualifiedName,
    local: &CreateType,
    remote: &CreateType,
    diffs: &mut Vec<Difference>,
) {
    match (&local.body, &remote.body) {
        (TypeBody::Enum(lv), TypeBody::Enum(rv)) => {
            if lv == rv {
                return;
            }
            let lset: BTreeSet<&String> = lv.iter().collect();
            let rset: BTreeSet<&String> = rv.iter().collect();
            let mut statements = Vec::new();
            let mut parts = Vec::new();
            let mut dangerous = false;

            // additions keep the order they appear locally, anchored to a
            // surviving neighbor when one exists
            for (pos, value) in lv.iter().enumerate() {
                if rset.contains(value) {
                    continue;
                }
                let placement = lv[..pos]
                    .iter()
                    .rev()
                    .find(|prev| rset.contains(*prev))
                    .map(|prev| ValuePlacement::After(prev.clone()))
                    .or_else(|| {
                        lv[pos + 1..]
                            .iter()
                            .find(|next| rset.contains(*next))
                            .map(|next| ValuePlacement::Before(next.clone()))
                    });
                statements.push(Statement::AlterType(AlterType {
                    name: local.name.clone(),
                    op: AlterTypeOp::AddValue {
                        value: value.clone(),
                        placement,
                    },
                }));
                parts.push(format!("added value '{}'", value));
            }
            for value in rv {
                if !lset.contains(value) {
                    statements.push(Statement::AlterType(AlterType {
                        name: local.name.clone(),
                        op: AlterTypeOp::DropValue(value.clone()),
                    }));
                    parts.push(format!("removed value '{}'", value));
                    dangerous = true;
                }
            }
            if statements.is_empty() {
                // same label set, different order; the engine cannot
                // reorder an enum in place
                return;
            }
            let mut diff = Difference::new(
                DifferenceKind::TypeModified,
                name.to_string(),
                format!("type {}: {}", name, parts.join(", ")),
                statements,
            );
            if dangerous {
                diff = diff.dangerous();
            }
            diffs.push(diff);
        }
        (l_body, r_body) if l_body != r_body => {
            // composite bodies change by replacement
            diffs.push(Difference::new(
                DifferenceKind::TypeModified,
                name.to_string(),
                format!("type {} redefined", name),
                vec![
                    Statement::Drop(Drop {
                        kind: ObjectKind::Type,
                        name: local.name.clone(),
                        table: None,
                        if_exists: false,
                        cascade: false,
                    }),
                    Statement::CreateType(local.clone()),
                ],
            ));
        }
        _ => {}
    }
}

fn compare_sequences(local: &Schema, remote: &Schema, diffs: &mut Vec<Difference>) {
    let l = local.sequence_map();
    let r = remote.sequence_map();
    for (name, s) in &l {
        match r.get(name) {
            None => diffs.push(Difference::new(
                DifferenceKind::SequenceAdded,
                name.to_string(),
                format!("sequence {} added", name),
                vec![Statement::CreateSequence((*s).clone())],
            )),
            Some(rs) => {
                if s.options != rs.options {
                    diffs.push(Difference::new(
                        DifferenceKind::SequenceModified,
                        name.to_string(),
                        format!("sequence {} options changed", name),
                        vec![Statement::AlterSequence(AlterSequence {
                            name: s.name.clone(),
                            options: s.options.clone(),
                        })],
                    ));
                }
            }
        }
    }
    for (name, _) in &r {
        if !l.contains_key(name) {
            diffs.push(Difference::new(
                DifferenceKind::SequenceRemoved,
                name.to_string(),
                format!("sequence {} removed", name),
                vec![Statement::Drop(Drop {
                    kind: ObjectKind::Sequence,
                    name: name.to_name(),
                    table: None,
                    if_exists: false,
                    cascade: false,
                })],
            ));
        }
    }
}

fn compare_all_tables(local: &Schema, remote: &Schema, diffs: &mut Vec<Difference>) {
    let l = local.table_map();
    let r = remote.table_map();
    for (name, t) in &l {
        match r.get(name) {
            None => diffs.push(Difference::new(
                DifferenceKind::TableAdded,
                name.to_string(),
                format!("table {} added", name),
                vec![Statement::CreateTable((*t).clone())],
            )),
            Some(rt) => diffs.extend(compare_tables(name, t, rt)),
        }
    }
    for (name, _) in &r {
        if !l.contains_key(name) {
            diffs.push(
                Difference::new(
                    DifferenceKind::TableRemoved,
                    name.to_string(),
                    format!("table {} removed", name),
                    vec![Statement::Drop(Drop {
                        kind: ObjectKind::Table,
                        name: name.to_name(),
                        table: None,
                        if_exists: false,
                        cascade: false,
                    })],
                )
                .dangerous(),
            );
        }
    }
}

fn compare_views(local: &Schema, remote: &Schema, diffs: &mut Vec<Difference>) {
    let l = local.view_map();
    let r = remote.view_map();
    for (name, v) in &l {
        match r.get(name) {
            None => diffs.push(Difference::new(
                DifferenceKind::ViewAdded,
                name.to_string(),
                format!("view {} added", name),
                vec![Statement::CreateView((*v).clone())],
            )),
            Some(rv) => {
                let same = v.materialized == rv.materialized
                    && v.columns == rv.columns
                    && collapse_whitespace(&v.query).eq_ignore_ascii_case(&collapse_whitespace(
                        &rv.query,
                    ));
                if !same {
                    diffs.push(Difference::new(
                        DifferenceKind::ViewModified,
                        name.to_string(),
                        format!("view {} redefined", name),
                        vec![
                            Statement::Drop(Drop {
                                kind: ObjectKind::View,
                                name: v.name.clone(),
                                table: None,
                                if_exists: false,
                                cascade: false,
                            }),
                            Statement::CreateView((*v).clone()),
                        ],
                    ));
                }
            }
        }
    }
    for (name, _) in &r {
        if !l.contains_key(name) {
            diffs.push(Difference::new(
                DifferenceKind::ViewRemoved,
                name.to_string(),
                format!("view {} removed", name),
                vec![Statement::Drop(Drop {
                    kind: ObjectKind::View,
                    name: name.to_name(),
                    table: None,
                    if_exists: false,
                    cascade: false,
                })],
            ));
        }
    }
}

fn compare_routines(local: &Schema, remote: &Schema, diffs: &mut Vec<Difference>) {
    let l = local.routine_map();
    let r = remote.routine_map();
    for (key, routine) in &l {
        match r.get(key) {
            None => diffs.push(Difference::new(
                DifferenceKind::RoutineAdded,
                key.clone(),
                format!("routine {} added", key),
                vec![Statement::CreateRoutine((*routine).clone())],
            )),
            Some(remote_routine) => {
                // whole-definition textual comparison of the canonical form
                let lt = collapse_whitespace(&routine.to_string());
                let rt = collapse_whitespace(&remote_routine.to_string());
                if !lt.eq_ignore_ascii_case(&rt) {
                    diffs.push(Difference::new(
                        DifferenceKind::RoutineModified,
                        key.clone(),
                        format!("routine {} redefined", key),
                        vec![
                            drop_routine(routine),
                            Statement::CreateRoutine((*routine).clone()),
                        ],
                    ));
                }
            }
        }
    }
    for (key, routine) in &r {
        if !l.contains_key(key) {
            diffs.push(Difference::new(
                DifferenceKind::RoutineRemoved,
                key.clone(),
                format!("routine {} removed", key),
                vec![drop_routine(routine)],
            ));
        }
    }
}

fn drop_routine(r: &CreateRoutine) -> Statement {
    Statement::Drop(Drop {
        kind: ObjectKind::Routine,
        name: r.name.clone(),
        table: None,
        if_exists: false,
        cascade: false,
    })
}

fn compare_triggers(local: &Schema, remote: &Schema, diffs: &mut Vec<Difference>) {
    let l = local.trigger_map();
    let r = remote.trigger_map();
    for ((table, name), t) in &l {
        let label = table.member(name);
        match r.get(&(table.clone(), name.clone())) {
            None => diffs.push(Difference::new(
                DifferenceKind::TriggerAdded,
                label.clone(),
                format!("trigger {} added", label),
                vec![Statement::CreateTrigger((*t).clone())],
            )),
            Some(rt) => {
                let same = t.timing == rt.timing
                    && t.events == rt.events
                    && t.for_each_row == rt.for_each_row
                    && t.function.qualify() == rt.function.qualify()
                    && match (&t.when, &rt.when) {
                        (None, None) => true,
                        (Some(a), Some(b)) => expr_text(a).eq_ignore_ascii_case(&expr_text(b)),
                        _ => false,
                    };
                if !same {
                    diffs.push(Difference::new(
                        DifferenceKind::TriggerModified,
                        label.clone(),
                        format!("trigger {} redefined", label),
                        vec![drop_trigger(t), Statement::CreateTrigger((*t).clone())],
                    ));
                }
            }
        }
    }
    for ((table, name), t) in &r {
        if !l.contains_key(&(table.clone(), name.clone())) {
            let label = table.member(name);
            diffs.push(
                Difference::new(
                    DifferenceKind::TriggerRemoved,
                    label.clone(),
                    format!("trigger {} removed", label),
                    vec![drop_trigger(t)],
                )
                .dangerous(),
            );
        }
    }
}

fn drop_trigger(t: &CreateTrigger) -> Statement {
    Statement::Drop(Drop {
        kind: ObjectKind::Trigger,
        name: Name::unqualified(&t.name),
        table: Some(t.table.clone()),
        if_exists: false,
        cascade: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::parse_sql;

    fn schema_of(sql: &str) -> Schema {
        Schema::new(parse_sql(sql).unwrap()).unwrap()
    }

    #[test]
    fn added_and_removed_types() {
        let local = schema_of("CREATE TYPE a AS ENUM ('x')");
        let remote = schema_of("CREATE TYPE b AS ENUM ('y')");
        let diffs = compare(&local, &remote);
        assert_eq!(diffs.len(), 2);
        assert_eq!(diffs[0].kind, DifferenceKind::TypeAdded);
        assert_eq!(diffs[1].kind, DifferenceKind::TypeRemoved);
    }

    #[test]
    fn enum_addition_is_anchored() {
        let local = schema_of("CREATE TYPE s AS ENUM ('a', 'b', 'c')");
        let remote = schema_of("CREATE TYPE s AS ENUM ('a', 'c')");
        let diffs = compare(&local, &remote);
        assert_eq!(diffs.len(), 1);
        match &diffs[0].statements[0] {
            Statement::AlterType(at) => match &at.op {
                AlterTypeOp::AddValue { value, placement } => {
                    assert_eq!(value, "b");
                    assert_eq!(placement, &Some(ValuePlacement::After("a".to_string())));
                }
                other => panic!("unexpected op {:?}", other),
            },
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn enum_removal_is_dangerous() {
        let local = schema_of("CREATE TYPE s AS ENUM ('a')");
        let remote = schema_of("CREATE TYPE s AS ENUM ('a', 'b')");
        let diffs = compare(&local, &remote);
        assert_eq!(diffs.len(), 1);
        assert!(diffs[0].dangerous);
    }

    #[test]
    fn identical_schemas_produce_no_diffs() {
        let sql = "CREATE TYPE s AS ENUM ('a');
                   CREATE TABLE t (id INT PRIMARY KEY, v s NOT NULL);
                   CREATE VIEW w AS SELECT id FROM t;";
        let diffs = compare(&schema_of(sql), &schema_of(sql));
        assert!(diffs.is_empty(), "unexpected diffs: {:?}", diffs);
    }

    #[test]
    fn routine_body_change_is_replaced() {
        let local = schema_of(
            "CREATE FUNCTION f(x INT) RETURNS INT LANGUAGE SQL AS $$ SELECT x + 1 $$",
        );
        let remote = schema_of(
            "CREATE FUNCTION f(x INT) RETURNS INT LANGUAGE SQL AS $$ SELECT x + 2 $$",
        );
        let diffs = compare(&local, &remote);
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].kind, DifferenceKind::RoutineModified);
        assert_eq!(diffs[0].statements.len(), 2);
        assert!(matches!(diffs[0].statements[0], Statement::Drop(_)));
    }

    #[test]
    fn overloads_are_distinct() {
        let local = schema_of(
            "CREATE FUNCTION f(x INT) RETURNS INT LANGUAGE SQL AS $$ SELECT x $$;
             CREATE FUNCTION f(x STRING) RETURNS STRING LANGUAGE SQL AS $$ SELECT x $$;",
        );
        let remote = schema_of(
            "CREATE FUNCTION f(x INT) RETURNS INT LANGUAGE SQL AS $$ SELECT x $$",
        );
        let diffs = compare(&local, &remote);
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].kind, DifferenceKind::RoutineAdded);
    }
}

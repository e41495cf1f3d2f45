//! Structural comparison of two table definitions.
//!
//! Columns, constraints, indexes and storage parameters are compared as
//! typed sub-entities, each by name. Every change becomes its own
//! `Difference` so the classifier and generator can reason about them
//! individually.

use super::{Difference, DifferenceKind};
use crate::sql::normalize::{expr_eq, expr_text, type_size_params};
use crate::sql::*;
use std::collections::{BTreeMap, BTreeSet};

pub fn compare_tables(
    name: &QualifiedName,
    local: &CreateTable,
    remote: &CreateTable,
) -> Vec<Difference> {
    let mut diffs = Vec::new();
    let rebuilt = compare_columns(name, local, remote, &mut diffs);
    compare_primary_key(name, local, remote, &mut diffs);
    compare_indexes(name, local, remote, &rebuilt, &mut diffs);
    compare_unique_constraints(name, local, remote, &mut diffs);
    compare_fk_and_check(name, local, remote, &mut diffs);
    compare_storage_params(name, local, remote, &mut diffs);
    diffs
}

fn alter(table: &Name, op: AlterTableOp) -> Statement {
    Statement::AlterTable(AlterTable {
        name: table.clone(),
        op,
    })
}

/// Column diffing. Returns the names of indexes that were dropped and
/// recreated as part of a type change, so the index pass can skip them.
fn compare_columns(
    name: &QualifiedName,
    local: &CreateTable,
    remote: &CreateTable,
    diffs: &mut Vec<Difference>,
) -> BTreeSet<String> {
    let l: BTreeMap<&str, &ColumnDef> =
        local.columns.iter().map(|c| (c.name.as_str(), c)).collect();
    let r: BTreeMap<&str, &ColumnDef> = remote
        .columns
        .iter()
        .map(|c| (c.name.as_str(), c))
        .collect();
    let mut rebuilt_indexes = BTreeSet::new();

    for (col_name, lc) in &l {
        let Some(rc) = r.get(col_name) else {
            diffs.push(Difference::new(
                DifferenceKind::TableModified,
                name.member(col_name),
                format!("table {}: column {} added", name, col_name),
                vec![alter(&local.name, AlterTableOp::AddColumn((*lc).clone()))],
            ));
            continue;
        };

        let computed_changed = match (&lc.computed, &rc.computed) {
            (None, None) => false,
            (Some(a), Some(b)) => {
                a.stored != b.stored
                    || !expr_text(&a.expr).eq_ignore_ascii_case(&expr_text(&b.expr))
            }
            _ => true,
        };
        if computed_changed {
            // computed <-> plain transitions cannot be altered in place
            diffs.push(
                Difference::new(
                    DifferenceKind::TableColumnModified,
                    name.member(col_name),
                    format!(
                        "table {}: column {} computed expression changed, requiring drop and re-add",
                        name, col_name
                    ),
                    vec![
                        alter(&local.name, AlterTableOp::DropColumn(col_name.to_string())),
                        alter(&local.name, AlterTableOp::AddColumn((*lc).clone())),
                    ],
                )
                .dangerous(),
            );
            continue;
        }

        let ltype = lc.data_type.to_string();
        let rtype = rc.data_type.to_string();
        if !ltype.eq_ignore_ascii_case(&rtype) {
            let mut statements = Vec::new();
            let mut dropped = Vec::new();
            if !is_widening(&lc.data_type, &rc.data_type) {
                // the engine refuses to rewrite a column under its
                // indexes; drop them first and rebuild from the local
                // definition afterwards
                for idx in indexes_on_column(remote, col_name) {
                    statements.push(Statement::Drop(Drop {
                        kind: ObjectKind::Index,
                        name: Name::unqualified(&idx),
                        table: Some(remote.name.clone()),
                        if_exists: false,
                        cascade: false,
                    }));
                    dropped.push(idx);
                }
            }
            statements.push(alter(
                &local.name,
                AlterTableOp::AlterColumnType {
                    column: col_name.to_string(),
                    data_type: lc.data_type.clone(),
                    using: None,
                },
            ));
            for idx in &dropped {
                if let Some(def) = local.indexes.iter().find(|i| &i.name == idx) {
                    statements.push(Statement::CreateIndex(CreateIndex {
                        name: def.name.clone(),
                        table: local.name.clone(),
                        if_not_exists: false,
                        index: def.clone(),
                    }));
                }
            }
            rebuilt_indexes.extend(dropped);
            diffs.push(Difference::new(
                DifferenceKind::ColumnTypeChanged,
                name.member(col_name),
                format!(
                    "table {}: column {} type changed from {} to {}",
                    name, col_name, rtype, ltype
                ),
                statements,
            ));
        }

        if lc.not_null != rc.not_null {
            let op = if lc.not_null {
                AlterTableOp::SetNotNull(col_name.to_string())
            } else {
                AlterTableOp::DropNotNull(col_name.to_string())
            };
            diffs.push(Difference::new(
                DifferenceKind::TableColumnModified,
                name.member(col_name),
                format!(
                    "table {}: column {} {}",
                    name,
                    col_name,
                    if lc.not_null {
                        "became NOT NULL"
                    } else {
                        "became nullable"
                    }
                ),
                vec![alter(&local.name, op)],
            ));
        }

        if !expr_eq(lc.default.as_ref(), rc.default.as_ref()) {
            let op = match &lc.default {
                Some(d) => AlterTableOp::SetDefault(col_name.to_string(), d.clone()),
                None => AlterTableOp::DropDefault(col_name.to_string()),
            };
            diffs.push(Difference::new(
                DifferenceKind::TableColumnModified,
                name.member(col_name),
                format!("table {}: column {} default changed", name, col_name),
                vec![alter(&local.name, op)],
            ));
        }

        if lc.not_visible != rc.not_visible {
            let op = if lc.not_visible {
                AlterTableOp::SetNotVisible(col_name.to_string())
            } else {
                AlterTableOp::SetVisible(col_name.to_string())
            };
            diffs.push(Difference::new(
                DifferenceKind::TableColumnModified,
                name.member(col_name),
                format!("table {}: column {} visibility changed", name, col_name),
                vec![alter(&local.name, op)],
            ));
        }
    }

    for (col_name, _) in &r {
        if !l.contains_key(col_name) {
            diffs.push(
                Difference::new(
                    DifferenceKind::TableModified,
                    name.member(col_name),
                    format!("table {}: column {} removed", name, col_name),
                    vec![alter(
                        &local.name,
                        AlterTableOp::DropColumn(col_name.to_string()),
                    )],
                )
                .dangerous(),
            );
        }
    }

    rebuilt_indexes
}

/// A type change is widening when the base type matches and every size
/// parameter grew or stayed equal (VARCHAR(100)->VARCHAR(200), INT4->INT8,
/// DECIMAL(10,2)->DECIMAL(15,4)). Widening changes need no index rebuild.
fn is_widening(local: &sqlparser::ast::DataType, remote: &sqlparser::ast::DataType) -> bool {
    let lbase = base_type(local);
    let rbase = base_type(remote);
    let lp = type_size_params(local);
    let rp = type_size_params(remote);
    if lbase != rbase {
        // the integer family widens across names (INT4 -> INT8)
        let int_widening = !lp.is_empty()
            && lp.len() == rp.len()
            && is_integer(&lbase)
            && is_integer(&rbase)
            && lp.iter().zip(&rp).all(|(a, b)| a >= b);
        return int_widening;
    }
    // dropping the bound entirely (VARCHAR(100) -> VARCHAR) widens
    if lp.is_empty() && !rp.is_empty() {
        return true;
    }
    if lp.len() != rp.len() {
        return false;
    }
    lp.iter().zip(&rp).all(|(a, b)| a >= b)
}

fn base_type(dt: &sqlparser::ast::DataType) -> String {
    let text = dt.to_string().to_uppercase();
    text.split('(').next().unwrap_or_default().trim().to_string()
}

fn is_integer(base: &str) -> bool {
    matches!(
        base,
        "INT" | "INT2" | "INT4" | "INT8" | "SMALLINT" | "INTEGER" | "BIGINT"
    )
}

/// Indexes on the remote table whose key or stored columns involve the
/// column, by name. The primary key is excluded; it cannot be dropped
/// out from underneath the table.
fn indexes_on_column(table: &CreateTable, column: &str) -> Vec<String> {
    let mut out = Vec::new();
    for idx in &table.indexes {
        let in_key = idx
            .columns
            .iter()
            .any(|c| c.column_name().as_deref() == Some(column));
        let in_storing = idx.storing.iter().any(|s| s == column);
        if in_key || in_storing {
            out.push(idx.name.clone());
        }
    }
    out
}

fn compare_primary_key(
    name: &QualifiedName,
    local: &CreateTable,
    remote: &CreateTable,
    diffs: &mut Vec<Difference>,
) {
    let key_of = |t: &CreateTable| {
        t.constraints.iter().find_map(|c| match c {
            TableConstraint::PrimaryKey { columns, .. } => {
                Some(fmt_key(columns))
            }
            _ => None,
        })
    };
    let lk = key_of(local);
    let rk = key_of(remote);
    if lk == rk {
        return;
    }
    // the engine always keeps a primary key; nothing to emit when the
    // local definition relies on the implicit rowid
    if lk.is_none() {
        return;
    }
    let columns = local
        .constraints
        .iter()
        .find_map(|c| match c {
            TableConstraint::PrimaryKey { columns, .. } => Some(columns.clone()),
            _ => None,
        })
        .unwrap_or_default();
    diffs.push(Difference::new(
        DifferenceKind::TableModified,
        name.to_string(),
        format!("table {}: primary key changed", name),
        vec![alter(&local.name, AlterTableOp::AlterPrimaryKey(columns))],
    ));
}

fn fmt_key(columns: &[IndexColumn]) -> String {
    columns
        .iter()
        .map(|c| {
            format!(
                "{}{}",
                expr_text(&c.expr).to_lowercase(),
                if c.descending { " desc" } else { "" }
            )
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn index_equal(a: &IndexDef, b: &IndexDef) -> bool {
    a.unique == b.unique
        && fmt_key(&a.columns) == fmt_key(&b.columns)
        && a.storing == b.storing
        && match (&a.predicate, &b.predicate) {
            (None, None) => true,
            (Some(x), Some(y)) => expr_text(x).eq_ignore_ascii_case(&expr_text(y)),
            _ => false,
        }
}

fn compare_indexes(
    name: &QualifiedName,
    local: &CreateTable,
    remote: &CreateTable,
    rebuilt: &BTreeSet<String>,
    diffs: &mut Vec<Difference>,
) {
    let l: BTreeMap<&str, &IndexDef> = local
        .indexes
        .iter()
        .map(|i| (i.name.as_str(), i))
        .collect();
    let r: BTreeMap<&str, &IndexDef> = remote
        .indexes
        .iter()
        .map(|i| (i.name.as_str(), i))
        .collect();

    for (idx_name, li) in &l {
        if rebuilt.contains(*idx_name) {
            continue;
        }
        let create = Statement::CreateIndex(CreateIndex {
            name: (*idx_name).to_string(),
            table: local.name.clone(),
            if_not_exists: false,
            index: (*li).clone(),
        });
        match r.get(idx_name) {
            None => diffs.push(Difference::new(
                DifferenceKind::TableModified,
                name.member(idx_name),
                format!("table {}: index {} added", name, idx_name),
                vec![create],
            )),
            Some(ri) => {
                if !index_equal(li, ri) {
                    // a key-set change requires a rebuild
                    diffs.push(Difference::new(
                        DifferenceKind::TableModified,
                        name.member(idx_name),
                        format!("table {}: index {} changed", name, idx_name),
                        vec![
                            Statement::Drop(Drop {
                                kind: ObjectKind::Index,
                                name: Name::unqualified(idx_name),
                                table: Some(remote.name.clone()),
                                if_exists: false,
                                cascade: false,
                            }),
                            create,
                        ],
                    ));
                }
            }
        }
    }
    for (idx_name, _) in &r {
        if !l.contains_key(idx_name) && !rebuilt.contains(*idx_name) {
            diffs.push(Difference::new(
                DifferenceKind::TableModified,
                name.member(idx_name),
                format!("table {}: index {} removed", name, idx_name),
                vec![Statement::Drop(Drop {
                    kind: ObjectKind::Index,
                    name: Name::unqualified(idx_name),
                    table: Some(remote.name.clone()),
                    if_exists: false,
                    cascade: false,
                })],
            ));
        }
    }
}

fn compare_unique_constraints(
    name: &QualifiedName,
    local: &CreateTable,
    remote: &CreateTable,
    diffs: &mut Vec<Difference>,
) {
    let pick = |t: &'_ CreateTable| -> BTreeMap<String, Vec<IndexColumn>> {
        t.constraints
            .iter()
            .filter_map(|c| match c {
                TableConstraint::Unique {
                    name: Some(n),
                    columns,
                } => Some((n.clone(), columns.clone())),
                _ => None,
            })
            .collect()
    };
    let l = pick(local);
    let r = pick(remote);

    for (cname, columns) in &l {
        let add = alter(
            &local.name,
            AlterTableOp::AddConstraint(TableConstraint::Unique {
                name: Some(cname.clone()),
                columns: columns.clone(),
            }),
        );
        match r.get(cname) {
            None => diffs.push(Difference::new(
                DifferenceKind::TableModified,
                name.member(cname),
                format!("table {}: unique constraint {} added", name, cname),
                vec![add],
            )),
            Some(rc) => {
                if fmt_key(columns) != fmt_key(rc) {
                    diffs.push(Difference::new(
                        DifferenceKind::TableModified,
                        name.member(cname),
                        format!("table {}: unique constraint {} changed", name, cname),
                        vec![
                            alter(&local.name, AlterTableOp::DropConstraint(cname.clone())),
                            add,
                        ],
                    ));
                }
            }
        }
    }
    for (cname, _) in &r {
        if !l.contains_key(cname) {
            diffs.push(Difference::new(
                DifferenceKind::TableModified,
                name.member(cname),
                format!("table {}: unique constraint {} removed", name, cname),
                vec![alter(
                    &local.name,
                    AlterTableOp::DropConstraint(cname.clone()),
                )],
            ));
        }
    }
}

#[derive(PartialEq)]
enum FkOrCheck {
    Fk {
        columns: Vec<String>,
        foreign_table: QualifiedName,
        referred: Vec<String>,
        on_delete: Option<ReferentialAction>,
        on_update: Option<ReferentialAction>,
    },
    Check {
        expr: String,
    },
}

fn compare_fk_and_check(
    name: &QualifiedName,
    local: &CreateTable,
    remote: &CreateTable,
    diffs: &mut Vec<Difference>,
) {
    let pick = |t: &CreateTable| -> BTreeMap<String, (FkOrCheck, TableConstraint)> {
        t.constraints
            .iter()
            .filter_map(|c| match c {
                TableConstraint::ForeignKey {
                    name: Some(n),
                    columns,
                    foreign_table,
                    referred_columns,
                    on_delete,
                    on_update,
                    ..
                } => Some((
                    n.clone(),
                    (
                        FkOrCheck::Fk {
                            columns: columns.clone(),
                            foreign_table: foreign_table.qualify(),
                            referred: referred_columns.clone(),
                            on_delete: *on_delete,
                            on_update: *on_update,
                        },
                        c.clone(),
                    ),
                )),
                TableConstraint::Check {
                    name: Some(n),
                    expr,
                    ..
                } => Some((
                    n.clone(),
                    (
                        FkOrCheck::Check {
                            expr: expr_text(expr).to_lowercase(),
                        },
                        c.clone(),
                    ),
                )),
                _ => None,
            })
            .collect()
    };
    let l = pick(local);
    let r = pick(remote);

    for (cname, (shape, constraint)) in &l {
        let add = alter(
            &local.name,
            AlterTableOp::AddConstraint(constraint.clone()),
        );
        match r.get(cname) {
            None => diffs.push(Difference::new(
                DifferenceKind::TableModified,
                name.member(cname),
                format!("table {}: constraint {} added", name, cname),
                vec![add],
            )),
            Some((rshape, _)) => {
                if shape != rshape {
                    diffs.push(Difference::new(
                        DifferenceKind::TableModified,
                        name.member(cname),
                        format!("table {}: constraint {} changed", name, cname),
                        vec![
                            alter(&local.name, AlterTableOp::DropConstraint(cname.clone())),
                            add,
                        ],
                    ));
                }
            }
        }
    }
    for (cname, _) in &r {
        if !l.contains_key(cname) {
            diffs.push(Difference::new(
                DifferenceKind::TableModified,
                name.member(cname),
                format!("table {}: constraint {} removed", name, cname),
                vec![alter(
                    &local.name,
                    AlterTableOp::DropConstraint(cname.clone()),
                )],
            ));
        }
    }
}

fn compare_storage_params(
    name: &QualifiedName,
    local: &CreateTable,
    remote: &CreateTable,
    diffs: &mut Vec<Difference>,
) {
    let l: BTreeMap<&str, &str> = local
        .storage_params
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    let r: BTreeMap<&str, &str> = remote
        .storage_params
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();

    let changed: Vec<(String, String)> = l
        .iter()
        .filter(|(k, v)| r.get(*k) != Some(v))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let removed: Vec<String> = r
        .keys()
        .filter(|k| !l.contains_key(*k))
        .map(|k| k.to_string())
        .collect();

    if !changed.is_empty() {
        diffs.push(Difference::new(
            DifferenceKind::TableModified,
            name.to_string(),
            format!(
                "table {}: storage parameters changed ({})",
                name,
                changed
                    .iter()
                    .map(|(k, _)| k.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            vec![alter(&local.name, AlterTableOp::SetStorageParams(changed))],
        ));
    }
    if !removed.is_empty() {
        diffs.push(Difference::new(
            DifferenceKind::TableModified,
            name.to_string(),
            format!(
                "table {}: storage parameters removed ({})",
                name,
                removed.join(", ")
            ),
            vec![alter(
                &local.name,
                AlterTableOp::ResetStorageParams(removed),
            )],
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;
    use crate::sql::parse_sql;

    fn table_of(sql: &str) -> CreateTable {
        let schema = Schema::new(parse_sql(sql).unwrap()).unwrap();
        schema.tables.into_iter().next().unwrap()
    }

    fn diff_tables(local: &str, remote: &str) -> Vec<Difference> {
        let l = table_of(local);
        let r = table_of(remote);
        compare_tables(&l.name.qualify(), &l, &r)
    }

    #[test]
    fn added_column_yields_add_column() {
        let diffs = diff_tables(
            "CREATE TABLE users (id INT PRIMARY KEY, name TEXT NOT NULL)",
            "CREATE TABLE users (id INT PRIMARY KEY)",
        );
        assert_eq!(diffs.len(), 1);
        assert_eq!(
            diffs[0].statements[0].to_string(),
            "ALTER TABLE users ADD COLUMN name TEXT NOT NULL"
        );
    }

    #[test]
    fn dropped_column_is_dangerous() {
        let diffs = diff_tables(
            "CREATE TABLE users (id INT PRIMARY KEY)",
            "CREATE TABLE users (id INT PRIMARY KEY, name TEXT)",
        );
        assert_eq!(diffs.len(), 1);
        assert!(diffs[0].dangerous);
    }

    #[test]
    fn narrowing_rebuilds_dependent_index() {
        let diffs = diff_tables(
            "CREATE TABLE users (id INT PRIMARY KEY, email VARCHAR(100), INDEX email_idx (email))",
            "CREATE TABLE users (id INT PRIMARY KEY, email VARCHAR(200), INDEX email_idx (email))",
        );
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].kind, DifferenceKind::ColumnTypeChanged);
        let texts: Vec<String> = diffs[0].statements.iter().map(|s| s.to_string()).collect();
        assert_eq!(texts.len(), 3);
        assert!(texts[0].starts_with("DROP INDEX"));
        assert!(texts[1].contains("SET DATA TYPE VARCHAR(100)"));
        assert!(texts[2].starts_with("CREATE INDEX email_idx"));
    }

    #[test]
    fn widening_skips_index_rebuild() {
        let diffs = diff_tables(
            "CREATE TABLE users (id INT PRIMARY KEY, email VARCHAR(200), INDEX email_idx (email))",
            "CREATE TABLE users (id INT PRIMARY KEY, email VARCHAR(100), INDEX email_idx (email))",
        );
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].statements.len(), 1);
        assert!(diffs[0].statements[0]
            .to_string()
            .contains("SET DATA TYPE VARCHAR(200)"));
    }

    #[test]
    fn int_widening_is_in_place() {
        let diffs = diff_tables(
            "CREATE TABLE t (a INT8)",
            "CREATE TABLE t (a INT4)",
        );
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].statements.len(), 1);
    }

    #[test]
    fn computed_transition_drops_and_readds() {
        let diffs = diff_tables(
            "CREATE TABLE t (a INT, b INT AS (a + 1) STORED)",
            "CREATE TABLE t (a INT, b INT)",
        );
        assert_eq!(diffs.len(), 1);
        assert!(diffs[0].dangerous);
        let texts: Vec<String> = diffs[0].statements.iter().map(|s| s.to_string()).collect();
        assert!(texts[0].contains("DROP COLUMN b"));
        assert!(texts[1].contains("ADD COLUMN b INT AS (a + 1) STORED"));
    }

    #[test]
    fn index_key_change_rebuilds() {
        let diffs = diff_tables(
            "CREATE TABLE t (a INT, b INT, INDEX i (a, b))",
            "CREATE TABLE t (a INT, b INT, INDEX i (a))",
        );
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].statements.len(), 2);
        assert!(matches!(diffs[0].statements[0], Statement::Drop(_)));
    }

    #[test]
    fn ttl_param_change_is_textual() {
        let diffs = diff_tables(
            "CREATE TABLE t (a INT) WITH (ttl_expire_after = '30 days')",
            "CREATE TABLE t (a INT) WITH (ttl_expire_after = '60 days')",
        );
        assert_eq!(diffs.len(), 1);
        assert!(diffs[0].statements[0].to_string().contains("SET (ttl_expire_after"));
    }
}

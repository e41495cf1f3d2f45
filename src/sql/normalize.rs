//! Post-parse normalization.
//!
//! Anonymous constraints get the names the engine would assign, so object
//! identity is stable before the canonicalizer has a chance to run, and
//! expression text is normalized for comparison.

use super::ast::*;
use sqlparser::ast::Expr;

/// Names every anonymous constraint and index on the table. Mirrors the
/// engine's naming where it is predictable; the foreign-key form
/// (`fk_<firstcol>`) is our own fixed choice so diffs stay stable without
/// a round-trip.
pub fn name_table_constraints(table: &mut CreateTable) {
    let table_name = table.name.name.clone();
    for constraint in &mut table.constraints {
        match constraint {
            TableConstraint::PrimaryKey { name, .. } => {
                if name.is_none() {
                    *name = Some(format!("{}_pkey", table_name));
                }
            }
            TableConstraint::Unique { name, columns } => {
                if name.is_none() {
                    let cols: Vec<String> = columns
                        .iter()
                        .filter_map(|c| c.column_name())
                        .collect();
                    *name = Some(format!("{}_{}_key", table_name, cols.join("_")));
                }
            }
            TableConstraint::ForeignKey { name, columns, .. } => {
                if name.is_none() {
                    *name = Some(format!(
                        "fk_{}",
                        columns.first().map(String::as_str).unwrap_or("ref")
                    ));
                }
            }
            TableConstraint::Check { name, expr, .. } => {
                if name.is_none() {
                    let col = first_identifier(expr).unwrap_or_else(|| "expr".to_string());
                    *name = Some(format!("check_{}", col));
                }
            }
        }
    }
}

/// Normalized textual form of an expression, used wherever the differ
/// compares expressions.
pub fn expr_text(expr: &Expr) -> String {
    super::collapse_whitespace(&expr.to_string())
}

/// Case-insensitive normalized comparison of two optional expressions.
pub fn expr_eq(a: Option<&Expr>, b: Option<&Expr>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => expr_text(a).eq_ignore_ascii_case(&expr_text(b)),
        _ => false,
    }
}

fn first_identifier(expr: &Expr) -> Option<String> {
    let mut found = None;
    walk_expr(expr, &mut |e| {
        if found.is_none() {
            match e {
                Expr::Identifier(id) => found = Some(id.value.clone()),
                Expr::CompoundIdentifier(parts) => {
                    found = parts.last().map(|p| p.value.clone())
                }
                _ => {}
            }
        }
    });
    found
}

/// Depth-first walk over the expression forms the differ and the
/// dependency extractor care about. Unknown node kinds terminate the walk
/// at that node.
pub fn walk_expr(expr: &Expr, visit: &mut dyn FnMut(&Expr)) {
    visit(expr);
    match expr {
        Expr::BinaryOp { left, right, .. } => {
            walk_expr(left, visit);
            walk_expr(right, visit);
        }
        Expr::UnaryOp { expr, .. } => walk_expr(expr, visit),
        Expr::Nested(inner) => walk_expr(inner, visit),
        Expr::Cast { expr, .. } => walk_expr(expr, visit),
        Expr::IsNull(inner)
        | Expr::IsNotNull(inner)
        | Expr::IsTrue(inner)
        | Expr::IsNotTrue(inner)
        | Expr::IsFalse(inner)
        | Expr::IsNotFalse(inner) => walk_expr(inner, visit),
        Expr::InList { expr, list, .. } => {
            walk_expr(expr, visit);
            for e in list {
                walk_expr(e, visit);
            }
        }
        Expr::Between {
            expr, low, high, ..
        } => {
            walk_expr(expr, visit);
            walk_expr(low, visit);
            walk_expr(high, visit);
        }
        Expr::Like { expr, pattern, .. } | Expr::ILike { expr, pattern, .. } => {
            walk_expr(expr, visit);
            walk_expr(pattern, visit);
        }
        Expr::Case {
            operand,
            conditions,
            results,
            else_result,
        } => {
            if let Some(op) = operand {
                walk_expr(op, visit);
            }
            for c in conditions {
                walk_expr(c, visit);
            }
            for r in results {
                walk_expr(r, visit);
            }
            if let Some(e) = else_result {
                walk_expr(e, visit);
            }
        }
        Expr::Function(f) => {
            if let sqlparser::ast::FunctionArguments::List(list) = &f.args {
                for arg in &list.args {
                    if let sqlparser::ast::FunctionArg::Unnamed(
                        sqlparser::ast::FunctionArgExpr::Expr(e),
                    ) = arg
                    {
                        walk_expr(e, visit);
                    }
                }
            }
        }
        Expr::Array(arr) => {
            for e in &arr.elem {
                walk_expr(e, visit);
            }
        }
        Expr::Tuple(items) => {
            for e in items {
                walk_expr(e, visit);
            }
        }
        _ => {}
    }
}

/// Numeric size parameters of a rendered data type, used for the
/// narrowing/widening decision on `ALTER COLUMN TYPE`. Works on the
/// rendered text so it covers every parameterized type uniformly.
pub fn type_size_params(data_type: &sqlparser::ast::DataType) -> Vec<i64> {
    let text = data_type.to_string();
    let Some(open) = text.find('(') else {
        return integer_width(&text).map(|w| vec![w]).unwrap_or_default();
    };
    let inner = text[open + 1..].trim_end_matches(')');
    inner
        .split(',')
        .filter_map(|p| p.trim().parse::<i64>().ok())
        .collect()
}

/// Byte width of the integer types, so INT4→INT8 counts as widening.
fn integer_width(text: &str) -> Option<i64> {
    match text.to_uppercase().as_str() {
        "INT2" | "SMALLINT" => Some(2),
        "INT4" | "INT" | "INTEGER" => Some(4),
        "INT8" | "BIGINT" => Some(8),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::{parse_expression, parse_sql};

    #[test]
    fn anonymous_constraints_get_engine_names() {
        let stmts = parse_sql(
            "CREATE TABLE users (id INT PRIMARY KEY, email TEXT UNIQUE, owner INT REFERENCES owners (id), CHECK (id > 0))",
        )
        .unwrap();
        let mut table = match stmts.into_iter().next().unwrap() {
            crate::sql::Statement::CreateTable(t) => t,
            _ => unreachable!(),
        };
        name_table_constraints(&mut table);
        let names: Vec<&str> = table
            .constraints
            .iter()
            .filter_map(|c| c.name())
            .collect();
        assert!(names.contains(&"users_pkey"));
        assert!(names.contains(&"users_email_key"));
        assert!(names.contains(&"fk_owner"));
        assert!(names.contains(&"check_id"));
    }

    #[test]
    fn size_params_from_rendered_type() {
        let e = parse_expression("CAST(x AS VARCHAR(100))").unwrap();
        match e {
            sqlparser::ast::Expr::Cast { data_type, .. } => {
                assert_eq!(type_size_params(&data_type), vec![100]);
            }
            _ => unreachable!(),
        }
    }
}

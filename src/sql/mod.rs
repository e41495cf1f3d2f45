//! SQL front end: parsing, typed DDL nodes, statement splitting and
//! rendering.

pub mod ast;
pub mod normalize;
pub mod parser;
mod split;

pub use ast::*;
pub use parser::{parse_expression, parse_sql, parse_statement, ParseError};
pub use split::split_statements;

/// Renders statements the way migration files are written: one statement
/// per paragraph, `;` terminated.
pub fn render_statements(stmts: &[Statement]) -> String {
    let rendered: Vec<String> = stmts.iter().map(|s| s.to_string()).collect();
    let mut out = rendered.join(";\n\n");
    if !out.is_empty() {
        out.push(';');
    }
    out
}

/// Renders statements as a single whitespace-collapsed line, the form
/// checkpoint bodies use.
pub fn render_single_line(stmts: &[Statement]) -> String {
    stmts
        .iter()
        .map(|s| format!("{};", collapse_whitespace(&s.to_string())))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Collapses every run of whitespace to a single space.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_joins_with_blank_lines() {
        let stmts = parse_sql("CREATE SCHEMA app; CREATE SCHEMA ops").unwrap();
        let out = render_statements(&stmts);
        assert_eq!(out, "CREATE SCHEMA app;\n\nCREATE SCHEMA ops;");
    }

    #[test]
    fn single_line_collapses_table_bodies() {
        let stmts = parse_sql("CREATE TABLE t (a INT, b INT)").unwrap();
        let out = render_single_line(&stmts);
        assert!(!out.contains('\n'));
        assert!(out.ends_with(';'));
    }
}

//! Schema lint rules.
//!
//! Three rules ship today: foreign keys without a covering index,
//! unique constraints over nullable columns, and row-level TTL
//! expressions whose column has no index. Suppressions are comment
//! directives in the header region of a definition file:
//!
//! ```text
//! -- scurry:lint-disable=<rule>[:<table>[.<constraint>]]
//! ```

use crate::schema::Schema;
use crate::sql::{CreateTable, IndexColumn, TableConstraint};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

pub const RULE_FK_COVERING_INDEX: &str = "fk-covering-index";
pub const RULE_NULLABLE_UNIQUE: &str = "nullable-unique";
pub const RULE_TTL_INDEX: &str = "ttl-index";

#[derive(Clone, Debug, PartialEq)]
pub struct LintIssue {
    pub rule: &'static str,
    pub table: String,
    pub constraint: Option<String>,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Suppression {
    pub rule: String,
    pub table: Option<String>,
    pub constraint: Option<String>,
}

impl Suppression {
    fn matches(&self, issue: &LintIssue) -> bool {
        if self.rule != issue.rule {
            return false;
        }
        match &self.table {
            None => true,
            Some(table) => {
                // suppressions use bare or qualified table names
                let issue_table_matches = issue.table == *table
                    || issue.table.ends_with(&format!(".{}", table));
                if !issue_table_matches {
                    return false;
                }
                match &self.constraint {
                    None => true,
                    Some(c) => issue.constraint.as_deref() == Some(c.as_str()),
                }
            }
        }
    }
}

fn suppression_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"--\s*scurry:lint-disable=([a-z-]+)(?::([A-Za-z0-9_.]+?)(?:\.([A-Za-z0-9_]+))?)?\s*$")
            .expect("valid regex")
    })
}

/// Scans the header region (leading comment lines) of a definition file
/// for lint-disable directives.
pub fn parse_suppressions(file_text: &str) -> Vec<Suppression> {
    let mut out = Vec::new();
    for line in file_text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !trimmed.starts_with("--") {
            break;
        }
        if let Some(caps) = suppression_re().captures(trimmed) {
            out.push(Suppression {
                rule: caps[1].to_string(),
                table: caps.get(2).map(|m| m.as_str().to_string()),
                constraint: caps.get(3).map(|m| m.as_str().to_string()),
            });
        }
    }
    out
}

/// Runs every rule over the schema, dropping suppressed issues.
pub fn lint_schema(schema: &Schema, suppressions: &[Suppression]) -> Vec<LintIssue> {
    let mut issues = Vec::new();
    for table in &schema.tables {
        check_fk_covering_index(table, &mut issues);
        check_nullable_unique(table, &mut issues);
        check_ttl_index(table, &mut issues);
    }
    issues.retain(|issue| !suppressions.iter().any(|s| s.matches(issue)));
    issues
}

/// Every prefix of every non-partial index, unique constraint and
/// primary key counts as covered.
pub fn covered_prefixes(table: &CreateTable) -> BTreeSet<Vec<String>> {
    let mut prefixes = BTreeSet::new();
    let mut add_key = |columns: &[IndexColumn]| {
        let names: Vec<String> = columns.iter().filter_map(|c| c.column_name()).collect();
        if names.len() != columns.len() {
            // expression keys do not cover column lookups
            return;
        }
        for n in 1..=names.len() {
            prefixes.insert(names[..n].to_vec());
        }
    };
    for c in &table.constraints {
        match c {
            TableConstraint::PrimaryKey { columns, .. }
            | TableConstraint::Unique { columns, .. } => add_key(columns),
            _ => {}
        }
    }
    for i in &table.indexes {
        if i.predicate.is_none() {
            add_key(&i.columns);
        }
    }
    prefixes
}

fn check_fk_covering_index(table: &CreateTable, issues: &mut Vec<LintIssue>) {
    let covered = covered_prefixes(table);
    let qualified = table.name.qualify().to_string();
    for c in &table.constraints {
        if let TableConstraint::ForeignKey { name, columns, .. } = c {
            if !covered.contains(columns) {
                issues.push(LintIssue {
                    rule: RULE_FK_COVERING_INDEX,
                    table: qualified.clone(),
                    constraint: name.clone(),
                    message: format!(
                        "foreign key {} on {} ({}) has no covering index; deletes on the referenced table will scan",
                        name.as_deref().unwrap_or("(unnamed)"),
                        qualified,
                        columns.join(", ")
                    ),
                });
            }
        }
    }
}

fn check_nullable_unique(table: &CreateTable, issues: &mut Vec<LintIssue>) {
    let qualified = table.name.qualify().to_string();
    let nullable: BTreeSet<&str> = table
        .columns
        .iter()
        .filter(|c| !c.not_null)
        .map(|c| c.name.as_str())
        .collect();

    let mut check_key = |name: Option<&str>, columns: &[IndexColumn]| {
        let offenders: Vec<String> = columns
            .iter()
            .filter_map(|c| c.column_name())
            .filter(|c| nullable.contains(c.as_str()))
            .collect();
        if !offenders.is_empty() {
            issues.push(LintIssue {
                rule: RULE_NULLABLE_UNIQUE,
                table: qualified.clone(),
                constraint: name.map(|s| s.to_string()),
                message: format!(
                    "unique key {} on {} includes nullable column(s) {}; NULLs are always distinct",
                    name.unwrap_or("(unnamed)"),
                    qualified,
                    offenders.join(", ")
                ),
            });
        }
    };

    for c in &table.constraints {
        if let TableConstraint::Unique { name, columns } = c {
            check_key(name.as_deref(), columns);
        }
    }
    for i in &table.indexes {
        if i.unique {
            check_key(Some(i.name.as_str()), &i.columns);
        }
    }
}

fn check_ttl_index(table: &CreateTable, issues: &mut Vec<LintIssue>) {
    let qualified = table.name.qualify().to_string();
    let Some((_, value)) = table
        .storage_params
        .iter()
        .find(|(k, _)| k == "ttl_expiration_expression")
    else {
        return;
    };
    // the expression references a column; TTL deletion scans need an
    // index over it
    let referenced: Vec<&str> = table
        .columns
        .iter()
        .map(|c| c.name.as_str())
        .filter(|c| value.contains(*c))
        .collect();
    if referenced.is_empty() {
        return;
    }
    let covered = covered_prefixes(table);
    let any_covered = referenced
        .iter()
        .any(|c| covered.contains(&vec![c.to_string()]));
    if !any_covered {
        issues.push(LintIssue {
            rule: RULE_TTL_INDEX,
            table: qualified.clone(),
            constraint: None,
            message: format!(
                "TTL expression on {} references {} with no index; expiration scans will be full-table",
                qualified,
                referenced.join(", ")
            ),
        });
    }
}

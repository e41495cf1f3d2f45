//! Differ coverage for the non-table object classes.

use scurry::diff::{compare, DifferenceKind};
use scurry::schema::Schema;
use scurry::sql::{parse_sql, Statement};

fn schema_of(sql: &str) -> Schema {
    Schema::new(parse_sql(sql).expect("parse")).expect("schema")
}

fn kinds(local: &str, remote: &str) -> Vec<DifferenceKind> {
    compare(&schema_of(local), &schema_of(remote))
        .into_iter()
        .map(|d| d.kind)
        .collect()
}

#[test]
fn schema_addition_and_removal() {
    let ks = kinds("CREATE SCHEMA app", "CREATE SCHEMA ops");
    assert_eq!(
        ks,
        vec![DifferenceKind::SchemaAdded, DifferenceKind::SchemaRemoved]
    );
}

#[test]
fn default_schema_is_never_diffed() {
    assert!(kinds("CREATE SCHEMA public", "").is_empty());
}

#[test]
fn sequence_option_change_is_an_alter() {
    let diffs = compare(
        &schema_of("CREATE SEQUENCE s INCREMENT 2 START 10"),
        &schema_of("CREATE SEQUENCE s INCREMENT 1 START 10"),
    );
    assert_eq!(diffs.len(), 1);
    assert_eq!(diffs[0].kind, DifferenceKind::SequenceModified);
    assert_eq!(
        diffs[0].statements[0].to_string(),
        "ALTER SEQUENCE s INCREMENT 2 START 10"
    );
}

#[test]
fn view_query_change_replaces_the_view() {
    let diffs = compare(
        &schema_of("CREATE TABLE t (a INT, b INT); CREATE VIEW v AS SELECT a FROM t"),
        &schema_of("CREATE TABLE t (a INT, b INT); CREATE VIEW v AS SELECT b FROM t"),
    );
    assert_eq!(diffs.len(), 1);
    assert_eq!(diffs[0].kind, DifferenceKind::ViewModified);
    assert!(matches!(diffs[0].statements[0], Statement::Drop(_)));
    assert!(matches!(diffs[0].statements[1], Statement::CreateView(_)));
}

#[test]
fn view_whitespace_is_not_a_change() {
    let diffs = compare(
        &schema_of("CREATE TABLE t (a INT); CREATE VIEW v AS SELECT   a   FROM t"),
        &schema_of("CREATE TABLE t (a INT); CREATE VIEW v AS SELECT a FROM t"),
    );
    assert!(diffs.is_empty(), "{:#?}", diffs);
}

#[test]
fn materialized_flag_is_structural() {
    let diffs = compare(
        &schema_of("CREATE TABLE t (a INT); CREATE MATERIALIZED VIEW v AS SELECT a FROM t"),
        &schema_of("CREATE TABLE t (a INT); CREATE VIEW v AS SELECT a FROM t"),
    );
    assert_eq!(diffs.len(), 1);
    assert_eq!(diffs[0].kind, DifferenceKind::ViewModified);
}

#[test]
fn trigger_timing_change_replaces_the_trigger() {
    let base = "CREATE TABLE t (a INT);
                CREATE FUNCTION f() RETURNS INT LANGUAGE SQL AS $$ SELECT 1 $$;";
    let diffs = compare(
        &schema_of(&format!(
            "{} CREATE TRIGGER trg BEFORE INSERT ON t FOR EACH ROW EXECUTE FUNCTION f();",
            base
        )),
        &schema_of(&format!(
            "{} CREATE TRIGGER trg AFTER INSERT ON t FOR EACH ROW EXECUTE FUNCTION f();",
            base
        )),
    );
    assert_eq!(diffs.len(), 1);
    assert_eq!(diffs[0].kind, DifferenceKind::TriggerModified);
    let texts: Vec<String> = diffs[0].statements.iter().map(|s| s.to_string()).collect();
    assert_eq!(texts[0], "DROP TRIGGER trg ON t");
    assert!(texts[1].starts_with("CREATE TRIGGER trg BEFORE INSERT ON t"));
}

#[test]
fn trigger_removal_is_dangerous() {
    let base = "CREATE TABLE t (a INT);
                CREATE FUNCTION f() RETURNS INT LANGUAGE SQL AS $$ SELECT 1 $$;";
    let diffs = compare(
        &schema_of(base),
        &schema_of(&format!(
            "{} CREATE TRIGGER trg AFTER DELETE ON t FOR EACH ROW EXECUTE FUNCTION f();",
            base
        )),
    );
    assert_eq!(diffs.len(), 1);
    assert_eq!(diffs[0].kind, DifferenceKind::TriggerRemoved);
    assert!(diffs[0].dangerous);
}

#[test]
fn composite_type_change_is_replacement() {
    let diffs = compare(
        &schema_of("CREATE TYPE pair AS (a INT, b INT)"),
        &schema_of("CREATE TYPE pair AS (a INT)"),
    );
    assert_eq!(diffs.len(), 1);
    assert_eq!(diffs[0].kind, DifferenceKind::TypeModified);
    assert!(matches!(diffs[0].statements[0], Statement::Drop(_)));
    assert!(matches!(diffs[0].statements[1], Statement::CreateType(_)));
}

#[test]
fn enum_addition_at_head_anchors_before() {
    let diffs = compare(
        &schema_of("CREATE TYPE s AS ENUM ('zero', 'one', 'two')"),
        &schema_of("CREATE TYPE s AS ENUM ('one', 'two')"),
    );
    assert_eq!(diffs.len(), 1);
    assert_eq!(
        diffs[0].statements[0].to_string(),
        "ALTER TYPE s ADD VALUE 'zero' BEFORE 'one'"
    );
}

#[test]
fn routine_removal_emits_drop_function() {
    let diffs = compare(
        &Schema::empty(),
        &schema_of("CREATE FUNCTION f(x INT) RETURNS INT LANGUAGE SQL AS $$ SELECT x $$"),
    );
    assert_eq!(diffs.len(), 1);
    assert_eq!(diffs[0].kind, DifferenceKind::RoutineRemoved);
    assert_eq!(diffs[0].statements[0].to_string(), "DROP FUNCTION f");
}

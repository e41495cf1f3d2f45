//! End-to-end tests of the pure migration pipeline:
//! parse -> schema model -> diff -> classify -> generate.

use pretty_assertions::assert_eq;
use scurry::classify::{classify, MigrationMode, TableSize, TableSizes};
use scurry::diff::compare;
use scurry::generate::generate_migration;
use scurry::schema::Schema;
use scurry::sql::parse_sql;

fn schema_of(sql: &str) -> Schema {
    Schema::new(parse_sql(sql).expect("parse")).expect("schema")
}

fn plan(local: &str, remote: &str, sizes: &TableSizes) -> (Vec<String>, MigrationMode, Vec<String>) {
    let local = schema_of(local);
    let remote = schema_of(remote);
    let diffs = compare(&local, &remote);
    let classification = classify(&diffs, sizes);
    let generated =
        generate_migration(&diffs, &remote, classification.mode).expect("generate");
    (
        generated.statements.iter().map(|s| s.to_string()).collect(),
        classification.mode,
        generated.warnings,
    )
}

fn no_sizes() -> TableSizes {
    TableSizes::default()
}

#[test]
fn add_enum_and_use_in_new_column_with_index() {
    let (stmts, mode, _) = plan(
        "CREATE TYPE user_status AS ENUM ('active', 'inactive', 'suspended');
         CREATE TABLE users (
             id INT PRIMARY KEY,
             name TEXT NOT NULL,
             status user_status NOT NULL DEFAULT 'active',
             INDEX status_idx (status)
         );",
        "CREATE TABLE users (id INT PRIMARY KEY, name TEXT NOT NULL);",
        &no_sizes(),
    );

    assert_eq!(stmts.len(), 3, "expected exactly three statements: {:#?}", stmts);
    assert!(stmts[0].starts_with("CREATE TYPE user_status AS ENUM"));
    assert!(stmts[1].starts_with("ALTER TABLE users ADD COLUMN status"));
    assert!(stmts[2].starts_with("CREATE INDEX status_idx ON users (status)"));
    assert_eq!(mode, MigrationMode::Sync);
}

#[test]
fn narrowing_type_change_on_indexed_column() {
    let (stmts, _, _) = plan(
        "CREATE TABLE users (id INT PRIMARY KEY, email VARCHAR(100), INDEX email_idx (email));",
        "CREATE TABLE users (id INT PRIMARY KEY, email VARCHAR(200), INDEX email_idx (email));",
        &no_sizes(),
    );

    let expect = vec![
        "DROP INDEX users@email_idx".to_string(),
        "COMMIT".to_string(),
        "BEGIN".to_string(),
        "ALTER TABLE users ALTER COLUMN email SET DATA TYPE VARCHAR(100)".to_string(),
        "COMMIT".to_string(),
        "BEGIN".to_string(),
        "CREATE INDEX email_idx ON users (email)".to_string(),
    ];
    assert_eq!(stmts, expect);
}

#[test]
fn widening_type_change_is_a_single_alter() {
    for (local_ty, remote_ty) in [
        ("VARCHAR(200)", "VARCHAR(100)"),
        ("INT8", "INT4"),
        ("DECIMAL(15,4)", "DECIMAL(10,2)"),
    ] {
        let (stmts, _, _) = plan(
            &format!(
                "CREATE TABLE users (id INT PRIMARY KEY, v {}, INDEX v_idx (v))",
                local_ty
            ),
            &format!(
                "CREATE TABLE users (id INT PRIMARY KEY, v {}, INDEX v_idx (v))",
                remote_ty
            ),
            &no_sizes(),
        );
        assert_eq!(stmts.len(), 1, "{} -> {}: {:#?}", remote_ty, local_ty, stmts);
        assert!(stmts[0].contains("SET DATA TYPE"));
    }
}

#[test]
fn enum_value_addition_splits_from_check_that_uses_it() {
    let (stmts, _, _) = plan(
        "CREATE TYPE user_status AS ENUM ('active', 'inactive', 'suspended');
         CREATE TABLE users (
             id INT PRIMARY KEY,
             status user_status,
             CONSTRAINT not_suspended CHECK (status != 'suspended'::user_status)
         );",
        "CREATE TYPE user_status AS ENUM ('active', 'inactive');
         CREATE TABLE users (id INT PRIMARY KEY, status user_status);",
        &no_sizes(),
    );

    assert_eq!(stmts.len(), 4, "{:#?}", stmts);
    assert_eq!(
        stmts[0],
        "ALTER TYPE public.user_status ADD VALUE 'suspended' AFTER 'inactive'"
    );
    assert_eq!(stmts[1], "COMMIT");
    assert_eq!(stmts[2], "BEGIN");
    assert!(stmts[3].contains("ADD CONSTRAINT not_suspended CHECK"));
}

#[test]
fn dropping_table_that_uses_enum_drops_table_first() {
    let (stmts, _, warnings) = plan(
        "",
        "CREATE TYPE status AS ENUM ('a', 'b');
         CREATE TABLE users (id INT PRIMARY KEY, s status NOT NULL);",
        &no_sizes(),
    );

    assert_eq!(stmts.len(), 2, "{:#?}", stmts);
    assert_eq!(stmts[0], "DROP TABLE public.users");
    assert_eq!(stmts[1], "DROP TYPE public.status");
    assert!(warnings.iter().any(|w| w.contains("destructive")));
}

#[test]
fn generation_is_deterministic() {
    let local = "CREATE TYPE s AS ENUM ('a');
                 CREATE TABLE beta (id INT PRIMARY KEY, v s, INDEX v_idx (v));
                 CREATE TABLE alpha (id INT PRIMARY KEY, b INT, CONSTRAINT fk_b FOREIGN KEY (b) REFERENCES beta (id));
                 CREATE VIEW both AS SELECT id FROM alpha;";
    let remote = "CREATE TABLE gone (id INT PRIMARY KEY);";

    let (first, _, _) = plan(local, remote, &no_sizes());
    for _ in 0..10 {
        let (again, _, _) = plan(local, remote, &no_sizes());
        assert_eq!(first, again);
    }
}

#[test]
fn async_classification_carries_whole_migration() {
    let mut sizes = TableSizes::default();
    sizes.tables.insert(
        "public.big".to_string(),
        TableSize {
            rows: 2_000_000,
            size_bytes: 0,
        },
    );

    // two changes: one on the big table (async rule), one harmless
    let (stmts, mode, _) = plan(
        "CREATE TABLE big (id INT PRIMARY KEY, a INT, INDEX a_idx (a));
         CREATE TABLE tiny (id INT PRIMARY KEY, b INT);",
        "CREATE TABLE big (id INT PRIMARY KEY, a INT);
         CREATE TABLE tiny (id INT PRIMARY KEY);",
        &sizes,
    );
    assert_eq!(mode, MigrationMode::Async);
    assert!(stmts.iter().any(|s| s.starts_with("CREATE INDEX a_idx")));
    assert!(stmts.iter().any(|s| s.contains("ADD COLUMN b")));
}

#[test]
fn async_constraints_are_added_not_valid_then_validated() {
    let mut sizes = TableSizes::default();
    sizes.tables.insert(
        "public.big".to_string(),
        TableSize {
            rows: 500_000,
            size_bytes: 0,
        },
    );

    let (stmts, mode, _) = plan(
        "CREATE TABLE big (id INT PRIMARY KEY, v INT, CONSTRAINT positive CHECK (v > 0));",
        "CREATE TABLE big (id INT PRIMARY KEY, v INT);",
        &sizes,
    );
    assert_eq!(mode, MigrationMode::Async);
    let add = stmts
        .iter()
        .find(|s| s.contains("ADD CONSTRAINT positive"))
        .expect("add constraint statement");
    assert!(add.ends_with("NOT VALID"), "{}", add);
    assert!(stmts
        .iter()
        .any(|s| s.contains("VALIDATE CONSTRAINT positive")));
}

#[test]
fn mutually_referential_tables_create_then_add_fks() {
    let (stmts, _, _) = plan(
        "CREATE TABLE a (id INT PRIMARY KEY, b_id INT, CONSTRAINT fk_b FOREIGN KEY (b_id) REFERENCES b (id));
         CREATE TABLE b (id INT PRIMARY KEY, a_id INT, CONSTRAINT fk_a FOREIGN KEY (a_id) REFERENCES a (id));",
        "",
        &no_sizes(),
    );
    assert_eq!(stmts.len(), 4, "{:#?}", stmts);
    assert!(stmts[0].starts_with("CREATE TABLE"));
    assert!(stmts[1].starts_with("CREATE TABLE"));
    assert!(stmts[2].contains("ADD CONSTRAINT"));
    assert!(stmts[3].contains("ADD CONSTRAINT"));
}

#[test]
fn routine_and_trigger_order_after_their_dependencies() {
    let (stmts, _, _) = plan(
        "CREATE TABLE audit (id INT PRIMARY KEY, note STRING);
         CREATE FUNCTION log_change() RETURNS INT LANGUAGE SQL AS $$ SELECT 1 $$;
         CREATE TRIGGER on_change AFTER INSERT ON audit FOR EACH ROW EXECUTE FUNCTION log_change();",
        "",
        &no_sizes(),
    );
    let trigger_pos = stmts
        .iter()
        .position(|s| s.starts_with("CREATE TRIGGER"))
        .expect("trigger");
    let table_pos = stmts
        .iter()
        .position(|s| s.starts_with("CREATE TABLE"))
        .expect("table");
    let fn_pos = stmts
        .iter()
        .position(|s| s.starts_with("CREATE FUNCTION"))
        .expect("function");
    assert!(table_pos < trigger_pos);
    assert!(fn_pos < trigger_pos);
}

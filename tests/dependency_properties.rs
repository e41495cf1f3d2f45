//! Dependency-ordering properties: everything a generated statement
//! requires is either already in the remote schema or provided by an
//! earlier statement in the output.

use scurry::classify::{classify, TableSizes};
use scurry::depgraph::statement_deps;
use scurry::diff::compare;
use scurry::generate::generate_migration;
use scurry::schema::Schema;
use scurry::sql::{parse_sql, Statement, DEFAULT_SCHEMA};
use std::collections::BTreeSet;

fn schema_of(sql: &str) -> Schema {
    Schema::new(parse_sql(sql).expect("parse")).expect("schema")
}

fn check_topological_validity(local_sql: &str, remote_sql: &str) {
    let local = schema_of(local_sql);
    let remote = schema_of(remote_sql);
    let diffs = compare(&local, &remote);
    let classification = classify(&diffs, &TableSizes::default());
    let generated = generate_migration(&diffs, &remote, classification.mode).expect("generate");

    let mut known: BTreeSet<String> = BTreeSet::new();
    known.insert(DEFAULT_SCHEMA.to_string());
    for stmt in &remote.statements {
        known.extend(statement_deps(stmt).provides);
    }

    for stmt in &generated.statements {
        if matches!(stmt, Statement::Begin | Statement::Commit | Statement::Drop(_)) {
            continue;
        }
        let deps = statement_deps(stmt);
        for r in &deps.requires {
            assert!(
                known.contains(r),
                "statement `{}` requires `{}` before it is available;\nfull plan: {:#?}",
                stmt,
                r,
                generated
                    .statements
                    .iter()
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>()
            );
        }
        known.extend(deps.provides);
    }
}

#[test]
fn fresh_schema_with_cross_references() {
    check_topological_validity(
        "CREATE SCHEMA app;
         CREATE TYPE app.level AS ENUM ('low', 'high');
         CREATE SEQUENCE app.ticket_seq START 1;
         CREATE FUNCTION shout(x STRING) RETURNS STRING LANGUAGE SQL AS $$ SELECT upper(x) $$;
         CREATE TABLE app.tickets (
             id INT PRIMARY KEY DEFAULT nextval('app.ticket_seq'),
             level app.level NOT NULL DEFAULT 'low',
             body STRING NOT NULL,
             INDEX level_idx (level)
         );
         CREATE VIEW app.urgent AS SELECT id FROM app.tickets;
         CREATE TRIGGER noisy AFTER INSERT ON app.tickets FOR EACH ROW EXECUTE FUNCTION shout();",
        "",
    );
}

#[test]
fn incremental_changes_on_existing_schema() {
    check_topological_validity(
        "CREATE TYPE status AS ENUM ('new', 'done', 'stale');
         CREATE TABLE jobs (
             id INT PRIMARY KEY,
             s status NOT NULL DEFAULT 'new',
             finished_at TIMESTAMPTZ,
             INDEX stale_idx (s) WHERE finished_at IS NULL
         );",
        "CREATE TYPE status AS ENUM ('new', 'done');
         CREATE TABLE jobs (id INT PRIMARY KEY, s status NOT NULL DEFAULT 'new');",
    );
}

#[test]
fn column_and_index_additions_interleave_correctly() {
    check_topological_validity(
        "CREATE TABLE users (
             id INT PRIMARY KEY,
             email STRING NOT NULL,
             normalized STRING AS (lower(email)) STORED,
             UNIQUE INDEX normalized_key (normalized)
         );",
        "CREATE TABLE users (id INT PRIMARY KEY, email STRING NOT NULL);",
    );
}

#[test]
fn partial_index_on_new_column_gets_transaction_boundary() {
    let local = "CREATE TABLE events (
                     id INT PRIMARY KEY,
                     archived BOOL NOT NULL DEFAULT false,
                     INDEX live_idx (id) WHERE archived = false
                 );";
    let remote = "CREATE TABLE events (id INT PRIMARY KEY);";
    let local_schema = schema_of(local);
    let remote_schema = schema_of(remote);
    let diffs = compare(&local_schema, &remote_schema);
    let generated =
        generate_migration(&diffs, &remote_schema, scurry::classify::MigrationMode::Sync)
            .expect("generate");
    let texts: Vec<String> = generated.statements.iter().map(|s| s.to_string()).collect();

    let add_pos = texts
        .iter()
        .position(|s| s.contains("ADD COLUMN archived"))
        .expect("add column");
    let idx_pos = texts
        .iter()
        .position(|s| s.starts_with("CREATE INDEX live_idx"))
        .expect("index");
    assert!(add_pos < idx_pos);
    // the boundary sits between the column addition and the partial index
    assert!(
        texts[add_pos + 1..idx_pos].iter().any(|s| s == "COMMIT"),
        "expected a COMMIT between add-column and partial index: {:#?}",
        texts
    );

    check_topological_validity(local, remote);
}

//! The canonicalizer's re-parse path, fed the statement shapes the
//! engine actually emits from `SHOW CREATE ALL …`: type-annotated
//! literals, explicit ASC key columns, column families, the hidden rowid
//! column, and trailing `ADD CONSTRAINT` / `VALIDATE CONSTRAINT` pairs.

use scurry::canonical::{normalize_dump, parse_dump};
use scurry::diff::compare;
use scurry::schema::Schema;
use scurry::sql::{parse_sql, QualifiedName, TableConstraint};

const ENGINE_DUMP: &str = r#"
CREATE SCHEMA app;
CREATE TYPE public.user_status AS ENUM ('active', 'inactive', 'suspended');
CREATE SEQUENCE public.ticket_seq MINVALUE 1 MAXVALUE 9223372036854775807 INCREMENT 1 START 1;
CREATE TABLE public.users (
    id INT8 NOT NULL,
    name VARCHAR(100) NOT NULL,
    status public.user_status NOT NULL DEFAULT 'active':::public.user_status,
    secret STRING NOT VISIBLE NULL,
    CONSTRAINT users_pkey PRIMARY KEY (id ASC),
    INDEX status_idx (status ASC),
    UNIQUE INDEX users_name_key (name ASC) STORING (status),
    FAMILY "primary" (id, name, status, secret)
);
CREATE TABLE public.tickets (
    id INT8 NOT NULL DEFAULT nextval('public.ticket_seq':::STRING::REGCLASS),
    owner_id INT8 NULL,
    rowid INT8 NOT VISIBLE NOT NULL DEFAULT unique_rowid(),
    CONSTRAINT tickets_pkey PRIMARY KEY (rowid ASC)
);
ALTER TABLE public.tickets ADD CONSTRAINT fk_owner_id FOREIGN KEY (owner_id) REFERENCES public.users (id) ON DELETE CASCADE;
ALTER TABLE public.tickets VALIDATE CONSTRAINT fk_owner_id;
"#;

#[test]
fn engine_dump_parses_into_the_model() {
    let schema = parse_dump(&normalize_dump(ENGINE_DUMP)).expect("dump should parse");

    assert_eq!(schema.schemas.len(), 1);
    assert_eq!(schema.types.len(), 1);
    assert_eq!(schema.sequences.len(), 1);
    assert_eq!(schema.tables.len(), 2);

    let users = schema
        .table(&QualifiedName::public("users"))
        .expect("users table");
    assert_eq!(users.columns.len(), 4);
    assert!(users.column("secret").unwrap().not_visible);
    assert_eq!(users.indexes.len(), 2);
    let name_key = users
        .indexes
        .iter()
        .find(|i| i.name == "users_name_key")
        .expect("unique index");
    assert!(name_key.unique);
    assert_eq!(name_key.storing, vec!["status".to_string()]);

    // the ALTER-added foreign key folds into the table, validated
    let tickets = schema
        .table(&QualifiedName::public("tickets"))
        .expect("tickets table");
    let fk = tickets
        .constraints
        .iter()
        .find_map(|c| match c {
            TableConstraint::ForeignKey {
                name: Some(n),
                not_valid,
                ..
            } if n == "fk_owner_id" => Some(*not_valid),
            _ => None,
        })
        .expect("foreign key");
    assert!(!fk, "validated constraint must not stay NOT VALID");
}

#[test]
fn dump_is_a_fixed_point_for_diffing() {
    // a schema compared against its own canonical dump form must be
    // change-free, or gen would loop forever emitting migrations
    let schema = parse_dump(&normalize_dump(ENGINE_DUMP)).expect("parse");
    let again = parse_dump(&normalize_dump(ENGINE_DUMP)).expect("parse");
    let diffs = compare(&schema, &again);
    assert!(diffs.is_empty(), "unexpected diffs: {:#?}", diffs);
}

#[test]
fn rendered_model_reparses() {
    // re-dumping the parsed schema through our own renderer must stay
    // parseable (schema.sql round trip)
    let schema = parse_dump(&normalize_dump(ENGINE_DUMP)).expect("parse");
    let rendered = schema.render();
    let reparsed = parse_sql(&rendered).expect("rendered schema parses");
    assert!(!reparsed.is_empty());
}

#[test]
fn annotation_rewrite_only_touches_annotations() {
    assert_eq!(
        normalize_dump("DEFAULT 'a':::public.t AND x = 'b::c'"),
        "DEFAULT 'a'::public.t AND x = 'b::c'"
    );
}

#[test]
fn hash_sharded_index_syntax_is_tolerated() {
    let parsed = parse_sql(
        "CREATE INDEX shard_idx ON t (v) USING HASH WITH (bucket_count = 8) WHERE v > 0",
    )
    .expect("hash-sharded index parses");
    assert_eq!(parsed.len(), 1);
}

#[test]
fn rowid_pkey_tables_diff_quietly() {
    // two tables relying on the implicit rowid key compare clean even
    // though the local definition never wrote the hidden column
    let local = Schema::new(parse_sql("CREATE TABLE t (a INT)").unwrap()).unwrap();
    let remote = parse_dump(&normalize_dump(
        "CREATE TABLE public.t (
             a INT8 NULL,
             rowid INT8 NOT VISIBLE NOT NULL DEFAULT unique_rowid(),
             CONSTRAINT t_pkey PRIMARY KEY (rowid ASC)
         );",
    ))
    .unwrap();
    let diffs = compare(&local, &remote);
    // the only acceptable noise is the hidden rowid machinery, which the
    // local side simply does not mention; primary-key emission must not
    // fire without an explicit local key
    assert!(
        diffs.iter().all(|d| !d.description.contains("primary key")),
        "{:#?}",
        diffs
    );
}

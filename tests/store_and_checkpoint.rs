//! On-disk format tests: migration directories, headers, checksums and
//! checkpoints.

use pretty_assertions::assert_eq;
use scurry::checkpoint::{
    cumulative_hashes, latest_valid_checkpoint, migrations_hash, write_checkpoint, Checkpoint,
};
use scurry::classify::MigrationMode;
use scurry::store::{checksum, strip_header, Header, Store};
use sha2::{Digest, Sha256};
use tempfile::TempDir;

fn store() -> (TempDir, Store) {
    let tmp = TempDir::new().expect("tempdir");
    let store = Store::new(tmp.path().join("migrations"));
    (tmp, store)
}

#[test]
fn checksum_is_stable_under_any_header() {
    let body = "CREATE TABLE t (a INT);\nCREATE INDEX a_idx ON t (a);\n";
    let headers = [
        "-- scurry:mode=sync",
        "-- scurry:mode=async",
        "-- scurry:mode=async,depends_on=20240101120000_base",
        "-- scurry:mode=sync,depends_on=a;b;c",
    ];
    let plain = checksum(body);
    for header in headers {
        let file = format!("{}\n{}", header, body);
        let (parsed, stripped) = strip_header(&file, "m").expect("header");
        assert!(parsed.is_some());
        assert_eq!(checksum(stripped), plain, "header: {}", header);
    }
}

#[test]
fn load_migrations_orders_lexicographically() {
    let (_tmp, store) = store();
    let header = Header::default();
    // written out of order on purpose
    store
        .write_migration("20240202000000_second", "CREATE TABLE b (y INT);", &header)
        .unwrap();
    store
        .write_migration("20240101000000_first", "CREATE TABLE a (x INT);", &header)
        .unwrap();
    store
        .write_migration("20241231235959_third", "CREATE TABLE c (z INT);", &header)
        .unwrap();

    let names: Vec<String> = store
        .load_migrations()
        .unwrap()
        .into_iter()
        .map(|m| m.name)
        .collect();
    assert_eq!(
        names,
        vec![
            "20240101000000_first",
            "20240202000000_second",
            "20241231235959_third"
        ]
    );
}

#[test]
fn checkpoint_round_trip_matches_hand_computed_hashes() {
    // build m1, m2; the checkpoint at m2 must hash b1 || b2 and its body
    let (_tmp, store) = store();
    let b1 = "CREATE TABLE a (x INT);";
    let b2 = "CREATE TABLE b (y INT);";
    store
        .write_migration("20240101120000_one", b1, &Header::default())
        .unwrap();
    store
        .write_migration(
            "20240102120000_two",
            b2,
            &Header {
                mode: MigrationMode::Sync,
                depends_on: vec!["20240101120000_one".into()],
            },
        )
        .unwrap();
    let migrations = store.load_migrations().unwrap();

    let canonical = "CREATE TABLE a (x INT); CREATE TABLE b (y INT);";
    let cp = Checkpoint::create(&migrations, canonical);

    let mut hasher = Sha256::new();
    hasher.update(b1.as_bytes());
    hasher.update(b2.as_bytes());
    assert_eq!(cp.migrations_hash, hex::encode(hasher.finalize()));
    assert_eq!(
        cp.checkpoint_hash,
        hex::encode(Sha256::digest(canonical.as_bytes()))
    );

    write_checkpoint(&store, "20240102120000_two", &cp).unwrap();
    let raw = std::fs::read_to_string(store.checkpoint_file("20240102120000_two")).unwrap();
    assert!(raw.starts_with("-- scurry:migrations="));
    let loaded = Checkpoint::parse(&raw).unwrap();
    loaded.validate().unwrap();
    assert_eq!(loaded, cp);

    let (idx, found) = latest_valid_checkpoint(&store, &migrations).unwrap();
    assert_eq!(idx, 1);
    assert_eq!(found.schema_sql, canonical);
}

#[test]
fn cumulative_hashes_prefix_property() {
    let (_tmp, store) = store();
    store
        .write_migration("20240101120000_one", "A;", &Header::default())
        .unwrap();
    store
        .write_migration("20240102120000_two", "B;", &Header::default())
        .unwrap();
    let migrations = store.load_migrations().unwrap();

    let hashes = cumulative_hashes(&migrations);
    assert_eq!(hashes.len(), 2);
    assert_eq!(hashes[0], migrations_hash(&migrations[..1]));
    assert_eq!(hashes[1], migrations_hash(&migrations));
    assert_ne!(hashes[0], hashes[1]);
}

#[test]
fn editing_an_earlier_migration_invalidates_later_checkpoints() {
    let (_tmp, store) = store();
    store
        .write_migration("20240101120000_one", "CREATE TABLE a (x INT);", &Header::default())
        .unwrap();
    store
        .write_migration("20240102120000_two", "CREATE TABLE b (y INT);", &Header::default())
        .unwrap();
    let migrations = store.load_migrations().unwrap();
    let cp = Checkpoint::create(&migrations, "canonical;");
    write_checkpoint(&store, "20240102120000_two", &cp).unwrap();
    assert!(latest_valid_checkpoint(&store, &migrations).is_some());

    // rewrite the first migration's body
    std::fs::write(
        store.migration_file("20240101120000_one"),
        "-- scurry:mode=sync\nCREATE TABLE a (x INT, extra INT);",
    )
    .unwrap();
    let changed = store.load_migrations().unwrap();
    assert!(latest_valid_checkpoint(&store, &changed).is_none());
}

#[test]
fn adopted_rows_use_empty_checksum_convention() {
    // an empty stored checksum means "marked without execution"; the
    // loader still computes the real checksum from disk
    let (_tmp, store) = store();
    store
        .write_migration("20240101120000_one", "CREATE TABLE a (x INT);", &Header::default())
        .unwrap();
    let loaded = store.load_migrations().unwrap();
    assert!(!loaded[0].checksum.is_empty());
    assert_eq!(loaded[0].checksum, checksum("CREATE TABLE a (x INT);"));
}

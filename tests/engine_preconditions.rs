//! The execution-engine precondition gate, tested against synthetic
//! migration rows. Everything here is pure; live execution paths are
//! covered by operating against a real cluster.

use chrono::Utc;
use scurry::classify::MigrationMode;
use scurry::engine::{AppliedMigration, Engine, EngineError, MigrationStatus, Precondition};
use scurry::store::MigrationScript;

fn row(name: &str, status: MigrationStatus, mode: MigrationMode) -> AppliedMigration {
    AppliedMigration {
        name: name.to_string(),
        checksum: "abc".to_string(),
        mode,
        started_at: Utc::now(),
        completed_at: None,
        status,
        failed_statement: None,
        error_msg: None,
        depends_on: vec![],
    }
}

fn script(name: &str, mode: MigrationMode, depends_on: &[&str]) -> MigrationScript {
    MigrationScript {
        name: name.to_string(),
        sql: "SELECT 1;".to_string(),
        checksum: "abc".to_string(),
        mode,
        depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
    }
}

#[test]
fn failed_row_blocks_execution() {
    let applied = vec![row("m1", MigrationStatus::Failed, MigrationMode::Sync)];
    let candidate = script("m2", MigrationMode::Sync, &[]);
    let err = Engine::check_preconditions(&applied, &[&candidate]).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Precondition(Precondition::FailedMigration { .. })
    ));
}

#[test]
fn pending_sync_row_means_crashed_session() {
    let applied = vec![row("m1", MigrationStatus::Pending, MigrationMode::Sync)];
    let candidate = script("m2", MigrationMode::Sync, &[]);
    let err = Engine::check_preconditions(&applied, &[&candidate]).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Precondition(Precondition::PendingMigration { .. })
    ));
}

#[test]
fn pending_async_row_allows_unrelated_sync() {
    let applied = vec![row("m1", MigrationStatus::Pending, MigrationMode::Async)];
    let candidate = script("m2", MigrationMode::Sync, &[]);
    Engine::check_preconditions(&applied, &[&candidate]).unwrap();
}

#[test]
fn pending_async_row_blocks_second_async() {
    let applied = vec![row("m1", MigrationStatus::Pending, MigrationMode::Async)];
    let candidate = script("m2", MigrationMode::Async, &[]);
    let err = Engine::check_preconditions(&applied, &[&candidate]).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Precondition(Precondition::ConcurrentAsync { .. })
    ));
}

#[test]
fn dependency_must_be_complete() {
    let applied = vec![row("m1", MigrationStatus::Pending, MigrationMode::Async)];
    let candidate = script("m2", MigrationMode::Sync, &["m1"]);
    let err = Engine::check_preconditions(&applied, &[&candidate]).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Precondition(Precondition::UnmetDependency { .. })
    ));
}

#[test]
fn recovered_satisfies_dependencies() {
    let applied = vec![row("m1", MigrationStatus::Recovered, MigrationMode::Sync)];
    let candidate = script("m2", MigrationMode::Sync, &["m1"]);
    Engine::check_preconditions(&applied, &[&candidate]).unwrap();
}

#[test]
fn dependency_satisfied_within_batch() {
    let applied = vec![];
    let first = script("m1", MigrationMode::Sync, &[]);
    let second = script("m2", MigrationMode::Sync, &["m1"]);
    Engine::check_preconditions(&applied, &[&first, &second]).unwrap();
}

#[test]
fn completed_rows_do_not_block() {
    let applied = vec![
        row("m1", MigrationStatus::Succeeded, MigrationMode::Sync),
        row("m2", MigrationStatus::Recovered, MigrationMode::Async),
    ];
    let candidate = script("m3", MigrationMode::Async, &["m1", "m2"]);
    Engine::check_preconditions(&applied, &[&candidate]).unwrap();
}

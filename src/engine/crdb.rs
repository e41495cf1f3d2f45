//! The live-database engine: connection management, the reserved
//! migrations table, sync/async execution and the recovery primitives.

use super::{
    AppliedMigration, EngineError, MigrationStatus, Precondition, MIGRATIONS_TABLE,
    RESERVED_SCHEMA,
};
use crate::classify::MigrationMode;
use crate::store::MigrationScript;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tokio_postgres::{Client, NoTls, Row};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Grace period that lets a freshly spawned async migration submit its
/// DDL before the caller returns.
const ASYNC_KICK_GRACE: Duration = Duration::from_millis(750);

pub struct Engine {
    client: Client,
    conn_task: tokio::task::JoinHandle<()>,
    db_url: String,
    cancel: CancellationToken,
}

impl Engine {
    /// Connects and makes sure the reserved schema and migrations table
    /// exist. Creation is idempotent.
    pub async fn connect(db_url: &str, cancel: CancellationToken) -> Result<Engine, EngineError> {
        let (client, connection) = tokio_postgres::connect(db_url, NoTls)
            .await
            .map_err(EngineError::Connect)?;
        let conn_task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!(error = %e, "database connection closed");
            }
        });
        let engine = Engine {
            client,
            conn_task,
            db_url: db_url.to_string(),
            cancel,
        };
        engine.ensure_migrations_table().await?;
        Ok(engine)
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn guard<T, F>(&self, fut: F) -> Result<T, EngineError>
    where
        F: Future<Output = Result<T, tokio_postgres::Error>>,
    {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(EngineError::Cancelled),
            res = fut => res.map_err(EngineError::Db),
        }
    }

    async fn ensure_migrations_table(&self) -> Result<(), EngineError> {
        let ddl = format!(
            "CREATE SCHEMA IF NOT EXISTS {schema};
             CREATE TABLE IF NOT EXISTS {schema}.{table} (
                 name STRING NOT NULL PRIMARY KEY,
                 checksum STRING NOT NULL,
                 mode STRING NOT NULL,
                 started_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                 completed_at TIMESTAMPTZ NULL,
                 status STRING NOT NULL,
                 failed_statement STRING NULL,
                 error_msg STRING NULL,
                 depends_on STRING[] NOT NULL DEFAULT ARRAY[]::STRING[]
             );",
            schema = RESERVED_SCHEMA,
            table = MIGRATIONS_TABLE,
        );
        self.guard(self.client.batch_execute(&ddl)).await
    }

    fn row_to_applied(row: &Row) -> Result<AppliedMigration, EngineError> {
        let mode: String = row.get("mode");
        let status: String = row.get("status");
        let started_at: DateTime<Utc> = row.get("started_at");
        let completed_at: Option<DateTime<Utc>> = row.get("completed_at");
        Ok(AppliedMigration {
            name: row.get("name"),
            checksum: row.get("checksum"),
            mode: MigrationMode::from_str(&mode).unwrap_or_default(),
            started_at,
            completed_at,
            status: MigrationStatus::from_str(&status)
                .unwrap_or(MigrationStatus::Failed),
            failed_statement: row.get("failed_statement"),
            error_msg: row.get("error_msg"),
            depends_on: row.get("depends_on"),
        })
    }

    pub async fn applied_migrations(&self) -> Result<Vec<AppliedMigration>, EngineError> {
        let rows = self
            .guard(self.client.query(
                &format!(
                    "SELECT name, checksum, mode, started_at, completed_at, status, \
                     failed_statement, error_msg, depends_on \
                     FROM {}.{} ORDER BY name",
                    RESERVED_SCHEMA, MIGRATIONS_TABLE
                ),
                &[],
            ))
            .await?;
        rows.iter().map(Self::row_to_applied).collect()
    }

    /// The precondition gate from the execution design: refuse when a
    /// failed or crashed-pending row exists, when a dependency is unmet,
    /// or when a second async migration would overlap a pending one.
    pub fn check_preconditions(
        applied: &[AppliedMigration],
        candidates: &[&MigrationScript],
    ) -> Result<(), EngineError> {
        let by_name: BTreeMap<&str, &AppliedMigration> =
            applied.iter().map(|a| (a.name.as_str(), a)).collect();

        for row in applied {
            match (row.status, row.mode) {
                (MigrationStatus::Failed, _) => {
                    return Err(EngineError::Precondition(Precondition::FailedMigration {
                        name: row.name.clone(),
                    }))
                }
                (MigrationStatus::Pending, MigrationMode::Sync) => {
                    return Err(EngineError::Precondition(Precondition::PendingMigration {
                        name: row.name.clone(),
                    }))
                }
                _ => {}
            }
        }

        let pending_async = applied
            .iter()
            .find(|a| a.status == MigrationStatus::Pending && a.mode == MigrationMode::Async);

        let mut earlier: Vec<&str> = Vec::new();
        for candidate in candidates {
            for dep in &candidate.depends_on {
                let satisfied_on_db = by_name
                    .get(dep.as_str())
                    .map(|a| a.status.is_complete())
                    .unwrap_or(false);
                let satisfied_in_batch = earlier.contains(&dep.as_str());
                if !satisfied_on_db && !satisfied_in_batch {
                    return Err(EngineError::Precondition(Precondition::UnmetDependency {
                        migration: candidate.name.clone(),
                        dependency: dep.clone(),
                    }));
                }
            }
            if candidate.mode == MigrationMode::Async {
                if let Some(pending) = pending_async {
                    return Err(EngineError::Precondition(Precondition::ConcurrentAsync {
                        pending: pending.name.clone(),
                    }));
                }
            }
            earlier.push(candidate.name.as_str());
        }
        Ok(())
    }

    async fn insert_pending(&self, m: &MigrationScript) -> Result<(), EngineError> {
        self.guard(self.client.execute(
            &format!(
                "INSERT INTO {}.{} (name, checksum, mode, status, depends_on) \
                 VALUES ($1, $2, $3, 'pending', $4)",
                RESERVED_SCHEMA, MIGRATIONS_TABLE
            ),
            &[
                &m.name,
                &m.checksum,
                &m.mode.to_string(),
                &m.depends_on,
            ],
        ))
        .await?;
        Ok(())
    }

    async fn mark_succeeded_on(client: &Client, name: &str) -> Result<(), tokio_postgres::Error> {
        client
            .execute(
                &format!(
                    "UPDATE {}.{} SET status = 'succeeded', completed_at = now(), \
                     failed_statement = NULL, error_msg = NULL WHERE name = $1",
                    RESERVED_SCHEMA, MIGRATIONS_TABLE
                ),
                &[&name],
            )
            .await?;
        Ok(())
    }

    async fn mark_failed_on(
        client: &Client,
        name: &str,
        statement: &str,
        error: &str,
    ) -> Result<(), tokio_postgres::Error> {
        client
            .execute(
                &format!(
                    "UPDATE {}.{} SET status = 'failed', completed_at = now(), \
                     failed_statement = $2, error_msg = $3 WHERE name = $1",
                    RESERVED_SCHEMA, MIGRATIONS_TABLE
                ),
                &[&name, &statement, &error],
            )
            .await?;
        Ok(())
    }

    /// Executes a sync migration: pending row first, then each statement
    /// in order inside an engine transaction (the migration text itself
    /// carries the `COMMIT; BEGIN;` boundaries the generator inserted).
    pub async fn execute_sync(
        &self,
        m: &MigrationScript,
        statement_timeout: Option<Duration>,
    ) -> Result<(), EngineError> {
        self.insert_pending(m).await?;
        info!(migration = %m.name, "applying sync migration");
        run_statements(
            &self.client,
            &self.cancel,
            &m.name,
            &m.sql,
            statement_timeout,
            true,
        )
        .await
    }

    /// Kicks an async migration and returns once the DDL has had a
    /// chance to reach the engine. The spawned task finishes the
    /// bookkeeping if the process stays alive; otherwise `poll_async`
    /// reconciles on the next run.
    pub async fn execute_async(
        &self,
        m: &MigrationScript,
        statement_timeout: Option<Duration>,
    ) -> Result<(), EngineError> {
        self.insert_pending(m).await?;
        info!(migration = %m.name, "kicking async migration");

        let url = self.db_url.clone();
        let cancel = self.cancel.clone();
        let migration = m.clone();
        tokio::spawn(async move {
            let (client, connection) = match tokio_postgres::connect(&url, NoTls).await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(migration = %migration.name, error = %e, "async connection failed");
                    return;
                }
            };
            let conn_task = tokio::spawn(async move {
                let _ = connection.await;
            });
            let result = run_statements(
                &client,
                &cancel,
                &migration.name,
                &migration.sql,
                statement_timeout,
                false,
            )
            .await;
            if let Err(e) = result {
                warn!(migration = %migration.name, error = %e, "async migration did not complete in-process");
            }
            conn_task.abort();
        });

        tokio::time::sleep(ASYNC_KICK_GRACE).await;
        Ok(())
    }

    /// Reconciles pending async rows: when the engine reports no active
    /// schema-change jobs, the work they kicked has drained and the rows
    /// flip to succeeded. Returns the migrations that completed.
    pub async fn poll_async(&self) -> Result<Vec<String>, EngineError> {
        let pending: Vec<AppliedMigration> = self
            .applied_migrations()
            .await?
            .into_iter()
            .filter(|a| a.status == MigrationStatus::Pending && a.mode == MigrationMode::Async)
            .collect();
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let row = self
            .guard(self.client.query_one(
                "SELECT count(*) FROM [SHOW JOBS] \
                 WHERE job_type LIKE '%SCHEMA CHANGE%' \
                 AND status IN ('pending', 'running', 'retrying')",
                &[],
            ))
            .await?;
        let active: i64 = row.get(0);
        if active > 0 {
            debug!(active, "schema-change jobs still running");
            return Ok(Vec::new());
        }

        let mut completed = Vec::new();
        for m in pending {
            self.guard(Self::mark_succeeded_on(&self.client, &m.name))
                .await?;
            completed.push(m.name);
        }
        Ok(completed)
    }

    /// Recovery: rewind a failed row to pending with the checksum
    /// currently on disk, before a retry.
    pub async fn reset_to_pending(&self, name: &str, checksum: &str) -> Result<(), EngineError> {
        self.guard(self.client.execute(
            &format!(
                "UPDATE {}.{} SET status = 'pending', checksum = $2, started_at = now(), \
                 completed_at = NULL, failed_statement = NULL, error_msg = NULL WHERE name = $1",
                RESERVED_SCHEMA, MIGRATIONS_TABLE
            ),
            &[&name, &checksum],
        ))
        .await?;
        Ok(())
    }

    /// Recovery: re-run the statements of an already-recorded migration.
    pub async fn retry(
        &self,
        m: &MigrationScript,
        statement_timeout: Option<Duration>,
    ) -> Result<(), EngineError> {
        self.reset_to_pending(&m.name, &m.checksum).await?;
        run_statements(
            &self.client,
            &self.cancel,
            &m.name,
            &m.sql,
            statement_timeout,
            m.mode == MigrationMode::Sync,
        )
        .await
    }

    /// Recovery: mark a row recovered after manual remediation. Executes
    /// no SQL from the migration.
    pub async fn mark_recovered(&self, name: &str) -> Result<(), EngineError> {
        self.guard(self.client.execute(
            &format!(
                "UPDATE {}.{} SET status = 'recovered', completed_at = now(), \
                 failed_statement = NULL, error_msg = NULL WHERE name = $1",
                RESERVED_SCHEMA, MIGRATIONS_TABLE
            ),
            &[&name],
        ))
        .await?;
        Ok(())
    }

    /// Records a migration as applied without executing it. The empty
    /// checksum marks it as adopted, so later checksum comparisons stay
    /// quiet.
    pub async fn mark_applied_without_execution(
        &self,
        m: &MigrationScript,
    ) -> Result<(), EngineError> {
        self.guard(self.client.execute(
            &format!(
                "INSERT INTO {}.{} (name, checksum, mode, status, completed_at, depends_on) \
                 VALUES ($1, '', $2, 'recovered', now(), $3)",
                RESERVED_SCHEMA, MIGRATIONS_TABLE
            ),
            &[&m.name, &m.mode.to_string(), &m.depends_on],
        ))
        .await?;
        Ok(())
    }

    /// Recovery: free-form operator SQL against the live database.
    pub async fn run_manual_sql(&self, sql: &str) -> Result<(), EngineError> {
        self.guard(self.client.batch_execute(sql)).await
    }

    pub fn shutdown(self) {
        self.conn_task.abort();
    }
}

/// Shared statement loop for sync, async and retry execution. On failure
/// the row is marked failed with the offending statement text; on
/// success it flips to succeeded.
async fn run_statements(
    client: &Client,
    cancel: &CancellationToken,
    name: &str,
    sql: &str,
    statement_timeout: Option<Duration>,
    transactional: bool,
) -> Result<(), EngineError> {
    if let Some(t) = statement_timeout {
        client
            .batch_execute(&format!("SET statement_timeout = '{}ms'", t.as_millis()))
            .await?;
    }
    if transactional {
        client.batch_execute("BEGIN").await?;
    }

    let statements = crate::sql::split_statements(sql);
    for (i, stmt) in statements.iter().enumerate() {
        if cancel.is_cancelled() {
            // leave the row pending: the target database owns whatever
            // state the engine reached, recovery picks it up next start
            if transactional {
                let _ = client.batch_execute("ROLLBACK").await;
            }
            return Err(EngineError::Cancelled);
        }
        let exec = tokio::select! {
            _ = cancel.cancelled() => {
                if transactional {
                    let _ = client.batch_execute("ROLLBACK").await;
                }
                return Err(EngineError::Cancelled);
            }
            res = client.batch_execute(stmt) => res,
        };
        if let Err(e) = exec {
            if transactional {
                let _ = client.batch_execute("ROLLBACK").await;
            }
            let msg = e.to_string();
            if let Err(update_err) = Engine::mark_failed_on(client, name, stmt, &msg).await {
                warn!(migration = name, error = %update_err, "could not record failure");
            }
            return Err(EngineError::Apply {
                migration: name.to_string(),
                number: i + 1,
                statement: stmt.clone(),
                source: e,
            });
        }
    }

    if transactional {
        client.batch_execute("COMMIT").await?;
    }
    Engine::mark_succeeded_on(client, name)
        .await
        .map_err(EngineError::Db)
}

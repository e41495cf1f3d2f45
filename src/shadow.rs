//! The shadow database: a throwaway single-node CockroachDB used purely
//! to canonicalize SQL (parse, execute, dump).
//!
//! The node is started lazily on first borrow and lives as long as any
//! client holds it; when the last `ShadowClient` drops, the child process
//! goes with it. Every borrow gets its own freshly created database, so
//! concurrent canonicalizations cannot see each other.

use crate::escape::EscapedIdentifier;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tempfile::TempDir;
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio_postgres::{Client, NoTls};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

const STARTUP_TIMEOUT: Duration = Duration::from_secs(60);
const STARTUP_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum ShadowError {
    #[error("could not start shadow database (`{command}`): {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("shadow database did not become ready within {0:?}")]
    StartupTimeout(Duration),
    #[error("shadow database exited during startup: {0}")]
    EarlyExit(String),
    #[error("shadow database error: {0}")]
    Db(#[from] tokio_postgres::Error),
    #[error("operation cancelled")]
    Cancelled,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Debug, Default)]
pub struct ShadowConfig {
    /// Engine version from `CRDB_VERSION`; selects the `cockroach-<v>`
    /// binary on PATH. Unset means plain `cockroach`.
    pub version: Option<String>,
}

impl ShadowConfig {
    fn binary(&self) -> String {
        match &self.version {
            Some(v) => format!("cockroach-{}", v),
            None => "cockroach".to_string(),
        }
    }
}

/// One running single-node instance. Dropping it kills the child and
/// removes the temp directory holding the listening-url file.
struct ShadowServer {
    child: Child,
    url: String,
    _tmp: TempDir,
}

impl Drop for ShadowServer {
    fn drop(&mut self) {
        // kill_on_drop is set, this makes the intent explicit on the
        // non-drop paths too
        let _ = self.child.start_kill();
        debug!("shadow database stopped");
    }
}

/// Lazily started, shared shadow database. Lives in the application
/// context and is passed down the call tree.
pub struct ShadowPool {
    config: ShadowConfig,
    cancel: CancellationToken,
    server: Mutex<Weak<ShadowServer>>,
}

impl ShadowPool {
    pub fn new(config: ShadowConfig, cancel: CancellationToken) -> ShadowPool {
        ShadowPool {
            config,
            cancel,
            server: Mutex::new(Weak::new()),
        }
    }

    /// Borrows a client against a fresh throwaway database, starting the
    /// node if no borrow is alive.
    pub async fn client(&self) -> Result<ShadowClient, ShadowError> {
        let server = self.acquire_server().await?;

        let (client, connection) = tokio_postgres::connect(&server.url, NoTls).await?;
        let conn_task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!(error = %e, "shadow connection closed");
            }
        });

        let dbname = format!("shadow_{}", Uuid::new_v4().simple());
        let ident = EscapedIdentifier::new(&dbname);
        self.run(&client, &format!("CREATE DATABASE {}", ident))
            .await?;
        self.run(&client, &format!("SET database = {}", ident))
            .await?;

        Ok(ShadowClient {
            client,
            dbname,
            conn_task,
            _server: server,
            cancel: self.cancel.clone(),
        })
    }

    async fn acquire_server(&self) -> Result<Arc<ShadowServer>, ShadowError> {
        if let Some(server) = self.server.lock().expect("shadow lock").upgrade() {
            return Ok(server);
        }
        let started = Arc::new(self.start_server().await?);
        *self.server.lock().expect("shadow lock") = Arc::downgrade(&started);
        Ok(started)
    }

    async fn start_server(&self) -> Result<ShadowServer, ShadowError> {
        let tmp = TempDir::new()?;
        let url_file: PathBuf = tmp.path().join("listen-url");
        let binary = self.config.binary();

        info!(binary = %binary, "starting shadow database");
        let child = Command::new(&binary)
            .arg("start-single-node")
            .arg("--insecure")
            .arg("--store=type=mem,size=1GiB")
            .arg("--listen-addr=127.0.0.1:0")
            .arg("--http-addr=127.0.0.1:0")
            .arg(format!("--listening-url-file={}", url_file.display()))
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ShadowError::Spawn {
                command: binary.clone(),
                source,
            })?;

        let mut server = ShadowServer {
            child,
            url: String::new(),
            _tmp: tmp,
        };

        let deadline = tokio::time::Instant::now() + STARTUP_TIMEOUT;
        loop {
            if self.cancel.is_cancelled() {
                return Err(ShadowError::Cancelled);
            }
            if let Some(status) = server.child.try_wait()? {
                return Err(ShadowError::EarlyExit(status.to_string()));
            }
            if let Ok(url) = std::fs::read_to_string(&url_file) {
                let url = url.trim();
                if !url.is_empty() {
                    server.url = url.to_string();
                    debug!(url = %server.url, "shadow database ready");
                    return Ok(server);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ShadowError::StartupTimeout(STARTUP_TIMEOUT));
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(ShadowError::Cancelled),
                _ = tokio::time::sleep(STARTUP_POLL) => {}
            }
        }
    }

    async fn run(&self, client: &Client, sql: &str) -> Result<(), ShadowError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(ShadowError::Cancelled),
            res = client.batch_execute(sql) => res.map_err(ShadowError::Db),
        }
    }
}

/// A borrowed shadow client bound to its own throwaway database. Keeps
/// the node alive while held.
pub struct ShadowClient {
    pub client: Client,
    dbname: String,
    conn_task: tokio::task::JoinHandle<()>,
    _server: Arc<ShadowServer>,
    cancel: CancellationToken,
}

impl ShadowClient {
    /// Runs a statement on the throwaway database, cancellation-aware.
    pub async fn execute(&self, sql: &str) -> Result<(), ShadowError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(ShadowError::Cancelled),
            res = self.client.batch_execute(sql) => res.map_err(ShadowError::Db),
        }
    }

    pub async fn query(
        &self,
        sql: &str,
    ) -> Result<Vec<tokio_postgres::Row>, ShadowError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(ShadowError::Cancelled),
            res = self.client.query(sql, &[]) => res.map_err(ShadowError::Db),
        }
    }

    /// Drops the throwaway database and releases the borrow.
    pub async fn close(self) {
        let ident = EscapedIdentifier::new(&self.dbname);
        let _ = self
            .client
            .batch_execute(&format!("SET database = defaultdb; DROP DATABASE {} CASCADE", ident))
            .await;
        self.conn_task.abort();
    }
}

impl Drop for ShadowClient {
    fn drop(&mut self) {
        self.conn_task.abort();
    }
}

//! The application context: resolved configuration plus the shared
//! process resources (cancellation token, shadow pool), passed explicitly
//! down the call tree.

use crate::checkpoint::RemoteCache;
use crate::engine::Engine;
use crate::shadow::{ShadowConfig, ShadowPool};
use crate::store::Store;
use anyhow::{anyhow, Result};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Environment variable supplying the default `--db-url`.
pub const ENV_DB_URL: &str = "CRDB_URL";
/// Environment variable selecting the shadow engine version.
pub const ENV_CRDB_VERSION: &str = "CRDB_VERSION";
/// Environment variable pointing at the remote checkpoint cache.
pub const ENV_SCHEMA_CACHE_URL: &str = "SCHEMA_CACHE_URL";

pub struct AppContext {
    pub db_url: Option<String>,
    pub migrations_dir: PathBuf,
    pub definitions_dir: PathBuf,
    pub cache_url: Option<String>,
    pub cancel: CancellationToken,
    pub shadow: ShadowPool,
}

impl AppContext {
    pub fn new(
        db_url: Option<String>,
        migrations_dir: PathBuf,
        definitions_dir: PathBuf,
        cancel: CancellationToken,
    ) -> AppContext {
        let db_url = db_url.or_else(|| std::env::var(ENV_DB_URL).ok());
        let cache_url = std::env::var(ENV_SCHEMA_CACHE_URL).ok();
        let shadow_config = ShadowConfig {
            version: std::env::var(ENV_CRDB_VERSION).ok(),
        };
        AppContext {
            db_url,
            migrations_dir,
            definitions_dir,
            cache_url,
            shadow: ShadowPool::new(shadow_config, cancel.clone()),
            cancel,
        }
    }

    pub fn store(&self) -> Store {
        Store::new(&self.migrations_dir)
    }

    pub fn require_db_url(&self) -> Result<&str> {
        self.db_url.as_deref().ok_or_else(|| {
            anyhow!(
                "no database configured: pass --db-url or set {}",
                ENV_DB_URL
            )
        })
    }

    pub async fn engine(&self) -> Result<Engine> {
        let url = self.require_db_url()?;
        Ok(Engine::connect(url, self.cancel.clone()).await?)
    }

    pub fn remote_cache(&self) -> Option<RemoteCache> {
        let url = self.cache_url.as_deref()?;
        match RemoteCache::from_url(url) {
            Ok(cache) => Some(cache),
            Err(e) => {
                tracing::warn!(url, error = %e, "ignoring unusable schema cache");
                None
            }
        }
    }

    /// Whether interactive prompts are possible. Prompting in a
    /// non-interactive context is an error, never a hang.
    pub fn interactive(&self) -> bool {
        console::user_attended()
    }
}

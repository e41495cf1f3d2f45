//! Content-addressed schema checkpoints.
//!
//! A checkpoint stores the canonical schema as it exists after a given
//! migration, keyed by the hash of every migration up to and including
//! it. On replay the newest matching checkpoint short-circuits the
//! shadow database entirely. Checkpoints that fail verification are
//! skipped, never deleted.
//!
//! File format:
//!
//! ```text
//! -- scurry:migrations=<hex64>,checkpoint=<hex64>
//! CREATE TABLE …; CREATE TYPE …;
//! ```

use crate::store::{MigrationScript, Store, StoreError};
use opendal::Operator;
use sha2::{Digest, Sha256};
use std::fs;
use thiserror::Error;
use tracing::{debug, warn};

pub const CHECKPOINT_HEADER_PREFIX: &str = "-- scurry:migrations=";

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint header is malformed: {0}")]
    MalformedHeader(String),
    #[error("checkpoint body hash does not match its header")]
    VerificationFailed,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("remote cache error: {0}")]
    Remote(#[from] opendal::Error),
    #[error("invalid cache url `{url}`: {reason}")]
    CacheUrl { url: String, reason: String },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Checkpoint {
    /// SHA-256 over the concatenated header-stripped migration bodies.
    pub migrations_hash: String,
    /// SHA-256 of `schema_sql`.
    pub checkpoint_hash: String,
    /// Single-line canonical schema dump.
    pub schema_sql: String,
}

impl Checkpoint {
    /// Builds a checkpoint for the migration list ending at this point.
    pub fn create(migrations: &[MigrationScript], canonical_schema: &str) -> Checkpoint {
        Checkpoint {
            migrations_hash: migrations_hash(migrations),
            checkpoint_hash: hex::encode(Sha256::digest(canonical_schema.as_bytes())),
            schema_sql: canonical_schema.to_string(),
        }
    }

    pub fn render(&self) -> String {
        format!(
            "{}{},checkpoint={}\n{}",
            CHECKPOINT_HEADER_PREFIX, self.migrations_hash, self.checkpoint_hash, self.schema_sql
        )
    }

    pub fn parse(text: &str) -> Result<Checkpoint, CheckpointError> {
        let first_line_end = text.find('\n').unwrap_or(text.len());
        let header = &text[..first_line_end];
        let rest = header
            .strip_prefix(CHECKPOINT_HEADER_PREFIX)
            .ok_or_else(|| CheckpointError::MalformedHeader(header.to_string()))?;
        let (migrations_hash, tail) = rest
            .split_once(",checkpoint=")
            .ok_or_else(|| CheckpointError::MalformedHeader(header.to_string()))?;
        let valid_hex =
            |s: &str| s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit() && !c.is_uppercase());
        if !valid_hex(migrations_hash) || !valid_hex(tail) {
            return Err(CheckpointError::MalformedHeader(header.to_string()));
        }
        let body = if first_line_end < text.len() {
            &text[first_line_end + 1..]
        } else {
            ""
        };
        Ok(Checkpoint {
            migrations_hash: migrations_hash.to_string(),
            checkpoint_hash: tail.to_string(),
            schema_sql: body.to_string(),
        })
    }

    /// Verifies the body against the header's checkpoint hash.
    pub fn validate(&self) -> Result<(), CheckpointError> {
        let actual = hex::encode(Sha256::digest(self.schema_sql.as_bytes()));
        if actual == self.checkpoint_hash {
            Ok(())
        } else {
            Err(CheckpointError::VerificationFailed)
        }
    }
}

/// SHA-256 over the concatenation of header-stripped migration bodies in
/// timestamp order.
pub fn migrations_hash(migrations: &[MigrationScript]) -> String {
    let mut hasher = Sha256::new();
    for m in migrations {
        hasher.update(m.sql.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Cumulative migrations-hash for every prefix of the list, so index `i`
/// is the expected hash of a checkpoint stored in migration `i`.
pub fn cumulative_hashes(migrations: &[MigrationScript]) -> Vec<String> {
    let mut hasher = Sha256::new();
    let mut out = Vec::with_capacity(migrations.len());
    for m in migrations {
        hasher.update(m.sql.as_bytes());
        out.push(hex::encode(hasher.clone().finalize()));
    }
    out
}

/// Writes the checkpoint into the migration's directory, replacing any
/// stale one.
pub fn write_checkpoint(
    store: &Store,
    migration_name: &str,
    checkpoint: &Checkpoint,
) -> Result<(), CheckpointError> {
    let path = store.checkpoint_file(migration_name);
    fs::write(&path, checkpoint.render()).map_err(|source| StoreError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(())
}

/// Scans migration directories newest-first for the most recent
/// checkpoint whose migrations-hash matches the expected prefix hash and
/// whose body verifies. Returns the index of the migration the
/// checkpoint covers, plus the checkpoint.
pub fn latest_valid_checkpoint(
    store: &Store,
    migrations: &[MigrationScript],
) -> Option<(usize, Checkpoint)> {
    let expected = cumulative_hashes(migrations);
    for (i, migration) in migrations.iter().enumerate().rev() {
        let path = store.checkpoint_file(&migration.name);
        let Ok(raw) = fs::read_to_string(&path) else {
            continue;
        };
        let parsed = match Checkpoint::parse(&raw) {
            Ok(cp) => cp,
            Err(e) => {
                warn!(migration = %migration.name, error = %e, "skipping unreadable checkpoint");
                continue;
            }
        };
        if parsed.migrations_hash != expected[i] {
            debug!(migration = %migration.name, "checkpoint is stale");
            continue;
        }
        if let Err(e) = parsed.validate() {
            warn!(migration = %migration.name, error = %e, "skipping corrupt checkpoint");
            continue;
        }
        return Some((i, parsed));
    }
    None
}

/// Optional remote checkpoint cache, addressed by migrations-hash.
///
/// `file://<path>` and `memory://` URLs map onto the corresponding
/// opendal services.
pub struct RemoteCache {
    op: Operator,
}

impl RemoteCache {
    pub fn from_url(url: &str) -> Result<RemoteCache, CheckpointError> {
        let op = if let Some(root) = url.strip_prefix("file://") {
            let builder = opendal::services::Fs::default().root(root);
            Operator::new(builder).map_err(CheckpointError::Remote)?
        } else if url.starts_with("memory://") {
            let builder = opendal::services::Memory::default();
            Operator::new(builder).map_err(CheckpointError::Remote)?
        } else {
            return Err(CheckpointError::CacheUrl {
                url: url.to_string(),
                reason: "expected a file:// or memory:// scheme".to_string(),
            });
        };
        Ok(RemoteCache { op })
    }

    fn key(migrations_hash: &str) -> String {
        format!("{}.sql", migrations_hash)
    }

    /// Fetches and verifies a checkpoint; misses and verification
    /// failures both come back as `None` so the caller falls through to
    /// full replay.
    pub async fn get(&self, migrations_hash: &str) -> Option<Checkpoint> {
        let key = Self::key(migrations_hash);
        let raw = match self.op.read(&key).await {
            Ok(buf) => String::from_utf8_lossy(&buf.to_bytes()).to_string(),
            Err(_) => return None,
        };
        let cp = Checkpoint::parse(&raw).ok()?;
        if cp.migrations_hash != migrations_hash || cp.validate().is_err() {
            warn!(hash = migrations_hash, "remote checkpoint failed verification");
            return None;
        }
        Some(cp)
    }

    pub async fn put(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let key = Self::key(&checkpoint.migrations_hash);
        self.op
            .write(&key, checkpoint.render().into_bytes())
            .await
            .map_err(CheckpointError::Remote)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::MigrationMode;
    use crate::store::{checksum, Header};
    use tempfile::TempDir;

    fn migration(name: &str, sql: &str) -> MigrationScript {
        MigrationScript {
            name: name.to_string(),
            sql: sql.to_string(),
            checksum: checksum(sql),
            mode: MigrationMode::Sync,
            depends_on: vec![],
        }
    }

    #[test]
    fn header_hashes_the_concatenated_bodies() {
        let m1 = migration("20240101120000_one", "CREATE TABLE a (x INT);\n");
        let m2 = migration("20240102120000_two", "CREATE TABLE b (y INT);\n");
        let cp = Checkpoint::create(&[m1.clone(), m2.clone()], "CREATE TABLE a (x INT); CREATE TABLE b (y INT);");

        let mut hasher = Sha256::new();
        hasher.update(m1.sql.as_bytes());
        hasher.update(m2.sql.as_bytes());
        assert_eq!(cp.migrations_hash, hex::encode(hasher.finalize()));
    }

    #[test]
    fn render_parse_validate_round_trip() {
        let m = migration("20240101120000_one", "CREATE TABLE a (x INT);\n");
        let cp = Checkpoint::create(&[m], "CREATE TABLE a (x INT);");
        let parsed = Checkpoint::parse(&cp.render()).unwrap();
        assert_eq!(parsed, cp);
        parsed.validate().unwrap();
    }

    #[test]
    fn tampered_body_fails_validation() {
        let m = migration("20240101120000_one", "CREATE TABLE a (x INT);\n");
        let cp = Checkpoint::create(&[m], "CREATE TABLE a (x INT);");
        let mut text = cp.render();
        text.push_str(" -- tampered");
        let parsed = Checkpoint::parse(&text).unwrap();
        assert!(matches!(
            parsed.validate(),
            Err(CheckpointError::VerificationFailed)
        ));
    }

    #[test]
    fn malformed_headers_rejected() {
        assert!(Checkpoint::parse("-- nonsense\nbody").is_err());
        assert!(Checkpoint::parse("-- scurry:migrations=abc,checkpoint=def\nbody").is_err());
    }

    #[test]
    fn newest_matching_checkpoint_wins() {
        let tmp = TempDir::new().unwrap();
        let store = Store::new(tmp.path().join("migrations"));
        let header = Header::default();
        store
            .write_migration("20240101120000_one", "CREATE TABLE a (x INT);", &header)
            .unwrap();
        store
            .write_migration("20240102120000_two", "CREATE TABLE b (y INT);", &header)
            .unwrap();
        let migrations = store.load_migrations().unwrap();

        let cp1 = Checkpoint::create(&migrations[..1], "CREATE TABLE a (x INT);");
        let cp2 = Checkpoint::create(
            &migrations,
            "CREATE TABLE a (x INT); CREATE TABLE b (y INT);",
        );
        write_checkpoint(&store, "20240101120000_one", &cp1).unwrap();
        write_checkpoint(&store, "20240102120000_two", &cp2).unwrap();

        let (idx, found) = latest_valid_checkpoint(&store, &migrations).unwrap();
        assert_eq!(idx, 1);
        assert_eq!(found, cp2);
    }

    #[test]
    fn stale_checkpoint_is_skipped_not_deleted() {
        let tmp = TempDir::new().unwrap();
        let store = Store::new(tmp.path().join("migrations"));
        let header = Header::default();
        store
            .write_migration("20240101120000_one", "CREATE TABLE a (x INT);", &header)
            .unwrap();
        let migrations = store.load_migrations().unwrap();

        // a checkpoint built from different migration content
        let other = vec![migration("x", "SOMETHING ELSE;")];
        let stale = Checkpoint::create(&other, "SOMETHING ELSE;");
        write_checkpoint(&store, "20240101120000_one", &stale).unwrap();

        assert!(latest_valid_checkpoint(&store, &migrations).is_none());
        assert!(store.checkpoint_file("20240101120000_one").exists());
    }

    #[tokio::test]
    async fn remote_cache_round_trip() {
        let cache = RemoteCache::from_url("memory://").unwrap();
        let m = migration("20240101120000_one", "CREATE TABLE a (x INT);\n");
        let cp = Checkpoint::create(&[m], "CREATE TABLE a (x INT);");
        cache.put(&cp).await.unwrap();
        let got = cache.get(&cp.migrations_hash).await.unwrap();
        assert_eq!(got, cp);
        assert!(cache.get(&"0".repeat(64)).await.is_none());
    }
}

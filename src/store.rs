//! The on-disk migration store.
//!
//! Layout under the migrations root:
//!
//! ```text
//! migrations/
//!   schema.sql                        canonical schema after last migration
//!   table_sizes.yaml                  large-table oracle
//!   20240101120000_add_users/
//!     migration.sql                   the migration, optional header line
//!     checkpoint.sql                  optional content-addressed snapshot
//! ```
//!
//! Migration directories are immutable once written. The 14-digit UTC
//! timestamp prefix makes lexicographic order chronological.

use crate::classify::{MigrationMode, TableSizes};
use chrono::Utc;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

pub const MIGRATION_FILE: &str = "migration.sql";
pub const CHECKPOINT_FILE: &str = "checkpoint.sql";
pub const SCHEMA_FILE: &str = "schema.sql";
pub const TABLE_SIZES_FILE: &str = "table_sizes.yaml";

/// Prefix shared by every scurry header comment.
pub const HEADER_PREFIX: &str = "-- scurry:";

const TIMESTAMP_LEN: usize = 14;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid migration name `{0}`: use letters, digits, `_` and `-`")]
    InvalidSlug(String),
    #[error("migration {0} already exists")]
    MigrationExists(String),
    #[error("invalid header in {name}: {reason}")]
    InvalidHeader { name: String, reason: String },
    #[error("could not parse {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// SHA-256 of a migration body, lowercase hex. The header line never
/// participates, so rewriting a header does not change identity.
pub fn checksum(body: &str) -> String {
    hex::encode(Sha256::digest(body.as_bytes()))
}

/// The parsed `-- scurry:mode=…` header.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Header {
    pub mode: MigrationMode,
    pub depends_on: Vec<String>,
}

impl Header {
    pub fn render(&self) -> String {
        let mut line = format!("{}mode={}", HEADER_PREFIX, self.mode);
        if !self.depends_on.is_empty() {
            line.push_str(&format!(",depends_on={}", self.depends_on.join(";")));
        }
        line
    }

    fn parse(line: &str, name: &str) -> Result<Header, StoreError> {
        let rest = line
            .trim()
            .strip_prefix(HEADER_PREFIX)
            .expect("caller checks prefix");
        let mut header = Header::default();
        for part in rest.split(',') {
            let Some((key, value)) = part.split_once('=') else {
                return Err(StoreError::InvalidHeader {
                    name: name.to_string(),
                    reason: format!("malformed entry `{}`", part),
                });
            };
            match key.trim() {
                "mode" => {
                    header.mode = MigrationMode::from_str(value.trim()).map_err(|reason| {
                        StoreError::InvalidHeader {
                            name: name.to_string(),
                            reason,
                        }
                    })?;
                }
                "depends_on" => {
                    header.depends_on = value
                        .split(';')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect();
                }
                other => {
                    return Err(StoreError::InvalidHeader {
                        name: name.to_string(),
                        reason: format!("unknown key `{}`", other),
                    })
                }
            }
        }
        Ok(header)
    }
}

/// Splits an optional header line off a migration file. Returns the
/// header (if present) and the body with the header line removed.
pub fn strip_header<'a>(sql: &'a str, name: &str) -> Result<(Option<Header>, &'a str), StoreError> {
    let first_line_end = sql.find('\n').unwrap_or(sql.len());
    let first_line = &sql[..first_line_end];
    if !first_line.trim_start().starts_with(HEADER_PREFIX) {
        return Ok((None, sql));
    }
    let header = Header::parse(first_line, name)?;
    let body = if first_line_end < sql.len() {
        &sql[first_line_end + 1..]
    } else {
        ""
    };
    Ok((Some(header), body))
}

/// A migration loaded from disk: header parsed, header-stripped body and
/// its checksum.
#[derive(Clone, Debug)]
pub struct MigrationScript {
    pub name: String,
    pub sql: String,
    pub checksum: String,
    pub mode: MigrationMode,
    pub depends_on: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct Store {
    root: PathBuf,
}

fn slug_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_-]*$").expect("valid regex"))
}

impl Store {
    pub fn new(root: impl Into<PathBuf>) -> Store {
        Store { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn migration_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn migration_file(&self, name: &str) -> PathBuf {
        self.migration_dir(name).join(MIGRATION_FILE)
    }

    pub fn checkpoint_file(&self, name: &str) -> PathBuf {
        self.migration_dir(name).join(CHECKPOINT_FILE)
    }

    /// `<UTC timestamp>_<slug>` for a new migration created now.
    pub fn new_migration_name(slug: &str) -> Result<String, StoreError> {
        if !slug_re().is_match(slug) {
            return Err(StoreError::InvalidSlug(slug.to_string()));
        }
        Ok(format!("{}_{}", Utc::now().format("%Y%m%d%H%M%S"), slug))
    }

    /// Reads every migration in timestamp order. Directories shorter than
    /// a timestamp or missing `migration.sql` are skipped.
    pub fn load_migrations(&self) -> Result<Vec<MigrationScript>, StoreError> {
        let mut names = Vec::new();
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        for entry in fs::read_dir(&self.root).map_err(io_err(&self.root))? {
            let entry = entry.map_err(io_err(&self.root))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.len() < TIMESTAMP_LEN {
                continue;
            }
            if !self.migration_file(&name).is_file() {
                continue;
            }
            names.push(name);
        }
        names.sort();

        let mut migrations = Vec::with_capacity(names.len());
        for name in names {
            let path = self.migration_file(&name);
            let raw = fs::read_to_string(&path).map_err(io_err(&path))?;
            let (header, body) = strip_header(&raw, &name)?;
            let header = header.unwrap_or_default();
            migrations.push(MigrationScript {
                checksum: checksum(body),
                sql: body.to_string(),
                name,
                mode: header.mode,
                depends_on: header.depends_on,
            });
        }
        Ok(migrations)
    }

    /// Writes a new immutable migration directory.
    pub fn write_migration(
        &self,
        name: &str,
        sql: &str,
        header: &Header,
    ) -> Result<PathBuf, StoreError> {
        let dir = self.migration_dir(name);
        if dir.exists() {
            return Err(StoreError::MigrationExists(name.to_string()));
        }
        fs::create_dir_all(&dir).map_err(io_err(&dir))?;
        let path = dir.join(MIGRATION_FILE);
        let contents = format!("{}\n{}", header.render(), sql);
        fs::write(&path, contents).map_err(io_err(&path))?;
        Ok(path)
    }

    pub fn read_schema(&self) -> Result<Option<String>, StoreError> {
        let path = self.root.join(SCHEMA_FILE);
        if !path.exists() {
            return Ok(None);
        }
        fs::read_to_string(&path).map(Some).map_err(io_err(&path))
    }

    pub fn write_schema(&self, sql: &str) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root).map_err(io_err(&self.root))?;
        let path = self.root.join(SCHEMA_FILE);
        fs::write(&path, sql).map_err(io_err(&path))
    }

    pub fn load_table_sizes(&self) -> Result<TableSizes, StoreError> {
        let path = self.root.join(TABLE_SIZES_FILE);
        if !path.exists() {
            return Ok(TableSizes::default());
        }
        let raw = fs::read_to_string(&path).map_err(io_err(&path))?;
        serde_yaml::from_str(&raw).map_err(|source| StoreError::Yaml { path, source })
    }

    pub fn write_table_sizes(&self, sizes: &TableSizes) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root).map_err(io_err(&self.root))?;
        let path = self.root.join(TABLE_SIZES_FILE);
        let raw = serde_yaml::to_string(sizes).map_err(|source| StoreError::Yaml {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, raw).map_err(io_err(&path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, Store) {
        let dir = TempDir::new().expect("tempdir");
        let store = Store::new(dir.path().join("migrations"));
        (dir, store)
    }

    #[test]
    fn header_round_trip() {
        let h = Header {
            mode: MigrationMode::Async,
            depends_on: vec!["a".into(), "b".into()],
        };
        let line = h.render();
        assert_eq!(line, "-- scurry:mode=async,depends_on=a;b");
        let content = format!("{}\nSELECT 1", line);
        let (parsed, body) = strip_header(&content, "m").unwrap();
        assert_eq!(parsed.unwrap(), h);
        assert_eq!(body, "SELECT 1");
    }

    #[test]
    fn checksum_ignores_header() {
        let body = "CREATE TABLE t (a INT);\n";
        let with_header = format!("-- scurry:mode=sync\n{}", body);
        let (_, stripped) = strip_header(&with_header, "m").unwrap();
        assert_eq!(checksum(stripped), checksum(body));
    }

    #[test]
    fn headerless_file_is_sync() {
        let (header, body) = strip_header("CREATE TABLE t (a INT);", "m").unwrap();
        assert!(header.is_none());
        assert_eq!(body, "CREATE TABLE t (a INT);");
    }

    #[test]
    fn bad_header_key_rejected() {
        let err = strip_header("-- scurry:mode=sync,nope=1\nX", "m").unwrap_err();
        assert!(matches!(err, StoreError::InvalidHeader { .. }));
    }

    #[test]
    fn slug_validation() {
        assert!(Store::new_migration_name("add-users").is_ok());
        assert!(Store::new_migration_name("add_users2").is_ok());
        assert!(Store::new_migration_name("").is_err());
        assert!(Store::new_migration_name("no spaces").is_err());
        assert!(Store::new_migration_name("9starts-with-digit").is_err());
    }

    #[test]
    fn write_then_load_round_trip() {
        let (_tmp, store) = store();
        let header = Header {
            mode: MigrationMode::Sync,
            depends_on: vec![],
        };
        store
            .write_migration("20240101120000_one", "CREATE TABLE a (x INT);", &header)
            .unwrap();
        store
            .write_migration(
                "20240102120000_two",
                "CREATE TABLE b (y INT);",
                &Header {
                    mode: MigrationMode::Async,
                    depends_on: vec!["20240101120000_one".into()],
                },
            )
            .unwrap();

        let loaded = store.load_migrations().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].name, "20240101120000_one");
        assert_eq!(loaded[0].mode, MigrationMode::Sync);
        assert_eq!(loaded[1].mode, MigrationMode::Async);
        assert_eq!(loaded[1].depends_on, vec!["20240101120000_one"]);
        assert_eq!(loaded[0].checksum, checksum("CREATE TABLE a (x INT);"));
    }

    #[test]
    fn duplicate_migration_rejected() {
        let (_tmp, store) = store();
        let header = Header::default();
        store
            .write_migration("20240101120000_one", "SELECT 1;", &header)
            .unwrap();
        let err = store
            .write_migration("20240101120000_one", "SELECT 2;", &header)
            .unwrap_err();
        assert!(matches!(err, StoreError::MigrationExists(_)));
    }

    #[test]
    fn short_names_are_skipped() {
        let (_tmp, store) = store();
        fs::create_dir_all(store.root().join("short")).unwrap();
        fs::write(store.root().join("short").join(MIGRATION_FILE), "SELECT 1;").unwrap();
        assert!(store.load_migrations().unwrap().is_empty());
    }
}

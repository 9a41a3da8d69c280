//! Embedded, per-tenant storage for generation history, the interaction log and
//! settings, backed by a single SQLite database.
//!
//! [`Database`] owns the lazily opened connection and is handed to the stores
//! by value; every clone shares the same connection. [`SettingsStore`] is a
//! plain key/value table, [`CollectionStore`] is the bounded, tenant-scoped
//! engine used for both history and logs.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use anyhow::Context;
use rusqlite::{Connection, TransactionBehavior};
use tracing::{info, warn};

mod collection;
pub mod schema;
mod settings;

pub use collection::CollectionStore;
pub use schema::{Collection, SCHEMA_VERSION};
pub use settings::SettingsStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage unavailable: {reason}")]
    Unavailable { reason: String },
    #[error("transaction on {collection} failed: {source}")]
    TransactionFailed {
        collection: &'static str,
        #[source]
        source: rusqlite::Error,
    },
    #[error("could not encode or decode a {collection} document: {message}")]
    Codec {
        collection: &'static str,
        message: String,
    },
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

impl StoreError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable { .. })
    }

    pub(crate) fn from_sqlite(collection: &'static str, err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::ToSqlConversionFailure(inner)
            | rusqlite::Error::FromSqlConversionFailure(_, _, inner) => StoreError::Codec {
                collection,
                message: inner.to_string(),
            },
            other => StoreError::TransactionFailed {
                collection,
                source: other,
            },
        }
    }
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    pub busy_timeout: Duration,
}

impl DbConfig {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout: Duration::from_secs(5),
        }
    }

    pub fn in_memory() -> Self {
        Self::at(":memory:")
    }

    /// `<data_dir>/studio/studio.db`, falling back to the working directory.
    pub fn default_path() -> PathBuf {
        let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        base.join(schema::DATABASE_NAME)
            .join(format!("{}.db", schema::DATABASE_NAME))
    }
}

/// Shared handle to the storage engine.
///
/// Nothing is opened until the first operation. The outcome of that open is
/// cached for the lifetime of the handle: a failed open is not retried and
/// every later call reports [`StoreError::Unavailable`].
#[derive(Clone)]
pub struct Database {
    shared: Arc<Shared>,
}

struct Shared {
    config: DbConfig,
    conn: OnceLock<std::result::Result<Mutex<Connection>, String>>,
}

impl Database {
    pub fn new(config: DbConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                conn: OnceLock::new(),
            }),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(DbConfig::in_memory())
    }

    pub fn path(&self) -> &Path {
        &self.shared.config.path
    }

    /// Forces the lazy open and reports its outcome.
    pub fn ensure_open(&self) -> Result<()> {
        self.lock().map(|_| ())
    }

    /// Runs `work` inside one `BEGIN IMMEDIATE` transaction. The transaction
    /// commits only if `work` returns `Ok`; any error rolls back every
    /// statement `work` executed.
    pub fn write<R>(
        &self,
        collection: &'static str,
        work: impl FnOnce(&Connection) -> rusqlite::Result<R>,
    ) -> Result<R> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| StoreError::from_sqlite(collection, e))?;
        let out = work(&*tx).map_err(|e| StoreError::from_sqlite(collection, e))?;
        tx.commit()
            .map_err(|e| StoreError::from_sqlite(collection, e))?;
        Ok(out)
    }

    /// Runs `work` inside a deferred transaction so it sees one snapshot.
    pub fn read<R>(
        &self,
        collection: &'static str,
        work: impl FnOnce(&Connection) -> rusqlite::Result<R>,
    ) -> Result<R> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::from_sqlite(collection, e))?;
        let out = work(&*tx).map_err(|e| StoreError::from_sqlite(collection, e))?;
        tx.commit()
            .map_err(|e| StoreError::from_sqlite(collection, e))?;
        Ok(out)
    }

    pub fn schema_version(&self) -> Result<i64> {
        let conn = self.lock()?;
        schema::stored_version(&conn).map_err(|e| StoreError::from_sqlite("schema", e))
    }

    pub fn integrity_check(&self) -> Result<String> {
        let conn = self.lock()?;
        conn.query_row("PRAGMA integrity_check;", [], |r| r.get(0))
            .map_err(|e| StoreError::from_sqlite("schema", e))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        let opened = self.shared.conn.get_or_init(|| {
            match establish(&self.shared.config) {
                Ok(conn) => Ok(Mutex::new(conn)),
                Err(err) => {
                    let reason = format!("{err:#}");
                    warn!(path = %self.shared.config.path.display(), %reason, "storage unavailable for this session");
                    Err(reason)
                }
            }
        });
        match opened {
            Ok(mutex) => Ok(mutex.lock().unwrap_or_else(|poisoned| {
                warn!("database mutex was poisoned, recovering");
                poisoned.into_inner()
            })),
            Err(reason) => Err(StoreError::Unavailable {
                reason: reason.clone(),
            }),
        }
    }
}

fn establish(config: &DbConfig) -> anyhow::Result<Connection> {
    let mut conn = Connection::open(&config.path)
        .with_context(|| format!("opening sqlite db {}", config.path.display()))?;
    conn.busy_timeout(config.busy_timeout)
        .context("setting busy timeout")?;
    conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")
        .context("applying pragmas")?;
    let outcome = schema::migrate(&mut conn)?;
    if let schema::Migration::Upgraded { from, to } = outcome {
        info!(from, to, path = %config.path.display(), "upgraded storage schema");
    }
    Ok(conn)
}

use crate::error::{DbError, DbResult};
use crate::metadata;
use rusqlite::{Connection, Transaction};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Handle to one target database.
///
/// Cheap to clone; all clones share the same connection. The connection is
/// guarded by a mutex that is only ever held on the blocking pool, never
/// across an await point.
#[derive(Clone)]
pub struct Database {
    inner: Arc<Inner>,
}

struct Inner {
    id: String,
    conn: Mutex<Connection>,
    upgrading: AtomicBool,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("id", &self.inner.id)
            .field("upgrading", &self.is_upgrading())
            .finish()
    }
}

impl Database {
    /// Opens (or creates) a target database file. The target id is the file stem.
    pub fn open(path: &Path) -> DbResult<Self> {
        let id = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "target".to_string());
        let conn = Connection::open(path)?;
        Self::from_connection(id, conn)
    }

    /// Opens a private in-memory target, mostly useful for tests.
    pub fn open_in_memory(id: impl Into<String>) -> DbResult<Self> {
        Self::from_connection(id.into(), Connection::open_in_memory()?)
    }

    fn from_connection(id: String, conn: Connection) -> DbResult<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        metadata::ensure_schema(&conn)?;
        debug!("Opened target {}", id);
        Ok(Self {
            inner: Arc::new(Inner {
                id,
                conn: Mutex::new(conn),
                upgrading: AtomicBool::new(false),
            }),
        })
    }

    /// Returns the target id.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Whether an upgrade is in progress. Reconciliation refuses to run while set.
    pub fn is_upgrading(&self) -> bool {
        self.inner.upgrading.load(Ordering::SeqCst)
    }

    /// Marks the target as upgrading (or not).
    pub fn set_upgrading(&self, upgrading: bool) {
        self.inner.upgrading.store(upgrading, Ordering::SeqCst);
    }

    /// Runs `f` against the connection on the blocking pool.
    pub async fn with_connection<F, T>(&self, f: F) -> DbResult<T>
    where
        F: FnOnce(&Connection) -> DbResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let conn = inner.conn.lock().map_err(|_| DbError::Poisoned)?;
            f(&conn)
        })
        .await?
    }

    /// Runs `f` inside a transaction on the blocking pool.
    ///
    /// The transaction commits when `f` returns `Ok` and rolls back otherwise,
    /// leaving the schema exactly as it was.
    pub async fn transaction<F, T>(&self, f: F) -> DbResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> DbResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = self.inner.clone();
        let target = self.inner.id.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = inner.conn.lock().map_err(|_| DbError::Poisoned)?;
            let tx = conn.transaction()?;
            match f(&tx) {
                Ok(value) => {
                    tx.commit()?;
                    Ok(value)
                }
                Err(e) => {
                    warn!("Rolling back transaction on {}: {}", target, e);
                    if let Err(rollback_err) = tx.rollback() {
                        warn!("Rollback failed on {}: {}", target, rollback_err);
                    }
                    Err(e)
                }
            }
        })
        .await?
    }

    /// Names of the installed modules, sorted.
    pub async fn installed_modules(&self) -> DbResult<Vec<String>> {
        self.with_connection(|conn| metadata::installed_modules(conn))
            .await
    }

    /// Installed modules mapped to the modules they depend on.
    pub async fn installed_dependencies(&self) -> DbResult<BTreeMap<String, Vec<String>>> {
        self.with_connection(|conn| metadata::installed_dependencies(conn))
            .await
    }

    /// User tables present in the target, excluding cloudrow's own bookkeeping.
    pub async fn existing_tables(&self) -> DbResult<Vec<String>> {
        self.with_connection(|conn| metadata::existing_tables(conn))
            .await
    }
}

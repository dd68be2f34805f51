//! Database lifecycle and schema migration
//!
//! [`Database`] owns the single shared SQLite connection and the
//! `Closed -> Opening -> (Upgrading ->) Ready` state machine. Every store
//! operation awaits readiness on a watch channel before touching the
//! connection, so callers that race an upgrade wait for it instead of
//! failing on a missing partition.
//!
//! The physical schema version lives in `PRAGMA user_version`. Upgrading
//! creates every registry partition declared at or below the target version
//! that is not yet on disk; existing tables are never altered.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{Result, StoreError};
use crate::registry;
use crate::schema::{create_partition_sql, CURRENT_SCHEMA_VERSION, SCHEMA_CREATE_METADATA};

/// Default time an operation waits for the database to become ready.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle state of a [`Database`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbState {
    Closed,
    Opening,
    Upgrading,
    Ready,
}

/// Options for opening a cache database.
#[derive(Clone)]
pub struct DatabaseOptions {
    /// SQLite file path
    pub path: PathBuf,
    /// Schema version to open at
    pub schema_version: u32,
    /// Upper bound on waiting for readiness
    pub ready_timeout: Duration,
    /// Run a forced upgrade when a write hits a missing partition
    pub auto_upgrade: bool,
    /// Source of `added_at` stamps
    pub clock: Arc<dyn Clock>,
}

impl DatabaseOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            schema_version: CURRENT_SCHEMA_VERSION,
            ready_timeout: DEFAULT_READY_TIMEOUT,
            auto_upgrade: true,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_schema_version(mut self, version: u32) -> Self {
        self.schema_version = version;
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn with_auto_upgrade(mut self, enabled: bool) -> Self {
        self.auto_upgrade = enabled;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl std::fmt::Debug for DatabaseOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseOptions")
            .field("path", &self.path)
            .field("schema_version", &self.schema_version)
            .field("ready_timeout", &self.ready_timeout)
            .field("auto_upgrade", &self.auto_upgrade)
            .finish_non_exhaustive()
    }
}

struct Shared {
    conn: Mutex<Option<Connection>>,
    state: watch::Sender<DbState>,
    /// Serializes open / close / forced upgrade
    lifecycle: tokio::sync::Mutex<()>,
    options: DatabaseOptions,
}

/// Handle to the cache database. Cheap to clone; all clones share one
/// connection and one lifecycle.
#[derive(Clone)]
pub struct Database {
    inner: Arc<Shared>,
}

impl Database {
    /// Create a handle in the `Closed` state. Call [`Database::open`] before use.
    pub fn new(options: DatabaseOptions) -> Self {
        let (state, _) = watch::channel(DbState::Closed);
        Self {
            inner: Arc::new(Shared {
                conn: Mutex::new(None),
                state,
                lifecycle: tokio::sync::Mutex::new(()),
                options,
            }),
        }
    }

    /// Create a handle and open it.
    pub async fn connect(options: DatabaseOptions) -> Result<Self> {
        let db = Self::new(options);
        db.open().await?;
        Ok(db)
    }

    pub fn options(&self) -> &DatabaseOptions {
        &self.inner.options
    }

    pub fn path(&self) -> &Path {
        &self.inner.options.path
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.options.clock
    }

    pub fn state(&self) -> DbState {
        *self.inner.state.borrow()
    }

    /// Open the connection, upgrading the schema if the requested version
    /// is ahead of the one on disk. No-op when already open.
    pub async fn open(&self) -> Result<()> {
        let _guard = self.inner.lifecycle.lock().await;
        if self.state() == DbState::Ready {
            return Ok(());
        }

        self.inner.state.send_replace(DbState::Opening);
        let inner = Arc::clone(&self.inner);
        let opened = tokio::task::spawn_blocking(move || {
            let options = &inner.options;
            let conn = open_connection(&options.path, options.schema_version, &inner.state)?;
            *inner.conn.lock() = Some(conn);
            Ok::<_, StoreError>(())
        })
        .await
        .map_err(StoreError::from)
        .and_then(|r| r);

        match opened {
            Ok(()) => {
                self.inner.state.send_replace(DbState::Ready);
                info!(
                    "Cache database ready at {:?} (schema v{})",
                    self.inner.options.path, self.inner.options.schema_version
                );
                Ok(())
            }
            Err(e) => {
                self.inner.state.send_replace(DbState::Closed);
                Err(e)
            }
        }
    }

    /// Close the connection. Pending and future operations fail with
    /// [`StoreError::Unavailable`] until the database is reopened.
    pub async fn close(&self) -> Result<()> {
        let _guard = self.inner.lifecycle.lock().await;
        self.inner.state.send_replace(DbState::Closed);
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            if let Some(conn) = inner.conn.lock().take() {
                conn.close().map_err(|(_, e)| StoreError::from(e))?;
            }
            Ok::<_, StoreError>(())
        })
        .await??;
        debug!("Cache database closed");
        Ok(())
    }

    /// Reopen the database at `on_disk + 1` purely to create missing
    /// partitions. Existing partition contents are untouched. Operations
    /// issued meanwhile wait for the upgrade to finish.
    ///
    /// Returns the new schema version.
    pub async fn force_upgrade(&self) -> Result<u32> {
        self.wait_ready().await?;
        let _guard = self.inner.lifecycle.lock().await;
        if self.state() != DbState::Ready {
            return Err(StoreError::unavailable("database closed during upgrade"));
        }

        self.inner.state.send_replace(DbState::Upgrading);
        let inner = Arc::clone(&self.inner);
        let upgraded = tokio::task::spawn_blocking(move || {
            let mut guard = inner.conn.lock();
            let old = guard
                .take()
                .ok_or_else(|| StoreError::unavailable("database is closed"))?;
            let current = read_user_version(&old)?;
            old.close().map_err(|(_, e)| StoreError::from(e))?;

            let target = current + 1;
            let conn = open_connection(&inner.options.path, target, &inner.state)?;
            *guard = Some(conn);
            Ok::<_, StoreError>(target)
        })
        .await
        .map_err(StoreError::from)
        .and_then(|r| r);

        match upgraded {
            Ok(version) => {
                self.inner.state.send_replace(DbState::Ready);
                info!("Forced upgrade complete (schema v{})", version);
                Ok(version)
            }
            Err(e) => {
                warn!("Forced upgrade failed: {}", e);
                self.inner.state.send_replace(DbState::Closed);
                Err(e)
            }
        }
    }

    /// Wait until the database is `Ready`.
    ///
    /// Fails with [`StoreError::Unavailable`] if it is (or becomes) closed,
    /// or if it is not ready within the configured timeout.
    pub async fn wait_ready(&self) -> Result<()> {
        let mut rx = self.inner.state.subscribe();
        let wait = async {
            loop {
                let state = *rx.borrow_and_update();
                match state {
                    DbState::Ready => return Ok(()),
                    DbState::Closed => return Err(StoreError::unavailable("database is closed")),
                    DbState::Opening | DbState::Upgrading => {}
                }
                if rx.changed().await.is_err() {
                    return Err(StoreError::unavailable("database handle dropped"));
                }
            }
        };

        let timeout = self.inner.options.ready_timeout;
        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::unavailable(format!(
                "database not ready after {:?}",
                timeout
            ))),
        }
    }

    /// Run `f` against the connection on the blocking pool once ready.
    pub(crate) async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.wait_ready().await?;
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut guard = inner.conn.lock();
            let conn = guard
                .as_mut()
                .ok_or_else(|| StoreError::unavailable("database is closed"))?;
            f(conn)
        })
        .await?
    }

    /// Physical schema version currently on disk.
    pub async fn schema_version(&self) -> Result<u32> {
        self.call(|conn| read_user_version(conn)).await
    }

    /// Names of the registry partitions that exist on disk.
    pub async fn existing_partitions(&self) -> Result<Vec<String>> {
        self.call(|conn| {
            let tables = existing_tables(conn)?;
            Ok(registry::partitions()
                .iter()
                .filter(|p| tables.contains(p.name))
                .map(|p| p.name.to_string())
                .collect())
        })
        .await
    }

    /// Read a value from the metadata table.
    pub async fn metadata(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.call(move |conn| get_metadata(conn, &key)).await
    }
}

/// Open (or create) the database file and bring it to `version`.
///
/// Publishes `Upgrading` on `state` if an upgrade runs.
fn open_connection(
    path: &Path,
    version: u32,
    state: &watch::Sender<DbState>,
) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut conn = Connection::open(path)?;
    configure_connection(&conn)?;

    let on_disk = read_user_version(&conn)?;
    if on_disk > version {
        // Forced upgrades bump user_version past the registry without
        // declaring anything new; only a newer registry is a real conflict.
        let declared = get_metadata(&conn, "registry_version")?
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(on_disk);
        if declared > version {
            return Err(StoreError::SchemaTooNew {
                on_disk,
                requested: version,
            });
        }
        debug!(
            "Schema v{} was bumped by a forced upgrade, opening in place",
            on_disk
        );
        return Ok(conn);
    }

    if version > on_disk {
        state.send_replace(DbState::Upgrading);
        let created = upgrade(&mut conn, on_disk, version)?;
        info!(
            "Upgraded cache schema v{} -> v{} ({} partitions created)",
            on_disk,
            version,
            created.len()
        );
    } else {
        debug!("Cache schema already at v{}", on_disk);
    }

    Ok(conn)
}

/// Configure connection settings
fn configure_connection(conn: &Connection) -> SqliteResult<()> {
    // WAL keeps readers off the writer's back
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(())
}

/// Create every partition declared at or below `to` that is not on disk,
/// then record the new version. Safe to run repeatedly.
pub(crate) fn upgrade(conn: &mut Connection, from: u32, to: u32) -> Result<Vec<&'static str>> {
    let tx = conn.transaction()?;
    tx.execute_batch(SCHEMA_CREATE_METADATA)?;

    let existing = existing_tables(&tx)?;
    let mut created = Vec::new();
    for spec in registry::partitions_at(to) {
        if existing.contains(spec.name) {
            continue;
        }
        tx.execute_batch(&create_partition_sql(spec.name))?;
        debug!("Created partition {} (declared in v{})", spec.name, spec.since_version);
        created.push(spec.name);
    }

    tx.execute(
        "INSERT OR IGNORE INTO cache_metadata (key, value) VALUES ('created_by', ?1)",
        params![env!("CARGO_PKG_VERSION")],
    )?;
    tx.execute(
        "INSERT OR REPLACE INTO cache_metadata (key, value) VALUES ('upgraded_from', ?1)",
        params![from.to_string()],
    )?;
    let declared = get_metadata(&tx, "registry_version")?
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(0)
        .max(to.min(CURRENT_SCHEMA_VERSION));
    set_metadata(&tx, "registry_version", &declared.to_string())?;
    tx.pragma_update(None, "user_version", to)?;
    tx.commit()?;

    Ok(created)
}

pub(crate) fn read_user_version(conn: &Connection) -> Result<u32> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    Ok(version.max(0) as u32)
}

pub(crate) fn existing_tables(conn: &Connection) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table'")?;
    let tables = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<SqliteResult<HashSet<_>>>()?;
    Ok(tables)
}

pub(crate) fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub(crate) fn get_metadata(conn: &Connection, key: &str) -> Result<Option<String>> {
    if !table_exists(conn, "cache_metadata")? {
        return Ok(None);
    }
    let value = conn
        .query_row(
            "SELECT value FROM cache_metadata WHERE key = ?1",
            [key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

pub(crate) fn set_metadata(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO cache_metadata (key, value) VALUES (?1, ?2)",
        params![key, value],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn options(dir: &TempDir) -> DatabaseOptions {
        DatabaseOptions::new(dir.path().join("cache.db"))
            .with_ready_timeout(Duration::from_millis(500))
    }

    #[tokio::test]
    async fn test_open_creates_all_partitions() {
        let dir = TempDir::new().unwrap();
        let db = Database::connect(options(&dir)).await.unwrap();

        assert_eq!(db.state(), DbState::Ready);
        assert_eq!(db.schema_version().await.unwrap(), CURRENT_SCHEMA_VERSION);
        let existing = db.existing_partitions().await.unwrap();
        assert_eq!(existing.len(), registry::partitions().len());
        assert_eq!(
            db.metadata("created_by").await.unwrap().as_deref(),
            Some(env!("CARGO_PKG_VERSION"))
        );
    }

    #[tokio::test]
    async fn test_open_at_older_version_creates_subset() {
        let dir = TempDir::new().unwrap();
        let db = Database::connect(options(&dir).with_schema_version(1))
            .await
            .unwrap();

        let existing = db.existing_partitions().await.unwrap();
        assert!(existing.contains(&"profiles".to_string()));
        assert!(!existing.contains(&"emoji_lists".to_string()));
        assert_eq!(existing.len(), registry::partitions_at(1).count());
    }

    #[tokio::test]
    async fn test_operations_before_open_are_unavailable() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(options(&dir));

        let err = db.schema_version().await.unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_close_then_reopen() {
        let dir = TempDir::new().unwrap();
        let db = Database::connect(options(&dir)).await.unwrap();

        db.close().await.unwrap();
        assert_eq!(db.state(), DbState::Closed);
        assert!(db.schema_version().await.unwrap_err().is_retryable());

        db.open().await.unwrap();
        assert_eq!(db.schema_version().await.unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_schema_too_new() {
        let dir = TempDir::new().unwrap();
        let db = Database::connect(options(&dir)).await.unwrap();
        db.close().await.unwrap();

        let older = Database::new(options(&dir).with_schema_version(1));
        let err = older.open().await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::SchemaTooNew {
                on_disk: CURRENT_SCHEMA_VERSION,
                requested: 1
            }
        ));
        assert_eq!(older.state(), DbState::Closed);
    }

    #[tokio::test]
    async fn test_force_upgrade_bumps_version() {
        let dir = TempDir::new().unwrap();
        let db = Database::connect(options(&dir).with_schema_version(1))
            .await
            .unwrap();

        let version = db.force_upgrade().await.unwrap();
        assert_eq!(version, 2);
        assert_eq!(db.state(), DbState::Ready);

        let existing = db.existing_partitions().await.unwrap();
        assert!(existing.contains(&"emoji_lists".to_string()));
        assert!(!existing.contains(&"app_data".to_string()));
        assert_eq!(
            db.metadata("upgraded_from").await.unwrap().as_deref(),
            Some("1")
        );
    }

    #[tokio::test]
    async fn test_reopen_after_forced_bump() {
        let dir = TempDir::new().unwrap();
        let db = Database::connect(options(&dir)).await.unwrap();
        assert_eq!(db.force_upgrade().await.unwrap(), CURRENT_SCHEMA_VERSION + 1);
        db.close().await.unwrap();

        // A fresh handle at the compiled-in version still opens
        let reopened = Database::connect(options(&dir)).await.unwrap();
        assert_eq!(
            reopened.schema_version().await.unwrap(),
            CURRENT_SCHEMA_VERSION + 1
        );
    }

    #[test]
    fn test_upgrade_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        let first = upgrade(&mut conn, 0, CURRENT_SCHEMA_VERSION).unwrap();
        assert_eq!(first.len(), registry::partitions().len());

        let second = upgrade(&mut conn, CURRENT_SCHEMA_VERSION, CURRENT_SCHEMA_VERSION).unwrap();
        assert!(second.is_empty());
        assert_eq!(read_user_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_waiters_resume_after_upgrade() {
        let dir = TempDir::new().unwrap();
        let db = Database::connect(options(&dir).with_schema_version(2))
            .await
            .unwrap();

        let upgrader = db.clone();
        let upgrade = tokio::spawn(async move { upgrader.force_upgrade().await });
        // Issued concurrently with the upgrade; must not observe a closed connection
        let reads: Vec<_> = (0..8)
            .map(|_| {
                let db = db.clone();
                tokio::spawn(async move { db.existing_partitions().await })
            })
            .collect();

        assert_eq!(upgrade.await.unwrap().unwrap(), 3);
        for read in reads {
            assert!(read.await.unwrap().is_ok());
        }
    }
}

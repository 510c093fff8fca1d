//! Engine handle construction and per-database connection pools.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};

use crate::DbError;

/// Runtime tunables for SQLite connection behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbRuntimeSettings {
    /// Busy timeout for SQLite connections, in milliseconds.
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled SQLite connections per database.
    pub pool_max_size: u32,

    /// How long a caller waits for a free pooled connection, in milliseconds.
    pub acquire_timeout_ms: u64,
}

impl DbRuntimeSettings {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Rejects values the pool cannot be built with.
    pub fn validate(&self) -> Result<(), DbError> {
        if self.pool_max_size == 0 {
            return Err(DbError::InvalidSettings(
                "pool_max_size must be at least 1".into(),
            ));
        }
        if self.acquire_timeout_ms == 0 {
            return Err(DbError::InvalidSettings(
                "acquire_timeout_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl Default for DbRuntimeSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            pool_max_size: 5,
            acquire_timeout_ms: 5_000,
        }
    }
}

/// A type alias for the SQLite connection pool.
pub type DbPool = Pool<SqliteConnectionManager>;

/// A pooled connection on loan to one call. Returned to the pool on drop.
pub type Lease = PooledConnection<SqliteConnectionManager>;

/// Longest single wait between cancellation checks while leasing.
const LEASE_POLL_INTERVAL: Duration = Duration::from_millis(50);

fn open_flags() -> OpenFlags {
    OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX
}

/// Applies the per-connection settings: busy timeout, WAL journal, foreign keys.
fn init_connection(conn: &mut Connection, busy_timeout_ms: u64) -> rusqlite::Result<()> {
    // Set first so the WAL switch waits on concurrent openers.
    conn.busy_timeout(Duration::from_millis(busy_timeout_ms))?;

    // In-memory databases report "memory", which is acceptable.
    let journal_mode: String = conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
    if journal_mode != "wal" && journal_mode != "memory" {
        return Err(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
            Some(format!(
                "failed to set WAL journal mode, got: {}",
                journal_mode
            )),
        ));
    }
    conn.execute_batch("PRAGMA foreign_keys = ON;")
}

/// Opens (creating if needed) a single engine handle at `path`.
///
/// This is the constructor shared by the pools and by raw-protocol
/// sessions, which hold one dedicated handle each.
pub fn open_connection(path: &Path, settings: DbRuntimeSettings) -> rusqlite::Result<Connection> {
    let mut conn = Connection::open_with_flags(path, open_flags())?;
    init_connection(&mut conn, settings.busy_timeout_ms)?;
    Ok(conn)
}

/// Creates a new SQLite connection pool with WAL mode and foreign keys enabled.
///
/// Connections are opened on demand, so building the pool does not touch
/// the file.
///
/// # Errors
///
/// Returns `DbError::InvalidSettings` for a zero pool size or acquire
/// timeout, and `DbError::Pool` if `r2d2` rejects the pool.
pub fn create_pool(db_path: &Path, settings: DbRuntimeSettings) -> Result<DbPool, DbError> {
    settings.validate()?;
    let busy_timeout_ms = settings.busy_timeout_ms;
    let manager = SqliteConnectionManager::file(db_path)
        .with_flags(open_flags())
        .with_init(move |conn| init_connection(conn, busy_timeout_ms));

    Pool::builder()
        .max_size(settings.pool_max_size)
        .min_idle(Some(0))
        .connection_timeout(settings.acquire_timeout())
        .build(manager)
        .map_err(|source| DbError::Pool {
            database: db_path.display().to_string(),
            source,
        })
}

/// The pool serving one logical database.
#[derive(Debug)]
pub struct DatabasePool {
    name: String,
    path: PathBuf,
    pool: DbPool,
}

impl DatabasePool {
    pub(crate) fn new(name: String, path: PathBuf, pool: DbPool) -> Self {
        Self { name, path, pool }
    }

    /// The logical database name this pool serves.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The database file backing this pool.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Maximum number of concurrently leased handles.
    pub fn max_size(&self) -> u32 {
        self.pool.max_size()
    }

    /// Leases a handle, blocking until one is free or the acquire timeout
    /// elapses. Call from a blocking context.
    pub fn lease(&self) -> Result<Lease, DbError> {
        self.pool.get().map_err(|e| {
            tracing::warn!(database = %self.name, error = %e, "connection lease timed out");
            DbError::LeaseTimeout {
                database: self.name.clone(),
            }
        })
    }

    /// Like [`lease`](Self::lease), but gives up with [`DbError::Cancelled`]
    /// as soon as `cancelled` reports true. Call from a blocking context.
    pub fn lease_until_cancelled(
        &self,
        cancelled: impl Fn() -> bool,
    ) -> Result<Lease, DbError> {
        let deadline = Instant::now() + self.pool.connection_timeout();
        loop {
            if cancelled() {
                return Err(DbError::Cancelled);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                tracing::warn!(database = %self.name, "connection lease timed out");
                return Err(DbError::LeaseTimeout {
                    database: self.name.clone(),
                });
            }
            if let Ok(lease) = self.pool.get_timeout(remaining.min(LEASE_POLL_INTERVAL)) {
                return Ok(lease);
            }
        }
    }

    /// Leases a handle only if one is free right now.
    pub fn try_lease(&self) -> Option<Lease> {
        self.pool.try_get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_file_pool() {
        let dir = tempfile::tempdir().unwrap();
        let settings = DbRuntimeSettings {
            busy_timeout_ms: 2_500,
            pool_max_size: 3,
            acquire_timeout_ms: 1_000,
        };

        let pool = create_pool(&dir.path().join("app.db"), settings)
            .expect("pool creation should succeed");
        assert_eq!(pool.state().connections, 0, "connections open on demand");
        let conn = pool.get().expect("should get a connection");

        let mode: String = conn
            .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
            .expect("should query journal_mode");
        assert_eq!(mode, "wal");

        let busy_timeout: i32 = conn
            .query_row("PRAGMA busy_timeout;", [], |row| row.get(0))
            .expect("should query busy_timeout");
        assert_eq!(busy_timeout, 2_500, "busy timeout should match settings");

        assert_eq!(pool.max_size(), 3, "pool max size should match settings");
    }

    #[test]
    fn zero_pool_size_or_timeout_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.db");
        for settings in [
            DbRuntimeSettings {
                pool_max_size: 0,
                ..DbRuntimeSettings::default()
            },
            DbRuntimeSettings {
                acquire_timeout_ms: 0,
                ..DbRuntimeSettings::default()
            },
        ] {
            assert!(matches!(
                create_pool(&path, settings),
                Err(DbError::InvalidSettings(_))
            ));
        }
    }

    #[test]
    fn open_connection_creates_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fresh.db");
        assert!(!path.exists());

        let conn = open_connection(&path, DbRuntimeSettings::default()).unwrap();
        let fk: i32 = conn
            .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fk, 1);
        assert!(path.exists());
    }

    #[test]
    fn open_connection_fails_for_missing_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no-such-dir").join("x.db");
        assert!(open_connection(&path, DbRuntimeSettings::default()).is_err());
    }
}

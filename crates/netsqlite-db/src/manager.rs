//! Registry of per-database connection pools.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::pool::{create_pool, open_connection, DatabasePool, DbRuntimeSettings};
use crate::DbError;

/// Maps logical database names to their connection pools.
///
/// Pools are created lazily on first access and live until [`close_all`]
/// (or the manager is dropped). At most one pool exists per name, even when
/// several callers race on first access.
///
/// [`close_all`]: PoolManager::close_all
#[derive(Debug)]
pub struct PoolManager {
    data_dir: PathBuf,
    settings: DbRuntimeSettings,
    pools: RwLock<HashMap<String, Arc<DatabasePool>>>,
}

impl PoolManager {
    /// Creates a manager rooted at `data_dir`, creating the directory if
    /// it does not exist. Unusable pool settings are rejected here, before
    /// any pool is built.
    pub fn new(data_dir: impl Into<PathBuf>, settings: DbRuntimeSettings) -> Result<Self, DbError> {
        settings.validate()?;
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir).map_err(|source| DbError::Io {
            path: data_dir.clone(),
            source,
        })?;
        Ok(Self {
            data_dir,
            settings,
            pools: RwLock::new(HashMap::new()),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn settings(&self) -> DbRuntimeSettings {
        self.settings
    }

    /// Maps a logical name to its file under the data directory.
    ///
    /// The name must be exactly one plain path component, so it can never
    /// address a file outside the data directory.
    pub fn resolve_path(&self, name: &str) -> Result<PathBuf, DbError> {
        validate_name(name)?;
        Ok(self.data_dir.join(name))
    }

    /// Returns the pool for `name`, creating it on first access.
    ///
    /// Creation opens a trial connection first so open failures (bad path,
    /// not a database, permissions) surface immediately. Failures are not
    /// cached: the next call tries again.
    pub fn acquire_pool(&self, name: &str) -> Result<Arc<DatabasePool>, DbError> {
        let path = self.resolve_path(name)?;

        if let Some(pool) = self.read_pools().get(name) {
            return Ok(Arc::clone(pool));
        }

        // The trial open runs before the write lock is taken.
        drop(
            open_connection(&path, self.settings).map_err(|source| DbError::Open {
                database: name.to_string(),
                source,
            })?,
        );

        let mut pools = self
            .pools
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        // Another caller may have created it while we waited for the lock.
        if let Some(pool) = pools.get(name) {
            return Ok(Arc::clone(pool));
        }

        let db_pool = create_pool(&path, self.settings).map_err(|e| match e {
            DbError::Pool { source, .. } => DbError::Pool {
                database: name.to_string(),
                source,
            },
            other => other,
        })?;

        let pool = Arc::new(DatabasePool::new(name.to_string(), path, db_pool));
        pools.insert(name.to_string(), Arc::clone(&pool));
        tracing::info!(
            database = %name,
            path = %pool.path().display(),
            max_size = self.settings.pool_max_size,
            "created connection pool"
        );
        Ok(pool)
    }

    /// Number of registered pools.
    pub fn len(&self) -> usize {
        self.read_pools().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_pools().is_empty()
    }

    /// Removes every pool from the registry. Each pool closes its
    /// connections once the last outstanding lease or handle is dropped.
    pub fn close_all(&self) {
        let drained: Vec<_> = self
            .pools
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain()
            .collect();
        for (name, _) in &drained {
            tracing::info!(database = %name, "closing connection pool");
        }
    }

    fn read_pools(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<DatabasePool>>> {
        self.pools
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn validate_name(name: &str) -> Result<(), DbError> {
    if name.is_empty() {
        return Err(DbError::InvalidArgument("database_name is required".into()));
    }
    if name.contains(['/', '\\', '\0']) {
        return Err(DbError::InvalidName(name.to_string()));
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(DbError::InvalidName(name.to_string())),
    }
}

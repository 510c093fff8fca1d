//! Database layer for netsqlite.
//!
//! Provides the per-database connection-pool registry ([`PoolManager`]),
//! SQLite handle construction with WAL-mode initialization, and the
//! transport-agnostic [`engine`] core that both the RPC service and the raw
//! protocol delegate to.
//!
//! # Design decisions
//!
//! - **One file per logical database**: a name maps to `<data_dir>/<name>`
//!   and must be a single path component, so callers cannot address files
//!   outside the data directory.
//! - **`r2d2` connection pool per database**: bounded connection reuse with a
//!   bounded wait for a free handle. Leases return to the pool on drop, on
//!   every exit path.
//! - **Lazy, exactly-once pool creation**: a read-mostly `RwLock` registry
//!   with a re-check under the write lock.

mod cancel;
pub mod engine;
mod error;
mod manager;
mod pool;

pub use cancel::{CancelFlag, CancelGuard};
pub use engine::{ExecOutcome, RowSink, SinkClosed};
pub use error::DbError;
pub use manager::PoolManager;
pub use pool::{create_pool, open_connection, DatabasePool, DbPool, DbRuntimeSettings, Lease};

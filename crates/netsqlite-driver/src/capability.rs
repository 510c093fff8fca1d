//! The generic database-driver contract.

use async_trait::async_trait;
use netsqlite_types::SqlValue;

use crate::error::DriverError;
use crate::result::ExecResult;

/// Optional features a connection may or may not provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Ping,
    Execute,
    Query,
    /// Affected-row counts on exec results.
    RowsAffected,
    /// Last inserted row id on exec results.
    LastInsertId,
    PreparedStatements,
    Transactions,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Ping => "ping",
            Self::Execute => "execute",
            Self::Query => "query",
            Self::RowsAffected => "rows affected count",
            Self::LastInsertId => "last insert id",
            Self::PreparedStatements => "prepared statements",
            Self::Transactions => "transactions",
        })
    }
}

/// A connection to a SQL database.
///
/// Implementations that lack a capability report `false` from
/// [`supports`](SqlConnection::supports) and return
/// [`DriverError::Unsupported`] from the matching method rather than
/// silently doing nothing.
#[async_trait]
pub trait SqlConnection: Send + Sync {
    /// Result cursor returned by [`query`](SqlConnection::query).
    type Rows: Send;
    /// Prepared statement handle.
    type Statement: Send;
    /// Open transaction handle.
    type Transaction: Send;

    fn supports(&self, capability: Capability) -> bool;

    async fn ping(&self) -> Result<(), DriverError>;

    /// Executes a statement with positional arguments.
    async fn execute(&self, sql: &str, args: &[SqlValue]) -> Result<ExecResult, DriverError>;

    /// Runs a query with positional arguments and returns a row cursor.
    async fn query(&self, sql: &str, args: &[SqlValue]) -> Result<Self::Rows, DriverError>;

    async fn prepare(&self, sql: &str) -> Result<Self::Statement, DriverError>;

    async fn begin(&self) -> Result<Self::Transaction, DriverError>;

    /// Releases the connection. Idempotent.
    async fn close(&self) -> Result<(), DriverError>;
}

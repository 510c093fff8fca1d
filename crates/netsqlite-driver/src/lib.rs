//! Client driver for netsqlite.
//!
//! Connections are opened from a connection string:
//!
//! ```text
//! netsqlite://host:port/<token>?database=<name>[&tls=true]
//! ```
//!
//! ```no_run
//! use netsqlite_driver::{Driver, SqlConnection, SqlValue};
//!
//! # async fn demo() -> Result<(), netsqlite_driver::DriverError> {
//! let conn = Driver::open("netsqlite://127.0.0.1:3541/secret?database=app.db").await?;
//! conn.execute("CREATE TABLE IF NOT EXISTS kv (k TEXT, v TEXT)", &[]).await?;
//! conn.execute(
//!     "INSERT INTO kv VALUES (?, ?)",
//!     &[SqlValue::from("k1"), SqlValue::from("v1")],
//! )
//! .await?;
//!
//! let mut rows = conn.query("SELECT v FROM kv WHERE k = ?", &[SqlValue::from("k1")]).await?;
//! while let Some(row) = rows.next().await? {
//!     let v: String = row.get(0)?;
//!     println!("{v}");
//! }
//! conn.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Statements run over the server's RPC transport. [`raw::RawClient`] speaks
//! the framed TCP protocol instead.

mod capability;
mod conn;
pub mod dsn;
mod error;
pub mod raw;
mod result;
mod rows;

pub use capability::{Capability, SqlConnection};
pub use conn::{Connection, Connector, CONNECT_PING_TIMEOUT};
pub use dsn::{parse_dsn, Config, DsnError};
pub use error::DriverError;
pub use netsqlite_types::{Code, FromSqlValue, RpcStatus, SqlValue, ValueError};
pub use result::ExecResult;
pub use rows::{Row, Rows};

/// Entry point mirroring a registered database driver.
pub struct Driver;

impl Driver {
    /// Parses `dsn` and opens a verified connection.
    pub async fn open(dsn: &str) -> Result<Connection, DriverError> {
        let config = parse_dsn(dsn)?;
        Connector::new(config).connect().await
    }
}

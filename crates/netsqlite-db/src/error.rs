use std::path::PathBuf;

use netsqlite_types::Code;
use thiserror::Error;

/// Errors produced by the pool manager and the engine core.
#[derive(Debug, Error)]
pub enum DbError {
    /// The logical database name is empty or could escape the data directory.
    #[error("invalid database name {0:?}")]
    InvalidName(String),

    /// A call argument is malformed (e.g. empty SQL).
    #[error("{0}")]
    InvalidArgument(String),

    /// Pool settings that cannot be used (zero size or timeout).
    #[error("invalid database settings: {0}")]
    InvalidSettings(String),

    /// The data directory could not be created or used.
    #[error("data directory {path} unusable: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The engine handle could not be opened or initialized.
    #[error("failed to open database {database}: {source}")]
    Open {
        database: String,
        #[source]
        source: rusqlite::Error,
    },

    /// The connection pool could not be built.
    #[error("failed to create connection pool for {database}: {source}")]
    Pool {
        database: String,
        #[source]
        source: r2d2::Error,
    },

    /// No handle became free within the acquire timeout.
    #[error("timed out waiting for a connection to {database}")]
    LeaseTimeout { database: String },

    /// The engine rejected or failed a statement.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A column value could not be represented as a `SqlValue`.
    #[error("cannot convert column {column}: {reason}")]
    Conversion { column: String, reason: String },

    /// The caller went away before or during the call.
    #[error("call cancelled by caller")]
    Cancelled,
}

impl DbError {
    /// Maps the error onto the shared status taxonomy.
    pub fn code(&self) -> Code {
        match self {
            Self::InvalidName(_) | Self::InvalidArgument(_) => Code::InvalidArgument,
            Self::Cancelled => Code::Cancelled,
            _ => Code::Internal,
        }
    }
}

use netsqlite_types::frame::FrameError;
use netsqlite_types::{RpcStatus, ValueError};
use thiserror::Error;

use crate::capability::Capability;
use crate::dsn::DsnError;

/// Errors surfaced by the driver.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Dsn(#[from] DsnError),

    /// The initial connectivity check failed; the connection was discarded.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: Box<DriverError>,
    },

    /// The connection is closed, unauthenticated or its transport broke.
    /// Callers should discard it and open a new one.
    #[error("bad connection: {0}")]
    BadConnection(String),

    /// The server rejected the call. The connection stays usable.
    #[error("server returned {0}")]
    Status(RpcStatus),

    /// The raw-protocol server answered with an error envelope.
    #[error("server error: {0}")]
    Server(String),

    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),

    /// The server sent something that violates the wire contract.
    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("{0} is not supported")]
    Unsupported(Capability),

    #[error("column index {index} out of range for {width} columns")]
    ColumnIndex { index: usize, width: usize },

    #[error("no column named {0:?}")]
    ColumnName(String),

    #[error(transparent)]
    Value(#[from] ValueError),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl DriverError {
    /// Returns `true` when the connection must be discarded.
    pub fn is_bad_connection(&self) -> bool {
        matches!(self, Self::BadConnection(_) | Self::Connect { .. })
    }
}

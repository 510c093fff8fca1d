//! Shared types, wire messages, and constants for netsqlite.
//!
//! This crate provides the foundational types used across all netsqlite
//! crates: the closed [`SqlValue`] variant every argument and result value
//! travels through, the status [`Code`] taxonomy, the JSON messages of the
//! RPC transport ([`rpc`]), the raw-protocol envelope ([`envelope`]) and the
//! length-prefixed frame codec both raw-protocol peers use ([`frame`]).
//!
//! The server and the driver depend on this crate and nothing else for
//! cross-cutting definitions, so the two sides of every transport cannot
//! drift apart.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod envelope;
pub mod frame;
pub mod rpc;

mod value;
pub use value::{FromSqlValue, SqlValue, ValueError};

/// Metadata header carrying the bearer token on every RPC call.
pub const AUTHORIZATION_HEADER: &str = "authorization";

/// Metadata header naming the target database on every RPC call.
pub const DATABASE_HEADER: &str = "x-database-name";

/// Prefix of the `authorization` header value.
pub const BEARER_PREFIX: &str = "Bearer ";

/// Sentinel reported for `rows_affected` / `last_insert_id` when the engine
/// cannot provide the value. Distinguishes "unsupported" from zero.
pub const UNSUPPORTED_SENTINEL: i64 = -1;

/// Status codes shared by both transports and the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Code {
    /// Missing or malformed argument (e.g. empty database name).
    InvalidArgument,
    /// Missing or invalid credentials.
    Unauthenticated,
    /// The operation exists in the protocol but is not implemented.
    Unimplemented,
    /// Engine, pool, or conversion failure.
    Internal,
    /// The caller went away mid-call or mid-stream.
    Cancelled,
}

impl Code {
    /// Returns the HTTP status used for this code on the RPC transport.
    pub fn http_status(self) -> u16 {
        match self {
            Self::InvalidArgument => 400,
            Self::Unauthenticated => 401,
            Self::Unimplemented => 501,
            Self::Internal => 500,
            // Client closed request (nginx convention)
            Self::Cancelled => 499,
        }
    }

    /// Maps an HTTP status back to a code.
    ///
    /// Statuses that no server handler produces fall back to `Internal`.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            400 => Self::InvalidArgument,
            401 => Self::Unauthenticated,
            501 => Self::Unimplemented,
            499 => Self::Cancelled,
            _ => Self::Internal,
        }
    }

    /// Returns the string label for this code.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid_argument",
            Self::Unauthenticated => "unauthenticated",
            Self::Unimplemented => "unimplemented",
            Self::Internal => "internal",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed call: a [`Code`] plus a human-readable message.
///
/// This is the JSON error body of the RPC transport and the payload of a
/// terminal error element in a query stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{code}: {message}")]
pub struct RpcStatus {
    /// Machine-readable status.
    pub code: Code,
    /// Diagnostic message. Never contains credentials.
    pub message: String,
}

impl RpcStatus {
    /// Creates a status with the given code and message.
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

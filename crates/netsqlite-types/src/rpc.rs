//! JSON messages of the structured RPC transport.
//!
//! Unary calls (`ping`, `exec`) exchange a single JSON document. The streaming
//! `query` call answers with `application/x-ndjson`: one [`QueryMessage`] per
//! line, always starting with [`QueryMessage::Columns`].

use serde::{Deserialize, Serialize};

use crate::{RpcStatus, SqlValue};

/// Route of the liveness call.
pub const PING_PATH: &str = "/v1/ping";
/// Route of the execute call.
pub const EXEC_PATH: &str = "/v1/exec";
/// Route of the streaming query call.
pub const QUERY_PATH: &str = "/v1/query";
/// Content type of the query response stream.
pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingRequest {
    pub database_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingResponse {
    /// `"PONG for db <name>"`.
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecRequest {
    pub database_name: String,
    pub sql: String,
    /// Positional arguments bound to `?` placeholders.
    #[serde(default)]
    pub args: Vec<SqlValue>,
}

/// Outcome of a data-modifying statement.
///
/// Either field is [`crate::UNSUPPORTED_SENTINEL`] when the engine cannot
/// report it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResponse {
    pub rows_affected: i64,
    pub last_insert_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub database_name: String,
    pub sql: String,
    #[serde(default)]
    pub args: Vec<SqlValue>,
}

/// One line of the query response stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryMessage {
    /// Column names, sent exactly once before any row.
    Columns { names: Vec<String> },
    /// One result row; `values.len()` equals the column count.
    Row { values: Vec<SqlValue> },
    /// Terminal failure after the stream has started.
    Error { status: RpcStatus },
}

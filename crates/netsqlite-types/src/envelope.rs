//! Request/response envelope of the raw TCP protocol.
//!
//! Both structs are encoded as MessagePack maps (field names included) and
//! travel inside length-prefixed frames, see [`crate::frame`]. Every field is
//! optional on the wire; absent fields take their default.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{SqlValue, UNSUPPORTED_SENTINEL};

/// A command sent from client to server.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Request {
    /// Wire command name, see [`Command`].
    pub command: String,
    /// Database to bind; only read by `CONNECT`.
    pub database: String,
    /// Bearer token; only read by `CONNECT`.
    pub token: String,
    pub sql: String,
    pub args: Vec<SqlValue>,
}

impl Request {
    /// Creates a request carrying only a command name.
    pub fn new(command: Command) -> Self {
        Self {
            command: command.as_str().to_string(),
            ..Default::default()
        }
    }

    /// `CONNECT` with credentials.
    pub fn connect(database: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            token: token.into(),
            ..Self::new(Command::Connect)
        }
    }

    /// `EXEC` with SQL and positional arguments.
    pub fn exec(sql: impl Into<String>, args: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            args,
            ..Self::new(Command::Exec)
        }
    }

    /// Parses the command name.
    pub fn parsed_command(&self) -> Command {
        Command::from(self.command.as_str())
    }
}

// Keeps the token out of logs.
impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("command", &self.command)
            .field("database", &self.database)
            .field("token", &"<redacted>")
            .field("sql", &self.sql)
            .field("args", &self.args)
            .finish()
    }
}

/// A reply from server to client.
///
/// A non-empty `error` means failure; receivers ignore every other field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Response {
    pub error: String,
    pub result: Option<SqlValue>,
    pub columns: Vec<String>,
    pub row: Option<Vec<SqlValue>>,
    pub rows_affected: i64,
    pub last_insert_id: i64,
}

impl Response {
    /// An empty success.
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            ..Self::default()
        }
    }

    /// A success carrying a single scalar result.
    pub fn result(value: SqlValue) -> Self {
        Self {
            result: Some(value),
            ..Self::default()
        }
    }

    /// An `EXEC` success. `None` becomes the `-1` sentinel.
    pub fn exec(rows_affected: Option<i64>, last_insert_id: Option<i64>) -> Self {
        Self {
            rows_affected: rows_affected.unwrap_or(UNSUPPORTED_SENTINEL),
            last_insert_id: last_insert_id.unwrap_or(UNSUPPORTED_SENTINEL),
            ..Self::default()
        }
    }

    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }
}

/// Commands understood by the raw protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Authenticate and bind a database for the rest of the session.
    Connect,
    Ping,
    Exec,
    /// Reserved; always answered as unimplemented.
    QueryPrepare,
    /// Reserved; always answered as unimplemented.
    TxBegin,
    /// Anything else, carrying the name as received.
    Unknown(String),
}

impl Command {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Connect => "CONNECT",
            Self::Ping => "PING",
            Self::Exec => "EXEC",
            Self::QueryPrepare => "QUERY_PREPARE",
            Self::TxBegin => "TX_BEGIN",
            Self::Unknown(name) => name,
        }
    }
}

impl From<&str> for Command {
    fn from(s: &str) -> Self {
        match s {
            "CONNECT" => Self::Connect,
            "PING" => Self::Ping,
            "EXEC" => Self::Exec,
            "QUERY_PREPARE" => Self::QueryPrepare,
            "TX_BEGIN" => Self::TxBegin,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl FromStr for Command {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

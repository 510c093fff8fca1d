//! Connection string parsing.
//!
//! Format: `netsqlite://host:port/<token>?database=<name>[&tls=true]`.
//! Every required part must be present; nothing is defaulted.

use thiserror::Error;
use url::Url;

/// URL scheme of a netsqlite connection string.
pub const SCHEME: &str = "netsqlite";

/// Parsed connection parameters.
#[derive(Clone, PartialEq, Eq)]
pub struct Config {
    /// `host:port` of the server's RPC listener.
    pub addr: String,
    /// Database bound to every call.
    pub database: String,
    /// Bearer token attached to every call.
    pub token: String,
    /// Use `https` instead of `http`.
    pub use_tls: bool,
    /// The original query string, for parameters this crate ignores.
    pub raw_query: String,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("addr", &self.addr)
            .field("database", &self.database)
            .field("token", &"<redacted>")
            .field("use_tls", &self.use_tls)
            .field("raw_query", &self.raw_query)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DsnError {
    #[error("invalid connection string: {0}")]
    InvalidFormat(String),

    #[error("invalid scheme: expected '{SCHEME}', got '{0}'")]
    InvalidScheme(String),

    #[error(
        "user info is not allowed in the authority; use netsqlite://host:port/token?database=name"
    )]
    UserInfoPresent,

    #[error("server address (host:port) missing or incomplete")]
    MissingAddress,

    #[error("authentication token missing from the path")]
    MissingToken,

    #[error("database name missing (use ?database=name)")]
    MissingDatabase,
}

/// Parses a connection string into a [`Config`].
pub fn parse_dsn(dsn: &str) -> Result<Config, DsnError> {
    let url = Url::parse(dsn).map_err(|e| DsnError::InvalidFormat(e.to_string()))?;

    if url.scheme() != SCHEME {
        return Err(DsnError::InvalidScheme(url.scheme().to_string()));
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(DsnError::UserInfoPresent);
    }

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or(DsnError::MissingAddress)?;
    let port = url.port().ok_or(DsnError::MissingAddress)?;

    let token = url.path().trim_start_matches('/');
    if token.is_empty() {
        return Err(DsnError::MissingToken);
    }

    let mut database = None;
    let mut use_tls = false;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "database" => database = Some(value.into_owned()),
            "tls" => use_tls = value == "true",
            _ => {}
        }
    }
    let database = database
        .filter(|d| !d.is_empty())
        .ok_or(DsnError::MissingDatabase)?;

    Ok(Config {
        addr: format!("{host}:{port}"),
        database,
        token: token.to_string(),
        use_tls,
        raw_query: url.query().unwrap_or_default().to_string(),
    })
}

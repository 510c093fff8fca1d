//! RPC-backed connection.

use std::convert::Infallible;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use netsqlite_types::rpc::{
    ExecRequest, ExecResponse, PingRequest, PingResponse, QueryRequest, EXEC_PATH, PING_PATH,
    QUERY_PATH,
};
use netsqlite_types::{
    Code, RpcStatus, SqlValue, AUTHORIZATION_HEADER, BEARER_PREFIX, DATABASE_HEADER,
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::capability::{Capability, SqlConnection};
use crate::dsn::Config;
use crate::error::DriverError;
use crate::result::ExecResult;
use crate::rows::Rows;

/// Deadline for the connectivity check run by [`Connector::connect`].
pub const CONNECT_PING_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens [`Connection`]s for a parsed [`Config`].
#[derive(Debug, Clone)]
pub struct Connector {
    config: Config,
}

impl Connector {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Builds a connection and verifies it with a ping.
    ///
    /// A connection whose first ping fails is closed and never returned.
    pub async fn connect(&self) -> Result<Connection, DriverError> {
        let addr = self.config.addr.clone();
        let conn = Connection::new(&self.config).map_err(|e| DriverError::Connect {
            addr: addr.clone(),
            source: Box::new(e),
        })?;

        let checked = match tokio::time::timeout(CONNECT_PING_TIMEOUT, conn.ping()).await {
            Ok(result) => result,
            Err(_) => Err(DriverError::Timeout(CONNECT_PING_TIMEOUT)),
        };
        if let Err(e) = checked {
            tracing::debug!(%addr, error = %e, "initial ping failed, discarding connection");
            let _ = conn.close().await;
            return Err(DriverError::Connect {
                addr,
                source: Box::new(e),
            });
        }

        tracing::debug!(%addr, database = %self.config.database, "connected");
        Ok(conn)
    }
}

/// A connection to one database on a netsqlite server.
///
/// Credentials travel as headers on every call. The connection holds no
/// server-side session, so a failed statement leaves it usable.
pub struct Connection {
    base_url: String,
    database: String,
    client: Mutex<Option<reqwest::Client>>,
}

impl Connection {
    fn new(config: &Config) -> Result<Self, DriverError> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("{BEARER_PREFIX}{}", config.token))
            .map_err(|_| DriverError::BadConnection("token is not a valid header value".into()))?;
        auth.set_sensitive(true);
        headers.insert(HeaderName::from_static(AUTHORIZATION_HEADER), auth);
        let database = HeaderValue::from_str(&config.database).map_err(|_| {
            DriverError::BadConnection("database name is not a valid header value".into())
        })?;
        headers.insert(HeaderName::from_static(DATABASE_HEADER), database);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;
        let scheme = if config.use_tls { "https" } else { "http" };

        Ok(Self {
            base_url: format!("{scheme}://{}", config.addr),
            database: config.database.clone(),
            client: Mutex::new(Some(client)),
        })
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn is_closed(&self) -> bool {
        self.client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    fn client(&self) -> Result<reqwest::Client, DriverError> {
        self.client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| DriverError::BadConnection("connection is closed".into()))
    }

    async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<reqwest::Response, DriverError> {
        let response = self
            .client()?
            .post(format!("{}{path}", self.base_url))
            .json(body)
            .send()
            .await
            .map_err(|e| DriverError::BadConnection(format!("{path}: {e}")))?;
        check_status(response).await
    }

    async fn call<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, DriverError> {
        let response = self.post(path, body).await?;
        response
            .json()
            .await
            .map_err(|e| DriverError::Protocol(format!("{path}: malformed response: {e}")))
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("base_url", &self.base_url)
            .field("database", &self.database)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Turns a non-success HTTP response into [`DriverError::Status`].
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, DriverError> {
    let http_status = response.status();
    if http_status.is_success() {
        return Ok(response);
    }
    let body = response.bytes().await.unwrap_or_default();
    let status = serde_json::from_slice::<RpcStatus>(&body).unwrap_or_else(|_| {
        RpcStatus::new(
            Code::from_http_status(http_status.as_u16()),
            String::from_utf8_lossy(&body).into_owned(),
        )
    });
    Err(DriverError::Status(status))
}

#[async_trait]
impl SqlConnection for Connection {
    type Rows = Rows;
    type Statement = Infallible;
    type Transaction = Infallible;

    fn supports(&self, capability: Capability) -> bool {
        matches!(
            capability,
            Capability::Ping
                | Capability::Execute
                | Capability::Query
                | Capability::RowsAffected
                | Capability::LastInsertId
        )
    }

    /// Fails with [`DriverError::BadConnection`] when the server is
    /// unreachable or rejects the credentials.
    async fn ping(&self) -> Result<(), DriverError> {
        let request = PingRequest {
            database_name: self.database.clone(),
        };
        match self.call::<_, PingResponse>(PING_PATH, &request).await {
            Ok(resp) => {
                tracing::trace!(message = %resp.message, "ping");
                Ok(())
            }
            Err(DriverError::Status(status)) if status.code == Code::Unauthenticated => {
                Err(DriverError::BadConnection(status.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    async fn execute(&self, sql: &str, args: &[SqlValue]) -> Result<ExecResult, DriverError> {
        let request = ExecRequest {
            database_name: self.database.clone(),
            sql: sql.to_string(),
            args: args.to_vec(),
        };
        let resp: ExecResponse = self.call(EXEC_PATH, &request).await?;
        Ok(resp.into())
    }

    async fn query(&self, sql: &str, args: &[SqlValue]) -> Result<Rows, DriverError> {
        let request = QueryRequest {
            database_name: self.database.clone(),
            sql: sql.to_string(),
            args: args.to_vec(),
        };
        let response = self.post(QUERY_PATH, &request).await?;
        let stream = response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|e| DriverError::BadConnection(format!("query stream broken: {e}")))
        });
        Rows::open(Box::pin(stream)).await
    }

    async fn prepare(&self, _sql: &str) -> Result<Infallible, DriverError> {
        Err(DriverError::Unsupported(Capability::PreparedStatements))
    }

    async fn begin(&self) -> Result<Infallible, DriverError> {
        Err(DriverError::Unsupported(Capability::Transactions))
    }

    async fn close(&self) -> Result<(), DriverError> {
        let client = self
            .client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if client.is_some() {
            tracing::debug!(database = %self.database, "connection closed");
        }
        Ok(())
    }
}

//! Client side of the raw TCP protocol.
//!
//! A session is authenticated once with [`RawClient::authenticate`]; every
//! later command runs against the database bound by that call.

use std::time::Duration;

use netsqlite_types::envelope::{Command, Request, Response};
use netsqlite_types::frame::{read_frame, write_frame};
use netsqlite_types::SqlValue;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::error::DriverError;
use crate::result::ExecResult;

/// Deadline for establishing the TCP connection.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct RawClient {
    stream: Option<TcpStream>,
}

impl RawClient {
    /// Dials a raw-protocol listener.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, DriverError> {
        let stream = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| DriverError::Timeout(DIAL_TIMEOUT))?
            .map_err(|e| DriverError::BadConnection(format!("dial failed: {e}")))?;
        stream
            .set_nodelay(true)
            .map_err(|e| DriverError::BadConnection(e.to_string()))?;
        Ok(Self {
            stream: Some(stream),
        })
    }

    /// Sends one envelope and waits for the reply.
    ///
    /// Error envelopes are returned as-is; use the typed helpers to get them
    /// as [`DriverError::Server`].
    pub async fn send(&mut self, request: &Request) -> Result<Response, DriverError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| DriverError::BadConnection("connection is closed".into()))?;
        write_frame(stream, request).await?;
        match read_frame(stream).await? {
            Some(response) => Ok(response),
            None => {
                self.stream = None;
                Err(DriverError::BadConnection(
                    "server closed the connection".into(),
                ))
            }
        }
    }

    async fn send_checked(&mut self, request: &Request) -> Result<Response, DriverError> {
        let response = self.send(request).await?;
        if response.is_error() {
            return Err(DriverError::Server(response.error));
        }
        Ok(response)
    }

    /// Authenticates and binds `database` for the rest of the session.
    pub async fn authenticate(&mut self, database: &str, token: &str) -> Result<(), DriverError> {
        self.send_checked(&Request::connect(database, token))
            .await
            .map(drop)
    }

    pub async fn ping(&mut self) -> Result<(), DriverError> {
        let response = self.send_checked(&Request::new(Command::Ping)).await?;
        match response.result {
            Some(SqlValue::Text(ref pong)) if pong == "PONG" => Ok(()),
            other => Err(DriverError::Protocol(format!(
                "unexpected ping result: {other:?}"
            ))),
        }
    }

    /// Executes a data-modifying statement on the bound database.
    pub async fn exec(&mut self, sql: &str, args: Vec<SqlValue>) -> Result<ExecResult, DriverError> {
        let response = self.send_checked(&Request::exec(sql, args)).await?;
        Ok(ExecResult::new(
            response.rows_affected,
            response.last_insert_id,
        ))
    }

    /// Shuts the socket down. Idempotent.
    pub async fn close(&mut self) -> Result<(), DriverError> {
        if let Some(mut stream) = self.stream.take() {
            stream
                .shutdown()
                .await
                .map_err(|e| DriverError::BadConnection(e.to_string()))?;
        }
        Ok(())
    }
}

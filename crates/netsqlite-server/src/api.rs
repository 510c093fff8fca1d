//! RPC handlers: liveness, execute and streaming query.
//!
//! Every handler resolves `database_name → pool → lease` on a blocking
//! thread and delegates to [`netsqlite_db::engine`]. The lease is returned to
//! the pool when the blocking closure ends, on every exit path.

use crate::AppState;
use axum::{
    body::{Body, Bytes},
    extract::{Extension, Json},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::stream::{self, StreamExt};
use netsqlite_db::engine::{self, RowSink, SinkClosed};
use netsqlite_db::{CancelFlag, DbError};
use netsqlite_types::rpc::{
    ExecRequest, ExecResponse, PingRequest, PingResponse, QueryMessage, QueryRequest,
    NDJSON_CONTENT_TYPE,
};
use netsqlite_types::{Code, RpcStatus, SqlValue, UNSUPPORTED_SENTINEL};
use rusqlite::Connection;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Messages buffered between the engine thread and the response body.
const QUERY_CHANNEL_CAPACITY: usize = 64;

/// API error type mapping to status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidArgument(String),
    #[error("{0}")]
    Unauthenticated(String),
    #[error("{0}")]
    Unimplemented(String),
    #[error("{0}")]
    Internal(String),
    #[error("{0}")]
    Cancelled(String),
}

impl ApiError {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            Code::InvalidArgument => Self::InvalidArgument(message),
            Code::Unauthenticated => Self::Unauthenticated(message),
            Code::Unimplemented => Self::Unimplemented(message),
            Code::Internal => Self::Internal(message),
            Code::Cancelled => Self::Cancelled(message),
        }
    }

    pub fn code(&self) -> Code {
        match self {
            Self::InvalidArgument(_) => Code::InvalidArgument,
            Self::Unauthenticated(_) => Code::Unauthenticated,
            Self::Unimplemented(_) => Code::Unimplemented,
            Self::Internal(_) => Code::Internal,
            Self::Cancelled(_) => Code::Cancelled,
        }
    }

    pub fn status(&self) -> RpcStatus {
        RpcStatus::new(self.code(), self.to_string())
    }

    /// Wraps an engine or pool failure, naming the operation and database.
    fn from_db(op: &str, database: &str, err: DbError) -> Self {
        let code = err.code();
        if code == Code::Internal {
            tracing::error!(op, %database, error = %err, "rpc call failed");
        } else {
            tracing::debug!(op, %database, error = %err, "rpc call rejected");
        }
        match code {
            Code::InvalidArgument => Self::new(code, err.to_string()),
            _ => Self::new(code, format!("{op} on database {database} failed: {err}")),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code().http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.status())).into_response()
    }
}

fn join_error(e: tokio::task::JoinError) -> ApiError {
    tracing::error!(error = %e, "blocking task failed");
    ApiError::Internal(format!("task failed: {e}"))
}

/// Runs `op` on a leased handle of `database` on a blocking thread.
///
/// If the handler future is dropped (the caller disconnected), the lease wait
/// ends with [`DbError::Cancelled`] and `op` never runs once a lease arrives.
async fn run_unary<T, F>(
    state: Arc<AppState>,
    call: &'static str,
    database: &str,
    op: F,
) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Connection) -> Result<T, DbError> + Send + 'static,
{
    let cancel = CancelFlag::new();
    let guard = cancel.drop_guard();
    let name = database.to_string();
    let result = tokio::task::spawn_blocking(move || {
        let pool = state.manager.acquire_pool(&name)?;
        let conn = pool.lease_until_cancelled(|| cancel.is_cancelled())?;
        if cancel.is_cancelled() {
            tracing::info!(database = %name, "caller went away before execution");
            return Err(DbError::Cancelled);
        }
        op(&conn)
    })
    .await;
    guard.disarm();

    result
        .map_err(join_error)?
        .map_err(|e| ApiError::from_db(call, database, e))
}

/// Handler for `POST /v1/ping`.
pub async fn ping_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<PingRequest>,
) -> Result<Json<PingResponse>, ApiError> {
    let database = payload.database_name;
    run_unary(state, "ping", &database, engine::ping).await?;

    Ok(Json(PingResponse {
        message: format!("PONG for db {database}"),
    }))
}

/// Handler for `POST /v1/exec`.
pub async fn exec_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<ExecRequest>,
) -> Result<Json<ExecResponse>, ApiError> {
    let ExecRequest {
        database_name: database,
        sql,
        args,
    } = payload;
    tracing::debug!(%database, %sql, args = args.len(), "exec");

    let outcome =
        run_unary(state, "exec", &database, move |conn| engine::execute(conn, &sql, &args))
            .await?;

    Ok(Json(ExecResponse {
        rows_affected: outcome.rows_affected.unwrap_or(UNSUPPORTED_SENTINEL),
        last_insert_id: outcome.last_insert_id.unwrap_or(UNSUPPORTED_SENTINEL),
    }))
}

/// Forwards query output from the engine thread into the response channel.
///
/// Before the columns message is sent, failures travel as `Err` so the
/// handler can still answer with an error status. Afterwards they become a
/// terminal [`QueryMessage::Error`] line.
struct ChannelSink {
    tx: mpsc::Sender<Result<QueryMessage, ApiError>>,
    started: bool,
    rows: u64,
}

impl RowSink for ChannelSink {
    fn columns(&mut self, names: Vec<String>) -> Result<(), SinkClosed> {
        self.started = true;
        self.tx
            .blocking_send(Ok(QueryMessage::Columns { names }))
            .map_err(|_| SinkClosed)
    }

    fn row(&mut self, values: Vec<SqlValue>) -> Result<(), SinkClosed> {
        self.rows += 1;
        self.tx
            .blocking_send(Ok(QueryMessage::Row { values }))
            .map_err(|_| SinkClosed)
    }

    fn is_cancelled(&self) -> bool {
        self.tx.is_closed()
    }
}

fn run_query(
    state: Arc<AppState>,
    request: QueryRequest,
    tx: mpsc::Sender<Result<QueryMessage, ApiError>>,
) {
    let QueryRequest {
        database_name: database,
        sql,
        args,
    } = request;
    let mut sink = ChannelSink {
        tx,
        started: false,
        rows: 0,
    };

    let result = state
        .manager
        .acquire_pool(&database)
        .and_then(|pool| {
            let conn = pool.lease_until_cancelled(|| sink.tx.is_closed())?;
            engine::query(&conn, &sql, &args, &mut sink)
        });

    match result {
        Ok(()) => {
            tracing::debug!(%database, rows = sink.rows, "query stream complete");
        }
        Err(DbError::Cancelled) => {
            tracing::info!(%database, rows = sink.rows, "client disconnected, query cancelled");
        }
        Err(e) if sink.started => {
            let status = ApiError::from_db("query", &database, e).status();
            let _ = sink.tx.blocking_send(Ok(QueryMessage::Error { status }));
        }
        Err(e) => {
            let _ = sink
                .tx
                .blocking_send(Err(ApiError::from_db("query", &database, e)));
        }
    }
}

fn ndjson_line(message: &QueryMessage) -> Result<Bytes, std::io::Error> {
    let mut buf = serde_json::to_vec(message)?;
    buf.push(b'\n');
    Ok(Bytes::from(buf))
}

/// Handler for `POST /v1/query`.
///
/// Answers with an NDJSON stream: one columns line, then one line per row,
/// optionally ending in a single error line.
pub async fn query_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<QueryRequest>,
) -> Result<Response, ApiError> {
    tracing::debug!(database = %payload.database_name, sql = %payload.sql, "query");

    let (tx, mut rx) = mpsc::channel(QUERY_CHANNEL_CAPACITY);
    tokio::task::spawn_blocking(move || run_query(state, payload, tx));

    let first = match rx.recv().await {
        Some(Ok(message)) => message,
        Some(Err(e)) => return Err(e),
        None => return Err(ApiError::Internal("query ended without a result".into())),
    };

    let rest = ReceiverStream::new(rx).map(|item| match item {
        Ok(message) => message,
        Err(e) => QueryMessage::Error { status: e.status() },
    });
    let body = stream::once(async move { first })
        .chain(rest)
        .map(|message| ndjson_line(&message));

    Ok((
        [(header::CONTENT_TYPE, NDJSON_CONTENT_TYPE)],
        Body::from_stream(body),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_maps_to_http_status() {
        let resp = ApiError::new(Code::Unauthenticated, "nope").into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let resp = ApiError::new(Code::Cancelled, "gone").into_response();
        assert_eq!(resp.status().as_u16(), 499);
    }

    #[test]
    fn db_errors_keep_their_code() {
        let err = ApiError::from_db("exec", "app", DbError::InvalidName("../x".into()));
        assert_eq!(err.code(), Code::InvalidArgument);

        let err = ApiError::from_db(
            "exec",
            "app",
            DbError::LeaseTimeout {
                database: "app".into(),
            },
        );
        assert_eq!(err.code(), Code::Internal);
        assert!(err.to_string().contains("exec on database app"));
    }

    #[test]
    fn ndjson_lines_end_with_newline() {
        let line = ndjson_line(&QueryMessage::Row {
            values: vec![SqlValue::Integer(1)],
        })
        .unwrap();
        assert_eq!(line.last(), Some(&b'\n'));
    }
}

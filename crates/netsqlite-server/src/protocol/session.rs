//! Per-connection state machine of the raw protocol.

use std::sync::{Arc, Mutex};

use netsqlite_db::{engine, open_connection, DbError};
use netsqlite_types::envelope::{Command, Request, Response};
use netsqlite_types::SqlValue;
use rusqlite::Connection;

use crate::auth::redact;
use crate::AppState;

/// A database bound to an authenticated session, with the session's
/// dedicated engine handle.
#[derive(Debug)]
pub struct BoundDatabase {
    name: String,
    conn: Arc<Mutex<Connection>>,
}

impl BoundDatabase {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for BoundDatabase {
    fn drop(&mut self) {
        tracing::info!(database = %self.name, "closed session database handle");
    }
}

/// Session state. Only `Authenticated` sessions may touch the engine.
#[derive(Debug, Default)]
pub enum SessionState {
    #[default]
    Unauthenticated,
    Authenticated(BoundDatabase),
}

/// One raw-protocol session.
pub struct Session {
    app: Arc<AppState>,
    state: SessionState,
}

impl Session {
    pub fn new(app: Arc<AppState>) -> Self {
        Self {
            app,
            state: SessionState::Unauthenticated,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.state, SessionState::Authenticated(_))
    }

    /// Applies one request to the session and produces its response.
    pub async fn handle(&mut self, request: Request) -> Response {
        let command = request.parsed_command();
        tracing::debug!(%command, "received command");

        let bound = match &self.state {
            SessionState::Unauthenticated => {
                return match command {
                    Command::Connect => self.connect(request).await,
                    other => {
                        tracing::warn!(command = %other, "command before authentication");
                        Response::error("Authentication required")
                    }
                };
            }
            SessionState::Authenticated(bound) => bound,
        };

        match command {
            Command::Connect => {
                Response::error(format!("already connected to database {}", bound.name))
            }
            Command::Ping => ping(bound).await,
            Command::Exec => exec(bound, request.sql, request.args).await,
            Command::QueryPrepare => Response::error("QUERY_PREPARE not implemented"),
            Command::TxBegin => Response::error("Transactions not implemented"),
            Command::Unknown(name) => {
                tracing::warn!(command = %name, "unknown command");
                Response::error(format!("Unknown command: {name}"))
            }
        }
    }

    /// Drops the bound engine handle, if any, and returns to
    /// `Unauthenticated`.
    pub fn close(&mut self) {
        self.state = SessionState::Unauthenticated;
    }

    async fn connect(&mut self, request: Request) -> Response {
        if !self.app.validator.validate(&request.token) {
            tracing::warn!(token = %redact(&request.token), "authentication failed");
            return Response::error("Invalid authentication token");
        }
        if request.database.is_empty() {
            return Response::error("database is required");
        }

        let path = match self.app.manager.resolve_path(&request.database) {
            Ok(path) => path,
            Err(e) => return Response::error(e.to_string()),
        };

        let settings = self.app.manager.settings();
        let name = request.database;
        let opened = tokio::task::spawn_blocking(move || open_connection(&path, settings)).await;
        let conn = match opened {
            Ok(Ok(conn)) => conn,
            Ok(Err(source)) => {
                let err = DbError::Open {
                    database: name,
                    source,
                };
                tracing::error!(error = %err, "failed to open session database");
                return Response::error(err.to_string());
            }
            Err(e) => return Response::error(format!("failed to open database {name}: {e}")),
        };

        tracing::info!(database = %name, "session authenticated");
        self.state = SessionState::Authenticated(BoundDatabase {
            name,
            conn: Arc::new(Mutex::new(conn)),
        });
        Response::ok()
    }
}

/// Runs `f` against the bound handle on a blocking thread.
async fn with_conn<T, F>(bound: &BoundDatabase, f: F) -> Result<T, String>
where
    T: Send + 'static,
    F: FnOnce(&Connection) -> Result<T, DbError> + Send + 'static,
{
    let conn = Arc::clone(&bound.conn);
    tokio::task::spawn_blocking(move || {
        let guard = conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&guard)
    })
    .await
    .map_err(|e| format!("task failed: {e}"))?
    .map_err(|e| e.to_string())
}

async fn ping(bound: &BoundDatabase) -> Response {
    match with_conn(bound, engine::ping).await {
        Ok(()) => Response::result(SqlValue::Text("PONG".into())),
        Err(e) => Response::error(e),
    }
}

async fn exec(bound: &BoundDatabase, sql: String, args: Vec<SqlValue>) -> Response {
    if sql.is_empty() {
        return Response::error("EXEC command requires SQL");
    }
    tracing::debug!(database = %bound.name, %sql, args = args.len(), "exec");
    match with_conn(bound, move |conn| engine::execute(conn, &sql, &args)).await {
        Ok(outcome) => Response::exec(outcome.rows_affected, outcome.last_insert_id),
        Err(e) => {
            tracing::warn!(database = %bound.name, error = %e, "exec failed");
            Response::error(format!("Execution failed: {e}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenValidator;
    use netsqlite_db::{DbRuntimeSettings, PoolManager};
    use netsqlite_types::UNSUPPORTED_SENTINEL;

    fn session() -> (tempfile::TempDir, Session) {
        let dir = tempfile::tempdir().unwrap();
        let manager = PoolManager::new(dir.path(), DbRuntimeSettings::default()).unwrap();
        let app = AppState {
            manager: Arc::new(manager),
            validator: Arc::new(TokenValidator::new(["tok-1"])),
        };
        (dir, Session::new(Arc::new(app)))
    }

    #[tokio::test]
    async fn commands_before_connect_are_rejected() {
        let (dir, mut session) = session();
        for command in [Command::Ping, Command::Exec, Command::TxBegin] {
            let resp = session.handle(Request::new(command)).await;
            assert_eq!(resp.error, "Authentication required");
        }
        let resp = session
            .handle(Request::new(Command::Unknown("DROP".into())))
            .await;
        assert_eq!(resp.error, "Authentication required");
        assert!(!session.is_authenticated());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn connect_validates_token_then_database() {
        let (_dir, mut session) = session();

        let resp = session.handle(Request::connect("app.db", "wrong")).await;
        assert_eq!(resp.error, "Invalid authentication token");
        assert!(!session.is_authenticated());

        let resp = session.handle(Request::connect("", "tok-1")).await;
        assert_eq!(resp.error, "database is required");
        assert!(!session.is_authenticated());

        let resp = session.handle(Request::connect("../evil", "tok-1")).await;
        assert!(resp.is_error());
        assert!(!session.is_authenticated());

        let resp = session.handle(Request::connect("app.db", "tok-1")).await;
        assert!(!resp.is_error(), "{}", resp.error);
        assert!(matches!(
            session.state(),
            SessionState::Authenticated(b) if b.name() == "app.db"
        ));
    }

    #[tokio::test]
    async fn authenticated_session_commands() {
        let (_dir, mut session) = session();
        session.handle(Request::connect("app.db", "tok-1")).await;

        let resp = session.handle(Request::new(Command::Ping)).await;
        assert_eq!(resp.result, Some(SqlValue::Text("PONG".into())));

        let resp = session.handle(Request::connect("other.db", "tok-1")).await;
        assert_eq!(resp.error, "already connected to database app.db");

        let resp = session.handle(Request::exec("", vec![])).await;
        assert_eq!(resp.error, "EXEC command requires SQL");

        let resp = session
            .handle(Request::exec("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)", vec![]))
            .await;
        assert!(!resp.is_error(), "{}", resp.error);

        let resp = session
            .handle(Request::exec(
                "INSERT INTO t (v) VALUES (?)",
                vec![SqlValue::from("x")],
            ))
            .await;
        assert_eq!(resp.rows_affected, 1);
        assert_eq!(resp.last_insert_id, 1);

        let resp = session
            .handle(Request::exec("SELECT * FROM t", vec![]))
            .await;
        assert_eq!(resp.rows_affected, UNSUPPORTED_SENTINEL);

        let resp = session.handle(Request::exec("NOT SQL", vec![])).await;
        assert!(resp.error.starts_with("Execution failed"));

        let resp = session.handle(Request::new(Command::QueryPrepare)).await;
        assert_eq!(resp.error, "QUERY_PREPARE not implemented");
        let resp = session.handle(Request::new(Command::TxBegin)).await;
        assert_eq!(resp.error, "Transactions not implemented");
        let resp = session
            .handle(Request::new(Command::Unknown("FETCH".into())))
            .await;
        assert_eq!(resp.error, "Unknown command: FETCH");

        session.close();
        assert!(!session.is_authenticated());
    }
}

//! Transport-agnostic SQL execution.
//!
//! Both the RPC service and the raw protocol call into these functions with
//! a borrowed handle (a pool lease or a session's dedicated connection), so
//! statement semantics are identical on every transport.

use netsqlite_types::SqlValue;
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params_from_iter, Connection, Row};

use crate::DbError;

/// Result of a data-modifying statement.
///
/// `None` means the engine cannot report the value for this statement;
/// transports encode it as the `-1` sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecOutcome {
    pub rows_affected: Option<i64>,
    pub last_insert_id: Option<i64>,
}

/// Returned by a [`RowSink`] that no longer accepts messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkClosed;

/// Consumer of a streamed query result.
pub trait RowSink {
    /// Receives the column names, exactly once, before any row.
    fn columns(&mut self, names: Vec<String>) -> Result<(), SinkClosed>;

    /// Receives one row; `values.len()` always equals the column count.
    fn row(&mut self, values: Vec<SqlValue>) -> Result<(), SinkClosed>;

    /// Polled after every row; `true` stops the query.
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Liveness check: `SELECT 1` on the leased handle.
pub fn ping(conn: &Connection) -> Result<(), DbError> {
    conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
    Ok(())
}

/// Runs one statement with positional arguments.
///
/// Statements that produce rows are stepped to completion and their
/// row count is reported as unavailable.
pub fn execute(conn: &Connection, sql: &str, args: &[SqlValue]) -> Result<ExecOutcome, DbError> {
    require_sql(sql)?;
    let mut stmt = conn.prepare(sql)?;
    let params = params_from_iter(args.iter().map(bind_value));

    let rows_affected = if stmt.column_count() == 0 {
        Some(stmt.execute(params)? as i64)
    } else {
        let mut rows = stmt.query(params)?;
        while rows.next()?.is_some() {}
        None
    };

    Ok(ExecOutcome {
        rows_affected,
        last_insert_id: Some(conn.last_insert_rowid()),
    })
}

/// Runs a query and streams its result into `sink`.
///
/// Arguments are bound before the column names are sent, so a binding
/// failure reaches the caller with nothing streamed.
///
/// Stops with [`DbError::Cancelled`] as soon as the sink reports
/// cancellation or refuses a message, without draining the cursor.
pub fn query<S: RowSink>(
    conn: &Connection,
    sql: &str,
    args: &[SqlValue],
    sink: &mut S,
) -> Result<(), DbError> {
    require_sql(sql)?;
    let mut stmt = conn.prepare(sql)?;
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let width = names.len();

    // Bind before announcing columns so argument errors fail the whole call.
    let mut rows = stmt.query(params_from_iter(args.iter().map(bind_value)))?;
    sink.columns(names.clone()).map_err(|_| DbError::Cancelled)?;
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(width);
        for idx in 0..width {
            values.push(column_value(row, idx, &names[idx])?);
        }
        sink.row(values).map_err(|_| DbError::Cancelled)?;
        if sink.is_cancelled() {
            return Err(DbError::Cancelled);
        }
    }
    Ok(())
}

fn require_sql(sql: &str) -> Result<(), DbError> {
    if sql.trim().is_empty() {
        return Err(DbError::InvalidArgument("sql is required".into()));
    }
    Ok(())
}

/// Converts an argument into an engine value. Booleans bind as 0/1.
pub fn bind_value(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::Integer(*i),
        SqlValue::Float(f) => Value::Real(*f),
        SqlValue::Boolean(b) => Value::Integer(i64::from(*b)),
        SqlValue::Text(s) => Value::Text(s.clone()),
        SqlValue::Bytes(b) => Value::Blob(b.clone()),
    }
}

fn column_value(row: &Row<'_>, idx: usize, column: &str) -> Result<SqlValue, DbError> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(i) => SqlValue::Integer(i),
        ValueRef::Real(f) => SqlValue::Float(f),
        ValueRef::Text(bytes) => {
            let text = std::str::from_utf8(bytes).map_err(|e| DbError::Conversion {
                column: column.to_string(),
                reason: e.to_string(),
            })?;
            SqlValue::Text(text.to_string())
        }
        ValueRef::Blob(bytes) => SqlValue::Bytes(bytes.to_vec()),
    })
}

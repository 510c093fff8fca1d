//! Row cursor over the NDJSON query stream.

use std::pin::Pin;
use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use netsqlite_types::rpc::QueryMessage;
use netsqlite_types::{FromSqlValue, SqlValue};

use crate::error::DriverError;

pub(crate) type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, DriverError>> + Send>>;

/// Forward-only cursor over a query result.
///
/// Rows arrive lazily from the server; dropping or [`close`](Rows::close)-ing
/// the cursor cancels the stream.
pub struct Rows {
    columns: Arc<[String]>,
    lines: LineReader,
    done: bool,
}

impl Rows {
    /// Reads the column header off `stream`.
    ///
    /// An empty body is a result with no columns and no rows.
    pub(crate) async fn open(stream: ByteStream) -> Result<Self, DriverError> {
        let mut lines = LineReader::new(stream);
        let Some(first) = lines.next_line().await? else {
            return Ok(Self {
                columns: Arc::from(Vec::new()),
                lines,
                done: true,
            });
        };
        match decode(&first)? {
            QueryMessage::Columns { names } => Ok(Self {
                columns: Arc::from(names),
                lines,
                done: false,
            }),
            QueryMessage::Error { status } => Err(DriverError::Status(status)),
            QueryMessage::Row { .. } => Err(DriverError::Protocol(
                "row received before column names".into(),
            )),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns the next row, or `None` once the stream is exhausted.
    ///
    /// A server-side failure mid-stream surfaces here as
    /// [`DriverError::Status`] and ends the cursor.
    pub async fn next(&mut self) -> Result<Option<Row>, DriverError> {
        if self.done {
            return Ok(None);
        }
        let line = match self.lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                self.done = true;
                return Ok(None);
            }
            Err(e) => {
                self.done = true;
                return Err(e);
            }
        };
        let message = decode(&line).inspect_err(|_| self.done = true)?;
        match message {
            QueryMessage::Row { values } => {
                if values.len() != self.columns.len() {
                    self.done = true;
                    return Err(DriverError::Protocol(format!(
                        "row has {} values for {} columns",
                        values.len(),
                        self.columns.len()
                    )));
                }
                Ok(Some(Row {
                    columns: Arc::clone(&self.columns),
                    values,
                }))
            }
            QueryMessage::Error { status } => {
                self.done = true;
                Err(DriverError::Status(status))
            }
            QueryMessage::Columns { .. } => {
                self.done = true;
                Err(DriverError::Protocol("duplicate column names".into()))
            }
        }
    }

    /// Drains the remaining rows into a vector.
    pub async fn collect(mut self) -> Result<Vec<Row>, DriverError> {
        let mut rows = Vec::new();
        while let Some(row) = self.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Stops reading and releases the underlying stream.
    pub fn close(self) {}
}

impl std::fmt::Debug for Rows {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rows")
            .field("columns", &self.columns)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

fn decode(line: &[u8]) -> Result<QueryMessage, DriverError> {
    serde_json::from_slice(line)
        .map_err(|e| DriverError::Protocol(format!("malformed stream message: {e}")))
}

/// One result row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<SqlValue>,
}

impl Row {
    /// Converts the value at `index` into `T`.
    pub fn get<T: FromSqlValue>(&self, index: usize) -> Result<T, DriverError> {
        let value = self
            .values
            .get(index)
            .ok_or(DriverError::ColumnIndex {
                index,
                width: self.values.len(),
            })?
            .clone();
        Ok(T::from_sql_value(value)?)
    }

    /// Converts the value of the first column named `name` into `T`.
    pub fn get_by_name<T: FromSqlValue>(&self, name: &str) -> Result<T, DriverError> {
        let index = self
            .columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| DriverError::ColumnName(name.to_string()))?;
        self.get(index)
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    pub fn into_values(self) -> Vec<SqlValue> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Splits a chunked byte stream into newline-terminated lines.
struct LineReader {
    stream: ByteStream,
    buf: Vec<u8>,
    eof: bool,
}

impl LineReader {
    fn new(stream: ByteStream) -> Self {
        Self {
            stream,
            buf: Vec::new(),
            eof: false,
        }
    }

    async fn next_line(&mut self) -> Result<Option<Vec<u8>>, DriverError> {
        loop {
            if let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
                let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
                line.pop();
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                return Ok(Some(line));
            }
            if self.eof {
                if self.buf.iter().all(u8::is_ascii_whitespace) {
                    self.buf.clear();
                    return Ok(None);
                }
                return Ok(Some(std::mem::take(&mut self.buf)));
            }
            match self.stream.next().await {
                Some(chunk) => self.buf.extend_from_slice(&chunk?),
                None => self.eof = true,
            }
        }
    }
}

//! Storage contract shared by the toolaudit crates.
//!
//! The journal never talks to a database engine directly. It builds
//! [`Query`] values (statement text plus positional parameters) and hands
//! them to a [`DbAdapter`], which executes them and returns a
//! column-oriented [`QueryResult`]. Parameters are always bound by the
//! adapter, never spliced into the statement text, so a value containing a
//! quote or any other delimiter cannot change the shape of a statement.
//!
//! Adapter calls are blocking. Async callers are expected to run them on a
//! blocking worker (e.g. `tokio::task::spawn_blocking`).

use chrono::{DateTime, Utc};
use thiserror::Error;

/// A single value bound into, or read out of, a statement.
///
/// Adapters are free to return any variant for a column. In particular a
/// JSON column may come back as [`SqlValue::Json`] or as encoded
/// [`SqlValue::Text`], and a time column as [`SqlValue::Timestamp`],
/// epoch-millisecond [`SqlValue::Integer`], or ISO 8601 [`SqlValue::Text`].
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL `NULL`.
    Null,
    /// A 64-bit signed integer.
    Integer(i64),
    /// A double-precision float.
    Real(f64),
    /// UTF-8 text.
    Text(String),
    /// A structured JSON document.
    Json(serde_json::Value),
    /// A native date/time value.
    Timestamp(DateTime<Utc>),
}

impl SqlValue {
    /// Returns `true` for [`SqlValue::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the integer payload, if this is an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the text payload, if this is text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<serde_json::Value> for SqlValue {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Statement text with positional (`?1`, `?2`, ...) parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// The statement text. Never contains caller-supplied values.
    pub sql: String,
    /// Values bound to the placeholders, in order.
    pub params: Vec<SqlValue>,
}

impl Query {
    /// Creates a query with no parameters.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Appends the next positional parameter.
    #[must_use]
    pub fn bind(mut self, value: impl Into<SqlValue>) -> Self {
        self.params.push(value.into());
        self
    }
}

/// Rows and column names produced by a statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    /// Column names, in result order.
    pub columns: Vec<String>,
    /// Result rows; each row has one value per column.
    pub rows: Vec<Vec<SqlValue>>,
    /// Rows changed by an `INSERT`/`UPDATE`/`DELETE`. Zero for pure reads.
    pub rows_affected: usize,
}

impl QueryResult {
    /// Returns the position of the named column, if present.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Returns the value of `column` in the first row, if both exist.
    pub fn first_value(&self, column: &str) -> Option<&SqlValue> {
        let idx = self.column_index(column)?;
        self.rows.first().and_then(|row| row.get(idx))
    }
}

/// Errors raised by a storage adapter.
///
/// All of these are treated as transient by the journal: the write path
/// propagates them unchanged, the read paths log and swallow them.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// No connection could be obtained, or the connection was lost.
    #[error("storage connection failed: {0}")]
    Connection(String),

    /// The database stayed locked past the adapter's busy timeout.
    #[error("storage busy: {0}")]
    Busy(String),

    /// The engine rejected or failed to execute a statement.
    #[error("storage statement failed: {0}")]
    Statement(String),
}

/// Executes a single statement.
pub trait RawSql {
    /// Runs `query` and returns its rows.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the statement cannot be executed.
    fn execute_raw(&self, query: &Query) -> Result<QueryResult, StorageError>;
}

/// Closure run inside [`DbAdapter::write_transaction`].
pub type TransactionBody<'a> =
    &'a mut dyn FnMut(&dyn RawSql) -> Result<QueryResult, StorageError>;

/// The storage surface the journal consumes.
pub trait DbAdapter: RawSql + Send + Sync {
    /// Runs `body` inside a transaction that excludes every other writer.
    ///
    /// The transaction commits when `body` returns `Ok` and rolls back when
    /// it returns `Err`. The value returned by `body` is passed through.
    ///
    /// # Errors
    ///
    /// Returns the error produced by `body`, or a [`StorageError`] if the
    /// transaction cannot be opened or committed.
    fn write_transaction(&self, body: TransactionBody<'_>) -> Result<QueryResult, StorageError>;
}

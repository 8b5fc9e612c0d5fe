//! [`DbAdapter`] implementation over a pooled SQLite connection.

use chrono::SecondsFormat;
use rusqlite::types::{Value, ValueRef};
use rusqlite::{Connection, ErrorCode, TransactionBehavior};
use toolaudit_types::{
    DbAdapter, Query, QueryResult, RawSql, SqlValue, StorageError, TransactionBody,
};

use crate::pool::DbPool;

/// Executes journal statements against an r2d2 SQLite pool.
///
/// Every call checks a connection out of the pool for its own duration.
/// Write transactions use `BEGIN IMMEDIATE`, which takes the database write
/// lock up front; concurrent writers wait (up to the pool's busy timeout)
/// instead of reading a stale chain tip.
#[derive(Clone)]
pub struct SqliteAdapter {
    pool: DbPool,
}

impl SqliteAdapter {
    /// Wraps an existing pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Returns the underlying pool.
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    fn connection(&self) -> Result<r2d2::PooledConnection<r2d2_sqlite::SqliteConnectionManager>, StorageError> {
        self.pool
            .get()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }
}

impl std::fmt::Debug for SqliteAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteAdapter")
            .field("pool_max_size", &self.pool.max_size())
            .finish()
    }
}

impl RawSql for SqliteAdapter {
    fn execute_raw(&self, query: &Query) -> Result<QueryResult, StorageError> {
        let conn = self.connection()?;
        run_query(&conn, query)
    }
}

impl DbAdapter for SqliteAdapter {
    fn write_transaction(&self, body: TransactionBody<'_>) -> Result<QueryResult, StorageError> {
        let mut conn = self.connection()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(storage_error)?;

        // Dropping `tx` on the error path rolls it back.
        let result = body(&ConnectionExecutor(&tx))?;
        tx.commit().map_err(storage_error)?;
        Ok(result)
    }
}

/// Runs statements on a borrowed connection (or open transaction).
struct ConnectionExecutor<'a>(&'a Connection);

impl RawSql for ConnectionExecutor<'_> {
    fn execute_raw(&self, query: &Query) -> Result<QueryResult, StorageError> {
        run_query(self.0, query)
    }
}

fn run_query(conn: &Connection, query: &Query) -> Result<QueryResult, StorageError> {
    let mut stmt = conn.prepare(&query.sql).map_err(storage_error)?;
    let columns: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect();
    let params: Vec<Value> = query.params.iter().map(to_sqlite_value).collect();
    let bound = rusqlite::params_from_iter(params.iter());

    if columns.is_empty() {
        let rows_affected = stmt.execute(bound).map_err(storage_error)?;
        return Ok(QueryResult {
            columns,
            rows: Vec::new(),
            rows_affected,
        });
    }

    let readonly = stmt.readonly();
    let mut rows = Vec::new();
    let mut cursor = stmt.query(bound).map_err(storage_error)?;
    while let Some(row) = cursor.next().map_err(storage_error)? {
        let mut values = Vec::with_capacity(columns.len());
        for idx in 0..columns.len() {
            values.push(from_sqlite_value(row.get_ref(idx).map_err(storage_error)?));
        }
        rows.push(values);
    }
    drop(cursor);

    // `INSERT ... RETURNING` reports its changes once fully stepped.
    let rows_affected = if readonly {
        0
    } else {
        usize::try_from(conn.changes()).unwrap_or(usize::MAX)
    };

    Ok(QueryResult {
        columns,
        rows,
        rows_affected,
    })
}

fn to_sqlite_value(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(v) => Value::Integer(*v),
        SqlValue::Real(v) => Value::Real(*v),
        SqlValue::Text(v) => Value::Text(v.clone()),
        SqlValue::Json(v) => Value::Text(v.to_string()),
        SqlValue::Timestamp(v) => Value::Text(v.to_rfc3339_opts(SecondsFormat::Millis, true)),
    }
}

fn from_sqlite_value(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(v) => SqlValue::Integer(v),
        ValueRef::Real(v) => SqlValue::Real(v),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            SqlValue::Text(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

fn storage_error(err: rusqlite::Error) -> StorageError {
    match err.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
            StorageError::Busy(err.to_string())
        }
        Some(ErrorCode::CannotOpen) => StorageError::Connection(err.to_string()),
        _ => StorageError::Statement(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations, DbRuntimeSettings};

    fn adapter() -> SqliteAdapter {
        let pool = create_pool(
            ":memory:",
            DbRuntimeSettings {
                busy_timeout_ms: 1_000,
                pool_max_size: 1,
                ..DbRuntimeSettings::default()
            },
        )
        .expect("pool creation should succeed");
        {
            let conn = pool.get().expect("should get a connection");
            run_migrations(&conn).expect("migrations should succeed");
        }
        SqliteAdapter::new(pool)
    }

    fn insert(adapter: &SqliteAdapter, request_id: &str) -> QueryResult {
        adapter
            .execute_raw(
                &Query::new(
                    "INSERT INTO execution_events (request_id, type, payload, timestamp)
                     VALUES (?1, ?2, ?3, ?4) RETURNING id",
                )
                .bind(request_id)
                .bind("tool:proposed")
                .bind(serde_json::json!({"tool": "READ_FILE"}))
                .bind(1_000_i64),
            )
            .expect("insert should succeed")
    }

    #[test]
    fn insert_returning_reports_id_and_changes() {
        let adapter = adapter();
        let result = insert(&adapter, "req-1");

        assert_eq!(result.columns, vec!["id".to_string()]);
        assert_eq!(result.first_value("id"), Some(&SqlValue::Integer(1)));
        assert_eq!(result.rows_affected, 1);
    }

    #[test]
    fn select_returns_columns_and_typed_values() {
        let adapter = adapter();
        insert(&adapter, "req-1");

        let result = adapter
            .execute_raw(&Query::new(
                "SELECT request_id, payload, correlation_id, timestamp FROM execution_events",
            ))
            .expect("select should succeed");

        assert_eq!(
            result.columns,
            vec!["request_id", "payload", "correlation_id", "timestamp"]
        );
        assert_eq!(
            result.rows,
            vec![vec![
                SqlValue::Text("req-1".to_string()),
                SqlValue::Text(r#"{"tool":"READ_FILE"}"#.to_string()),
                SqlValue::Null,
                SqlValue::Integer(1_000),
            ]]
        );
        assert_eq!(result.rows_affected, 0);
    }

    #[test]
    fn quotes_in_values_are_bound_verbatim() {
        let adapter = adapter();
        insert(&adapter, "req-'); DROP TABLE execution_events; --");
        insert(&adapter, "req-2");

        let result = adapter
            .execute_raw(&Query::new("SELECT request_id FROM execution_events ORDER BY id"))
            .expect("select should succeed");
        assert_eq!(result.rows.len(), 2);
        assert_eq!(
            result.rows[0][0],
            SqlValue::Text("req-'); DROP TABLE execution_events; --".to_string())
        );
    }

    #[test]
    fn delete_reports_rows_affected() {
        let adapter = adapter();
        insert(&adapter, "req-1");
        insert(&adapter, "req-2");

        let result = adapter
            .execute_raw(&Query::new("DELETE FROM execution_events WHERE timestamp < ?1").bind(5_000_i64))
            .expect("delete should succeed");
        assert_eq!(result.rows_affected, 2);
        assert!(result.columns.is_empty());
    }

    #[test]
    fn failed_transaction_body_rolls_back() {
        let adapter = adapter();

        let err = adapter
            .write_transaction(&mut |tx| {
                tx.execute_raw(
                    &Query::new(
                        "INSERT INTO execution_events (request_id, type, payload, timestamp)
                         VALUES ('req-1', 'tool:proposed', '{}', 1)",
                    ),
                )?;
                Err(StorageError::Statement("forced".to_string()))
            })
            .expect_err("body error should surface");
        assert!(matches!(err, StorageError::Statement(_)));

        let count = adapter
            .execute_raw(&Query::new("SELECT COUNT(*) AS n FROM execution_events"))
            .expect("count should succeed");
        assert_eq!(count.first_value("n"), Some(&SqlValue::Integer(0)));
    }

    #[test]
    fn invalid_statement_maps_to_statement_error() {
        let adapter = adapter();
        let err = adapter
            .execute_raw(&Query::new("SELECT * FROM missing_table"))
            .expect_err("query should fail");
        assert!(matches!(err, StorageError::Statement(_)), "got {err:?}");
    }
}

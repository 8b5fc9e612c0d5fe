//! Connection pool for the journal database.
//!
//! Every pooled connection is put into WAL mode (so inspectors can read
//! while the journal appends) and given the configured busy timeout and
//! `synchronous` level before it is handed out.

use r2d2::{CustomizeConnection, Pool};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};
use serde::Deserialize;
use thiserror::Error;

/// How hard SQLite works to make a commit durable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Synchronous {
    /// Durable across application crashes; a power loss may drop the last
    /// few commits, never corrupt the file.
    #[default]
    Normal,
    /// Every commit is synced to disk before it returns.
    Full,
}

impl Synchronous {
    fn pragma_value(self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Full => "FULL",
        }
    }
}

/// Runtime tunables for SQLite connection behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbRuntimeSettings {
    /// How long a statement waits on a locked database, in milliseconds.
    /// Concurrent `BEGIN IMMEDIATE` writers queue for up to this long.
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled SQLite connections. Ignored for `:memory:`,
    /// which always gets a single connection.
    pub pool_max_size: u32,

    /// Commit durability level.
    pub synchronous: Synchronous,
}

impl Default for DbRuntimeSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            pool_max_size: 8,
            synchronous: Synchronous::Normal,
        }
    }
}

/// A type alias for the SQLite connection pool.
pub type DbPool = Pool<SqliteConnectionManager>;

/// Errors that can occur when creating the database pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Failed to build the connection pool.
    #[error("failed to create database connection pool: {0}")]
    PoolInit(#[from] r2d2::Error),
}

/// Pragmas applied to each connection as the pool opens it.
#[derive(Debug, Clone, Copy)]
struct JournalPragmas {
    busy_timeout_ms: u64,
    synchronous: Synchronous,
    in_memory: bool,
}

impl CustomizeConnection<Connection, rusqlite::Error> for JournalPragmas {
    fn on_acquire(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        if !self.in_memory {
            let journal_mode: String =
                conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
            if !journal_mode.eq_ignore_ascii_case("wal") {
                return Err(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                    Some(format!("failed to enable WAL journal mode, got: {journal_mode}")),
                ));
            }
        }
        conn.execute_batch(&format!(
            "PRAGMA synchronous = {};
             PRAGMA busy_timeout = {};",
            self.synchronous.pragma_value(),
            self.busy_timeout_ms
        ))
    }
}

fn is_in_memory(db_path: &str) -> bool {
    db_path == ":memory:" || db_path.is_empty()
}

/// Creates a new SQLite connection pool for the journal.
///
/// # Arguments
///
/// * `db_path` - Path to the SQLite database file, or `:memory:`. Each
///   connection to `:memory:` opens its own private database, so in-memory
///   pools are limited to one connection and skip WAL.
///
/// # Errors
///
/// Returns `PoolError::PoolInit` if the connection pool cannot be created.
pub fn create_pool(db_path: &str, settings: DbRuntimeSettings) -> Result<DbPool, PoolError> {
    let in_memory = is_in_memory(db_path);
    let max_size = if in_memory {
        if settings.pool_max_size > 1 {
            tracing::warn!(
                requested = settings.pool_max_size,
                "in-memory database limited to one pooled connection"
            );
        }
        1
    } else {
        settings.pool_max_size.max(1)
    };

    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let manager = SqliteConnectionManager::file(db_path).with_flags(flags);

    let pool = Pool::builder()
        .max_size(max_size)
        .connection_customizer(Box::new(JournalPragmas {
            busy_timeout_ms: settings.busy_timeout_ms,
            synchronous: settings.synchronous,
            in_memory,
        }))
        .build(manager)?;

    tracing::debug!(
        path = db_path,
        pool_max_size = max_size,
        busy_timeout_ms = settings.busy_timeout_ms,
        synchronous = ?settings.synchronous,
        "created journal connection pool"
    );

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pragma_i64(pool: &DbPool, pragma: &str) -> i64 {
        let conn = pool.get().expect("should get a connection");
        conn.query_row(&format!("PRAGMA {pragma}"), [], |row| row.get(0))
            .expect("should query pragma")
    }

    #[test]
    fn in_memory_pool_is_limited_to_one_connection() {
        let settings = DbRuntimeSettings {
            busy_timeout_ms: 2_500,
            pool_max_size: 8,
            synchronous: Synchronous::Normal,
        };

        let pool = create_pool(":memory:", settings).expect("pool creation should succeed");
        assert_eq!(pool.max_size(), 1);
        assert_eq!(pragma_i64(&pool, "busy_timeout"), 2_500);
    }

    #[test]
    fn file_pool_uses_wal_and_requested_durability() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("journal.db");
        let pool = create_pool(
            path.to_str().expect("utf-8 path"),
            DbRuntimeSettings {
                pool_max_size: 3,
                synchronous: Synchronous::Full,
                ..DbRuntimeSettings::default()
            },
        )
        .expect("pool creation should succeed");

        assert_eq!(pool.max_size(), 3);
        let conn = pool.get().expect("should get a connection");
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .expect("should query journal_mode");
        assert_eq!(mode, "wal");
        drop(conn);

        // FULL = 2, NORMAL = 1.
        assert_eq!(pragma_i64(&pool, "synchronous"), 2);
    }

    #[test]
    fn synchronous_parses_from_config_text() {
        #[derive(Deserialize)]
        struct Section {
            synchronous: Synchronous,
        }
        let section: Section =
            serde_json::from_str(r#"{"synchronous": "full"}"#).expect("should parse");
        assert_eq!(section.synchronous, Synchronous::Full);
    }
}

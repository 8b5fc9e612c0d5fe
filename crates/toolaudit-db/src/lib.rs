//! SQLite storage for the toolaudit journal.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization,
//! embedded SQL migrations, and [`SqliteAdapter`], the implementation of the
//! [`toolaudit_types::DbAdapter`] contract the journal consumes.
//!
//! # Design decisions
//!
//! - **SQLite with WAL mode**: concurrent readers with a single writer,
//!   which matches an append-heavy audit log read by occasional inspectors.
//! - **`BEGIN IMMEDIATE` write transactions**: the writer lock is taken
//!   before the chain tip is read, so two writers can never observe the
//!   same tip.
//! - **Embedded migrations**: SQL files are compiled into the binary via
//!   `include_str!` and cannot drift from the code that depends on them.

mod migrations;
mod pool;
mod sqlite;

pub use migrations::{run_baseline_migrations, run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError, Synchronous};
pub use sqlite::SqliteAdapter;

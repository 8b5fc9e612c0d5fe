//! Tamper-evident journal of an agent's tool-execution pipeline.
//!
//! Every stage a tool invocation passes through (proposed, validated,
//! executed, ...) is appended to an append-only table as an
//! [`ExecutionEvent`]. Events are hash-chained: each row stores the hash of
//! its predecessor and a SHA-256 over its own fields, so any retroactive
//! edit is detectable by replaying the table with [`hash_chain::verify_chain`].
//!
//! | Component | Role |
//! |-----------|------|
//! | [`codec`] | stored row ⇄ [`ExecutionEvent`] |
//! | [`hash_chain`] | pure event hashing and chain verification |
//! | [`RetentionManager`] | throttles age-based pruning sweeps |
//! | [`EventStore`] | the public append/read API over a [`DbAdapter`](toolaudit_types::DbAdapter) |
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use toolaudit_journal::{stage, EventStore, JournalConfig};
//!
//! let adapter = Arc::new(toolaudit_db::SqliteAdapter::new(pool));
//! let store = EventStore::open(adapter, JournalConfig::default()).await?;
//!
//! let id = store
//!     .append("req-1", stage::PROPOSED, &serde_json::json!({"tool": "READ_FILE"}), None)
//!     .await?;
//! let history = store.get_by_request_id("req-1").await;
//! ```

mod clock;
pub mod codec;
mod config;
mod error;
mod event;
pub mod hash_chain;
mod retention;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{JournalConfig, SweepFailurePolicy};
pub use error::{DecodeError, JournalError};
pub use event::{stage, EventFields, ExecutionEvent, NewEvent};
pub use hash_chain::{ChainReport, ChainVerifier, ChainViolation};
pub use retention::RetentionManager;
pub use store::EventStore;

//! Error types for the execution journal.

use toolaudit_types::StorageError;

use crate::hash_chain::ChainViolation;

/// Errors surfaced by [`EventStore`](crate::EventStore) operations.
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    /// The storage adapter failed (connection, lock timeout, statement).
    #[error("journal storage error: {0}")]
    Storage(#[from] StorageError),

    /// A stored row could not be turned back into an event.
    #[error("journal decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The payload could not be serialised to JSON.
    #[error("journal serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The blocking storage task panicked or was cancelled.
    #[error("journal storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Hash-chain verification found a tampered or unlinked row.
    #[error("journal hash chain broken: {0}")]
    ChainBroken(#[from] ChainViolation),
}

/// Errors raised while decoding a stored row.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    /// A required column is absent from the result set.
    #[error("missing column '{0}'")]
    MissingColumn(&'static str),

    /// A column held a value of the wrong kind.
    #[error("column '{column}' has unexpected value {found}")]
    InvalidType {
        /// The offending column.
        column: &'static str,
        /// A short description of what was found.
        found: String,
    },

    /// The payload text was not valid JSON.
    #[error("payload is not valid JSON: {0}")]
    InvalidPayload(String),

    /// The timestamp could not be normalized to epoch milliseconds.
    #[error("unrecognised timestamp '{0}'")]
    InvalidTimestamp(String),
}

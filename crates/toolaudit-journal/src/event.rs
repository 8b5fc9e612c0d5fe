//! Execution event records.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Pipeline stage labels used by the orchestrator.
///
/// The `type` column is open-ended; these are the stages every tool
/// invocation passes through, not an exhaustive list.
pub mod stage {
    /// A tool call was proposed by the agent.
    pub const PROPOSED: &str = "tool:proposed";
    /// A proposed call passed validation.
    pub const VALIDATED: &str = "tool:validated";
    /// A validated call was executed.
    pub const EXECUTED: &str = "tool:executed";
}

/// One immutable record of a tool-execution pipeline occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionEvent {
    /// Storage-assigned, strictly increasing, never reused.
    pub sequence_id: i64,
    /// Groups all events of one tool-invocation attempt.
    pub request_id: String,
    /// Pipeline stage label, e.g. `tool:proposed`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Arbitrary JSON describing the event.
    pub payload: Value,
    /// Links events across related requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Append time, epoch milliseconds.
    pub timestamp: i64,
    /// `event_hash` of the preceding row. `None` for the first chained event,
    /// after an unchained row, and on schemas without chain columns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_hash: Option<String>,
    /// SHA-256 (hex) over this event's fields and `prev_hash`. `None` when
    /// chaining is disabled or the schema has no chain columns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_hash: Option<String>,
}

impl ExecutionEvent {
    /// Borrows the fields covered by the event hash.
    pub fn fields(&self) -> EventFields<'_> {
        EventFields {
            request_id: &self.request_id,
            event_type: &self.event_type,
            payload: &self.payload,
            correlation_id: self.correlation_id.as_deref(),
            timestamp: self.timestamp,
        }
    }
}

/// An event that has not been stored yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    /// Request the event belongs to.
    pub request_id: String,
    /// Pipeline stage label.
    pub event_type: String,
    /// Serialised payload.
    pub payload: Value,
    /// Optional cross-request link.
    pub correlation_id: Option<String>,
    /// Append time, epoch milliseconds.
    pub timestamp: i64,
}

impl NewEvent {
    /// Borrows the fields covered by the event hash.
    pub fn fields(&self) -> EventFields<'_> {
        EventFields {
            request_id: &self.request_id,
            event_type: &self.event_type,
            payload: &self.payload,
            correlation_id: self.correlation_id.as_deref(),
            timestamp: self.timestamp,
        }
    }
}

/// The hashed content of an event, independent of how it is stored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventFields<'a> {
    /// Request the event belongs to.
    pub request_id: &'a str,
    /// Pipeline stage label.
    pub event_type: &'a str,
    /// Event payload; hashed by structure, not by stored text.
    pub payload: &'a Value,
    /// Cross-request link; absent hashes differently from the string `"null"`.
    pub correlation_id: Option<&'a str>,
    /// Append time, epoch milliseconds.
    pub timestamp: i64,
}

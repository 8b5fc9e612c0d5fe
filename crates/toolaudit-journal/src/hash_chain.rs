//! Tamper-evident hash chaining of execution events.
//!
//! Each event's hash is SHA-256 over a canonical JSON array of
//! `[request_id, type, payload, correlation_id, timestamp, prev_hash]`.
//! `serde_json` objects serialise with sorted keys, so the encoding depends
//! only on the payload's structure, not on the order keys were inserted or
//! on how the storage engine re-encoded the JSON text.

use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::event::{EventFields, ExecutionEvent};

/// Computes the hash of an event whose predecessor hash is `prev_hash`.
///
/// Pure and deterministic: identical inputs always yield the identical
/// 64-character lowercase hex string.
pub fn compute_hash(fields: EventFields<'_>, prev_hash: Option<&str>) -> String {
    let canonical: Value = json!([
        fields.request_id,
        fields.event_type,
        fields.payload,
        fields.correlation_id,
        fields.timestamp,
        prev_hash,
    ]);
    hex::encode(Sha256::digest(canonical.to_string().as_bytes()))
}

/// Outcome of a successful chain verification.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ChainReport {
    /// Rows whose hash was recomputed and matched.
    pub verified: usize,
    /// Rows stored without a hash (chaining disabled when written).
    pub unchained: usize,
    /// `event_hash` of the newest row, if it is chained.
    pub tip: Option<String>,
}

/// The first inconsistency found while replaying a chain.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainViolation {
    /// The stored hash does not match the hash recomputed from the row.
    #[error("event {sequence_id}: stored hash {stored} does not match recomputed {computed}")]
    HashMismatch {
        /// The offending row.
        sequence_id: i64,
        /// The hash read from storage.
        stored: String,
        /// The hash recomputed from the stored fields.
        computed: String,
    },

    /// The row's `prev_hash` does not point at its predecessor.
    #[error("event {sequence_id}: prev_hash {found:?} does not link to predecessor {expected:?}")]
    BrokenLink {
        /// The offending row.
        sequence_id: i64,
        /// The predecessor's `event_hash`.
        expected: Option<String>,
        /// The `prev_hash` stored on the row.
        found: Option<String>,
    },
}

/// Replays `events` (ascending `sequence_id`) and checks every hash and link.
///
/// The first event is accepted as the anchor: retention deletes the oldest
/// rows, so its predecessor is usually gone. Rows without an `event_hash`
/// are counted as unchained and not linked against their predecessor.
///
/// # Errors
///
/// Returns the first [`ChainViolation`] encountered.
pub fn verify_chain(events: &[ExecutionEvent]) -> Result<ChainReport, ChainViolation> {
    let mut verifier = ChainVerifier::new();
    for event in events {
        verifier.push(event)?;
    }
    Ok(verifier.finish())
}

/// Incremental form of [`verify_chain`] for replaying a log page by page.
///
/// Only the previous row's hash is kept between calls, so memory use does
/// not depend on the length of the log.
#[derive(Debug, Clone, Default)]
pub struct ChainVerifier {
    report: ChainReport,
    // `None` until the anchor row has been seen.
    predecessor: Option<Option<String>>,
}

impl ChainVerifier {
    /// Starts a replay; the next pushed event becomes the anchor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks the next event in ascending `sequence_id` order.
    ///
    /// # Errors
    ///
    /// Returns the [`ChainViolation`] this event introduces. The verifier
    /// should be discarded afterwards.
    pub fn push(&mut self, event: &ExecutionEvent) -> Result<(), ChainViolation> {
        if let Some(stored) = event.event_hash.as_deref() {
            if let Some(expected) = &self.predecessor {
                if event.prev_hash != *expected {
                    return Err(ChainViolation::BrokenLink {
                        sequence_id: event.sequence_id,
                        expected: expected.clone(),
                        found: event.prev_hash.clone(),
                    });
                }
            }

            let computed = compute_hash(event.fields(), event.prev_hash.as_deref());
            if computed != stored {
                return Err(ChainViolation::HashMismatch {
                    sequence_id: event.sequence_id,
                    stored: stored.to_string(),
                    computed,
                });
            }
            self.report.verified += 1;
        } else {
            self.report.unchained += 1;
        }
        self.predecessor = Some(event.event_hash.clone());
        Ok(())
    }

    /// The report for everything pushed so far.
    pub fn finish(self) -> ChainReport {
        ChainReport {
            tip: self.predecessor.flatten(),
            ..self.report
        }
    }
}

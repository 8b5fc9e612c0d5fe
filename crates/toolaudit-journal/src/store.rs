//! The execution event store.
//!
//! All writes go through [`EventStore::append`], which (optionally) runs a
//! throttled retention sweep, then reads the chain tip, hashes the new event
//! and inserts it inside one exclusive write transaction.
//!
//! Reads are fail-soft: a storage error is logged and an empty list is
//! returned, so an unavailable database never takes the audit surface down
//! with it. Callers that must tell "no events" from "storage unavailable"
//! apart should use [`EventStore::verify_chain`] or watch the logs.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use toolaudit_types::{DbAdapter, Query, QueryResult, RawSql, SqlValue};

use crate::clock::{Clock, SystemClock};
use crate::codec::{self, col};
use crate::config::{JournalConfig, SweepFailurePolicy};
use crate::error::{DecodeError, JournalError};
use crate::event::{ExecutionEvent, NewEvent};
use crate::hash_chain::{self, ChainReport, ChainVerifier};
use crate::retention::RetentionManager;

const SELECT_TIP: &str = "SELECT event_hash FROM execution_events ORDER BY id DESC LIMIT 1";

const INSERT_CHAINED: &str = "INSERT INTO execution_events
    (request_id, type, payload, correlation_id, timestamp, prev_hash, event_hash)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
    RETURNING id";

const INSERT_BASELINE: &str = "INSERT INTO execution_events
    (request_id, type, payload, correlation_id, timestamp)
    VALUES (?1, ?2, ?3, ?4, ?5)
    RETURNING id";

// Reads select `*` so that tables without the chain columns still decode.
const SELECT_BY_REQUEST: &str =
    "SELECT * FROM execution_events WHERE request_id = ?1 ORDER BY id ASC";

const SELECT_BY_CORRELATION: &str =
    "SELECT * FROM execution_events WHERE correlation_id = ?1 ORDER BY id ASC";

const SELECT_RECENT: &str = "SELECT * FROM (
        SELECT * FROM execution_events ORDER BY id DESC LIMIT ?1
    ) ORDER BY id ASC";

const SELECT_PAGE: &str =
    "SELECT * FROM execution_events WHERE id > ?1 ORDER BY id ASC LIMIT ?2";

const COUNT_ALL: &str = "SELECT COUNT(*) AS count FROM execution_events";

const DELETE_EXPIRED_BATCH: &str = "DELETE FROM execution_events WHERE id IN (
        SELECT id FROM execution_events WHERE timestamp < ?1 ORDER BY id LIMIT ?2
    )";

/// Append-only, hash-chained journal of tool-execution events.
///
/// One instance is shared (behind an `Arc`) by every in-flight request.
/// Appends on the same instance are serialised by an async write lock, and
/// the tip read plus insert run in a single exclusive storage transaction, so
/// other processes writing the same database cannot fork the chain either.
pub struct EventStore {
    adapter: Arc<dyn DbAdapter>,
    clock: Arc<dyn Clock>,
    config: JournalConfig,
    retention: RetentionManager,
    size: AtomicUsize,
    write_lock: Mutex<()>,
    sweep_lock: Mutex<()>,
}

impl EventStore {
    /// Creates a store without touching storage.
    ///
    /// [`size`](Self::size) starts at zero regardless of existing rows; call
    /// [`sync_size`](Self::sync_size) (or use [`open`](Self::open)) before
    /// relying on it.
    pub fn new(adapter: Arc<dyn DbAdapter>, config: JournalConfig) -> Self {
        let retention = RetentionManager::new(config.retention_ms, config.cleanup_interval_ms);
        Self {
            adapter,
            clock: Arc::new(SystemClock),
            config,
            retention,
            size: AtomicUsize::new(0),
            write_lock: Mutex::new(()),
            sweep_lock: Mutex::new(()),
        }
    }

    /// Creates a store and synchronises its size with storage.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError`] if the row count cannot be read.
    pub async fn open(
        adapter: Arc<dyn DbAdapter>,
        config: JournalConfig,
    ) -> Result<Self, JournalError> {
        Self::new(adapter, config).initialize().await
    }

    /// Replaces the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Synchronises the size counter and returns the now-ready store.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError`] if the row count cannot be read.
    pub async fn initialize(self) -> Result<Self, JournalError> {
        self.sync_size().await?;
        Ok(self)
    }

    /// The configuration this store was built with.
    pub fn config(&self) -> &JournalConfig {
        &self.config
    }

    /// Number of successful appends since construction or the last
    /// [`sync_size`](Self::sync_size). Retention sweeps do not lower it.
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    /// Records one pipeline event and returns its sequence id.
    ///
    /// Runs a retention sweep first when one is due. The event is stamped
    /// with the current time and, when chaining is enabled, linked to the
    /// current chain tip.
    ///
    /// # Errors
    ///
    /// Storage failures propagate unchanged and leave [`size`](Self::size)
    /// untouched. A payload that cannot be read back (for example one nested
    /// deeper than the JSON parser's recursion limit) is rejected with
    /// [`JournalError::Serialization`] before anything is written. A failed sweep only fails the append under
    /// [`SweepFailurePolicy::Fatal`].
    pub async fn append<P>(
        &self,
        request_id: &str,
        event_type: &str,
        payload: &P,
        correlation_id: Option<&str>,
    ) -> Result<i64, JournalError>
    where
        P: Serialize + ?Sized,
    {
        let payload = serde_json::to_value(payload)?;
        codec::ensure_decodable(&payload)?;

        self.maybe_sweep(self.clock.now_ms()).await?;

        let _writer = self.write_lock.lock().await;
        // Stamped under the writer so timestamps follow sequence order.
        let event = NewEvent {
            request_id: request_id.to_string(),
            event_type: event_type.to_string(),
            payload,
            correlation_id: correlation_id.map(str::to_string),
            timestamp: self.clock.now_ms(),
        };
        let hash_chain = self.config.hash_chain;
        let sequence_id = self
            .blocking(move |adapter| insert_event(adapter, &event, hash_chain))
            .await?;
        self.size.fetch_add(1, Ordering::AcqRel);

        tracing::debug!(sequence_id, request_id, event_type, "appended execution event");
        Ok(sequence_id)
    }

    /// All events of one request, oldest first. Empty on storage failure.
    pub async fn get_by_request_id(&self, request_id: &str) -> Vec<ExecutionEvent> {
        self.read_soft(
            "get_by_request_id",
            Query::new(SELECT_BY_REQUEST).bind(request_id),
        )
        .await
    }

    /// All events sharing a correlation id, oldest first. Empty on storage
    /// failure.
    pub async fn get_by_correlation_id(&self, correlation_id: &str) -> Vec<ExecutionEvent> {
        self.read_soft(
            "get_by_correlation_id",
            Query::new(SELECT_BY_CORRELATION).bind(correlation_id),
        )
        .await
    }

    /// The newest `limit` events across all requests, oldest first.
    ///
    /// Returns immediately, without querying, for `limit <= 0`.
    pub async fn get_recent(&self, limit: i64) -> Vec<ExecutionEvent> {
        if limit <= 0 {
            return Vec::new();
        }
        self.read_soft("get_recent", Query::new(SELECT_RECENT).bind(limit))
            .await
    }

    /// Re-reads the row count from storage into [`size`](Self::size).
    ///
    /// Needed after start-up or a reconnect, or whenever another process may
    /// have written to the same table.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError`] if the count cannot be read; the cached size
    /// is left unchanged.
    pub async fn sync_size(&self) -> Result<usize, JournalError> {
        // Hold the writer so no append lands between the count and the store.
        let _writer = self.write_lock.lock().await;
        let result = self
            .blocking(|adapter| Ok(adapter.execute_raw(&Query::new(COUNT_ALL))?))
            .await?;
        let count = result
            .first_value("count")
            .and_then(SqlValue::as_i64)
            .ok_or(DecodeError::MissingColumn("count"))?;
        let count = usize::try_from(count).unwrap_or_default();

        self.size.store(count, Ordering::Release);
        tracing::info!(size = count, "synchronised journal size");
        Ok(count)
    }

    /// Runs a retention sweep now, ignoring the cleanup interval.
    ///
    /// Returns the number of rows removed (zero when retention is disabled).
    ///
    /// # Errors
    ///
    /// Returns [`JournalError`] if a delete batch fails. Batches that
    /// completed before the failure stay deleted.
    pub async fn sweep_now(&self) -> Result<usize, JournalError> {
        let _sweeping = self.sweep_lock.lock().await;
        let now = self.clock.now_ms();
        let removed = self.sweep(now).await?;
        self.retention.mark_swept(now);
        Ok(removed)
    }

    /// Replays every stored event and checks hashes and links.
    ///
    /// Rows are read in pages of `verify_page_size`, keyed by id, so memory
    /// use stays bounded however long the retention window is.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::ChainBroken`] for the first inconsistency,
    /// [`JournalError::Decode`] for an unreadable row, or a storage error.
    pub async fn verify_chain(&self) -> Result<ChainReport, JournalError> {
        let page_size = self.config.verify_page_size.max(1);
        let page_limit = usize::try_from(page_size).unwrap_or(usize::MAX);

        let mut verifier = ChainVerifier::new();
        let mut after_id = 0_i64;
        loop {
            let query = Query::new(SELECT_PAGE)
                .bind(after_id)
                .bind(i64::from(page_size));
            let result = self.fetch(query).await?;
            let rows = result.rows.len();

            for decoded in codec::decode_all(&result) {
                let event = decoded?;
                verifier.push(&event)?;
                after_id = event.sequence_id;
            }
            if rows < page_limit {
                break;
            }
        }

        let report = verifier.finish();
        tracing::info!(
            verified = report.verified,
            unchained = report.unchained,
            "journal hash chain verified"
        );
        Ok(report)
    }

    async fn maybe_sweep(&self, now: i64) -> Result<(), JournalError> {
        if !self.retention.is_sweep_due(now) {
            return Ok(());
        }
        // Another caller is already sweeping; it will reset the interval.
        let Ok(_sweeping) = self.sweep_lock.try_lock() else {
            return Ok(());
        };
        if !self.retention.is_sweep_due(now) {
            return Ok(());
        }

        match self.sweep(now).await {
            Ok(_) => {
                self.retention.mark_swept(now);
                Ok(())
            }
            Err(err) => match self.config.sweep_failure {
                SweepFailurePolicy::BestEffort => {
                    // The interval still resets so a broken sweep is retried
                    // once per interval, not on every append.
                    self.retention.mark_swept(now);
                    tracing::warn!(error = %err, "retention sweep failed, continuing append");
                    Ok(())
                }
                SweepFailurePolicy::Fatal => Err(err),
            },
        }
    }

    async fn sweep(&self, now: i64) -> Result<usize, JournalError> {
        let Some(cutoff) = self.retention.cutoff(now) else {
            tracing::debug!("retention disabled, nothing to sweep");
            return Ok(0);
        };
        let batch_size = self.config.sweep_batch_size.max(1);
        let batch_limit = usize::try_from(batch_size).unwrap_or(usize::MAX);

        let mut total = 0;
        loop {
            // Each batch is its own statement so appends can interleave.
            let removed = self
                .blocking(move |adapter| {
                    let query = Query::new(DELETE_EXPIRED_BATCH)
                        .bind(cutoff)
                        .bind(i64::from(batch_size));
                    Ok(adapter.execute_raw(&query)?.rows_affected)
                })
                .await?;
            total += removed;
            if removed < batch_limit {
                break;
            }
        }

        if total > 0 {
            tracing::info!(count = total, cutoff, "deleted expired execution events");
        } else {
            tracing::debug!(cutoff, "no expired execution events to delete");
        }
        Ok(total)
    }

    async fn read_soft(&self, operation: &'static str, query: Query) -> Vec<ExecutionEvent> {
        let result = match self.fetch(query).await {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(operation, error = %err, "journal read failed, returning no events");
                return Vec::new();
            }
        };

        codec::decode_all(&result)
            .into_iter()
            .filter_map(|decoded| match decoded {
                Ok(event) => Some(event),
                Err(err) => {
                    tracing::warn!(operation, error = %err, "skipping undecodable execution event");
                    None
                }
            })
            .collect()
    }

    async fn fetch(&self, query: Query) -> Result<QueryResult, JournalError> {
        self.blocking(move |adapter| Ok(adapter.execute_raw(&query)?))
            .await
    }

    /// Runs `f` against the adapter on the blocking thread pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T, JournalError>
    where
        F: FnOnce(&dyn DbAdapter) -> Result<T, JournalError> + Send + 'static,
        T: Send + 'static,
    {
        let adapter = Arc::clone(&self.adapter);
        tokio::task::spawn_blocking(move || f(adapter.as_ref())).await?
    }
}

impl fmt::Debug for EventStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStore")
            .field("config", &self.config)
            .field("size", &self.size())
            .field("last_sweep_at", &self.retention.last_sweep_at())
            .finish_non_exhaustive()
    }
}

/// Reads the tip and inserts `event` in one exclusive transaction.
fn insert_event(
    adapter: &dyn DbAdapter,
    event: &NewEvent,
    hash_chain: bool,
) -> Result<i64, JournalError> {
    let result = if hash_chain {
        adapter.write_transaction(&mut |tx: &dyn RawSql| {
            let tip = tx.execute_raw(&Query::new(SELECT_TIP))?;
            // No prior row (or an unchained one): this event starts the chain.
            let prev_hash = tip
                .first_value(col::EVENT_HASH)
                .and_then(SqlValue::as_str)
                .map(str::to_string);
            let event_hash = hash_chain::compute_hash(event.fields(), prev_hash.as_deref());

            tx.execute_raw(&Query {
                sql: INSERT_CHAINED.to_string(),
                params: codec::encode(event, prev_hash.as_deref(), Some(&event_hash)),
            })
        })?
    } else {
        adapter.execute_raw(&Query {
            sql: INSERT_BASELINE.to_string(),
            params: codec::encode_baseline(event),
        })?
    };

    result
        .first_value(col::ID)
        .and_then(SqlValue::as_i64)
        .ok_or(DecodeError::MissingColumn(col::ID))
        .map_err(JournalError::from)
}

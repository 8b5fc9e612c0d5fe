//! Journal configuration.

use serde::Deserialize;

/// What to do when a retention sweep triggered by `append` fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepFailurePolicy {
    /// Log the failure and continue with the append.
    #[default]
    BestEffort,
    /// Fail the append with the sweep's error.
    Fatal,
}

/// Behaviour of an [`EventStore`](crate::EventStore).
#[derive(Debug, Clone, Deserialize)]
pub struct JournalConfig {
    /// Maximum event age before it may be deleted. `None` disables sweeping.
    #[serde(default)]
    pub retention_ms: Option<u64>,

    /// Minimum spacing between sweeps.
    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,

    /// Maximum rows removed by a single delete statement.
    #[serde(default = "default_sweep_batch_size")]
    pub sweep_batch_size: u32,

    /// Rows read per statement by [`EventStore::verify_chain`](crate::EventStore::verify_chain).
    #[serde(default = "default_verify_page_size")]
    pub verify_page_size: u32,

    /// Whether to compute and store `prev_hash`/`event_hash`. Must be `false`
    /// for a table created without the chain columns.
    #[serde(default = "default_hash_chain")]
    pub hash_chain: bool,

    /// Whether a failed sweep fails the append that triggered it.
    #[serde(default)]
    pub sweep_failure: SweepFailurePolicy,
}

fn default_cleanup_interval_ms() -> u64 {
    60_000
}

fn default_sweep_batch_size() -> u32 {
    5_000
}

fn default_verify_page_size() -> u32 {
    1_000
}

fn default_hash_chain() -> bool {
    true
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            retention_ms: None,
            cleanup_interval_ms: default_cleanup_interval_ms(),
            sweep_batch_size: default_sweep_batch_size(),
            verify_page_size: default_verify_page_size(),
            hash_chain: default_hash_chain(),
            sweep_failure: SweepFailurePolicy::default(),
        }
    }
}

impl JournalConfig {
    /// Enables retention with the given window and sweep interval.
    #[must_use]
    pub fn with_retention(mut self, retention_ms: u64, cleanup_interval_ms: u64) -> Self {
        self.retention_ms = Some(retention_ms);
        self.cleanup_interval_ms = cleanup_interval_ms;
        self
    }

    /// Disables hash chaining (baseline append-only log).
    #[must_use]
    pub fn without_hash_chain(mut self) -> Self {
        self.hash_chain = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_section_uses_defaults() {
        let config: JournalConfig = toml::from_str("").expect("empty config should parse");
        assert_eq!(config.retention_ms, None);
        assert_eq!(config.cleanup_interval_ms, 60_000);
        assert_eq!(config.sweep_batch_size, 5_000);
        assert_eq!(config.verify_page_size, 1_000);
        assert!(config.hash_chain);
        assert_eq!(config.sweep_failure, SweepFailurePolicy::BestEffort);
    }

    #[test]
    fn parses_all_fields() {
        let config: JournalConfig = toml::from_str(
            r#"
            retention_ms = 86400000
            cleanup_interval_ms = 1000
            sweep_batch_size = 10
            verify_page_size = 250
            hash_chain = false
            sweep_failure = "fatal"
            "#,
        )
        .expect("config should parse");
        assert_eq!(config.retention_ms, Some(86_400_000));
        assert_eq!(config.cleanup_interval_ms, 1_000);
        assert_eq!(config.sweep_batch_size, 10);
        assert_eq!(config.verify_page_size, 250);
        assert!(!config.hash_chain);
        assert_eq!(config.sweep_failure, SweepFailurePolicy::Fatal);
    }
}

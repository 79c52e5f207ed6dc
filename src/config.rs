use crate::error::AccessError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff schedule for transient transaction conflicts.
///
/// Delays grow by `step_ms` per attempt starting at `initial_delay_ms` while
/// they stay under `max_incremental_ms`, then are drawn uniformly from
/// `[jitter_min_ms, jitter_max_ms]`. Retrying stops once the accumulated
/// wait exceeds `max_total_wait_ms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub initial_delay_ms: u64,
    pub step_ms: u64,
    pub max_incremental_ms: u64,
    pub jitter_min_ms: u64,
    pub jitter_max_ms: u64,
    pub max_total_wait_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 150,
            step_ms: 150,
            max_incremental_ms: 500,
            jitter_min_ms: 450,
            jitter_max_ms: 800,
            max_total_wait_ms: 5_000,
        }
    }
}

impl RetryConfig {
    pub fn max_total_wait(&self) -> Duration {
        Duration::from_millis(self.max_total_wait_ms)
    }

    /// A schedule that never waits, for callers that want conflicts surfaced
    /// on the first attempt.
    pub fn disabled() -> Self {
        Self {
            max_total_wait_ms: 0,
            ..Self::default()
        }
    }
}

/// Runtime configuration for a [`crate::Repository`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Item limit of one atomic store commit. Larger write sets are chunked.
    pub max_transaction_items: usize,
    /// Physical fetch size used when a query gives none. `None` means the
    /// query limit.
    pub default_fetch_size: Option<usize>,
    /// Default consistency of get-by-id reads.
    pub strongly_consistent_reads: bool,
    pub retry: RetryConfig,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            max_transaction_items: 100,
            default_fetch_size: None,
            strongly_consistent_reads: false,
            retry: RetryConfig::default(),
        }
    }
}

impl AccessConfig {
    pub fn validate(&self) -> Result<(), AccessError> {
        if self.max_transaction_items == 0 {
            return Err(AccessError::Validation(
                "max_transaction_items must be at least 1".into(),
            ));
        }
        if self.default_fetch_size == Some(0) {
            return Err(AccessError::Validation(
                "default_fetch_size must be at least 1".into(),
            ));
        }
        let retry = &self.retry;
        if retry.jitter_min_ms > retry.jitter_max_ms {
            return Err(AccessError::Validation(format!(
                "retry jitter range is inverted: {}..{}",
                retry.jitter_min_ms, retry.jitter_max_ms
            )));
        }
        if retry.max_total_wait_ms > 0 && retry.initial_delay_ms == 0 && retry.jitter_max_ms == 0 {
            return Err(AccessError::Validation(
                "retry delays must not all be zero when retrying is enabled".into(),
            ));
        }
        Ok(())
    }
}

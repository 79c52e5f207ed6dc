use crate::commit::retry::{RetryExecutor, is_transient};
use crate::config::RetryConfig;
use crate::error::{AccessError, WriteFailure};
use crate::store::{CancellationReason, Store, StoreError, WriteItem};
use tracing::{debug, warn};

/// What a staged item's condition protects, used to name the failure when
/// the store rejects it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guard {
    /// Key must be unoccupied. Rejection means another entity holds it.
    NewKey,
    /// Key already belongs to the entity being written.
    Owned,
    /// Identity record of an existing entity, guarded by the version read
    /// when the write was staged plus any caller condition.
    Identity {
        id: String,
        stored_version: u64,
        version_checked: bool,
    },
}

/// A physical write plus the logical operation that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedWrite {
    pub operation: usize,
    pub item: WriteItem,
    pub guard: Guard,
}

/// Commits staged writes in consecutive chunks of at most `max_items`.
///
/// Each chunk is atomic. Chunks are not atomic with respect to each other:
/// a rejection in chunk `n` leaves chunks `0..n` applied. Transient conflicts
/// are retried per chunk, so a retry never resubmits an applied chunk.
pub struct TransactionManager<'a> {
    store: &'a dyn Store,
    max_items: usize,
    retry: RetryExecutor,
}

impl<'a> TransactionManager<'a> {
    /// Manager that surfaces the first conflict. See [`Self::with_retry`].
    pub fn new(store: &'a dyn Store, max_items: usize) -> Self {
        Self {
            store,
            max_items: max_items.max(1),
            retry: RetryExecutor::new(RetryConfig::disabled()),
        }
    }

    pub fn with_retry(mut self, config: RetryConfig) -> Self {
        self.retry = RetryExecutor::new(config);
        self
    }

    /// Returns the number of chunks committed.
    pub async fn commit(&self, staged: &[StagedWrite]) -> Result<usize, AccessError> {
        if staged.is_empty() {
            return Ok(0);
        }
        let chunks = staged.len().div_ceil(self.max_items);
        if chunks > 1 {
            debug!(
                items = staged.len(),
                chunks,
                max_items = self.max_items,
                "splitting write set across commits"
            );
        }
        for (n, chunk) in staged.chunks(self.max_items).enumerate() {
            if let Err(err) = self.retry.run(|| self.commit_chunk(chunk)).await {
                if n > 0 {
                    warn!(
                        applied_chunks = n,
                        chunks,
                        code = err.code_str(),
                        "write set rejected after earlier chunks committed"
                    );
                }
                return Err(err);
            }
        }
        Ok(chunks)
    }

    async fn commit_chunk(&self, chunk: &[StagedWrite]) -> Result<(), AccessError> {
        let items = chunk.iter().map(|s| s.item.clone()).collect();
        match self.store.transact_write(items).await {
            Ok(()) => Ok(()),
            Err(StoreError::TransactionCanceled { reasons }) => Err(classify(chunk, reasons)),
            Err(other) => Err(other.into()),
        }
    }
}

/// Maps a rejected chunk to the most specific error, keeping every failing
/// item in the error's failure list.
pub fn classify(chunk: &[StagedWrite], reasons: Vec<CancellationReason>) -> AccessError {
    if reasons.len() != chunk.len() {
        return AccessError::Store(StoreError::TransactionCanceled { reasons });
    }
    let transient = is_transient(&reasons);
    let failures: Vec<(&StagedWrite, WriteFailure)> = chunk
        .iter()
        .zip(reasons.iter())
        .filter(|(_, reason)| reason.is_failure())
        .map(|(staged, reason)| {
            (
                staged,
                WriteFailure {
                    operation: staged.operation,
                    key: staged.item.key().clone(),
                    reason: reason.clone(),
                },
            )
        })
        .collect();
    if transient {
        return AccessError::TransactionConflict {
            failures: failures.into_iter().map(|(_, f)| f).collect(),
        };
    }

    let mut specific = None;
    for (staged, failure) in &failures {
        let CancellationReason::ConditionalCheckFailed { current } = &failure.reason else {
            continue;
        };
        let table = failure.key.table.clone();
        specific = Some(match &staged.guard {
            Guard::NewKey => Kind::Duplicate(table, failure.key.to_string()),
            Guard::Identity {
                id,
                stored_version,
                version_checked,
            } => {
                let actual = current.as_ref().map(|r| r.object_version);
                if *version_checked && actual != Some(*stored_version) {
                    Kind::Version(table, id.clone(), *stored_version, actual)
                } else {
                    Kind::Condition(table, failure.key.to_string())
                }
            }
            Guard::Owned => Kind::Condition(table, failure.key.to_string()),
        });
        break;
    }
    let failures = failures.into_iter().map(|(_, f)| f).collect();
    match specific {
        Some(Kind::Duplicate(table, key)) => AccessError::DuplicateKey {
            table,
            key,
            failures,
        },
        Some(Kind::Version(table, id, expected, actual)) => AccessError::Version {
            table,
            id,
            expected,
            actual,
        },
        Some(Kind::Condition(table, key)) => AccessError::ConditionalCheck {
            table,
            key,
            failures,
        },
        None => AccessError::Store(StoreError::TransactionCanceled { reasons }),
    }
}

enum Kind {
    Duplicate(String, String),
    Version(String, String, u64, Option<u64>),
    Condition(String, String),
}

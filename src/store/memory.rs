use super::{
    CancellationReason, GetRequest, QueryPage, QueryRequest, Record, Store, StoreError, StoreKey,
    WriteItem,
};
use crate::query::operators::eval_condition;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;

pub const DEFAULT_MAX_TRANSACTION_ITEMS: usize = 100;

/// Injected rejection applied to commits touching a partition.
#[derive(Debug, Clone)]
struct InjectedFault {
    table: String,
    partition: String,
    reason: CancellationReason,
    /// `None` keeps firing until cleared.
    remaining: Option<usize>,
}

#[derive(Debug, Default)]
struct MemoryState {
    records: BTreeMap<StoreKey, Record>,
    faults: Vec<InjectedFault>,
    commit_attempts: u64,
    commits_applied: u64,
}

/// In-process [`Store`] with the same contract as the remote service:
/// ordered partitions, conditional atomic commits, per-item cancellation
/// reasons and no consistent reads on secondary index spaces.
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    max_transaction_items: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_max_transaction_items(DEFAULT_MAX_TRANSACTION_ITEMS)
    }

    pub fn with_max_transaction_items(max_transaction_items: usize) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            max_transaction_items,
        }
    }

    pub fn max_transaction_items(&self) -> usize {
        self.max_transaction_items
    }

    /// Rejects the next `times` commits (or every commit for `None`) that
    /// touch `partition` of `table` in any key space, with
    /// `TransactionConflict` on the touching items.
    pub fn inject_conflict(&self, table: &str, partition: &str, times: Option<usize>) {
        self.inject_cancellation(
            table,
            partition,
            CancellationReason::TransactionConflict,
            times,
        );
    }

    pub fn inject_cancellation(
        &self,
        table: &str,
        partition: &str,
        reason: CancellationReason,
        times: Option<usize>,
    ) {
        self.state.lock().faults.push(InjectedFault {
            table: table.to_string(),
            partition: partition.to_string(),
            reason,
            remaining: times,
        });
    }

    pub fn clear_faults(&self) {
        self.state.lock().faults.clear();
    }

    /// Number of `transact_write` calls received, accepted or not.
    pub fn commit_attempts(&self) -> u64 {
        self.state.lock().commit_attempts
    }

    pub fn commits_applied(&self) -> u64 {
        self.state.lock().commits_applied
    }

    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all records of `table`, in key order.
    pub fn records(&self, table: &str) -> Vec<Record> {
        self.state
            .lock()
            .records
            .values()
            .filter(|r| r.key.table == table)
            .cloned()
            .collect()
    }

    /// Writes a record unconditionally, bypassing the commit path.
    pub fn seed(&self, record: Record) {
        self.state.lock().records.insert(record.key.clone(), record);
    }
}

fn reject_consistent_index(index: &Option<String>, consistent: bool) -> Result<(), StoreError> {
    if consistent && index.is_some() {
        return Err(StoreError::Validation(
            "consistent reads are not supported on secondary index spaces".into(),
        ));
    }
    Ok(())
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, request: GetRequest) -> Result<Option<Record>, StoreError> {
        reject_consistent_index(&request.key.index, request.consistent)?;
        Ok(self.state.lock().records.get(&request.key).cloned())
    }

    async fn query(&self, request: QueryRequest) -> Result<QueryPage, StoreError> {
        reject_consistent_index(&request.index, request.consistent)?;
        if let Some(start) = &request.exclusive_start
            && (start.table != request.table
                || start.index != request.index
                || start.partition != request.partition)
        {
            return Err(StoreError::Validation(
                "exclusive start key is outside the queried partition".into(),
            ));
        }
        let lower = StoreKey::new(
            &request.table,
            request.index.clone(),
            &request.partition,
            "",
        );
        let state = self.state.lock();
        let in_partition = state
            .records
            .range((Bound::Included(lower), Bound::Unbounded))
            .map(|(_, r)| r)
            .take_while(|r| {
                r.key.table == request.table
                    && r.key.index == request.index
                    && r.key.partition == request.partition
            })
            .filter(|r| request.sort.as_ref().is_none_or(|c| c.matches(&r.key.sort)));

        let after_start = |r: &&Record| match &request.exclusive_start {
            Some(start) if request.forward => r.key.sort > start.sort,
            Some(start) => r.key.sort < start.sort,
            None => true,
        };
        let limit = request.limit.unwrap_or(usize::MAX);
        let records: Vec<Record> = if request.forward {
            in_partition.filter(after_start).take(limit).cloned().collect()
        } else {
            let mut all: Vec<&Record> = in_partition.filter(after_start).collect();
            all.reverse();
            all.into_iter().take(limit).cloned().collect()
        };
        let last_evaluated = match request.limit {
            Some(limit) if records.len() == limit => records.last().map(|r| r.key.clone()),
            _ => None,
        };
        Ok(QueryPage {
            records,
            last_evaluated,
        })
    }

    async fn transact_write(&self, items: Vec<WriteItem>) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.commit_attempts += 1;
        if items.is_empty() {
            return Ok(());
        }
        if items.len() > self.max_transaction_items {
            return Err(StoreError::Validation(format!(
                "transaction of {} items exceeds the limit of {}",
                items.len(),
                self.max_transaction_items
            )));
        }
        let unique = {
            let mut keys = HashSet::with_capacity(items.len());
            items.iter().all(|item| keys.insert(item.key()))
        };
        if !unique {
            return Err(StoreError::Validation(
                "transaction cannot include multiple operations on one item".into(),
            ));
        }

        let mut fired = vec![false; state.faults.len()];
        let mut reasons = Vec::with_capacity(items.len());
        for item in &items {
            let key = item.key();
            let fault = state.faults.iter().enumerate().find(|(_, f)| {
                f.remaining != Some(0) && f.table == key.table && f.partition == key.partition
            });
            if let Some((idx, fault)) = fault {
                fired[idx] = true;
                reasons.push(fault.reason.clone());
                continue;
            }
            let current = state.records.get(key);
            let passed = item
                .condition()
                .is_none_or(|condition| eval_condition(condition, current));
            reasons.push(if passed {
                CancellationReason::None
            } else {
                CancellationReason::ConditionalCheckFailed {
                    current: current.cloned().map(Box::new),
                }
            });
        }
        for (fault, fired) in state.faults.iter_mut().zip(fired) {
            if fired && let Some(remaining) = fault.remaining.as_mut() {
                *remaining = remaining.saturating_sub(1);
            }
        }
        state.faults.retain(|f| f.remaining != Some(0));
        if reasons.iter().any(CancellationReason::is_failure) {
            return Err(StoreError::TransactionCanceled { reasons });
        }

        for item in items {
            match item {
                WriteItem::Put { record, .. } => {
                    state.records.insert(record.key.clone(), record);
                }
                WriteItem::Delete { key, .. } => {
                    state.records.remove(&key);
                }
            }
        }
        state.commits_applied += 1;
        Ok(())
    }
}

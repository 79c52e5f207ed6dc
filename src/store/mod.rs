//! Boundary to the partition/sort-key store.
//!
//! The engine only talks to the store through [`Store`]. Every write goes
//! through [`Store::transact_write`], which applies its items atomically or
//! not at all and reports one [`CancellationReason`] per item on rejection.

pub mod error;
pub mod memory;

use crate::catalog::types::Item;
use crate::query::plan::Expr;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use error::{CancellationReason, StoreError};
pub use memory::MemoryStore;

/// Absolute physical address of a record.
///
/// `index == None` addresses the base table, `Some(name)` a named secondary
/// index space of that table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StoreKey {
    pub table: String,
    pub index: Option<String>,
    pub partition: String,
    pub sort: String,
}

impl StoreKey {
    pub fn new(
        table: impl Into<String>,
        index: Option<String>,
        partition: impl Into<String>,
        sort: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            index,
            partition: partition.into(),
            sort: sort.into(),
        }
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.index {
            Some(index) => write!(
                f,
                "{}[{}] ({}, {})",
                self.table, index, self.partition, self.sort
            ),
            None => write!(f, "{} ({}, {})", self.table, self.partition, self.sort),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordKind {
    /// Keyed solely by identity; authoritative copy used for get-by-id.
    Identity,
    /// Table-wide listing record, partition key is the bare table name.
    Primary,
    /// Copy under an alternate partition/sort combination.
    Secondary,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub key: StoreKey,
    pub kind: RecordKind,
    pub object_version: u64,
    pub attributes: Item,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    NotExists,
    Exists,
    VersionEquals(u64),
    Matches(Expr),
    All(Vec<Condition>),
}

impl Condition {
    /// Conjunction that flattens nested `All` and skips `None`.
    pub fn all(conditions: impl IntoIterator<Item = Option<Condition>>) -> Option<Condition> {
        let mut parts = Vec::new();
        for condition in conditions.into_iter().flatten() {
            match condition {
                Condition::All(inner) => parts.extend(inner),
                other => parts.push(other),
            }
        }
        match parts.len() {
            0 => None,
            1 => parts.pop(),
            _ => Some(Condition::All(parts)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteItem {
    Put {
        record: Record,
        condition: Option<Condition>,
    },
    Delete {
        key: StoreKey,
        condition: Option<Condition>,
    },
}

impl WriteItem {
    pub fn key(&self) -> &StoreKey {
        match self {
            WriteItem::Put { record, .. } => &record.key,
            WriteItem::Delete { key, .. } => key,
        }
    }

    pub fn condition(&self) -> Option<&Condition> {
        match self {
            WriteItem::Put { condition, .. } | WriteItem::Delete { condition, .. } => {
                condition.as_ref()
            }
        }
    }
}

/// Condition on encoded sort keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortKeyCondition {
    Eq(String),
    Lt(String),
    Lte(String),
    Gt(String),
    Gte(String),
    Between(String, String),
    BeginsWith(String),
}

impl SortKeyCondition {
    pub fn matches(&self, sort: &str) -> bool {
        match self {
            SortKeyCondition::Eq(v) => sort == v,
            SortKeyCondition::Lt(v) => sort < v.as_str(),
            SortKeyCondition::Lte(v) => sort <= v.as_str(),
            SortKeyCondition::Gt(v) => sort > v.as_str(),
            SortKeyCondition::Gte(v) => sort >= v.as_str(),
            SortKeyCondition::Between(lo, hi) => sort >= lo.as_str() && sort <= hi.as_str(),
            SortKeyCondition::BeginsWith(prefix) => sort.starts_with(prefix.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetRequest {
    pub key: StoreKey,
    pub consistent: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub table: String,
    pub index: Option<String>,
    pub partition: String,
    pub sort: Option<SortKeyCondition>,
    pub forward: bool,
    /// Resume strictly after this key in the scan direction.
    pub exclusive_start: Option<StoreKey>,
    /// Maximum number of physical records to examine.
    pub limit: Option<usize>,
    pub consistent: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryPage {
    pub records: Vec<Record>,
    /// Present when the fetch stopped because `limit` was reached.
    pub last_evaluated: Option<StoreKey>,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, request: GetRequest) -> Result<Option<Record>, StoreError>;

    async fn query(&self, request: QueryRequest) -> Result<QueryPage, StoreError>;

    /// Applies all items atomically. Rejections carry one reason per item,
    /// in submission order.
    async fn transact_write(&self, items: Vec<WriteItem>) -> Result<(), StoreError>;
}

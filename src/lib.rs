//! Data-access layer over partition/sort-key wide-column stores.
//!
//! Entities are described by an [`EntitySchema`]. Each write fans an entity
//! out into an identity record, a table-wide listing record and one record
//! per declared partition/sort combination, all committed atomically through
//! [`Store::transact_write`]. Reads resolve to a single partition scan with
//! opaque, URL-safe resume cursors.

pub mod catalog;
pub mod commit;
pub mod config;
pub mod entity;
pub mod error;
pub mod query;
pub mod repository;
pub mod storage;
pub mod store;

pub use crate::catalog::schema::{EntitySchema, FieldDef, KeyDecl, SchemaBuilder};
pub use crate::catalog::types::{Item, Value, item};
pub use crate::commit::mutation::{PatchOp, ReturnMode, VersionCheck, WriteKind, WriteOp};
pub use crate::config::{AccessConfig, RetryConfig};
pub use crate::entity::Entity;
pub use crate::error::{AccessError, AccessErrorCode, WriteFailure};
pub use crate::query::executor::Page;
pub use crate::query::plan::{Expr, KeyCondition, Order, ReadQuery, SortCondition, col, lit};
pub use crate::repository::{
    GetBuilder, PatchBuilder, ReadBuilder, Repository, TransactionBuilder, WriteBuilder,
};
pub use crate::store::{MemoryStore, Store, StoreError};

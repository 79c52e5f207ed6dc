//! Write pipeline: turns logical write operations into conditional physical
//! writes and commits them through the transaction manager.
//!
//! Staging reads each entity once, consistently. Transient conflicts are
//! retried by the manager per chunk with the staged conditions unchanged; if
//! the conflicting writer changed the entity, the identity record's version
//! guard rejects the retry.

use crate::catalog::schema::{EntitySchema, FieldDef};
use crate::catalog::types::{Item, Value};
use crate::commit::mutation::{ReturnMode, VersionCheck, WriteKind, WriteOp};
use crate::commit::tx::{Guard, StagedWrite, TransactionManager};
use crate::config::AccessConfig;
use crate::error::AccessError;
use crate::query::executor::{read_identity, record_to_item};
use crate::query::operators::eval_expr;
use crate::query::plan::Expr;
use crate::storage::keys::{compose_records, encode_id};
use crate::store::{Condition, Record, RecordKind, Store, StoreKey, WriteItem};
use std::collections::BTreeSet;
use tracing::debug;

/// Staged form of one logical operation.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedOp {
    pub writes: Vec<StagedWrite>,
    pub old: Option<Item>,
    pub new: Option<Item>,
}

impl StagedOp {
    fn returned(self, mode: ReturnMode) -> Option<Item> {
        match mode {
            ReturnMode::None => None,
            ReturnMode::AllOld => self.old,
            ReturnMode::AllNew => self.new,
        }
    }
}

/// Commits `ops` as one transaction and returns each operation's requested
/// snapshot, in order.
pub async fn execute_writes(
    store: &dyn Store,
    config: &AccessConfig,
    ops: &[WriteOp],
) -> Result<Vec<Option<Item>>, AccessError> {
    if ops.is_empty() {
        return Ok(Vec::new());
    }
    let mut staged = Vec::with_capacity(ops.len());
    for (operation, op) in ops.iter().enumerate() {
        staged.push(stage(store, op, operation).await?);
    }
    let writes: Vec<StagedWrite> = staged
        .iter()
        .flat_map(|s| s.writes.iter().cloned())
        .collect();
    let commits = TransactionManager::new(store, config.max_transaction_items)
        .with_retry(config.retry.clone())
        .commit(&writes)
        .await?;
    debug!(
        operations = ops.len(),
        items = writes.len(),
        commits,
        "write set committed"
    );
    Ok(staged
        .into_iter()
        .zip(ops)
        .map(|(s, op)| s.returned(op.returning))
        .collect())
}

/// Reads whatever state `op` depends on and builds its physical writes.
pub async fn stage(
    store: &dyn Store,
    op: &WriteOp,
    operation: usize,
) -> Result<StagedOp, AccessError> {
    let schema = op.schema.as_ref();
    let condition = op.condition.as_ref();
    if let Some(expr) = condition {
        expr.validate_depth()?;
    }
    match &op.kind {
        WriteKind::Insert(item) => {
            if condition.is_some() || op.version_check != VersionCheck::Off {
                return Err(AccessError::Validation(format!(
                    "insert into '{}' takes no condition or version check",
                    schema.name
                )));
            }
            stage_insert(schema, item, operation)
        }
        WriteKind::Update(delta) => {
            let id = identity_value(schema, delta)?;
            let stored = load_existing(store, schema, &id).await?;
            let expected = expected_version(schema, op.version_check, Some(delta))?;
            check_version(schema, &stored, expected)?;
            let condition = caller_condition(schema, &stored, condition)?;
            let mut next = record_to_item(schema, &stored);
            for (field, value) in delta {
                if value.is_null() {
                    next.remove(field);
                } else {
                    next.insert(field.clone(), value.clone());
                }
            }
            stage_replace(schema, &stored, next, condition, expected.is_some(), operation)
        }
        WriteKind::Patch { id, ops } => {
            let stored = load_existing(store, schema, id).await?;
            let expected = expected_version(schema, op.version_check, None)?;
            check_version(schema, &stored, expected)?;
            let condition = caller_condition(schema, &stored, condition)?;
            let mut next = record_to_item(schema, &stored);
            for patch in ops {
                let field = patch.field();
                if field == schema.id_field || schema.version_field.as_deref() == Some(field) {
                    return Err(AccessError::Validation(format!(
                        "field '{field}' of '{}' cannot be patched",
                        schema.name
                    )));
                }
                patch.apply(&mut next)?;
            }
            stage_replace(schema, &stored, next, condition, expected.is_some(), operation)
        }
        WriteKind::Delete { id } => {
            let expected = expected_version(schema, op.version_check, None)?;
            let stored = read_identity(store, schema, id, true).await?;
            let Some(stored) = stored else {
                if condition.is_some() || expected.is_some() {
                    return Err(missing(schema, id));
                }
                return Ok(StagedOp {
                    writes: Vec::new(),
                    old: None,
                    new: None,
                });
            };
            check_version(schema, &stored, expected)?;
            let condition = caller_condition(schema, &stored, condition)?;
            stage_delete(schema, &stored, condition, expected.is_some(), operation)
        }
    }
}

fn identity_value(schema: &EntitySchema, item: &Item) -> Result<Value, AccessError> {
    schema.id().value(item).ok_or_else(|| {
        AccessError::schema(
            &schema.name,
            format!("identity field '{}' is missing", schema.id_field),
        )
    })
}

fn missing(schema: &EntitySchema, id: &Value) -> AccessError {
    let id = encode_id(schema, id).unwrap_or_else(|_| format!("{id:?}"));
    AccessError::ConditionalCheck {
        table: schema.table_name.clone(),
        key: format!("{id} does not exist"),
        failures: Vec::new(),
    }
}

async fn load_existing(
    store: &dyn Store,
    schema: &EntitySchema,
    id: &Value,
) -> Result<Record, AccessError> {
    match read_identity(store, schema, id, true).await? {
        Some(record) => Ok(record),
        None => Err(missing(schema, id)),
    }
}

fn expected_version(
    schema: &EntitySchema,
    check: VersionCheck,
    item: Option<&Item>,
) -> Result<Option<u64>, AccessError> {
    match check {
        VersionCheck::Off => Ok(None),
        VersionCheck::Expected(version) => Ok(Some(version)),
        VersionCheck::FromItem => {
            let Some(field) = &schema.version_field else {
                return Err(AccessError::Validation(format!(
                    "entity '{}' declares no version field",
                    schema.name
                )));
            };
            item.and_then(|it| it.get(field))
                .and_then(Value::as_i64)
                .and_then(|v| u64::try_from(v).ok())
                .map(Some)
                .ok_or_else(|| {
                    AccessError::Validation(format!(
                        "version check on '{}' requires a non-negative '{field}' value",
                        schema.name
                    ))
                })
        }
    }
}

fn check_version(
    schema: &EntitySchema,
    stored: &Record,
    expected: Option<u64>,
) -> Result<(), AccessError> {
    match expected {
        Some(expected) if expected != stored.object_version => Err(AccessError::Version {
            table: schema.table_name.clone(),
            id: stored.key.sort.clone(),
            expected,
            actual: Some(stored.object_version),
        }),
        _ => Ok(()),
    }
}

/// Evaluates the caller condition on the stored logical view, computed
/// fields included, and returns its store-side form. A condition reading a
/// computed field has no stored attribute to test at commit; the identity
/// version guard keeps the staged result valid instead.
fn caller_condition(
    schema: &EntitySchema,
    stored: &Record,
    condition: Option<&Expr>,
) -> Result<Option<Expr>, AccessError> {
    let Some(expr) = condition else {
        return Ok(None);
    };
    if !eval_expr(expr, &record_to_item(schema, stored)) {
        return Err(AccessError::ConditionalCheck {
            table: schema.table_name.clone(),
            key: stored.key.to_string(),
            failures: Vec::new(),
        });
    }
    if expr.any_field(&|f: &str| schema.field(f).is_some_and(FieldDef::is_computed)) {
        return Ok(None);
    }
    Ok(Some(expr.map_fields(&|f: &str| {
        schema.physical_name(f).to_string()
    })))
}

fn stage_insert(
    schema: &EntitySchema,
    item: &Item,
    operation: usize,
) -> Result<StagedOp, AccessError> {
    let records = compose_records(schema, item, 1)?;
    let new = records
        .first()
        .map(|identity| record_to_item(schema, identity));
    let writes = records
        .into_iter()
        .map(|record| StagedWrite {
            operation,
            item: WriteItem::Put {
                record,
                condition: Some(Condition::NotExists),
            },
            guard: Guard::NewKey,
        })
        .collect();
    Ok(StagedOp {
        writes,
        old: None,
        new,
    })
}

fn identity_guard(stored: &Record, version_checked: bool) -> Guard {
    Guard::Identity {
        id: stored.key.sort.clone(),
        stored_version: stored.object_version,
        version_checked,
    }
}

fn identity_condition(stored: &Record, condition: Option<Expr>) -> Option<Condition> {
    Condition::all([
        Some(Condition::VersionEquals(stored.object_version)),
        condition.map(Condition::Matches),
    ])
}

/// Keys of every record the stored entity currently occupies.
fn stored_keys(schema: &EntitySchema, stored: &Record) -> Result<Vec<StoreKey>, AccessError> {
    let item = record_to_item(schema, stored);
    Ok(compose_records(schema, &item, stored.object_version)?
        .into_iter()
        .map(|r| r.key)
        .collect())
}

fn stage_replace(
    schema: &EntitySchema,
    stored: &Record,
    next: Item,
    condition: Option<Expr>,
    version_checked: bool,
    operation: usize,
) -> Result<StagedOp, AccessError> {
    let old_keys: BTreeSet<StoreKey> = stored_keys(schema, stored)?.into_iter().collect();
    let records = compose_records(schema, &next, stored.object_version + 1)?;
    let mut writes = Vec::with_capacity(records.len() + old_keys.len());
    {
        let new_keys: BTreeSet<&StoreKey> = records.iter().map(|r| &r.key).collect();
        for key in old_keys.iter().filter(|k| !new_keys.contains(k)) {
            writes.push(StagedWrite {
                operation,
                item: WriteItem::Delete {
                    key: key.clone(),
                    condition: None,
                },
                guard: Guard::Owned,
            });
        }
    }
    let new = records
        .first()
        .map(|identity| record_to_item(schema, identity));
    let mut condition = condition;
    for record in records {
        let (condition, guard) = if record.kind == RecordKind::Identity {
            (
                identity_condition(stored, condition.take()),
                identity_guard(stored, version_checked),
            )
        } else if old_keys.contains(&record.key) {
            (None, Guard::Owned)
        } else {
            (Some(Condition::NotExists), Guard::NewKey)
        };
        writes.push(StagedWrite {
            operation,
            item: WriteItem::Put { record, condition },
            guard,
        });
    }
    Ok(StagedOp {
        writes,
        old: Some(record_to_item(schema, stored)),
        new,
    })
}

fn stage_delete(
    schema: &EntitySchema,
    stored: &Record,
    condition: Option<Expr>,
    version_checked: bool,
    operation: usize,
) -> Result<StagedOp, AccessError> {
    let mut condition = condition;
    let writes = stored_keys(schema, stored)?
        .into_iter()
        .map(|key| {
            let identity = key == stored.key;
            StagedWrite {
                operation,
                item: WriteItem::Delete {
                    key,
                    condition: if identity {
                        identity_condition(stored, condition.take())
                    } else {
                        None
                    },
                },
                guard: if identity {
                    identity_guard(stored, version_checked)
                } else {
                    Guard::Owned
                },
            }
        })
        .collect();
    Ok(StagedOp {
        writes,
        old: Some(record_to_item(schema, stored)),
        new: None,
    })
}

#[cfg(test)]
mod tests {
    use super::stage;
    use crate::catalog::schema::EntitySchema;
    use crate::catalog::types::{Value, item};
    use crate::commit::mutation::{VersionCheck, WriteKind, WriteOp};
    use crate::commit::tx::Guard;
    use crate::store::{Condition, MemoryStore, WriteItem};
    use std::sync::Arc;

    fn schema() -> Arc<EntitySchema> {
        Arc::new(
            EntitySchema::builder("User")
                .table("users")
                .id("id")
                .hash_key("team")
                .version("version")
                .build()
                .expect("schema"),
        )
    }

    async fn seeded() -> (MemoryStore, Arc<EntitySchema>) {
        let store = MemoryStore::new();
        let schema = schema();
        let insert = WriteOp::new(
            schema.clone(),
            WriteKind::Insert(item([("id", "u1"), ("team", "red")])),
        );
        let staged = stage(&store, &insert, 0).await.expect("stage insert");
        let items = staged.writes.into_iter().map(|w| w.item).collect();
        crate::store::Store::transact_write(&store, items)
            .await
            .expect("seed");
        (store, schema)
    }

    #[tokio::test]
    async fn insert_guards_every_key_as_new() {
        let store = MemoryStore::new();
        let op = WriteOp::new(
            schema(),
            WriteKind::Insert(item([("id", "u1"), ("team", "red")])),
        );
        let staged = stage(&store, &op, 0).await.expect("stage");
        assert_eq!(staged.writes.len(), 3);
        assert!(staged.writes.iter().all(|w| w.guard == Guard::NewKey));
        assert_eq!(staged.new.expect("new")["version"], Value::Integer(1));
    }

    #[tokio::test]
    async fn changed_partition_deletes_old_and_guards_new_keys() {
        let (store, schema) = seeded().await;
        let op = WriteOp::new(
            schema,
            WriteKind::Update(item([("id", "u1"), ("team", "blue")])),
        );
        let staged = stage(&store, &op, 0).await.expect("stage");
        let deletes: Vec<_> = staged
            .writes
            .iter()
            .filter(|w| matches!(w.item, WriteItem::Delete { .. }))
            .collect();
        assert_eq!(deletes.len(), 1);
        assert_eq!(deletes[0].item.key().partition, "users#red");
        let identity = staged
            .writes
            .iter()
            .find(|w| matches!(w.guard, Guard::Identity { .. }))
            .expect("identity write");
        assert_eq!(identity.item.condition(), Some(&Condition::VersionEquals(1)));
        assert!(staged.writes.iter().any(|w| {
            w.guard == Guard::NewKey && w.item.key().partition == "users#blue"
        }));
        assert_eq!(staged.new.expect("new")["version"], Value::Integer(2));
    }

    #[tokio::test]
    async fn stale_expected_version_fails_before_commit() {
        let (store, schema) = seeded().await;
        let mut op = WriteOp::new(
            schema,
            WriteKind::Patch {
                id: "u1".into(),
                ops: Vec::new(),
            },
        );
        op.version_check = VersionCheck::Expected(7);
        let err = stage(&store, &op, 0).await.expect_err("stale");
        assert_eq!(err.code_str(), "version_mismatch");
    }

    #[tokio::test]
    async fn missing_entity_update_is_conditional_failure() {
        let store = MemoryStore::new();
        let op = WriteOp::new(schema(), WriteKind::Update(item([("id", "ghost")])));
        let err = stage(&store, &op, 0).await.expect_err("missing");
        assert_eq!(err.code_str(), "conditional_check_failed");
        let op = WriteOp::new(schema(), WriteKind::Delete { id: "ghost".into() });
        let staged = stage(&store, &op, 0).await.expect("absent delete is a no-op");
        assert!(staged.writes.is_empty());
    }
}

//! Key composition: maps an entity schema and one instance onto the physical
//! records a write must produce.
//!
//! Layout for table `T`:
//! - identity record: base space, partition `T#<id>`, sort `<id>`
//! - listing record: base space, partition `T`, sort = unpaired range or id
//! - secondary record: index space `<label>`, partition `T#<hash>` (or `T`
//!   for a range-only pair), sort = paired range or id
//!
//! Multi-valued key fields fan out over the Cartesian product of their values.

use crate::catalog::schema::{EntitySchema, KeyDecl, KeyGroup};
use crate::catalog::types::{Item, Value};
use crate::error::AccessError;
use crate::query::plan::SortCondition;
use crate::storage::encoded_key::encode_key_value;
use crate::store::{Record, RecordKind, SortKeyCondition, StoreKey};
use std::collections::BTreeSet;

pub const KEY_SEPARATOR: char = '#';

pub fn partition_key(table: &str, hash: Option<&str>) -> String {
    match hash {
        Some(hash) => format!("{table}{KEY_SEPARATOR}{hash}"),
        None => table.to_string(),
    }
}

/// Encoded identity of a logical item. Missing identity is a schema error.
pub fn identity_of(schema: &EntitySchema, item: &Item) -> Result<String, AccessError> {
    let Some(value) = schema.id().value(item) else {
        return Err(AccessError::schema(
            &schema.name,
            format!("identity field '{}' is missing", schema.id_field),
        ));
    };
    encode_id(schema, &value)
}

pub fn encode_id(schema: &EntitySchema, id: &Value) -> Result<String, AccessError> {
    encode_key_value(id).ok_or_else(|| {
        AccessError::schema(
            &schema.name,
            format!(
                "identity field '{}' must be a scalar, got {}",
                schema.id_field,
                id.kind()
            ),
        )
    })
}

pub fn identity_key(schema: &EntitySchema, encoded_id: &str) -> StoreKey {
    StoreKey::new(
        &schema.table_name,
        None,
        partition_key(&schema.table_name, Some(encoded_id)),
        encoded_id,
    )
}

/// Encoded values of one key declaration on an item. Absent values yield an
/// empty list, meaning no record for this group.
pub fn key_values(
    schema: &EntitySchema,
    decl: &KeyDecl,
    item: &Item,
) -> Result<Vec<String>, AccessError> {
    let Some(field) = schema.field(&decl.field) else {
        return Ok(Vec::new());
    };
    let Some(value) = field.value(item) else {
        return Ok(Vec::new());
    };
    let scalars = match (decl.multi, value) {
        (true, Value::List(values)) => values,
        (_, value) => vec![value],
    };
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for value in scalars.iter().filter(|v| !v.is_null()) {
        let encoded = encode_key_value(value).ok_or_else(|| {
            AccessError::Validation(format!(
                "key field '{}' of '{}' must hold scalar values, got {}",
                decl.field,
                schema.name,
                value.kind()
            ))
        })?;
        if seen.insert(encoded.clone()) {
            out.push(encoded);
        }
    }
    Ok(out)
}

fn group_records(
    schema: &EntitySchema,
    group: &KeyGroup,
    item: &Item,
    encoded_id: &str,
    attributes: &Item,
    object_version: u64,
    out: &mut Vec<Record>,
) -> Result<(), AccessError> {
    let hashes: Vec<Option<String>> = match &group.hash {
        Some(decl) => key_values(schema, decl, item)?.into_iter().map(Some).collect(),
        None => vec![None],
    };
    let sorts = match &group.range {
        Some(decl) => key_values(schema, decl, item)?,
        None => vec![encoded_id.to_string()],
    };
    let kind = match group.index {
        Some(_) => RecordKind::Secondary,
        None => RecordKind::Primary,
    };
    for hash in &hashes {
        for sort in &sorts {
            out.push(Record {
                key: StoreKey::new(
                    &schema.table_name,
                    group.index.clone(),
                    partition_key(&schema.table_name, hash.as_deref()),
                    sort.clone(),
                ),
                kind,
                object_version,
                attributes: attributes.clone(),
            });
        }
    }
    Ok(())
}

/// Every physical record for one logical item: the identity record first,
/// then the listing and secondary records in group declaration order.
pub fn compose_records(
    schema: &EntitySchema,
    item: &Item,
    object_version: u64,
) -> Result<Vec<Record>, AccessError> {
    let encoded_id = identity_of(schema, item)?;
    let attributes = schema.to_physical(item);
    let mut records = vec![Record {
        key: identity_key(schema, &encoded_id),
        kind: RecordKind::Identity,
        object_version,
        attributes: attributes.clone(),
    }];
    for group in schema.groups() {
        group_records(
            schema,
            group,
            item,
            &encoded_id,
            &attributes,
            object_version,
            &mut records,
        )?;
    }
    let mut seen = BTreeSet::new();
    records.retain(|r| seen.insert(r.key.clone()));
    Ok(records)
}

fn encode_bound(value: &Value) -> Result<String, AccessError> {
    encode_key_value(value).ok_or_else(|| {
        AccessError::Validation(format!("sort condition value must be a scalar, got {}", value.kind()))
    })
}

pub fn encode_sort_condition(condition: &SortCondition) -> Result<SortKeyCondition, AccessError> {
    Ok(match condition {
        SortCondition::Eq(v) => SortKeyCondition::Eq(encode_bound(v)?),
        SortCondition::Lt(v) => SortKeyCondition::Lt(encode_bound(v)?),
        SortCondition::Lte(v) => SortKeyCondition::Lte(encode_bound(v)?),
        SortCondition::Gt(v) => SortKeyCondition::Gt(encode_bound(v)?),
        SortCondition::Gte(v) => SortKeyCondition::Gte(encode_bound(v)?),
        SortCondition::Between(lo, hi) => {
            SortKeyCondition::Between(encode_bound(lo)?, encode_bound(hi)?)
        }
        SortCondition::BeginsWith(prefix) => SortKeyCondition::BeginsWith(prefix.clone()),
    })
}

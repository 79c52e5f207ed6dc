use crate::catalog::schema::{EntitySchema, KeyGroup};
use crate::catalog::types::{Item, Value};
use crate::config::AccessConfig;
use crate::error::AccessError;
use crate::query::cursor::{decode_cursor, encode_cursor};
use crate::query::operators::{eval_expr, project};
use crate::query::plan::{KeyCondition, ReadQuery, SortCondition};
use crate::storage::encoded_key::encode_key_value;
use crate::storage::keys::{encode_id, encode_sort_condition, identity_key, partition_key};
use crate::store::{GetRequest, QueryRequest, Record, SortKeyCondition, Store, StoreKey};
use tracing::debug;

/// One page of a list/find. Cursors are opaque URL-safe tokens.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T = Item> {
    pub items: Vec<T>,
    /// Position of the first physical record examined. Resuming from it in
    /// the opposite order walks back over the previous page.
    pub first_evaluated_key: Option<String>,
    /// Position of the last returned record, present while more matching
    /// records may remain in the scan direction.
    pub last_evaluated_key: Option<String>,
    /// Physical records examined, including those discarded by the filter.
    pub scanned_count: usize,
}

impl<T> Page<T> {
    pub fn try_map<U, E>(self, f: impl FnMut(T) -> Result<U, E>) -> Result<Page<U>, E> {
        Ok(Page {
            items: self.items.into_iter().map(f).collect::<Result<_, _>>()?,
            first_evaluated_key: self.first_evaluated_key,
            last_evaluated_key: self.last_evaluated_key,
            scanned_count: self.scanned_count,
        })
    }
}

/// Logical view of a stored record.
pub fn record_to_item(schema: &EntitySchema, record: &Record) -> Item {
    schema.to_logical(&record.attributes, record.object_version)
}

/// Reads the identity record of `id`.
pub async fn read_identity(
    store: &dyn Store,
    schema: &EntitySchema,
    id: &Value,
    consistent: bool,
) -> Result<Option<Record>, AccessError> {
    let encoded = encode_id(schema, id)?;
    let record = store
        .get(GetRequest {
            key: identity_key(schema, &encoded),
            consistent,
        })
        .await?;
    Ok(record)
}

pub async fn get_by_id(
    store: &dyn Store,
    schema: &EntitySchema,
    id: &Value,
    projection: &[String],
    consistent: bool,
) -> Result<Option<Item>, AccessError> {
    let record = read_identity(store, schema, id, consistent).await?;
    Ok(record.map(|r| project(record_to_item(schema, &r), projection)))
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ScanTarget {
    index: Option<String>,
    partition: String,
    sort: Option<SortKeyCondition>,
}

fn unknown_index(schema: &EntitySchema, index: &str) -> AccessError {
    AccessError::Validation(format!(
        "entity '{}' has no index named '{index}'",
        schema.name
    ))
}

fn encode_partition(
    schema: &EntitySchema,
    group: &KeyGroup,
    value: Option<&Value>,
) -> Result<String, AccessError> {
    match (&group.hash, value) {
        (Some(_), Some(value)) => {
            let encoded = encode_key_value(value).ok_or_else(|| {
                AccessError::Validation(format!(
                    "partition value must be a scalar, got {}",
                    value.kind()
                ))
            })?;
            Ok(partition_key(&schema.table_name, Some(&encoded)))
        }
        (Some(decl), None) => Err(AccessError::Validation(format!(
            "index {:?} of '{}' requires a value for partition field '{}'",
            group.index.as_deref().unwrap_or_default(),
            schema.name,
            decl.field
        ))),
        (None, Some(_)) => Err(AccessError::Validation(format!(
            "index {:?} of '{}' has no partition field",
            group.index.as_deref().unwrap_or_default(),
            schema.name
        ))),
        (None, None) => Ok(schema.table_name.clone()),
    }
}

fn encode_sort(
    schema: &EntitySchema,
    group: &KeyGroup,
    range: Option<(&str, &SortCondition)>,
) -> Result<Option<SortKeyCondition>, AccessError> {
    let Some((field, condition)) = range else {
        return Ok(None);
    };
    let sort_field = group
        .range
        .as_ref()
        .map(|r| r.field.as_str())
        .unwrap_or(schema.id_field.as_str());
    if !field.is_empty() && field != sort_field {
        return Err(AccessError::Validation(format!(
            "'{field}' is not the sort field of the queried index of '{}' (expected '{sort_field}')",
            schema.name
        )));
    }
    encode_sort_condition(condition).map(Some)
}

fn group_matching<'s>(
    schema: &'s EntitySchema,
    condition: &KeyCondition,
) -> Result<&'s KeyGroup, AccessError> {
    let hash_field = condition.hash.as_ref().map(|(f, _)| f.as_str());
    let range_field = condition.range.as_ref().map(|(f, _)| f.as_str());
    let sort_field_of = |g: &KeyGroup| {
        g.range
            .as_ref()
            .map(|r| r.field.clone())
            .unwrap_or_else(|| schema.id_field.clone())
    };
    schema
        .groups()
        .find(|g| {
            g.hash.as_ref().map(|h| h.field.as_str()) == hash_field
                && range_field.is_none_or(|r| sort_field_of(g) == r)
        })
        .ok_or_else(|| {
            AccessError::Validation(format!(
                "no index of '{}' matches partition {:?} and sort {:?}",
                schema.name, hash_field, range_field
            ))
        })
}

fn resolve_target(schema: &EntitySchema, query: &ReadQuery) -> Result<ScanTarget, AccessError> {
    let named = match &query.index {
        Some(index) => Some(
            schema
                .group_by_index(index)
                .ok_or_else(|| unknown_index(schema, index))?,
        ),
        None => None,
    };

    if let Some(condition) = &query.key_condition {
        let group = match named {
            Some(group) => group,
            None => group_matching(schema, condition)?,
        };
        let partition = encode_partition(schema, group, condition.hash.as_ref().map(|(_, v)| v))?;
        let sort = encode_sort(
            schema,
            group,
            condition.range.as_ref().map(|(f, c)| (f.as_str(), c)),
        )?;
        return Ok(ScanTarget {
            index: group.index.clone(),
            partition,
            sort,
        });
    }

    let group = match (named, &query.partition) {
        (Some(group), _) => group,
        (None, Some(_)) => schema.default_hash_group().ok_or_else(|| {
            AccessError::Validation(format!(
                "entity '{}' declares no partition field to look up by",
                schema.name
            ))
        })?,
        (None, None) => schema.listing_group(),
    };
    let partition = encode_partition(schema, group, query.partition.as_ref())?;
    let sort = encode_sort(schema, group, query.range.as_ref().map(|c| ("", c)))?;
    Ok(ScanTarget {
        index: group.index.clone(),
        partition,
        sort,
    })
}

/// Runs a list/find. With a filter, keeps fetching from the last physical
/// position until `limit` matches are collected or the key range is
/// exhausted; the returned cursor points at the last returned match.
pub async fn execute_read(
    store: &dyn Store,
    schema: &EntitySchema,
    query: &ReadQuery,
    config: &AccessConfig,
) -> Result<Page<Item>, AccessError> {
    if query.limit == Some(0) || query.fetch_size == Some(0) {
        return Err(AccessError::Validation(
            "limit and fetch size must be at least 1".into(),
        ));
    }
    let target = resolve_target(schema, query)?;
    if let Some(expr) = &query.filter {
        expr.validate_depth()?;
    }
    let mut start = match &query.start {
        Some(cursor) => {
            let key = decode_cursor(&schema.table_name, cursor)?;
            if key.index != target.index || key.partition != target.partition {
                return Err(AccessError::Validation(
                    "cursor does not belong to the queried key range".into(),
                ));
            }
            Some(key)
        }
        None => None,
    };
    let fetch_size = query
        .fetch_size
        .or(config.default_fetch_size)
        .or(query.limit);

    let mut items = Vec::new();
    let mut first: Option<StoreKey> = None;
    let mut last: Option<StoreKey> = None;
    let mut scanned = 0usize;
    let mut fetches = 0usize;

    'fetch: loop {
        let page = store
            .query(QueryRequest {
                table: schema.table_name.clone(),
                index: target.index.clone(),
                partition: target.partition.clone(),
                sort: target.sort.clone(),
                forward: query.order.is_forward(),
                exclusive_start: start.clone(),
                limit: fetch_size,
                consistent: query.consistent,
            })
            .await?;
        fetches += 1;
        let count = page.records.len();
        for (position, record) in page.records.into_iter().enumerate() {
            scanned += 1;
            if first.is_none() {
                first = Some(record.key.clone());
            }
            // Filters see the logical view, computed fields included.
            let item = record_to_item(schema, &record);
            if let Some(filter) = &query.filter
                && !eval_expr(filter, &item)
            {
                continue;
            }
            let key = record.key.clone();
            items.push(project(item, &query.projection));
            if query.limit.is_some_and(|limit| items.len() >= limit) {
                let range_exhausted = position + 1 == count && page.last_evaluated.is_none();
                if !range_exhausted {
                    last = Some(key);
                }
                break 'fetch;
            }
        }
        match page.last_evaluated {
            Some(key) if count > 0 => start = Some(key),
            _ => break,
        }
    }
    debug!(
        table = %schema.table_name,
        index = ?target.index,
        fetches,
        scanned,
        returned = items.len(),
        "read complete"
    );

    Ok(Page {
        items,
        first_evaluated_key: first.as_ref().map(encode_cursor).transpose()?,
        last_evaluated_key: last.as_ref().map(encode_cursor).transpose()?,
        scanned_count: scanned,
    })
}

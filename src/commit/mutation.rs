use crate::catalog::schema::EntitySchema;
use crate::catalog::types::{Item, Value};
use crate::error::AccessError;
use crate::query::plan::Expr;
use std::sync::Arc;

/// What a write hands back on success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnMode {
    #[default]
    None,
    /// Logical item as stored before the write.
    AllOld,
    /// Logical item as stored after the write.
    AllNew,
}

/// Field-level patch expression applied to the stored item.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchOp {
    /// Replaces the field; `Null` clears it.
    Set(String, Value),
    /// Numeric increment, or set union for lists. Missing fields take the value.
    Add(String, Value),
    /// Clears the field.
    Remove(String),
    /// Removes the given elements from a list field.
    Delete(String, Value),
}

impl PatchOp {
    pub fn field(&self) -> &str {
        match self {
            PatchOp::Set(f, _) | PatchOp::Add(f, _) | PatchOp::Remove(f) | PatchOp::Delete(f, _) => f,
        }
    }

    pub fn apply(&self, item: &mut Item) -> Result<(), AccessError> {
        match self {
            PatchOp::Set(field, Value::Null) | PatchOp::Remove(field) => {
                item.remove(field);
            }
            PatchOp::Set(field, value) => {
                item.insert(field.clone(), value.clone());
            }
            PatchOp::Add(field, value) => {
                let next = match item.remove(field) {
                    None | Some(Value::Null) => value.clone(),
                    Some(current) => add_values(field, current, value)?,
                };
                item.insert(field.clone(), next);
            }
            PatchOp::Delete(field, value) => match item.get_mut(field) {
                Some(Value::List(elements)) => {
                    let doomed: &[Value] = match value {
                        Value::List(values) => values,
                        single => std::slice::from_ref(single),
                    };
                    elements.retain(|e| !doomed.contains(e));
                }
                None => {}
                Some(other) => {
                    return Err(AccessError::Validation(format!(
                        "cannot delete elements from {} field '{field}'",
                        other.kind()
                    )));
                }
            },
        }
        Ok(())
    }
}

fn add_values(field: &str, current: Value, delta: &Value) -> Result<Value, AccessError> {
    Ok(match (current, delta) {
        (Value::Integer(a), Value::Integer(b)) => Value::Integer(a.checked_add(*b).ok_or_else(|| {
            AccessError::Validation(format!("integer overflow adding to '{field}'"))
        })?),
        (Value::Integer(a), Value::Float(b)) => Value::Float(a as f64 + b),
        (Value::Float(a), Value::Integer(b)) => Value::Float(a + *b as f64),
        (Value::Float(a), Value::Float(b)) => Value::Float(a + b),
        (Value::List(mut elements), added) => {
            let added: &[Value] = match added {
                Value::List(values) => values,
                single => std::slice::from_ref(single),
            };
            for value in added {
                if !elements.contains(value) {
                    elements.push(value.clone());
                }
            }
            Value::List(elements)
        }
        (current, delta) => {
            return Err(AccessError::Validation(format!(
                "cannot add {} to {} field '{field}'",
                delta.kind(),
                current.kind()
            )));
        }
    })
}

/// How a write proves the caller saw the latest version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionCheck {
    #[default]
    Off,
    /// Expected version is read from the item's version field.
    FromItem,
    Expected(u64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteKind {
    Insert(Item),
    /// Full or partial item; omitted fields keep their stored values.
    Update(Item),
    Patch { id: Value, ops: Vec<PatchOp> },
    Delete { id: Value },
}

impl WriteKind {
    pub fn name(&self) -> &'static str {
        match self {
            WriteKind::Insert(_) => "insert",
            WriteKind::Update(_) => "update",
            WriteKind::Patch { .. } => "patch",
            WriteKind::Delete { .. } => "delete",
        }
    }
}

/// One logical mutation, ready to be staged alone or inside a transaction.
#[derive(Debug, Clone)]
pub struct WriteOp {
    pub schema: Arc<EntitySchema>,
    pub kind: WriteKind,
    /// Caller condition on the stored item, by logical field names.
    pub condition: Option<Expr>,
    pub returning: ReturnMode,
    pub version_check: VersionCheck,
}

impl WriteOp {
    pub fn new(schema: Arc<EntitySchema>, kind: WriteKind) -> Self {
        Self {
            schema,
            kind,
            condition: None,
            returning: ReturnMode::None,
            version_check: VersionCheck::Off,
        }
    }
}

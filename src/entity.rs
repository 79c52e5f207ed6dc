use crate::catalog::types::{Item, Value};
use crate::error::AccessError;
use crate::query::executor::Page;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Number, Value as JsonValue};

/// A typed entity stored as an [`Item`]. Field names follow the serde names
/// of the struct.
///
/// A top-level `None` becomes [`Value::Null`], so an update built from the
/// entity clears that field. Skip it with
/// `#[serde(skip_serializing_if = "Option::is_none")]` to leave the stored
/// value untouched. Nulls inside nested maps are dropped.
pub trait Entity: Serialize + DeserializeOwned {
    fn to_item(&self) -> Result<Item, AccessError> {
        let json = serde_json::to_value(self)
            .map_err(|e| AccessError::Validation(format!("entity encode failed: {e}")))?;
        match json {
            JsonValue::Object(fields) => Ok(fields
                .into_iter()
                .map(|(k, v)| (k, json_to_value(v)))
                .collect()),
            other => Err(AccessError::Validation(format!(
                "entity must serialize to a map, got {}",
                json_to_value(other).kind()
            ))),
        }
    }

    fn from_item(item: Item) -> Result<Self, AccessError> {
        serde_json::from_value(value_to_json(Value::Map(item)))
            .map_err(|e| AccessError::Validation(format!("entity decode failed: {e}")))
    }
}

pub fn json_to_value(json: JsonValue) -> Value {
    match json {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Boolean(b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        JsonValue::String(s) => Value::from(s),
        JsonValue::Array(values) => Value::List(values.into_iter().map(json_to_value).collect()),
        JsonValue::Object(fields) => Value::Map(
            fields
                .into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, json_to_value(v)))
                .collect(),
        ),
    }
}

pub fn value_to_json(value: Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Boolean(b) => JsonValue::Bool(b),
        Value::Integer(i) => JsonValue::Number(i.into()),
        Value::Float(f) => Number::from_f64(f).map_or(JsonValue::Null, JsonValue::Number),
        Value::Text(s) => JsonValue::String(s.into()),
        Value::Blob(bytes) => {
            JsonValue::Array(bytes.into_iter().map(JsonValue::from).collect())
        }
        Value::List(values) => JsonValue::Array(values.into_iter().map(value_to_json).collect()),
        Value::Map(fields) => JsonValue::Object(
            fields
                .into_iter()
                .map(|(k, v)| (k, value_to_json(v)))
                .collect::<Map<_, _>>(),
        ),
    }
}

impl Page<Item> {
    pub fn decode<E: Entity>(self) -> Result<Page<E>, AccessError> {
        self.try_map(E::from_item)
    }
}

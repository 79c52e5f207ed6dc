use crate::catalog::types::{Item, Value};
use crate::error::AccessError;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Derives a field value from the rest of the instance at write/query time.
pub type ComputedFn = Arc<dyn Fn(&Item) -> Option<Value> + Send + Sync>;

#[derive(Clone)]
pub struct FieldDef {
    pub name: String,
    pub alias: Option<String>,
    computed: Option<ComputedFn>,
}

impl fmt::Debug for FieldDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDef")
            .field("name", &self.name)
            .field("alias", &self.alias)
            .field("computed", &self.computed.is_some())
            .finish()
    }
}

impl FieldDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            computed: None,
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn computed<F>(mut self, f: F) -> Self
    where
        F: Fn(&Item) -> Option<Value> + Send + Sync + 'static,
    {
        self.computed = Some(Arc::new(f));
        self
    }

    pub fn physical_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub fn is_computed(&self) -> bool {
        self.computed.is_some()
    }

    /// Current value of the field on a logical item. Computed fields are
    /// evaluated on every call. Explicit nulls read as absent.
    pub fn value(&self, item: &Item) -> Option<Value> {
        let value = match &self.computed {
            Some(f) => f(item),
            None => item.get(&self.name).cloned(),
        };
        value.filter(|v| !v.is_null())
    }
}

/// A partition ("hash") or sort ("range") key declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDecl {
    pub field: String,
    pub pair: Option<String>,
    pub multi: bool,
}

impl KeyDecl {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            pair: None,
            multi: false,
        }
    }

    /// Groups this declaration with the opposite key declared under the same
    /// pair label.
    pub fn pair(mut self, label: impl Into<String>) -> Self {
        self.pair = Some(label.into());
        self
    }

    /// The field holds a list; one record is written per element.
    pub fn multi(mut self) -> Self {
        self.multi = true;
        self
    }
}

/// One partition/sort combination the key composer writes records for.
///
/// `index == None` is the table-wide listing group whose partition key is the
/// bare table name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyGroup {
    pub index: Option<String>,
    pub hash: Option<KeyDecl>,
    pub range: Option<KeyDecl>,
}

/// Statically built descriptor of one entity type.
#[derive(Debug, Clone)]
pub struct EntitySchema {
    pub name: String,
    pub table_name: String,
    pub id_field: String,
    pub fields: Vec<FieldDef>,
    pub hash_keys: Vec<KeyDecl>,
    pub range_keys: Vec<KeyDecl>,
    pub version_field: Option<String>,
    id: FieldDef,
    listing: KeyGroup,
    indexes: Vec<KeyGroup>,
}

impl EntitySchema {
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            name: name.into(),
            table_name: None,
            id_fields: Vec::new(),
            fields: Vec::new(),
            hash_keys: Vec::new(),
            range_keys: Vec::new(),
            version_field: None,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn id(&self) -> &FieldDef {
        &self.id
    }

    /// Every key group, the table-wide listing group first.
    pub fn groups(&self) -> impl Iterator<Item = &KeyGroup> {
        std::iter::once(&self.listing).chain(self.indexes.iter())
    }

    /// The group queried by `by(..)` when no index is named.
    pub fn default_hash_group(&self) -> Option<&KeyGroup> {
        self.indexes.iter().find(|g| g.hash.is_some())
    }

    pub fn group_by_index(&self, index: &str) -> Option<&KeyGroup> {
        self.indexes
            .iter()
            .find(|g| g.index.as_deref() == Some(index))
    }

    pub fn listing_group(&self) -> &KeyGroup {
        &self.listing
    }

    pub fn physical_name<'a>(&'a self, logical: &'a str) -> &'a str {
        self.field(logical)
            .map(FieldDef::physical_name)
            .unwrap_or(logical)
    }

    /// Logical item -> stored attributes: aliases applied, computed fields,
    /// the version field and explicit nulls dropped.
    pub fn to_physical(&self, item: &Item) -> Item {
        item.iter()
            .filter(|(name, value)| {
                !value.is_null()
                    && self.version_field.as_deref() != Some(name.as_str())
                    && !self.field(name).is_some_and(FieldDef::is_computed)
            })
            .map(|(name, value)| (self.physical_name(name).to_string(), value.clone()))
            .collect()
    }

    /// Stored attributes -> logical item, with the object version exposed under
    /// the declared version field and computed fields evaluated over the result.
    pub fn to_logical(&self, attributes: &Item, object_version: u64) -> Item {
        let mut out: Item = attributes
            .iter()
            .map(|(physical, value)| {
                let logical = self
                    .fields
                    .iter()
                    .find(|f| f.physical_name() == physical)
                    .map(|f| f.name.clone())
                    .unwrap_or_else(|| physical.clone());
                (logical, value.clone())
            })
            .collect();
        if let Some(version_field) = &self.version_field {
            out.insert(version_field.clone(), Value::Integer(object_version as i64));
        }
        for field in self.fields.iter().filter(|f| f.is_computed()) {
            match field.value(&out) {
                Some(value) => out.insert(field.name.clone(), value),
                None => out.remove(&field.name),
            };
        }
        out
    }
}

pub struct SchemaBuilder {
    name: String,
    table_name: Option<String>,
    id_fields: Vec<String>,
    fields: Vec<FieldDef>,
    hash_keys: Vec<KeyDecl>,
    range_keys: Vec<KeyDecl>,
    version_field: Option<String>,
}

impl SchemaBuilder {
    pub fn table(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = Some(table_name.into());
        self
    }

    pub fn id(mut self, field: impl Into<String>) -> Self {
        self.id_fields.push(field.into());
        self
    }

    pub fn field(mut self, field: impl Into<FieldDef>) -> Self {
        self.fields.push(field.into());
        self
    }

    pub fn hash_key(mut self, decl: impl Into<KeyDecl>) -> Self {
        self.hash_keys.push(decl.into());
        self
    }

    pub fn range_key(mut self, decl: impl Into<KeyDecl>) -> Self {
        self.range_keys.push(decl.into());
        self
    }

    pub fn version(mut self, field: impl Into<String>) -> Self {
        self.version_field = Some(field.into());
        self
    }

    pub fn build(self) -> Result<EntitySchema, AccessError> {
        let name = self.name;
        let err = |message: String| AccessError::schema(name.clone(), message);

        if name.is_empty() {
            return Err(err("entity name must not be empty".into()));
        }
        let id_field = match self.id_fields.as_slice() {
            [only] => only.clone(),
            [] => return Err(err("no identity field declared".into())),
            many => {
                return Err(err(format!(
                    "exactly one identity field allowed, got {}",
                    many.join(", ")
                )));
            }
        };
        let table_name = self.table_name.unwrap_or_else(|| name.clone());
        if table_name.is_empty() || table_name.contains('#') {
            return Err(err(format!(
                "table name '{table_name}' must be non-empty and must not contain '#'"
            )));
        }

        let mut fields = Vec::new();
        let mut seen = BTreeSet::new();
        for field in self.fields {
            if !seen.insert(field.name.clone()) {
                return Err(err(format!("field '{}' declared twice", field.name)));
            }
            fields.push(field);
        }
        let implied = std::iter::once(&id_field)
            .chain(self.hash_keys.iter().map(|k| &k.field))
            .chain(self.range_keys.iter().map(|k| &k.field));
        for field in implied {
            if seen.insert(field.clone()) {
                fields.push(FieldDef::new(field.clone()));
            }
        }
        let mut physical = BTreeSet::new();
        for field in &fields {
            if !physical.insert(field.physical_name().to_string()) {
                return Err(err(format!(
                    "physical attribute '{}' is used by more than one field",
                    field.physical_name()
                )));
            }
        }
        if let Some(version) = &self.version_field {
            let is_key = version == &id_field
                || self
                    .hash_keys
                    .iter()
                    .chain(self.range_keys.iter())
                    .any(|k| &k.field == version);
            if is_key {
                return Err(err(format!("version field '{version}' cannot be a key field")));
            }
        }

        let indexes = build_indexes(&self.hash_keys, &self.range_keys, &fields).map_err(err)?;
        let listing = KeyGroup {
            index: None,
            hash: None,
            range: self.range_keys.iter().find(|r| r.pair.is_none()).cloned(),
        };
        let id = fields
            .iter()
            .find(|f| f.name == id_field)
            .cloned()
            .unwrap_or_else(|| FieldDef::new(id_field.clone()));

        Ok(EntitySchema {
            name,
            table_name,
            id_field,
            fields,
            hash_keys: self.hash_keys,
            range_keys: self.range_keys,
            version_field: self.version_field,
            id,
            listing,
            indexes,
        })
    }
}

fn build_indexes(
    hash_keys: &[KeyDecl],
    range_keys: &[KeyDecl],
    fields: &[FieldDef],
) -> Result<Vec<KeyGroup>, String> {
    let mut range_labels = BTreeSet::new();
    for range in range_keys {
        if !range_labels.insert(range.pair.clone()) {
            return Err(match &range.pair {
                Some(label) => format!("more than one range key paired as '{label}'"),
                None => "more than one unpaired range key".into(),
            });
        }
    }
    let range_for = |pair: &Option<String>| range_keys.iter().find(|r| &r.pair == pair).cloned();
    let physical = |field: &str| {
        fields
            .iter()
            .find(|f| f.name == field)
            .map(|f| f.physical_name().to_string())
            .unwrap_or_else(|| field.to_string())
    };

    let mut groups = Vec::new();
    let mut labels = BTreeSet::new();
    for hash in hash_keys {
        let label = hash.pair.clone().unwrap_or_else(|| physical(&hash.field));
        if label.contains('#') {
            return Err(format!("index label '{label}' must not contain '#'"));
        }
        if !labels.insert(label.clone()) {
            return Err(format!("more than one hash key grouped as '{label}'"));
        }
        groups.push(KeyGroup {
            index: Some(label),
            hash: Some(hash.clone()),
            range: range_for(&hash.pair),
        });
    }
    for range in range_keys {
        let Some(label) = &range.pair else { continue };
        if hash_keys.iter().any(|h| h.pair.as_ref() == Some(label)) {
            continue;
        }
        if !labels.insert(label.clone()) {
            return Err(format!("index label '{label}' is already used by a hash key"));
        }
        groups.push(KeyGroup {
            index: Some(label.clone()),
            hash: None,
            range: Some(range.clone()),
        });
    }
    Ok(groups)
}

impl From<&str> for FieldDef {
    fn from(value: &str) -> Self {
        FieldDef::new(value)
    }
}

impl From<&str> for KeyDecl {
    fn from(value: &str) -> Self {
        KeyDecl::new(value)
    }
}

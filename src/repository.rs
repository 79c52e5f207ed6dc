use crate::catalog::schema::EntitySchema;
use crate::catalog::types::{Item, Value};
use crate::commit::mutation::{PatchOp, ReturnMode, VersionCheck, WriteKind, WriteOp};
use crate::commit::pipeline::execute_writes;
use crate::config::AccessConfig;
use crate::entity::Entity;
use crate::error::AccessError;
use crate::query::executor::{Page, execute_read, get_by_id};
use crate::query::plan::{Expr, KeyCondition, Order, ReadQuery, SortCondition};
use crate::store::Store;
use std::sync::Arc;

/// Entry point for reads and writes against one store.
#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn Store>,
    config: AccessConfig,
}

impl Repository {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            config: AccessConfig::default(),
        }
    }

    pub fn with_config(store: Arc<dyn Store>, config: AccessConfig) -> Result<Self, AccessError> {
        config.validate()?;
        Ok(Self { store, config })
    }

    pub fn config(&self) -> &AccessConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn get(&self, schema: &Arc<EntitySchema>, id: impl Into<Value>) -> GetBuilder<'_> {
        GetBuilder {
            repo: self,
            schema: schema.clone(),
            id: id.into(),
            projection: Vec::new(),
            consistent: self.config.strongly_consistent_reads,
        }
    }

    pub async fn get_as<E: Entity>(
        &self,
        schema: &Arc<EntitySchema>,
        id: impl Into<Value>,
    ) -> Result<Option<E>, AccessError> {
        self.get(schema, id)
            .execute()
            .await?
            .map(E::from_item)
            .transpose()
    }

    /// Starts a listing read. Scope it with [`ReadBuilder::from`].
    pub fn list(&self, projection: &[&str]) -> ReadBuilder<'_> {
        ReadBuilder {
            repo: self,
            schema: None,
            query: ReadQuery::select(projection),
        }
    }

    /// Same builder as [`Repository::list`], conventionally scoped with
    /// [`ReadBuilder::where_`].
    pub fn find(&self, projection: &[&str]) -> ReadBuilder<'_> {
        self.list(projection)
    }

    pub fn insert(&self, schema: &Arc<EntitySchema>, item: Item) -> WriteBuilder<'_> {
        self.write(WriteOp::new(schema.clone(), WriteKind::Insert(item)))
    }

    pub fn update(&self, schema: &Arc<EntitySchema>, item: Item) -> WriteBuilder<'_> {
        self.write(WriteOp::new(schema.clone(), WriteKind::Update(item)))
    }

    pub fn delete(&self, schema: &Arc<EntitySchema>, id: impl Into<Value>) -> WriteBuilder<'_> {
        self.write(WriteOp::new(
            schema.clone(),
            WriteKind::Delete { id: id.into() },
        ))
    }

    /// Field-level patch of the stored entity `id`.
    pub fn on(&self, schema: &Arc<EntitySchema>, id: impl Into<Value>) -> PatchBuilder<'_> {
        PatchBuilder {
            inner: self.write(WriteOp::new(
                schema.clone(),
                WriteKind::Patch {
                    id: id.into(),
                    ops: Vec::new(),
                },
            )),
        }
    }

    fn write(&self, op: WriteOp) -> WriteBuilder<'_> {
        WriteBuilder { repo: self, op }
    }

    pub fn transaction(&self, ops: impl IntoIterator<Item = WriteOp>) -> TransactionBuilder<'_> {
        TransactionBuilder {
            repo: self,
            ops: ops.into_iter().collect(),
        }
    }
}

pub struct GetBuilder<'a> {
    repo: &'a Repository,
    schema: Arc<EntitySchema>,
    id: Value,
    projection: Vec<String>,
    consistent: bool,
}

impl GetBuilder<'_> {
    pub fn select(mut self, fields: &[&str]) -> Self {
        self.projection = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn strongly_consistent(mut self, consistent: bool) -> Self {
        self.consistent = consistent;
        self
    }

    pub async fn execute(self) -> Result<Option<Item>, AccessError> {
        get_by_id(
            self.repo.store.as_ref(),
            &self.schema,
            &self.id,
            &self.projection,
            self.consistent,
        )
        .await
    }
}

pub struct ReadBuilder<'a> {
    repo: &'a Repository,
    schema: Option<Arc<EntitySchema>>,
    query: ReadQuery,
}

impl ReadBuilder<'_> {
    pub fn from(mut self, schema: &Arc<EntitySchema>) -> Self {
        self.schema = Some(schema.clone());
        self
    }

    pub fn by(mut self, partition: impl Into<Value>) -> Self {
        self.query = self.query.by(partition);
        self
    }

    pub fn range(mut self, condition: SortCondition) -> Self {
        self.query = self.query.range(condition);
        self
    }

    pub fn where_(mut self, condition: KeyCondition) -> Self {
        self.query = self.query.where_(condition);
        self
    }

    pub fn using(mut self, index: &str) -> Self {
        self.query = self.query.using(index);
        self
    }

    pub fn filter(mut self, expr: Expr) -> Self {
        self.query = self.query.filter(expr);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.query = self.query.limit(limit);
        self
    }

    pub fn fetch_size(mut self, fetch_size: usize) -> Self {
        self.query = self.query.fetch_size(fetch_size);
        self
    }

    /// `true`/[`Order::Asc`] scans by ascending sort key.
    pub fn order(mut self, order: impl Into<Order>) -> Self {
        self.query = self.query.order(order);
        self
    }

    pub fn resume(mut self, cursor: impl Into<String>) -> Self {
        self.query = self.query.resume(cursor);
        self
    }

    pub fn strongly_consistent(mut self, consistent: bool) -> Self {
        self.query = self.query.strongly_consistent(consistent);
        self
    }

    pub fn query(&self) -> &ReadQuery {
        &self.query
    }

    pub async fn execute(self) -> Result<Page<Item>, AccessError> {
        let Some(schema) = &self.schema else {
            return Err(AccessError::Validation(
                "read has no entity; call from(..) first".into(),
            ));
        };
        execute_read(
            self.repo.store.as_ref(),
            schema,
            &self.query,
            &self.repo.config,
        )
        .await
    }

    pub async fn execute_as<E: Entity>(self) -> Result<Page<E>, AccessError> {
        self.execute().await?.decode()
    }
}

pub struct WriteBuilder<'a> {
    repo: &'a Repository,
    op: WriteOp,
}

impl WriteBuilder<'_> {
    /// Condition on the stored entity. Repeated calls are combined with AND.
    pub fn where_(mut self, expr: Expr) -> Self {
        self.op.condition = Some(match self.op.condition.take() {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    pub fn returning(mut self, mode: ReturnMode) -> Self {
        self.op.returning = mode;
        self
    }

    /// Requires the stored version to equal the one carried in the item's
    /// version field. Deletes use [`WriteBuilder::expect_version`].
    pub fn with_version_check(mut self) -> Self {
        self.op.version_check = VersionCheck::FromItem;
        self
    }

    pub fn expect_version(mut self, version: u64) -> Self {
        self.op.version_check = VersionCheck::Expected(version);
        self
    }

    pub fn into_op(self) -> WriteOp {
        self.op
    }

    /// Runs the write as a single-operation transaction.
    pub async fn execute(self) -> Result<Option<Item>, AccessError> {
        let mut results = execute_writes(
            self.repo.store.as_ref(),
            &self.repo.config,
            std::slice::from_ref(&self.op),
        )
        .await?;
        Ok(results.pop().flatten())
    }
}

pub struct PatchBuilder<'a> {
    inner: WriteBuilder<'a>,
}

impl PatchBuilder<'_> {
    pub fn set(self, field: &str, value: impl Into<Value>) -> Self {
        self.push(PatchOp::Set(field.to_string(), value.into()))
    }

    pub fn add(self, field: &str, value: impl Into<Value>) -> Self {
        self.push(PatchOp::Add(field.to_string(), value.into()))
    }

    pub fn remove(self, field: &str) -> Self {
        self.push(PatchOp::Remove(field.to_string()))
    }

    pub fn delete(self, field: &str, value: impl Into<Value>) -> Self {
        self.push(PatchOp::Delete(field.to_string(), value.into()))
    }

    fn push(mut self, patch: PatchOp) -> Self {
        if let WriteKind::Patch { ops, .. } = &mut self.inner.op.kind {
            ops.push(patch);
        }
        self
    }

    pub fn where_(self, expr: Expr) -> Self {
        Self {
            inner: self.inner.where_(expr),
        }
    }

    /// Defaults to [`ReturnMode::None`].
    pub fn returning(self, mode: ReturnMode) -> Self {
        Self {
            inner: self.inner.returning(mode),
        }
    }

    pub fn expect_version(self, version: u64) -> Self {
        Self {
            inner: self.inner.expect_version(version),
        }
    }

    pub fn into_op(self) -> WriteOp {
        self.inner.into_op()
    }

    pub async fn execute(self) -> Result<Option<Item>, AccessError> {
        self.inner.execute().await
    }
}

/// Several writes committed together.
pub struct TransactionBuilder<'a> {
    repo: &'a Repository,
    ops: Vec<WriteOp>,
}

impl TransactionBuilder<'_> {
    pub fn push(mut self, op: impl Into<WriteOp>) -> Self {
        self.ops.push(op.into());
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Returns each operation's requested snapshot, in order.
    pub async fn execute(self) -> Result<Vec<Option<Item>>, AccessError> {
        execute_writes(self.repo.store.as_ref(), &self.repo.config, &self.ops).await
    }
}

impl From<WriteBuilder<'_>> for WriteOp {
    fn from(builder: WriteBuilder<'_>) -> Self {
        builder.into_op()
    }
}

impl From<PatchBuilder<'_>> for WriteOp {
    fn from(builder: PatchBuilder<'_>) -> Self {
        builder.into_op()
    }
}

use crate::catalog::types::Value;
use crate::error::AccessError;
use serde::{Deserialize, Serialize};

/// Maximum nesting depth for expressions to prevent stack overflow
const MAX_EXPR_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

impl Order {
    pub fn is_forward(self) -> bool {
        matches!(self, Order::Asc)
    }

    pub fn reversed(self) -> Order {
        match self {
            Order::Asc => Order::Desc,
            Order::Desc => Order::Asc,
        }
    }
}

impl From<bool> for Order {
    fn from(ascending: bool) -> Self {
        if ascending { Order::Asc } else { Order::Desc }
    }
}

/// Non-key predicate over logical attribute names. Used as a post-fetch
/// filter and as a write condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expr {
    Eq(String, Value),
    Ne(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    Gt(String, Value),
    Gte(String, Value),
    In(String, Vec<Value>),
    Between(String, Value, Value),
    Exists(String),
    NotExists(String),
    BeginsWith(String, String),
    Contains(String, Value),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    pub fn and(self, rhs: Expr) -> Expr {
        Expr::And(Box::new(self), Box::new(rhs))
    }

    pub fn or(self, rhs: Expr) -> Expr {
        Expr::Or(Box::new(self), Box::new(rhs))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }

    pub fn depth(&self) -> usize {
        match self {
            Expr::Not(inner) => 1 + inner.depth(),
            Expr::And(left, right) | Expr::Or(left, right) => 1 + left.depth().max(right.depth()),
            _ => 1,
        }
    }

    pub fn validate_depth(&self) -> Result<(), AccessError> {
        let depth = self.depth();
        if depth > MAX_EXPR_DEPTH {
            return Err(AccessError::Validation(format!(
                "expression depth {depth} exceeds maximum allowed depth of {MAX_EXPR_DEPTH}"
            )));
        }
        Ok(())
    }

    /// True when `pred` holds for any attribute name the expression reads.
    pub fn any_field(&self, pred: &impl Fn(&str) -> bool) -> bool {
        match self {
            Expr::Eq(c, _)
            | Expr::Ne(c, _)
            | Expr::Lt(c, _)
            | Expr::Lte(c, _)
            | Expr::Gt(c, _)
            | Expr::Gte(c, _)
            | Expr::In(c, _)
            | Expr::Between(c, _, _)
            | Expr::Exists(c)
            | Expr::NotExists(c)
            | Expr::BeginsWith(c, _)
            | Expr::Contains(c, _) => pred(c),
            Expr::And(a, b) | Expr::Or(a, b) => a.any_field(pred) || b.any_field(pred),
            Expr::Not(a) => a.any_field(pred),
        }
    }

    /// Rewrites attribute names, e.g. logical field names to stored aliases.
    pub fn map_fields(&self, f: &impl Fn(&str) -> String) -> Expr {
        match self {
            Expr::Eq(c, v) => Expr::Eq(f(c), v.clone()),
            Expr::Ne(c, v) => Expr::Ne(f(c), v.clone()),
            Expr::Lt(c, v) => Expr::Lt(f(c), v.clone()),
            Expr::Lte(c, v) => Expr::Lte(f(c), v.clone()),
            Expr::Gt(c, v) => Expr::Gt(f(c), v.clone()),
            Expr::Gte(c, v) => Expr::Gte(f(c), v.clone()),
            Expr::In(c, vs) => Expr::In(f(c), vs.clone()),
            Expr::Between(c, lo, hi) => Expr::Between(f(c), lo.clone(), hi.clone()),
            Expr::Exists(c) => Expr::Exists(f(c)),
            Expr::NotExists(c) => Expr::NotExists(f(c)),
            Expr::BeginsWith(c, p) => Expr::BeginsWith(f(c), p.clone()),
            Expr::Contains(c, v) => Expr::Contains(f(c), v.clone()),
            Expr::And(a, b) => a.map_fields(f).and(b.map_fields(f)),
            Expr::Or(a, b) => a.map_fields(f).or(b.map_fields(f)),
            Expr::Not(a) => a.map_fields(f).not(),
        }
    }
}

pub struct FieldRef(String);

pub fn col(name: &str) -> FieldRef {
    FieldRef(name.to_string())
}

pub fn lit<T: Into<Value>>(value: T) -> Value {
    value.into()
}

impl FieldRef {
    pub fn eq(self, value: Value) -> Expr {
        Expr::Eq(self.0, value)
    }

    pub fn neq(self, value: Value) -> Expr {
        Expr::Ne(self.0, value)
    }

    pub fn gt(self, value: Value) -> Expr {
        Expr::Gt(self.0, value)
    }

    pub fn gte(self, value: Value) -> Expr {
        Expr::Gte(self.0, value)
    }

    pub fn lt(self, value: Value) -> Expr {
        Expr::Lt(self.0, value)
    }

    pub fn lte(self, value: Value) -> Expr {
        Expr::Lte(self.0, value)
    }

    pub fn between(self, low: Value, high: Value) -> Expr {
        Expr::Between(self.0, low, high)
    }

    pub fn in_(self, values: Vec<Value>) -> Expr {
        Expr::In(self.0, values)
    }

    pub fn exists(self) -> Expr {
        Expr::Exists(self.0)
    }

    pub fn not_exists(self) -> Expr {
        Expr::NotExists(self.0)
    }

    pub fn begins_with(self, prefix: &str) -> Expr {
        Expr::BeginsWith(self.0, prefix.to_string())
    }

    pub fn contains(self, value: Value) -> Expr {
        Expr::Contains(self.0, value)
    }
}

/// Condition on the logical sort field of the queried key group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortCondition {
    Eq(Value),
    Lt(Value),
    Lte(Value),
    Gt(Value),
    Gte(Value),
    Between(Value, Value),
    BeginsWith(String),
}

impl SortCondition {
    pub fn eq(value: impl Into<Value>) -> Self {
        SortCondition::Eq(value.into())
    }

    pub fn between(low: impl Into<Value>, high: impl Into<Value>) -> Self {
        SortCondition::Between(low.into(), high.into())
    }

    pub fn begins_with(prefix: impl Into<String>) -> Self {
        SortCondition::BeginsWith(prefix.into())
    }
}

/// Key condition of a `find`: an optional partition field equality and an
/// optional sort field condition, both by logical field name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyCondition {
    pub hash: Option<(String, Value)>,
    pub range: Option<(String, SortCondition)>,
}

impl KeyCondition {
    pub fn hash(field: &str, value: impl Into<Value>) -> Self {
        Self {
            hash: Some((field.to_string(), value.into())),
            range: None,
        }
    }

    pub fn range_only(field: &str, condition: SortCondition) -> Self {
        Self {
            hash: None,
            range: Some((field.to_string(), condition)),
        }
    }

    pub fn range(mut self, field: &str, condition: SortCondition) -> Self {
        self.range = Some((field.to_string(), condition));
        self
    }
}

/// Accumulated options of one read. Built up by the repository builders and
/// consumed by [`crate::query::executor::execute_read`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReadQuery {
    pub projection: Vec<String>,
    /// `by(..)` partition value, resolved against the default hash group or
    /// the group named by `index`.
    pub partition: Option<Value>,
    pub range: Option<SortCondition>,
    pub key_condition: Option<KeyCondition>,
    pub index: Option<String>,
    pub filter: Option<Expr>,
    pub order: Order,
    pub limit: Option<usize>,
    pub fetch_size: Option<usize>,
    pub start: Option<String>,
    pub consistent: bool,
}

impl ReadQuery {
    pub fn select(fields: &[&str]) -> Self {
        Self {
            projection: fields.iter().map(|f| f.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn by(mut self, partition: impl Into<Value>) -> Self {
        self.partition = Some(partition.into());
        self
    }

    pub fn range(mut self, condition: SortCondition) -> Self {
        self.range = Some(condition);
        self
    }

    pub fn where_(mut self, condition: KeyCondition) -> Self {
        self.key_condition = Some(condition);
        self
    }

    pub fn using(mut self, index: &str) -> Self {
        self.index = Some(index.to_string());
        self
    }

    /// Additional filters are combined with AND.
    pub fn filter(mut self, expr: Expr) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn fetch_size(mut self, fetch_size: usize) -> Self {
        self.fetch_size = Some(fetch_size);
        self
    }

    pub fn order(mut self, order: impl Into<Order>) -> Self {
        self.order = order.into();
        self
    }

    pub fn resume(mut self, cursor: impl Into<String>) -> Self {
        self.start = Some(cursor.into());
        self
    }

    pub fn strongly_consistent(mut self, consistent: bool) -> Self {
        self.consistent = consistent;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::{Expr, Order, ReadQuery, col, lit};

    #[test]
    fn filters_accumulate_with_and() {
        let query = ReadQuery::default()
            .filter(col("a").eq(lit(1_i64)))
            .filter(col("b").exists());
        assert_eq!(
            query.filter,
            Some(Expr::And(
                Box::new(Expr::Eq("a".into(), lit(1_i64))),
                Box::new(Expr::Exists("b".into()))
            ))
        );
    }

    #[test]
    fn deep_expressions_are_rejected() {
        let mut expr = col("a").exists();
        for _ in 0..40 {
            expr = expr.not();
        }
        assert!(expr.validate_depth().is_err());
    }

    #[test]
    fn order_from_bool() {
        assert_eq!(Order::from(false), Order::Desc);
        assert!(Order::from(true).is_forward());
        assert_eq!(Order::Asc.reversed(), Order::Desc);
    }

    #[test]
    fn map_fields_rewrites_every_leaf() {
        let expr = col("name").eq(lit("x")).or(col("age").gt(lit(3_i64)).not());
        let mapped = expr.map_fields(&|f: &str| format!("p_{f}"));
        assert_eq!(
            mapped,
            Expr::Eq("p_name".into(), lit("x")).or(Expr::Gt("p_age".into(), lit(3_i64)).not())
        );
    }
}

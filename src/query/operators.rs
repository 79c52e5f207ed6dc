use crate::catalog::types::{Item, Value};
use crate::query::plan::Expr;
use crate::store::{Condition, Record};

/// Evaluates a filter against stored attributes. A missing attribute never
/// satisfies a comparison.
pub fn eval_expr(expr: &Expr, item: &Item) -> bool {
    let cmp = |col: &str, v: &Value, pred: fn(std::cmp::Ordering) -> bool| {
        item.get(col)
            .and_then(|rv| rv.compare(v))
            .is_some_and(pred)
    };
    match expr {
        Expr::Eq(c, v) => cmp(c, v, |o| o.is_eq()),
        Expr::Ne(c, v) => item
            .get(c)
            .is_none_or(|rv| rv.compare(v).is_none_or(|o| !o.is_eq())),
        Expr::Lt(c, v) => cmp(c, v, |o| o.is_lt()),
        Expr::Lte(c, v) => cmp(c, v, |o| o.is_le()),
        Expr::Gt(c, v) => cmp(c, v, |o| o.is_gt()),
        Expr::Gte(c, v) => cmp(c, v, |o| o.is_ge()),
        Expr::In(c, values) => values.iter().any(|v| cmp(c, v, |o| o.is_eq())),
        Expr::Between(c, lo, hi) => cmp(c, lo, |o| o.is_ge()) && cmp(c, hi, |o| o.is_le()),
        Expr::Exists(c) => item.get(c).is_some_and(|v| !v.is_null()),
        Expr::NotExists(c) => item.get(c).is_none_or(Value::is_null),
        Expr::BeginsWith(c, prefix) => item
            .get(c)
            .and_then(Value::as_str)
            .is_some_and(|s| s.starts_with(prefix.as_str())),
        Expr::Contains(c, needle) => match item.get(c) {
            Some(Value::List(values)) => values.iter().any(|v| v == needle),
            Some(Value::Text(s)) => needle.as_str().is_some_and(|n| s.contains(n)),
            _ => false,
        },
        Expr::And(a, b) => eval_expr(a, item) && eval_expr(b, item),
        Expr::Or(a, b) => eval_expr(a, item) || eval_expr(b, item),
        Expr::Not(a) => !eval_expr(a, item),
    }
}

/// Evaluates a write condition against the record currently stored at the
/// written key.
pub fn eval_condition(condition: &Condition, current: Option<&Record>) -> bool {
    match condition {
        Condition::NotExists => current.is_none(),
        Condition::Exists => current.is_some(),
        Condition::VersionEquals(expected) => {
            current.is_some_and(|r| r.object_version == *expected)
        }
        Condition::Matches(expr) => current.is_some_and(|r| eval_expr(expr, &r.attributes)),
        Condition::All(parts) => parts.iter().all(|c| eval_condition(c, current)),
    }
}

/// Keeps only the projected logical fields. An empty projection keeps all.
pub fn project(item: Item, projection: &[String]) -> Item {
    if projection.is_empty() {
        return item;
    }
    item.into_iter()
        .filter(|(name, _)| projection.iter().any(|p| p == name))
        .collect()
}

//! Filter tree parsed from MongoDB-style objects.

use serde_json::{Map, Value};

use super::projection::{aggregate_fn, AggregateFn};
use crate::error::{CompileResult, QueryError};

/// A node of the filter tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Nor(Vec<Filter>),
    Not(Box<Filter>),
    /// Trusted boolean SQL expression.
    Raw(String),
    /// Condition on a dotted logical path.
    Field { path: String, condition: Condition },
}

/// Right-hand side of a field leaf.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Literal or `null`.
    Equals(Value),
    /// Array shorthand for `$in`.
    In(Vec<Value>),
    /// Comparison object; every entry must hold.
    Ops(Vec<Comparison>),
    /// Aggregate over a to-many relation.
    Aggregate(AggregateFilter),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateShorthand {
    CurrentWeek,
    CurrentMonth,
    CurrentYear,
    LastWeek,
    LastMonth,
    LastYear,
}

impl DateShorthand {
    fn from_operator(op: &str) -> Option<Self> {
        Some(match op {
            "$currentweek" => DateShorthand::CurrentWeek,
            "$currentmonth" => DateShorthand::CurrentMonth,
            "$currentyear" => DateShorthand::CurrentYear,
            "$lastweek" => DateShorthand::LastWeek,
            "$lastmonth" => DateShorthand::LastMonth,
            "$lastyear" => DateShorthand::LastYear,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Comparison {
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    E(Value),
    Ne(Value),
    Like(Value),
    NotLike(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    /// Trusted SQL appended after the column.
    Raw(String),
    Not(Vec<Comparison>),
    Date { shorthand: DateShorthand, on: bool },
}

/// `{$filter?, $count|$sum|$avg, $as, $where?}` on a to-many relation.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateFilter {
    pub func: AggregateFn,
    pub alias: Option<String>,
    /// Restricts which related rows are aggregated.
    pub filter: Option<Box<Filter>>,
    /// Condition on the aggregate value itself.
    pub condition: Option<Box<Condition>>,
}

impl Filter {
    pub fn field(path: &str, condition: Condition) -> Self {
        Filter::Field {
            path: path.into(),
            condition,
        }
    }

    /// AND two filters, flattening nested conjunctions.
    pub fn and(self, other: Filter) -> Filter {
        match (self, other) {
            (Filter::And(mut a), Filter::And(b)) => {
                a.extend(b);
                Filter::And(a)
            }
            (Filter::And(mut a), other) => {
                a.push(other);
                Filter::And(a)
            }
            (this, other) => Filter::And(vec![this, other]),
        }
    }

    /// Parse a filter object.
    pub fn from_value(value: &Value) -> CompileResult<Self> {
        match value {
            Value::Object(map) => {
                let mut nodes = entries(map)?;
                if nodes.len() == 1 {
                    Ok(nodes.remove(0))
                } else {
                    Ok(Filter::And(nodes))
                }
            }
            Value::Array(items) => Ok(Filter::And(
                items
                    .iter()
                    .map(Filter::from_value)
                    .collect::<CompileResult<_>>()?,
            )),
            other => Err(QueryError::invalid_argument(format!(
                "filter must be an object, got {}",
                other
            ))),
        }
    }
}

fn entries(map: &Map<String, Value>) -> CompileResult<Vec<Filter>> {
    map.iter().map(|(key, value)| entry(key, value)).collect()
}

fn children(op: &str, value: &Value) -> CompileResult<Vec<Filter>> {
    match value {
        Value::Array(items) => items.iter().map(Filter::from_value).collect(),
        Value::Object(map) => entries(map),
        other => Err(QueryError::invalid_argument(format!(
            "{} expects an array, got {}",
            op, other
        ))),
    }
}

fn entry(key: &str, value: &Value) -> CompileResult<Filter> {
    match key {
        "$and" => Ok(Filter::And(children(key, value)?)),
        "$or" => Ok(Filter::Or(children(key, value)?)),
        "$nor" => Ok(Filter::Nor(children(key, value)?)),
        "$not" => Ok(Filter::Not(Box::new(Filter::from_value(value)?))),
        "$raw" => match value {
            Value::String(sql) => Ok(Filter::Raw(sql.clone())),
            other => Err(QueryError::invalid_argument(format!(
                "$raw expects a string, got {}",
                other
            ))),
        },
        op if op.starts_with('$') => Err(QueryError::invalid_argument(format!(
            "unknown logical operator '{}'",
            op
        ))),
        path => field_entry(path, value),
    }
}

fn field_entry(path: &str, value: &Value) -> CompileResult<Filter> {
    let Value::Object(map) = value else {
        return Ok(Filter::field(path, condition(path, value)?));
    };

    let operators = map.keys().filter(|k| k.starts_with('$')).count();
    if operators == 0 && !map.is_empty() {
        // `{author: {name: "x"}}` filters on `author.name`
        let nested = map
            .iter()
            .map(|(sub, v)| field_entry(&format!("{}.{}", path, sub), v))
            .collect::<CompileResult<Vec<_>>>()?;
        return Ok(if nested.len() == 1 {
            nested.into_iter().next().unwrap_or(Filter::And(Vec::new()))
        } else {
            Filter::And(nested)
        });
    }
    if operators != map.len() {
        return Err(QueryError::invalid_argument(format!(
            "filter on '{}' mixes operators and field names",
            path
        )));
    }

    Ok(Filter::field(path, condition(path, value)?))
}

/// Parse the value side of a field leaf.
pub(crate) fn condition(path: &str, value: &Value) -> CompileResult<Condition> {
    match value {
        Value::Array(items) => Ok(Condition::In(items.clone())),
        Value::Object(map) => {
            if let Some(func) = aggregate_fn(path, map)? {
                return aggregate_filter(path, func, map).map(Condition::Aggregate);
            }
            Ok(Condition::Ops(comparisons(path, map)?))
        }
        scalar => Ok(Condition::Equals(scalar.clone())),
    }
}

fn aggregate_filter(
    path: &str,
    func: AggregateFn,
    map: &Map<String, Value>,
) -> CompileResult<AggregateFilter> {
    let alias = match map.get("$as") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => {
            return Err(QueryError::invalid_argument(format!(
                "$as on '{}' must be a string, got {}",
                path, other
            )))
        }
    };
    let filter = map
        .get("$filter")
        .map(Filter::from_value)
        .transpose()?
        .map(Box::new);
    let condition = map
        .get("$where")
        .map(|w| condition(path, w))
        .transpose()?
        .map(Box::new);

    for key in map.keys() {
        if !matches!(
            key.as_str(),
            "$count" | "$sum" | "$avg" | "$as" | "$filter" | "$where"
        ) {
            return Err(QueryError::invalid_argument(format!(
                "unknown aggregate directive '{}' on '{}'",
                key, path
            )));
        }
    }

    Ok(AggregateFilter {
        func,
        alias,
        filter,
        condition,
    })
}

fn list(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::Null => false,
        _ => true,
    }
}

fn comparisons(path: &str, map: &Map<String, Value>) -> CompileResult<Vec<Comparison>> {
    let mut out = Vec::with_capacity(map.len());
    for (op, value) in map {
        let cmp = match op.as_str() {
            "$gt" => Comparison::Gt(value.clone()),
            "$gte" => Comparison::Gte(value.clone()),
            "$lt" => Comparison::Lt(value.clone()),
            "$lte" => Comparison::Lte(value.clone()),
            "$e" | "$eq" => Comparison::E(value.clone()),
            "$ne" => Comparison::Ne(value.clone()),
            "$like" => Comparison::Like(value.clone()),
            "$nlike" => Comparison::NotLike(value.clone()),
            "$in" => Comparison::In(list(value)),
            "$nin" => Comparison::Nin(list(value)),
            "$raw" => match value {
                Value::String(sql) => Comparison::Raw(sql.clone()),
                other => {
                    return Err(QueryError::invalid_argument(format!(
                        "$raw on '{}' expects a string, got {}",
                        path, other
                    )))
                }
            },
            "$not" => match value {
                Value::Object(inner) => Comparison::Not(comparisons(path, inner)?),
                scalar => Comparison::Not(vec![Comparison::E(scalar.clone())]),
            },
            other => match DateShorthand::from_operator(other) {
                Some(shorthand) => Comparison::Date {
                    shorthand,
                    on: truthy(value),
                },
                None => {
                    return Err(QueryError::invalid_argument(format!(
                        "unknown operator '{}' on '{}'",
                        other, path
                    )))
                }
            },
        };
        out.push(cmp);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_logical_tree() {
        let f = Filter::from_value(&json!({
            "$and": [{"name": {"$like": "Paul"}}, {"age": {"$gt": 10}}]
        }))
        .unwrap();
        assert_eq!(
            f,
            Filter::And(vec![
                Filter::field("name", Condition::Ops(vec![Comparison::Like(json!("Paul"))])),
                Filter::field("age", Condition::Ops(vec![Comparison::Gt(json!(10))])),
            ])
        );
    }

    #[test]
    fn test_multiple_keys_are_anded() {
        let f = Filter::from_value(&json!({"a": 1, "b": null, "c": [1, 2]})).unwrap();
        let Filter::And(nodes) = f else {
            panic!("expected and");
        };
        assert_eq!(nodes[0], Filter::field("a", Condition::Equals(json!(1))));
        assert_eq!(nodes[1], Filter::field("b", Condition::Equals(Value::Null)));
        assert_eq!(nodes[2], Filter::field("c", Condition::In(vec![json!(1), json!(2)])));
    }

    #[test]
    fn test_nested_path_shorthand() {
        let f = Filter::from_value(&json!({"author": {"name": "Ann"}})).unwrap();
        assert_eq!(f, Filter::field("author.name", Condition::Equals(json!("Ann"))));
    }

    #[test]
    fn test_not_and_dates() {
        let f = Filter::from_value(&json!({
            "age": {"$not": {"$gt": 5}},
            "created": {"$currentweek": true}
        }))
        .unwrap();
        let Filter::And(nodes) = f else {
            panic!("expected and");
        };
        assert_eq!(
            nodes[0],
            Filter::field(
                "age",
                Condition::Ops(vec![Comparison::Not(vec![Comparison::Gt(json!(5))])])
            )
        );
        assert_eq!(
            nodes[1],
            Filter::field(
                "created",
                Condition::Ops(vec![Comparison::Date {
                    shorthand: DateShorthand::CurrentWeek,
                    on: true
                }])
            )
        );
    }

    #[test]
    fn test_aggregate_filter() {
        let f = Filter::from_value(&json!({
            "comments": {"$filter": {"approved": true}, "$count": 1, "$as": "n", "$where": {"$gte": 2}}
        }))
        .unwrap();
        let Filter::Field {
            condition: Condition::Aggregate(agg),
            ..
        } = f
        else {
            panic!("expected aggregate");
        };
        assert_eq!(agg.func, AggregateFn::Count);
        assert_eq!(agg.alias.as_deref(), Some("n"));
        assert!(agg.filter.is_some());
        assert_eq!(
            agg.condition.as_deref(),
            Some(&Condition::Ops(vec![Comparison::Gte(json!(2))]))
        );
    }

    #[test]
    fn test_rejects_unknown_operator() {
        let err = Filter::from_value(&json!({"age": {"$between": [1, 2]}})).unwrap_err();
        assert!(matches!(err, QueryError::InvalidArgument(_)));
        assert!(Filter::from_value(&json!({"$xor": []})).is_err());
        assert!(Filter::from_value(&json!({"age": {"$gt": 1, "x": 2}})).is_err());
    }
}

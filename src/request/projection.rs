//! Projection tree: which fields and relations to return.

use indexmap::IndexMap;
use serde_json::{Map, Value};

use super::filter::Filter;
use super::options::SelectOptions;
use crate::error::{CompileResult, QueryError};

/// Sentinel expanding to every available column.
pub const ALL: &str = "$all";
/// Sentinel expanding to the entity's default columns.
pub const DEFAULT: &str = "$default";

/// Aggregate function applied to a to-many relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregateFn {
    Count,
    Sum(String),
    Avg(String),
}

impl AggregateFn {
    pub fn name(&self) -> &'static str {
        match self {
            AggregateFn::Count => "count",
            AggregateFn::Sum(_) => "sum",
            AggregateFn::Avg(_) => "avg",
        }
    }
}

/// `{$filter?, $count|$sum|$avg, $as}` on a to-many relation.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateSpec {
    pub func: AggregateFn,
    pub alias: Option<String>,
    pub filter: Option<Filter>,
}

/// `{$fields?, $filter?, $options?}` on a relation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationSpec {
    pub fields: Projection,
    pub filter: Option<Filter>,
    pub options: SelectOptions,
}

/// What the request says about one key.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldSpec {
    Include,
    Exclude,
    Relation(RelationSpec),
    Aggregate(AggregateSpec),
}

impl FieldSpec {
    pub fn is_requested(&self) -> bool {
        !matches!(self, FieldSpec::Exclude)
    }
}

/// Ordered field name -> spec map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projection(IndexMap<String, FieldSpec>);

impl Projection {
    pub fn new() -> Self {
        Self::default()
    }

    /// `{$default: 1}`
    pub fn defaults() -> Self {
        Self::new().include(DEFAULT)
    }

    pub fn include(mut self, key: &str) -> Self {
        self.0.insert(key.into(), FieldSpec::Include);
        self
    }

    pub fn exclude(mut self, key: &str) -> Self {
        self.0.insert(key.into(), FieldSpec::Exclude);
        self
    }

    pub fn relation(mut self, key: &str, spec: RelationSpec) -> Self {
        self.0.insert(key.into(), FieldSpec::Relation(spec));
        self
    }

    pub fn aggregate(mut self, key: &str, spec: AggregateSpec) -> Self {
        self.0.insert(key.into(), FieldSpec::Aggregate(spec));
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, spec: FieldSpec) {
        self.0.insert(key.into(), spec);
    }

    pub fn get(&self, key: &str) -> Option<&FieldSpec> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldSpec)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether anything is positively requested.
    pub fn has_requests(&self) -> bool {
        self.0.values().any(FieldSpec::is_requested)
    }

    /// Parse a projection object.
    ///
    /// Values: `1`/`true` include, `0`/`false` exclude, objects are relations
    /// (`{$fields, $filter, $options}` or a bare nested projection) or
    /// aggregates (`{$count|$sum|$avg, $as, $filter}`).
    pub fn from_value(value: &Value) -> CompileResult<Self> {
        match value {
            Value::Null => Ok(Self::new()),
            Value::Object(map) => Self::from_map(map),
            Value::String(list) => Ok(list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .fold(Self::new(), |p, key| p.include(key))),
            other => Err(QueryError::invalid_argument(format!(
                "fields must be an object, got {}",
                other
            ))),
        }
    }

    fn from_map(map: &Map<String, Value>) -> CompileResult<Self> {
        let mut projection = Self::new();
        for (key, value) in map {
            let spec = match value {
                Value::Bool(b) => flag(*b),
                Value::Number(n) => flag(n.as_f64().map(|f| f != 0.0).unwrap_or(true)),
                Value::Object(spec) => parse_object_spec(key, spec)?,
                other => {
                    return Err(QueryError::invalid_argument(format!(
                        "field '{}' must be 1, 0 or an object, got {}",
                        key, other
                    )))
                }
            };
            projection.0.insert(key.clone(), spec);
        }
        Ok(projection)
    }
}

fn flag(include: bool) -> FieldSpec {
    if include {
        FieldSpec::Include
    } else {
        FieldSpec::Exclude
    }
}

fn parse_object_spec(key: &str, spec: &Map<String, Value>) -> CompileResult<FieldSpec> {
    let filter = spec.get("$filter").map(Filter::from_value).transpose()?;

    if let Some(func) = aggregate_fn(key, spec)? {
        let alias = match spec.get("$as") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => {
                return Err(QueryError::invalid_argument(format!(
                    "$as on '{}' must be a string, got {}",
                    key, other
                )))
            }
        };
        return Ok(FieldSpec::Aggregate(AggregateSpec {
            func,
            alias,
            filter,
        }));
    }

    let has_directives = spec.keys().any(|k| k.starts_with('$'));
    let fields = if has_directives {
        match spec.get("$fields") {
            Some(fields) => Projection::from_value(fields)?,
            None => Projection::new(),
        }
    } else {
        // `{author: {name: 1}}` is shorthand for `{author: {$fields: {name: 1}}}`
        Projection::from_map(spec)?
    };
    let options = match spec.get("$options") {
        Some(options) => SelectOptions::from_value(options)?,
        None => SelectOptions::default(),
    };

    for directive in spec.keys().filter(|k| k.starts_with('$')) {
        if !matches!(directive.as_str(), "$fields" | "$filter" | "$options") {
            return Err(QueryError::invalid_argument(format!(
                "unknown directive '{}' on '{}'",
                directive, key
            )));
        }
    }

    Ok(FieldSpec::Relation(RelationSpec {
        fields,
        filter,
        options,
    }))
}

/// Reads `$count` / `$sum` / `$avg` off an aggregate object.
pub(crate) fn aggregate_fn(key: &str, spec: &Map<String, Value>) -> CompileResult<Option<AggregateFn>> {
    let field_arg = |name: &str, value: &Value| match value {
        Value::String(field) if !field.is_empty() => Ok(field.clone()),
        other => Err(QueryError::invalid_argument(format!(
            "{} on '{}' must name a field, got {}",
            name, key, other
        ))),
    };

    if let Some(value) = spec.get("$count") {
        if matches!(value, Value::Bool(false)) {
            return Ok(None);
        }
        return Ok(Some(AggregateFn::Count));
    }
    if let Some(value) = spec.get("$sum") {
        return Ok(Some(AggregateFn::Sum(field_arg("$sum", value)?)));
    }
    if let Some(value) = spec.get("$avg") {
        return Ok(Some(AggregateFn::Avg(field_arg("$avg", value)?)));
    }
    Ok(None)
}

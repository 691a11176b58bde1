//! Typed request trees.
//!
//! A request names the fields to return ([`Projection`]), the rows to keep
//! ([`Filter`]) and how to page them ([`SelectOptions`]). All three parse
//! from JSON values; the DSL parser produces the same JSON shapes.

pub mod filter;
pub mod options;
pub mod projection;

pub use filter::{AggregateFilter, Comparison, Condition, DateShorthand, Filter};
pub use options::SelectOptions;
pub use projection::{AggregateFn, AggregateSpec, FieldSpec, Projection, RelationSpec, ALL, DEFAULT};

use serde_json::Value;

use crate::dsl;
use crate::error::{CompileResult, QueryError};

/// A complete select request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Request {
    pub fields: Projection,
    pub filter: Option<Filter>,
    pub options: SelectOptions,
}

impl Request {
    pub fn new(fields: Projection) -> Self {
        Self {
            fields,
            ..Default::default()
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_options(mut self, options: SelectOptions) -> Self {
        self.options = options;
        self
    }

    /// Parse `{fields?, filter?, options?}`.
    pub fn from_json(value: &Value) -> CompileResult<Self> {
        let Value::Object(map) = value else {
            return Err(QueryError::invalid_argument(format!(
                "request must be an object, got {}",
                value
            )));
        };
        for key in map.keys() {
            if !matches!(key.as_str(), "fields" | "filter" | "options") {
                return Err(QueryError::invalid_argument(format!(
                    "unknown request key '{}'",
                    key
                )));
            }
        }

        Ok(Self {
            fields: map
                .get("fields")
                .map(Projection::from_value)
                .transpose()?
                .unwrap_or_default(),
            filter: filter_from(map.get("filter"))?,
            options: map
                .get("options")
                .map(SelectOptions::from_value)
                .transpose()?
                .unwrap_or_default(),
        })
    }

    /// Parse the fields and filter from DSL strings.
    ///
    /// `$options` produced by the fields text (`limit(10)` at the top level)
    /// become the request options.
    pub fn from_dsl(fields: Option<&str>, filter: Option<&str>) -> CompileResult<Self> {
        let mut request = Self::default();

        if let Some(text) = fields.filter(|t| !t.trim().is_empty()) {
            let mut value = dsl::parse(text)?;
            if let Some(options) = value.as_object_mut().and_then(|m| m.shift_remove("$options")) {
                request.options = SelectOptions::from_value(&options)?;
            }
            request.fields = Projection::from_value(&value)?;
        }
        if let Some(text) = filter.filter(|t| !t.trim().is_empty()) {
            request.filter = filter_from(Some(&dsl::parse(text)?))?;
        }

        Ok(request)
    }
}

fn filter_from(value: Option<&Value>) -> CompileResult<Option<Filter>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) if map.is_empty() => Ok(None),
        Some(value) => Filter::from_value(value).map(Some),
    }
}

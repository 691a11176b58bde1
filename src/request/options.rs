//! Pagination, ordering and search options.

use serde_json::Value;

use crate::error::{CompileResult, QueryError};

/// `{skip, limit, orderby, search}` as supplied by the caller.
///
/// Unset values are filled from the entity and the global settings during
/// normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectOptions {
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    /// Dotted paths; a leading `-` sorts descending.
    pub orderby: Option<Vec<String>>,
    /// Free-text term matched against the entity's searchable keys.
    pub search: Option<String>,
}

impl SelectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn orderby<S: AsRef<str>>(mut self, terms: &[S]) -> Self {
        self.orderby = Some(terms.iter().map(|t| t.as_ref().to_string()).collect());
        self
    }

    pub fn search(mut self, term: &str) -> Self {
        self.search = Some(term.to_string());
        self
    }

    pub fn from_value(value: &Value) -> CompileResult<Self> {
        let map = match value {
            Value::Null => return Ok(Self::default()),
            Value::Object(map) => map,
            other => {
                return Err(QueryError::invalid_argument(format!(
                    "options must be an object, got {}",
                    other
                )))
            }
        };

        let mut options = Self::default();
        for (key, value) in map {
            match key.as_str() {
                "skip" | "$skip" => options.skip = count(key, value)?,
                "limit" | "$limit" => options.limit = count(key, value)?,
                "orderby" | "$orderby" => options.orderby = order_terms(value)?,
                "search" | "$search" => {
                    options.search = match value {
                        Value::Null => None,
                        Value::String(s) if s.trim().is_empty() => None,
                        Value::String(s) => Some(s.clone()),
                        other => Some(other.to_string()),
                    }
                }
                other => {
                    return Err(QueryError::invalid_argument(format!(
                        "unknown option '{}'",
                        other
                    )))
                }
            }
        }
        Ok(options)
    }
}

fn count(key: &str, value: &Value) -> CompileResult<Option<u64>> {
    let invalid = || {
        QueryError::invalid_argument(format!(
            "{} must be a non-negative integer, got {}",
            key, value
        ))
    };
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n.as_u64().map(Some).ok_or_else(invalid),
        Value::String(s) => s.trim().parse::<u64>().map(Some).map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}

/// A bare string is a comma list; arrays hold one term each.
fn order_terms(value: &Value) -> CompileResult<Option<Vec<String>>> {
    let split = |s: &str| -> Vec<String> {
        s.split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect()
    };
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(split(s))),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.trim().to_string()),
                other => Err(QueryError::invalid_argument(format!(
                    "orderby entries must be strings, got {}",
                    other
                ))),
            })
            .collect::<CompileResult<Vec<_>>>()
            .map(Some),
        other => Err(QueryError::invalid_argument(format!(
            "orderby must be a string or an array, got {}",
            other
        ))),
    }
}

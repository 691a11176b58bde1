//! Entity definitions: columns, computed fields and per-entity defaults.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use indexmap::IndexMap;
use petgraph::graph::EdgeIndex;
use serde::Deserialize;
use serde_json::Value;

use super::relationship::{CustomJoin, Fragment};
use crate::backend::Row;
use crate::error::QueryResult;
use crate::hooks::{FieldVisibility, Params, SelectHooks};

/// A schema-described relation (table).
pub struct Entity {
    pub name: String,
    pub table: String,
    pub primary_key: String,
    pub available_keys: Vec<String>,
    pub default_keys: Vec<String>,
    pub searchable_keys: Vec<String>,
    pub virtuals: IndexMap<String, VirtualField>,
    pub customs: IndexMap<String, CustomField>,
    pub default_options: DefaultOptions,
    pub hooks: Option<Arc<dyn SelectHooks>>,
    pub visibility: Option<Arc<dyn FieldVisibility>>,
    /// Relationship name -> outgoing edge, in declaration order.
    pub(crate) relations: IndexMap<String, EdgeIndex>,
}

impl Entity {
    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn available_keys(&self) -> &[String] {
        &self.available_keys
    }

    pub fn default_keys(&self) -> &[String] {
        &self.default_keys
    }

    pub fn searchable_keys(&self) -> &[String] {
        &self.searchable_keys
    }

    pub fn has_column(&self, key: &str) -> bool {
        self.available_keys.iter().any(|k| k == key)
    }

    pub fn virtual_field(&self, key: &str) -> Option<&VirtualField> {
        self.virtuals.get(key)
    }

    pub fn custom(&self, key: &str) -> Option<&CustomField> {
        self.customs.get(key)
    }

    pub fn has_relationship(&self, key: &str) -> bool {
        self.relations.contains_key(key)
    }

    /// Whether `key` names anything this entity declares.
    pub fn declares(&self, key: &str) -> bool {
        self.has_column(key)
            || self.virtuals.contains_key(key)
            || self.customs.contains_key(key)
            || self.relations.contains_key(key)
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("primary_key", &self.primary_key)
            .field("available_keys", &self.available_keys)
            .field("relations", &self.relations.keys().collect::<Vec<_>>())
            .field("virtuals", &self.virtuals.keys().collect::<Vec<_>>())
            .field("customs", &self.customs.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Select options an entity falls back to when the request leaves them out.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DefaultOptions {
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    pub orderby: Vec<String>,
}

// =============================================================================
// Virtual fields
// =============================================================================

/// Result of a virtual transform.
pub enum VirtualValue {
    Ready(Value),
    Pending(BoxFuture<'static, QueryResult<Value>>),
}

impl From<Value> for VirtualValue {
    fn from(value: Value) -> Self {
        VirtualValue::Ready(value)
    }
}

pub type VirtualFn = Arc<dyn Fn(&Row, &Params) -> VirtualValue + Send + Sync>;

/// A field with no stored column, computed from other fields after fetch.
#[derive(Clone)]
pub struct VirtualField {
    /// Fields the transform reads. May name other virtuals.
    pub requires: Vec<String>,
    transform: VirtualFn,
}

impl VirtualField {
    pub fn new<F>(requires: &[&str], transform: F) -> Self
    where
        F: Fn(&Row, &Params) -> VirtualValue + Send + Sync + 'static,
    {
        Self {
            requires: requires.iter().map(|s| s.to_string()).collect(),
            transform: Arc::new(transform),
        }
    }

    pub fn evaluate(&self, row: &Row, params: &Params) -> VirtualValue {
        (self.transform)(row, params)
    }
}

impl fmt::Debug for VirtualField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualField")
            .field("requires", &self.requires)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Custom fields
// =============================================================================

/// A field backed by an SQL expression instead of a plain column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CustomField {
    /// Structured `LEFT JOIN entity AS alias ON ...` clauses.
    pub joins: Vec<CustomJoin>,
    /// Join clauses written entirely as fragments.
    pub join_raw: Vec<Fragment>,
    /// The selected expression.
    pub expression: Vec<Fragment>,
    /// Whether the expression aggregates (forces a grouped wrapper).
    pub aggregate: bool,
}

impl CustomField {
    pub fn expression(expression: Vec<Fragment>) -> Self {
        Self {
            expression,
            ..Default::default()
        }
    }

    pub fn with_join(mut self, join: CustomJoin) -> Self {
        self.joins.push(join);
        self
    }

    pub fn with_join_raw(mut self, fragments: Vec<Fragment>) -> Self {
        self.join_raw.extend(fragments);
        self
    }

    pub fn aggregating(mut self) -> Self {
        self.aggregate = true;
        self
    }

    /// Columns of the owning entity referenced through [`Fragment::OwnKey`].
    pub fn own_keys(&self) -> Vec<&str> {
        self.joins
            .iter()
            .flat_map(|j| j.on.iter())
            .chain(self.join_raw.iter())
            .chain(self.expression.iter())
            .filter_map(|f| match f {
                Fragment::OwnKey(key) => Some(key.as_str()),
                _ => None,
            })
            .collect()
    }
}

//! Select middleware and field visibility.
//!
//! Both are optional per entity and default to doing nothing. Permission
//! checks live in [`SelectHooks::before_select`]: returning an error aborts
//! the request before any SQL runs.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::QueryResult;
use crate::request::Request;

/// Caller-supplied request parameters (session user, tenant, ...).
pub type Params = serde_json::Map<String, Value>;

/// What a hook gets to see about the running select.
#[derive(Debug, Clone, Copy)]
pub struct SelectContext<'a> {
    /// Entity being selected.
    pub entity: &'a str,
    /// Logical path from the request root; empty at the root.
    pub path: &'a str,
    pub request: &'a Request,
    pub params: &'a Params,
}

/// One page of a to-many relation (or of a top-level `find`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
    pub limit: Option<u64>,
    pub skip: u64,
    pub orderby: Vec<String>,
    pub total: u64,
    pub data: Vec<Value>,
}

impl Page {
    pub fn empty(limit: Option<u64>, skip: u64, orderby: Vec<String>) -> Self {
        Self {
            limit,
            skip,
            orderby,
            total: 0,
            data: Vec::new(),
        }
    }

    pub fn into_value(self) -> Value {
        serde_json::json!({
            "limit": self.limit,
            "skip": self.skip,
            "orderby": self.orderby,
            "total": self.total,
            "data": self.data,
        })
    }
}

/// Middleware around selects. Every method is a no-op by default.
#[async_trait]
pub trait SelectHooks: Send + Sync {
    /// Runs before anything is compiled. An error rejects the request.
    async fn before_select(&self, _ctx: &SelectContext<'_>) -> QueryResult<()> {
        Ok(())
    }

    /// Runs on the hydrated top-level rows, before relations are populated.
    async fn after_select(&self, _rows: &mut Vec<Value>, _ctx: &SelectContext<'_>) -> QueryResult<()> {
        Ok(())
    }

    /// Runs once per parent after a to-many relation page was assembled.
    async fn after_load(&self, _page: &mut Page, _ctx: &SelectContext<'_>) -> QueryResult<()> {
        Ok(())
    }
}

/// Strips fields the caller may not see from loaded rows.
pub trait FieldVisibility: Send + Sync {
    fn hide_fields(&self, fields: &[String], rows: &mut [Value], params: &Params);
}

/// Removes a fixed set of keys from every row.
#[derive(Debug, Clone, Default)]
pub struct HiddenFields {
    hidden: Vec<String>,
}

impl HiddenFields {
    pub fn new<I, S>(hidden: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            hidden: hidden.into_iter().map(Into::into).collect(),
        }
    }
}

impl FieldVisibility for HiddenFields {
    fn hide_fields(&self, _fields: &[String], rows: &mut [Value], _params: &Params) {
        for row in rows.iter_mut() {
            if let Some(obj) = row.as_object_mut() {
                for key in &self.hidden {
                    obj.shift_remove(key);
                }
            }
        }
    }
}

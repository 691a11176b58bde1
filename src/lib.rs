//! # relquery
//!
//! Compiles document-style requests (projection, filter, options) against a
//! relational entity graph into MySQL, then batch-loads the relations the
//! request asked for.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │        DSL text  /  JSON {fields, filter, options}       │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [dsl, request]
//! ┌─────────────────────────────────────────────────────────┐
//! │          Request (Projection, Filter, SelectOptions)     │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [normalize + compiler]
//! ┌─────────────────────────────────────────────────────────┐
//! │   PlanContext: aliases, to-one joins, customs,           │
//! │   aggregates  ──►  SELECT + COUNT statements             │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [backend]
//! ┌─────────────────────────────────────────────────────────┐
//! │   flat rows ──► hydrate ──► populate (to-many batches)   │
//! │            ──► virtuals ──► visibility                   │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! [`engine::QueryEngine`] runs the whole pipeline; every stage is also
//! usable on its own.

pub mod backend;
pub mod compiler;
pub mod config;
pub mod dsl;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod logging;
pub mod normalize;
pub mod populate;
pub mod request;
pub mod schema;
pub mod sql;

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::backend::{Backend, BackendError, BackendResult, Row};
    pub use crate::compiler::{CompiledSelect, Compiler, RelationPlan};
    pub use crate::config::{CompilerSettings, RowNumbering, Settings};
    pub use crate::engine::QueryEngine;
    pub use crate::error::{CompileResult, FieldErrors, QueryError, QueryResult};
    pub use crate::hooks::{FieldVisibility, HiddenFields, Page, Params, SelectContext, SelectHooks};
    pub use crate::request::{Filter, Projection, RelationSpec, Request, SelectOptions};
    pub use crate::schema::{
        CustomField, EntityDef, Relationship, Schema, SchemaBuilder, SchemaConfig, VirtualField,
        VirtualValue,
    };
    pub use crate::sql::Statement;
}

pub use engine::QueryEngine;
pub use error::{QueryError, QueryResult};
pub use request::Request;
pub use schema::Schema;

//! Backend trait definition.
//!
//! The engine never talks to a database driver directly. Every statement goes
//! through a [`Backend`], which receives rendered SQL plus positional
//! parameters and returns rows as JSON objects keyed by column name.
//!
//! # Example
//!
//! ```ignore
//! use relquery::backend::{Backend, BackendResult, Row};
//! use relquery::sql::Statement;
//!
//! struct Driver { /* pool */ }
//!
//! #[async_trait::async_trait]
//! impl Backend for Driver {
//!     async fn execute(&self, statement: &Statement) -> BackendResult<Vec<Row>> {
//!         // bind statement.params to statement.sql and fetch
//!         todo!()
//!     }
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::sql::Statement;

/// A single result row, keyed by output column name.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors a backend adapter reports.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Could not reach the database.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The database rejected the statement.
    #[error("query failed: {message}")]
    Query {
        message: String,
        /// Statement that failed, for diagnostics.
        sql: Option<String>,
    },

    /// A returned value could not be converted into JSON.
    #[error("failed to decode row: {0}")]
    Decode(String),
}

impl BackendError {
    pub fn query(message: impl Into<String>, statement: &Statement) -> Self {
        Self::Query {
            message: message.into(),
            sql: Some(statement.sql.clone()),
        }
    }
}

/// Executes rendered statements against the relational store.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Run one SELECT and return every row.
    async fn execute(&self, statement: &Statement) -> BackendResult<Vec<Row>>;
}

#[async_trait]
impl<B: Backend + ?Sized> Backend for Arc<B> {
    async fn execute(&self, statement: &Statement) -> BackendResult<Vec<Row>> {
        (**self).execute(statement).await
    }
}

#[async_trait]
impl<B: Backend + ?Sized> Backend for &B {
    async fn execute(&self, statement: &Statement) -> BackendResult<Vec<Row>> {
        (**self).execute(statement).await
    }
}

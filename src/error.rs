//! Error types surfaced by the compiler, the population engine and the DSL parser.

use indexmap::IndexMap;
use serde::Serialize;
use thiserror::Error;

use crate::backend::BackendError;
use crate::schema::SchemaError;

/// Result type for synchronous compilation (normalize, compile, parse).
pub type CompileResult<T> = Result<T, QueryError>;

/// Result type for operations that reach the backend.
pub type QueryResult<T> = Result<T, QueryError>;

/// Ordered `field -> reason` map.
///
/// Keys are dotted logical paths so a nested offender reads `author.nmae`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(IndexMap<String, String>);

impl FieldErrors {
    pub const UNKNOWN_FIELD: &'static str = "unknown field";
    pub const MISSING_FIELD: &'static str = "field does not exist";

    pub fn new() -> Self {
        Self::default()
    }

    /// Record a reason for `field`. The first reason recorded wins.
    pub fn insert(&mut self, field: impl Into<String>, reason: impl Into<String>) {
        self.0.entry(field.into()).or_insert_with(|| reason.into());
    }

    /// Merge errors from a nested scope, prefixing each field with `prefix.`.
    pub fn extend_prefixed(&mut self, prefix: &str, other: FieldErrors) {
        for (field, reason) in other.0 {
            let key = if prefix.is_empty() {
                field
            } else {
                format!("{}.{}", prefix, field)
            };
            self.insert(key, reason);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// `Ok(())` when nothing was recorded, otherwise `InvalidQueryData`.
    pub fn into_result(self) -> CompileResult<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(QueryError::InvalidQueryData(self))
        }
    }
}

impl std::fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, (field, reason)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", field, reason)?;
        }
        Ok(())
    }
}

/// One problem found while tokenizing or parsing DSL text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyntaxIssue {
    /// Byte offset into the text that was being parsed.
    pub offset: usize,
    pub message: String,
}

impl SyntaxIssue {
    pub fn new(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for SyntaxIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (at {})", self.message, self.offset)
    }
}

/// Errors returned to callers of the query engine.
#[derive(Error, Debug)]
pub enum QueryError {
    /// Requested fields, filter paths or order-by paths that do not resolve.
    #[error("invalid query data: {0}")]
    InvalidQueryData(FieldErrors),

    /// Malformed input shape (filter, fields or options).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// DSL text that does not match the grammar.
    #[error("invalid query syntax: {}", join_issues(.0))]
    InvalidQuerySyntax(Vec<SyntaxIssue>),

    /// Two compiled paths collided on one output alias.
    #[error("duplicate column alias: {0}")]
    DuplicateColumnAlias(String),

    /// Aggregate requested without `$as`.
    #[error("aggregate on '{field}' requires $as")]
    RequiredAliasMissing { field: String },

    /// A select hook rejected the request.
    #[error("rejected by hook: {0}")]
    Hook(String),

    /// Unknown entity or an inconsistent schema descriptor.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Backend failure while executing a statement.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl QueryError {
    /// Single-field `InvalidQueryData`.
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(field, reason);
        Self::InvalidQueryData(errors)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Offending fields, when this error carries any.
    pub fn field_errors(&self) -> Option<&FieldErrors> {
        match self {
            Self::InvalidQueryData(errors) => Some(errors),
            _ => None,
        }
    }

    /// Machine-checkable kind name.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidQueryData(_) => "InvalidQueryData",
            Self::InvalidArgument(_) => "InvalidArgument",
            Self::InvalidQuerySyntax(_) => "InvalidQuerySyntax",
            Self::DuplicateColumnAlias(_) => "DuplicateColumnAlias",
            Self::RequiredAliasMissing { .. } => "RequiredAliasMissing",
            Self::Hook(_) => "Hook",
            Self::Schema(_) => "Schema",
            Self::Backend(_) => "Backend",
        }
    }
}

fn join_issues(issues: &[SyntaxIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

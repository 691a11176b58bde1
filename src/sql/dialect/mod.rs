//! SQL dialect definitions and formatting rules.
//!
//! The compiler targets a single backend (MySQL 8). The rendering rules still
//! sit behind the `SqlDialect` trait so tokens, expressions and queries never
//! hard-code quoting or placeholder syntax.
//!
//! # Usage
//!
//! ```ignore
//! use relquery::sql::dialect::{MySql, SqlDialect};
//!
//! let quoted = MySql.quote_identifier("user");  // `user`
//! ```

pub mod helpers;
mod mysql;

pub use mysql::MySql;

use super::token::TokenStream;

/// SQL dialect trait - defines how SQL constructs are rendered.
pub trait SqlDialect: std::fmt::Debug + Send + Sync {
    /// Dialect name for display/logging.
    fn name(&self) -> &'static str;

    // =========================================================================
    // Identifier and Literal Quoting
    // =========================================================================

    /// Quote an identifier (table, column, alias).
    fn quote_identifier(&self, ident: &str) -> String;

    /// Quote a string literal.
    fn quote_string(&self, s: &str) -> String {
        helpers::quote_string_single(s)
    }

    /// Format a boolean literal.
    fn format_bool(&self, b: bool) -> &'static str;

    /// Placeholder emitted for a bound parameter.
    fn placeholder(&self) -> &'static str {
        "?"
    }

    // =========================================================================
    // Pagination
    // =========================================================================

    /// Emit LIMIT/OFFSET or equivalent pagination clause.
    fn emit_limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> TokenStream {
        helpers::emit_limit_offset_standard(limit, offset)
    }

    // =========================================================================
    // Feature Flags
    // =========================================================================

    /// Whether `ROW_NUMBER() OVER (...)` is available.
    fn supports_window_functions(&self) -> bool {
        true
    }

    /// Type name used by `CAST(... AS <type>)` for a date-only value.
    fn date_type(&self) -> &'static str {
        "DATE"
    }

    /// Type name used by `CAST(... AS <type>)` for a date-time value.
    fn datetime_type(&self) -> &'static str {
        "DATETIME"
    }
}

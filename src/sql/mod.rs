//! SQL generation module.
//!
//! This module provides a type-safe SQL builder for the MySQL statements the
//! compiler emits. It includes:
//!
//! - [`query`] - SELECT query builder
//! - [`expr`] - Expression AST and builder DSL
//! - [`token`] - Token types for SQL generation
//! - [`dialect`] - SQL dialect rendering rules

pub mod dialect;
pub mod expr;
pub mod query;
pub mod token;

#[cfg(test)]
pub mod test_utils;

// Re-export commonly used types at the sql module level
pub use dialect::{MySql, SqlDialect};
pub use expr::{
    and_all, avg, cast, coalesce, col, count, count_star, func, lit_bool, lit_int,
    lit_str, or_all, param, postfix, raw_sql, row_number, star, sum, table_col, table_star, window,
    BinaryOperator, Expr, ExprExt, Literal, UnaryOperator,
};
pub use query::{
    FromSource, Join, JoinType, LimitOffset, OrderByExpr, Query, SelectExpr, SortDir, Statement,
    TableRef,
};
pub use token::{Token, TokenStream};

//! Expression AST - the core of SQL expression building.
//!
//! This module provides a strongly-typed AST for SQL expressions
//! with exhaustive pattern matching enforced by the compiler.

use serde_json::Value;

use super::dialect::MySql;
use super::query::{OrderByExpr, Query, SortDir};
use super::token::{Token, TokenStream};

// =============================================================================
// Expression AST
// =============================================================================

/// A SQL expression.
///
/// Every variant must be handled in `to_tokens()` - the compiler enforces this.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Column reference: optional_table.column
    Column {
        table: Option<String>,
        column: String,
    },

    /// Inline literal (trusted constants only)
    Literal(Literal),

    /// Bound parameter
    Param(Value),

    /// Binary operation: left op right
    BinaryOp {
        left: Box<Expr>,
        op: BinaryOperator,
        right: Box<Expr>,
    },

    /// Unary operation: op expr
    UnaryOp { op: UnaryOperator, expr: Box<Expr> },

    /// Function call: name(args...)
    Function {
        name: String,
        args: Vec<Expr>,
        distinct: bool,
    },

    /// Subquery: (SELECT ...)
    Subquery(Box<Query>),

    /// IN: expr IN (values...)
    In {
        expr: Box<Expr>,
        values: Vec<Expr>,
        negated: bool,
    },

    /// IS NULL / IS NOT NULL
    IsNull { expr: Box<Expr>, negated: bool },

    /// CAST(expr AS type)
    Cast { expr: Box<Expr>, data_type: String },

    /// Wildcard: * or table.*
    Star { table: Option<String> },

    /// Parenthesized expression
    Paren(Box<Expr>),

    /// Window function expression: `ROW_NUMBER() OVER (PARTITION BY ... ORDER BY ...)`
    WindowFunction {
        function: Box<Expr>,
        partition_by: Vec<Expr>,
        order_by: Vec<OrderByExpr>,
    },

    /// Trusted SQL appended after an expression: `expr <sql>`.
    Postfix { expr: Box<Expr>, sql: String },

    /// Symbolic column reference keyed by raw `alias.column`.
    ///
    /// Slots are produced while the plan is still growing and are replaced by
    /// the column's final location once every deferred task has run.
    Slot(String),

    /// Raw SQL expression passed directly to output without escaping.
    ///
    /// # Security Warning
    ///
    /// **Never pass user input to this variant.** Only schema-declared
    /// fragments and explicit `$raw` filter expressions end up here.
    Raw(String),
}

/// Literal values.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    String(String),
    Bool(bool),
    Null,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    // Comparison
    Eq,
    Ne,
    Lt,
    Gt,
    Lte,
    Gte,
    // Logical
    And,
    Or,
    // Arithmetic
    Plus,
    Minus,
    // String
    Like,
}

impl BinaryOperator {
    fn is_logical(self) -> bool {
        matches!(self, BinaryOperator::And | BinaryOperator::Or)
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Not,
}

// =============================================================================
// Expression to Tokens
// =============================================================================

impl Expr {
    /// Convert this expression to a token stream.
    pub fn to_tokens(&self) -> TokenStream {
        let mut ts = TokenStream::new();

        match self {
            Expr::Column { table, column } => {
                if let Some(t) = table {
                    ts.push(Token::Ident(t.clone()));
                    ts.push(Token::Dot);
                }
                ts.push(Token::Ident(column.clone()));
            }

            Expr::Literal(lit) => {
                ts.push(match lit {
                    Literal::Int(n) => Token::LitInt(*n),
                    Literal::String(s) => Token::LitString(s.clone()),
                    Literal::Bool(b) => Token::LitBool(*b),
                    Literal::Null => Token::Null,
                });
            }

            Expr::Param(value) => {
                ts.push(Token::Param(value.clone()));
            }

            Expr::BinaryOp { left, op, right } => {
                append_operand(&mut ts, left, *op);
                ts.space();
                ts.push(binary_op_to_token(*op));
                ts.space();
                append_operand(&mut ts, right, *op);
            }

            Expr::UnaryOp { op, expr } => {
                match op {
                    UnaryOperator::Not => ts.push(Token::Not),
                };
                ts.space().lparen();
                ts.append(&expr.to_tokens());
                ts.rparen();
            }

            Expr::Function {
                name,
                args,
                distinct,
            } => {
                ts.push(Token::FunctionName(name.clone()));
                ts.lparen();
                if *distinct {
                    ts.push(Token::Distinct).space();
                }
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        ts.comma().space();
                    }
                    ts.append(&arg.to_tokens());
                }
                ts.rparen();
            }

            Expr::Subquery(query) => {
                ts.lparen();
                ts.append(&query.to_tokens());
                ts.rparen();
            }

            Expr::In {
                expr,
                values,
                negated,
            } => {
                // Empty IN list: "x IN ()" is invalid SQL
                // "x IN ()" should be FALSE, "x NOT IN ()" should be TRUE
                if values.is_empty() {
                    ts.push(if *negated { Token::True } else { Token::False });
                } else {
                    ts.append(&expr.to_tokens());
                    if *negated {
                        ts.space().push(Token::Not);
                    }
                    ts.space().push(Token::In).space().lparen();
                    for (i, val) in values.iter().enumerate() {
                        if i > 0 {
                            ts.comma().space();
                        }
                        ts.append(&val.to_tokens());
                    }
                    ts.rparen();
                }
            }

            Expr::IsNull { expr, negated } => {
                ts.append(&expr.to_tokens());
                ts.space();
                ts.push(if *negated {
                    Token::IsNotNull
                } else {
                    Token::IsNull
                });
            }

            Expr::Cast { expr, data_type } => {
                ts.push(Token::Cast).lparen();
                ts.append(&expr.to_tokens());
                ts.space()
                    .push(Token::As)
                    .space()
                    .push(Token::FunctionName(data_type.clone()));
                ts.rparen();
            }

            Expr::Star { table } => {
                if let Some(t) = table {
                    ts.push(Token::Ident(t.clone()));
                    ts.push(Token::Dot);
                }
                ts.push(Token::Star);
            }

            Expr::Paren(inner) => {
                ts.lparen();
                ts.append(&inner.to_tokens());
                ts.rparen();
            }

            Expr::WindowFunction {
                function,
                partition_by,
                order_by,
            } => {
                ts.append(&function.to_tokens());
                ts.space().push(Token::Over).space().lparen();

                if !partition_by.is_empty() {
                    ts.push(Token::PartitionBy).space();
                    for (i, expr) in partition_by.iter().enumerate() {
                        if i > 0 {
                            ts.comma().space();
                        }
                        ts.append(&expr.to_tokens());
                    }
                }

                if !order_by.is_empty() {
                    if !partition_by.is_empty() {
                        ts.space();
                    }
                    ts.push(Token::OrderBy).space();
                    for (i, ob) in order_by.iter().enumerate() {
                        if i > 0 {
                            ts.comma().space();
                        }
                        ts.append(&ob.to_tokens());
                    }
                }

                ts.rparen();
            }

            Expr::Postfix { expr, sql } => {
                ts.append(&expr.to_tokens());
                ts.space().push(Token::Raw(sql.clone()));
            }

            Expr::Slot(raw) => {
                // Unresolved slots only survive in debug output.
                ts.push(Token::Ident(raw.clone()));
            }

            Expr::Raw(sql) => {
                ts.push(Token::Raw(sql.clone()));
            }
        }

        ts
    }

    /// Render as SQL text for the default dialect, discarding parameters.
    ///
    /// Only meant for expressions that carry no bound values (schema
    /// fragments, column references).
    pub fn to_trusted_sql(&self) -> Option<String> {
        let ts = self.to_tokens();
        if ts.has_params() {
            return None;
        }
        Some(ts.serialize(&MySql))
    }

    /// Replace every [`Expr::Slot`] using `resolve`.
    ///
    /// Returns the first slot name the resolver could not place.
    pub fn resolve_slots<F>(&mut self, resolve: &mut F) -> Result<(), String>
    where
        F: FnMut(&str) -> Option<Expr>,
    {
        match self {
            Expr::Slot(raw) => {
                let resolved = resolve(raw).ok_or_else(|| raw.clone())?;
                *self = resolved;
                Ok(())
            }
            Expr::BinaryOp { left, right, .. } => {
                left.resolve_slots(resolve)?;
                right.resolve_slots(resolve)
            }
            Expr::UnaryOp { expr, .. }
            | Expr::IsNull { expr, .. }
            | Expr::Cast { expr, .. }
            | Expr::Postfix { expr, .. }
            | Expr::Paren(expr) => expr.resolve_slots(resolve),
            Expr::Function { args, .. } => {
                for arg in args {
                    arg.resolve_slots(resolve)?;
                }
                Ok(())
            }
            Expr::In { expr, values, .. } => {
                expr.resolve_slots(resolve)?;
                for value in values {
                    value.resolve_slots(resolve)?;
                }
                Ok(())
            }
            Expr::WindowFunction {
                function,
                partition_by,
                order_by,
            } => {
                function.resolve_slots(resolve)?;
                for expr in partition_by {
                    expr.resolve_slots(resolve)?;
                }
                for ob in order_by {
                    ob.expr.resolve_slots(resolve)?;
                }
                Ok(())
            }
            Expr::Column { .. }
            | Expr::Literal(_)
            | Expr::Param(_)
            | Expr::Subquery(_)
            | Expr::Star { .. }
            | Expr::Raw(_) => Ok(()),
        }
    }

    /// Alias for this expression in a SELECT list.
    pub fn alias(self, alias: &str) -> super::query::SelectExpr {
        super::query::SelectExpr::new(self).with_alias(alias)
    }
}

/// Logical operands of a different operator get parenthesized so the
/// rendered precedence matches the tree.
fn append_operand(ts: &mut TokenStream, operand: &Expr, parent: BinaryOperator) {
    let needs_parens = match operand {
        Expr::BinaryOp { op, .. } => parent.is_logical() && op.is_logical() && *op != parent,
        _ => false,
    };
    if needs_parens {
        ts.lparen();
        ts.append(&operand.to_tokens());
        ts.rparen();
    } else {
        ts.append(&operand.to_tokens());
    }
}

fn binary_op_to_token(op: BinaryOperator) -> Token {
    match op {
        BinaryOperator::Eq => Token::Eq,
        BinaryOperator::Ne => Token::Ne,
        BinaryOperator::Lt => Token::Lt,
        BinaryOperator::Gt => Token::Gt,
        BinaryOperator::Lte => Token::Lte,
        BinaryOperator::Gte => Token::Gte,
        BinaryOperator::And => Token::And,
        BinaryOperator::Or => Token::Or,
        BinaryOperator::Plus => Token::Plus,
        BinaryOperator::Minus => Token::Minus,
        BinaryOperator::Like => Token::Like,
    }
}

// =============================================================================
// Expression Constructors
// =============================================================================

/// Create a column reference.
pub fn col(name: &str) -> Expr {
    Expr::Column {
        table: None,
        column: name.into(),
    }
}

/// Create a qualified column reference (table.column).
pub fn table_col(table: &str, column: &str) -> Expr {
    Expr::Column {
        table: Some(table.into()),
        column: column.into(),
    }
}

/// Create an integer literal.
pub fn lit_int(n: i64) -> Expr {
    Expr::Literal(Literal::Int(n))
}

/// Create a string literal.
pub fn lit_str(s: &str) -> Expr {
    Expr::Literal(Literal::String(s.into()))
}

/// Create a boolean literal.
pub fn lit_bool(b: bool) -> Expr {
    Expr::Literal(Literal::Bool(b))
}

/// Create a bound parameter.
pub fn param(value: impl Into<Value>) -> Expr {
    Expr::Param(value.into())
}

/// Create a star (*) expression.
pub fn star() -> Expr {
    Expr::Star { table: None }
}

/// Create a qualified star (table.*) expression.
pub fn table_star(table: &str) -> Expr {
    Expr::Star {
        table: Some(table.into()),
    }
}

/// CAST(expr AS data_type)
pub fn cast(expr: Expr, data_type: &str) -> Expr {
    Expr::Cast {
        expr: Box::new(expr),
        data_type: data_type.into(),
    }
}

/// `expr <sql>` with trusted SQL text after the expression.
pub fn postfix(expr: Expr, sql: &str) -> Expr {
    Expr::Postfix {
        expr: Box::new(expr),
        sql: sql.into(),
    }
}

/// Raw SQL expression (pass-through, no parsing).
///
/// # Security Warning
///
/// **Never pass user input to this function.** The SQL is not sanitized
/// and can lead to SQL injection vulnerabilities.
pub fn raw_sql(sql: &str) -> Expr {
    Expr::Raw(sql.into())
}

// =============================================================================
// Aggregate Functions
// =============================================================================

/// COUNT(expr)
pub fn count(expr: Expr) -> Expr {
    func("COUNT", vec![expr])
}

/// COUNT(*)
pub fn count_star() -> Expr {
    func("COUNT", vec![star()])
}

/// SUM(expr)
pub fn sum(expr: Expr) -> Expr {
    func("SUM", vec![expr])
}

/// AVG(expr)
pub fn avg(expr: Expr) -> Expr {
    func("AVG", vec![expr])
}

/// COALESCE(args...)
pub fn coalesce(args: Vec<Expr>) -> Expr {
    func("COALESCE", args)
}

/// Generic function call.
pub fn func(name: &str, args: Vec<Expr>) -> Expr {
    Expr::Function {
        name: name.into(),
        args,
        distinct: false,
    }
}

/// ROW_NUMBER() - assigns sequential row numbers.
pub fn row_number() -> Expr {
    func("ROW_NUMBER", vec![])
}

/// Build `function OVER (PARTITION BY ... ORDER BY ...)`.
pub fn window(function: Expr, partition_by: Vec<Expr>, order_by: Vec<OrderByExpr>) -> Expr {
    Expr::WindowFunction {
        function: Box::new(function),
        partition_by,
        order_by,
    }
}

/// AND together every condition; `None` when the list is empty.
pub fn and_all(conditions: Vec<Expr>) -> Option<Expr> {
    conditions.into_iter().reduce(|acc, c| acc.and(c))
}

/// OR together every condition; `None` when the list is empty.
pub fn or_all(conditions: Vec<Expr>) -> Option<Expr> {
    conditions.into_iter().reduce(|acc, c| acc.or(c))
}

impl From<SortDir> for Token {
    fn from(dir: SortDir) -> Self {
        match dir {
            SortDir::Asc => Token::Asc,
            SortDir::Desc => Token::Desc,
        }
    }
}

// =============================================================================
// Expression Builder Trait
// =============================================================================

/// Extension trait for building expressions fluently.
pub trait ExprExt: Sized {
    fn into_expr(self) -> Expr;

    fn binary(self, op: BinaryOperator, other: impl Into<Expr>) -> Expr {
        Expr::BinaryOp {
            left: Box::new(self.into_expr()),
            op,
            right: Box::new(other.into()),
        }
    }

    // Comparison operators
    fn eq(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOperator::Eq, other)
    }

    fn ne(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOperator::Ne, other)
    }

    fn gt(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOperator::Gt, other)
    }

    fn gte(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOperator::Gte, other)
    }

    fn lt(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOperator::Lt, other)
    }

    fn lte(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOperator::Lte, other)
    }

    // Logical operators
    fn and(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOperator::And, other)
    }

    fn or(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOperator::Or, other)
    }

    fn not(self) -> Expr {
        Expr::UnaryOp {
            op: UnaryOperator::Not,
            expr: Box::new(self.into_expr()),
        }
    }

    // Arithmetic operators
    fn add(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOperator::Plus, other)
    }

    fn sub(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOperator::Minus, other)
    }

    // String operators
    fn like(self, pattern: impl Into<Expr>) -> Expr {
        self.binary(BinaryOperator::Like, pattern)
    }

    fn not_like(self, pattern: impl Into<Expr>) -> Expr {
        self.like(pattern).not()
    }

    // Set membership
    fn in_list(self, values: Vec<Expr>) -> Expr {
        Expr::In {
            expr: Box::new(self.into_expr()),
            values,
            negated: false,
        }
    }

    fn not_in_list(self, values: Vec<Expr>) -> Expr {
        Expr::In {
            expr: Box::new(self.into_expr()),
            values,
            negated: true,
        }
    }

    // NULL checks
    fn is_null(self) -> Expr {
        Expr::IsNull {
            expr: Box::new(self.into_expr()),
            negated: false,
        }
    }

    fn is_not_null(self) -> Expr {
        Expr::IsNull {
            expr: Box::new(self.into_expr()),
            negated: true,
        }
    }
}

impl ExprExt for Expr {
    fn into_expr(self) -> Expr {
        self
    }
}

// =============================================================================
// Conversions
// =============================================================================

impl From<i64> for Expr {
    fn from(n: i64) -> Self {
        lit_int(n)
    }
}

impl From<bool> for Expr {
    fn from(b: bool) -> Self {
        lit_bool(b)
    }
}

impl From<Value> for Expr {
    fn from(value: Value) -> Self {
        Expr::Param(value)
    }
}

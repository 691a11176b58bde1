//! Query builder - construct SQL queries with a fluent API.

use serde::Serialize;
use serde_json::Value;

use super::dialect::{MySql, SqlDialect};
use super::expr::{Expr, ExprExt};
use super::token::{Token, TokenStream};

// =============================================================================
// Select Expression (column with optional alias)
// =============================================================================

/// A SELECT list item: expression with optional alias.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "builders have no effect until used"]
pub struct SelectExpr {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl SelectExpr {
    pub fn new(expr: Expr) -> Self {
        Self { expr, alias: None }
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn to_tokens(&self) -> TokenStream {
        let mut ts = self.expr.to_tokens();
        if let Some(alias) = &self.alias {
            ts.space()
                .push(Token::As)
                .space()
                .push(Token::Ident(alias.clone()));
        }
        ts
    }
}

impl From<Expr> for SelectExpr {
    fn from(expr: Expr) -> Self {
        SelectExpr::new(expr)
    }
}

// =============================================================================
// Table Reference / FROM source
// =============================================================================

/// A table reference with optional alias.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "builders have no effect until used"]
pub struct TableRef {
    pub table: String,
    pub alias: Option<String>,
}

impl TableRef {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.into(),
            alias: None,
        }
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn to_tokens(&self) -> TokenStream {
        let mut ts = TokenStream::new();
        ts.push(Token::Ident(self.table.clone()));
        if let Some(alias) = &self.alias {
            ts.space()
                .push(Token::As)
                .space()
                .push(Token::Ident(alias.clone()));
        }
        ts
    }
}

/// Anything that can appear after FROM or JOIN.
#[derive(Debug, Clone, PartialEq)]
pub enum FromSource {
    Table(TableRef),
    /// Derived table: `(SELECT ...) AS alias`
    Subquery { query: Box<Query>, alias: String },
}

impl FromSource {
    pub fn subquery(query: Query, alias: &str) -> Self {
        FromSource::Subquery {
            query: Box::new(query),
            alias: alias.into(),
        }
    }

    pub fn to_tokens(&self) -> TokenStream {
        match self {
            FromSource::Table(table) => table.to_tokens(),
            FromSource::Subquery { query, alias } => {
                let mut ts = TokenStream::new();
                ts.lparen();
                ts.append(&query.to_tokens());
                ts.rparen()
                    .space()
                    .push(Token::As)
                    .space()
                    .push(Token::Ident(alias.clone()));
                ts
            }
        }
    }
}

impl From<TableRef> for FromSource {
    fn from(table: TableRef) -> Self {
        FromSource::Table(table)
    }
}

// =============================================================================
// Joins
// =============================================================================

/// Type of join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Cross,
}

/// A JOIN clause.
#[derive(Debug, Clone, PartialEq)]
pub enum Join {
    On {
        join_type: JoinType,
        source: FromSource,
        on: Option<Expr>,
    },
    /// Schema-declared join text, emitted verbatim.
    Raw(String),
}

impl Join {
    pub fn to_tokens(&self) -> TokenStream {
        let mut ts = TokenStream::new();

        match self {
            Join::On {
                join_type,
                source,
                on,
            } => {
                match join_type {
                    JoinType::Inner => ts.push(Token::Inner),
                    JoinType::Left => ts.push(Token::Left),
                    JoinType::Cross => ts.push(Token::Cross),
                };

                ts.space().push(Token::Join).space();
                ts.append(&source.to_tokens());

                if let Some(on) = on {
                    ts.space().push(Token::On).space();
                    ts.append(&on.to_tokens());
                }
            }
            Join::Raw(sql) => {
                ts.push(Token::Raw(sql.clone()));
            }
        }

        ts
    }
}

// =============================================================================
// ORDER BY
// =============================================================================

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDir {
    #[default]
    Asc,
    Desc,
}

/// An ORDER BY expression.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "builders have no effect until used"]
pub struct OrderByExpr {
    pub expr: Expr,
    pub dir: Option<SortDir>,
}

impl OrderByExpr {
    pub fn new(expr: Expr) -> Self {
        Self { expr, dir: None }
    }

    pub fn asc(expr: Expr) -> Self {
        Self {
            expr,
            dir: Some(SortDir::Asc),
        }
    }

    pub fn desc(expr: Expr) -> Self {
        Self {
            expr,
            dir: Some(SortDir::Desc),
        }
    }

    pub fn with_dir(expr: Expr, dir: SortDir) -> Self {
        Self {
            expr,
            dir: Some(dir),
        }
    }

    pub fn to_tokens(&self) -> TokenStream {
        let mut ts = self.expr.to_tokens();
        if let Some(dir) = self.dir {
            ts.space().push(dir.into());
        }
        ts
    }
}

// =============================================================================
// LIMIT / OFFSET
// =============================================================================

/// LIMIT and OFFSET clause.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LimitOffset {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl LimitOffset {
    /// Delegates to `SqlDialect::emit_limit_offset()` for the actual formatting.
    pub fn to_tokens(&self, dialect: &dyn SqlDialect) -> TokenStream {
        dialect.emit_limit_offset(self.limit, self.offset)
    }
}

// =============================================================================
// Rendered statement
// =============================================================================

/// SQL text plus its positional parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl std::fmt::Display for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.sql)
    }
}

// =============================================================================
// Query Builder
// =============================================================================

/// A SELECT query.
#[derive(Debug, Clone, Default, PartialEq)]
#[must_use = "Query has no effect until converted to SQL with to_sql() or to_statement()"]
pub struct Query {
    pub select: Vec<SelectExpr>,
    pub distinct: bool,
    pub from: Option<FromSource>,
    pub joins: Vec<Join>,
    pub where_clause: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub order_by: Vec<OrderByExpr>,
    pub limit_offset: Option<LimitOffset>,
}

impl Query {
    /// Create a new empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the SELECT list.
    pub fn select(mut self, exprs: Vec<impl Into<SelectExpr>>) -> Self {
        self.select = exprs.into_iter().map(|e| e.into()).collect();
        self
    }

    /// SELECT *
    pub fn select_star(mut self) -> Self {
        self.select = vec![SelectExpr::new(super::expr::star())];
        self
    }

    /// Add DISTINCT.
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Set the FROM source.
    pub fn from(mut self, source: impl Into<FromSource>) -> Self {
        self.from = Some(source.into());
        self
    }

    /// Add a JOIN.
    pub fn join(mut self, join_type: JoinType, source: impl Into<FromSource>, on: Expr) -> Self {
        self.add_join(join_type, source, Some(on));
        self
    }

    /// Add a LEFT JOIN.
    pub fn left_join(self, source: impl Into<FromSource>, on: Expr) -> Self {
        self.join(JoinType::Left, source, on)
    }

    /// Add a WHERE condition (ANDed with existing conditions).
    pub fn filter(mut self, condition: Expr) -> Self {
        self.add_filter(condition);
        self
    }

    /// Set the GROUP BY clause.
    pub fn group_by(mut self, exprs: Vec<Expr>) -> Self {
        self.group_by = exprs;
        self
    }

    /// Set the ORDER BY clause.
    pub fn order_by(mut self, exprs: Vec<OrderByExpr>) -> Self {
        self.order_by = exprs;
        self
    }

    /// Set LIMIT.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit_offset.get_or_insert_with(Default::default).limit = Some(limit);
        self
    }

    /// Set OFFSET.
    pub fn offset(mut self, offset: u64) -> Self {
        self.limit_offset.get_or_insert_with(Default::default).offset = Some(offset);
        self
    }

    // =========================================================================
    // In-place mutation (used while a plan is being assembled)
    // =========================================================================

    pub fn add_select(&mut self, expr: Expr, alias: &str) {
        self.select.push(SelectExpr::new(expr).with_alias(alias));
    }

    pub fn add_join(
        &mut self,
        join_type: JoinType,
        source: impl Into<FromSource>,
        on: Option<Expr>,
    ) {
        self.joins.push(Join::On {
            join_type,
            source: source.into(),
            on,
        });
    }

    pub fn add_raw_join(&mut self, sql: String) {
        self.joins.push(Join::Raw(sql));
    }

    pub fn add_filter(&mut self, condition: Expr) {
        self.where_clause = Some(match self.where_clause.take() {
            Some(existing) => existing.and(condition),
            None => condition,
        });
    }

    /// Names exposed by the SELECT list, in order.
    pub fn output_names(&self) -> Vec<String> {
        self.select
            .iter()
            .filter_map(|s| match (&s.alias, &s.expr) {
                (Some(alias), _) => Some(alias.clone()),
                (None, Expr::Column { column, .. }) => Some(column.clone()),
                _ => None,
            })
            .collect()
    }

    // =========================================================================
    // Rendering
    // =========================================================================

    /// Convert to token stream using the MySQL pagination rules.
    pub fn to_tokens(&self) -> TokenStream {
        self.to_tokens_for_dialect(&MySql)
    }

    /// Convert to token stream for a specific dialect.
    pub fn to_tokens_for_dialect(&self, dialect: &dyn SqlDialect) -> TokenStream {
        let mut ts = TokenStream::new();

        // SELECT
        ts.push(Token::Select);
        if self.distinct {
            ts.space().push(Token::Distinct);
        }

        // Columns
        for (i, select_expr) in self.select.iter().enumerate() {
            if i == 0 {
                ts.newline().indent(1);
            } else {
                ts.comma().newline().indent(1);
            }
            ts.append(&select_expr.to_tokens());
        }

        // FROM
        if let Some(from) = &self.from {
            ts.newline().push(Token::From).space();
            ts.append(&from.to_tokens());
        }

        // JOINs
        for join in &self.joins {
            ts.newline();
            ts.append(&join.to_tokens());
        }

        // WHERE
        if let Some(where_clause) = &self.where_clause {
            ts.newline().push(Token::Where).space();
            ts.append(&where_clause.to_tokens());
        }

        // GROUP BY
        if !self.group_by.is_empty() {
            ts.newline().push(Token::GroupBy).space();
            for (i, expr) in self.group_by.iter().enumerate() {
                if i > 0 {
                    ts.comma().space();
                }
                ts.append(&expr.to_tokens());
            }
        }

        // ORDER BY
        if !self.order_by.is_empty() {
            ts.newline().push(Token::OrderBy).space();
            for (i, order_expr) in self.order_by.iter().enumerate() {
                if i > 0 {
                    ts.comma().space();
                }
                ts.append(&order_expr.to_tokens());
            }
        }

        // LIMIT / OFFSET
        if let Some(lo) = &self.limit_offset {
            if lo.limit.is_some() || lo.offset.is_some() {
                ts.newline();
                ts.append(&lo.to_tokens(dialect));
            }
        }

        ts
    }

    /// Generate SQL text for the MySQL dialect.
    pub fn to_sql(&self) -> String {
        self.to_tokens().serialize(&MySql)
    }

    /// Render SQL text and collect bound parameters in placeholder order.
    pub fn to_statement(&self, dialect: &dyn SqlDialect) -> Statement {
        let ts = self.to_tokens_for_dialect(dialect);
        Statement {
            sql: ts.serialize(dialect),
            params: ts.params(),
        }
    }
}

impl std::fmt::Display for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_sql())
    }
}

// =============================================================================
// Tests
// =============================================================================

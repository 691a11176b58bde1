//! Request compiler.
//!
//! Turns a [`Request`] into a SELECT statement, its COUNT companion and the
//! shape needed to rebuild nested objects from the flat result rows.
//!
//! ```text
//! Request ──► normalize ──► PlanContext ──► tasks ──► Query ──► Statement
//!                            (fields, filter,   (joins, customs,
//!                             search, order)     aggregates)
//! ```
//!
//! To-many relations are not joined here; [`Compiler::compile_relation`]
//! builds the per-relation batch queries the population step runs.

mod context;
mod fields;
mod filter;
mod hydrate;
mod relation;

pub use context::{AliasEntry, AliasTable, CORRELATION, INTERNAL_PREFIX};
pub use hydrate::{OutputColumn, RowShape};
pub use relation::RelationPlan;

use serde_json::Value;
use tracing::debug;

use crate::backend::Row;
use crate::config::CompilerSettings;
use crate::error::{CompileResult, QueryError};
use crate::normalize::{normalize_select_options, ResolvedOptions};
use crate::request::Request;
use crate::schema::{EntityId, Schema};
use crate::sql::{count_star, FromSource, LimitOffset, MySql, Query, Statement};

use context::PlanContext;
use fields::{collect, compile_fields};
use filter::{compile_filter, order_by, search_condition};

/// Output alias of the row count in COUNT statements.
pub const TOTAL: &str = "total";

/// A compiled top-level select.
#[derive(Debug, Clone)]
pub struct CompiledSelect {
    pub select: Statement,
    /// `SELECT COUNT(*) AS total` over the unpaginated select.
    pub count: Statement,
    pub aliases: AliasTable,
    pub shape: RowShape,
    pub options: ResolvedOptions,
}

impl CompiledSelect {
    /// Rebuild nested objects from result rows of [`CompiledSelect::select`].
    pub fn hydrate(&self, rows: &[Row]) -> Vec<Value> {
        self.shape.hydrate_all(rows)
    }
}

/// Compiles requests against one schema.
#[derive(Debug, Clone, Copy)]
pub struct Compiler<'s> {
    schema: &'s Schema,
    settings: &'s CompilerSettings,
}

impl<'s> Compiler<'s> {
    pub fn new(schema: &'s Schema, settings: &'s CompilerSettings) -> Self {
        Self { schema, settings }
    }

    pub fn schema(&self) -> &'s Schema {
        self.schema
    }

    pub fn settings(&self) -> &'s CompilerSettings {
        self.settings
    }

    /// Compile a select of `entity`.
    ///
    /// Every invalid field, filter path and order-by path found is reported
    /// in one `InvalidQueryData`.
    pub fn compile(&self, entity: EntityId, request: &Request) -> CompileResult<CompiledSelect> {
        let mut ctx = PlanContext::new(self.schema, self.settings, entity, 0, 0);
        let root = ctx.root_alias().to_string();

        let options = collect(
            &mut ctx,
            "",
            normalize_select_options(
                self.schema,
                entity,
                &request.options,
                self.settings.max_depth,
                self.settings,
            ),
        )?;

        compile_fields(&mut ctx, entity, &request.fields, &root, "")?;

        let mut conditions = Vec::new();
        if let Some(filter) = &request.filter {
            conditions.extend(compile_filter(&mut ctx, entity, filter, &root, "")?);
        }
        let order = match &options {
            Some(options) => {
                if let Some(term) = &options.search {
                    conditions.extend(search_condition(&mut ctx, entity, &root, term)?);
                }
                order_by(&mut ctx, entity, &root, &options.orderby)?
            }
            None => Vec::new(),
        };

        let order = ctx.finish(conditions, order)?;
        let (mut query, aliases, shape) = ctx.into_output();
        // option errors were collected and already failed finish()
        let options =
            options.ok_or_else(|| QueryError::invalid_argument("invalid select options"))?;

        let count = count_query(query.clone());
        query.order_by = order;
        query.limit_offset = Some(LimitOffset {
            limit: Some(options.limit),
            offset: (options.skip > 0).then_some(options.skip),
        });

        let select = query.to_statement(&MySql);
        let count = count.to_statement(&MySql);
        debug!(sql = %select.sql, params = select.params.len(), "compiler.select");
        debug!(sql = %count.sql, params = count.params.len(), "compiler.count");

        Ok(CompiledSelect {
            select,
            count,
            aliases,
            shape,
            options,
        })
    }
}

fn count_query(query: Query) -> Query {
    let mut count = Query::new().from(FromSource::subquery(query, "__count"));
    count.add_select(count_star(), TOTAL);
    count
}

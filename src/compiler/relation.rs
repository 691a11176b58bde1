//! Batch-load queries for to-many relations.
//!
//! One plan serves every parent of a batch: the correlation column carries
//! the parent key, rows are numbered per parent and only numbers inside
//! `(skip, skip + limit]` are kept.

use serde_json::Value;
use tracing::debug;

use super::context::{PlanContext, CORRELATION};
use super::fields::{collect, compile_fields, correlate};
use super::filter::{compile_filter, order_by, search_condition};
use super::hydrate::RowShape;
use super::{AliasTable, Compiler, TOTAL};
use crate::config::RowNumbering;
use crate::error::{CompileResult, QueryError};
use crate::normalize::{normalize_select_options, ResolvedOptions};
use crate::request::RelationSpec;
use crate::schema::RelationRef;
use crate::sql::dialect::helpers::MYSQL_MAX_ROWS;
use crate::sql::{
    count_star, lit_int, param, raw_sql, row_number, table_col, table_star, window, Expr, ExprExt,
    FromSource, JoinType, LimitOffset, MySql, OrderByExpr, Query, Statement,
};

/// Output alias of the per-parent row number.
pub const ROW_NUMBER: &str = "__rn";

const PAGE: &str = "__page";

/// Statements loading one relation for a batch of parents.
#[derive(Debug, Clone)]
pub struct RelationPlan {
    /// Paginated rows; each carries the parent key in [`CORRELATION`].
    pub list: Statement,
    /// `(__fk, total)` per parent.
    pub count: Statement,
    pub aliases: AliasTable,
    pub shape: RowShape,
    pub options: ResolvedOptions,
}

fn bound(n: u64) -> Expr {
    lit_int(i64::try_from(n).unwrap_or(i64::MAX))
}

impl<'s> Compiler<'s> {
    /// Compile the batch queries for `relation` restricted to parent `keys`.
    ///
    /// `path` is the relation's logical path from the request root; it
    /// prefixes reported errors and counts toward the depth limit.
    pub fn compile_relation(
        &self,
        relation: RelationRef<'s>,
        spec: &RelationSpec,
        keys: &[Value],
        path: &str,
    ) -> CompileResult<RelationPlan> {
        self.relation_plan(relation, spec, keys, path)
            .map_err(|err| match err {
                QueryError::InvalidQueryData(errors) => {
                    let mut prefixed = crate::error::FieldErrors::new();
                    prefixed.extend_prefixed(path, errors);
                    QueryError::InvalidQueryData(prefixed)
                }
                other => other,
            })
    }

    fn relation_plan(
        &self,
        relation: RelationRef<'s>,
        spec: &RelationSpec,
        keys: &[Value],
        path: &str,
    ) -> CompileResult<RelationPlan> {
        let depth = if path.is_empty() {
            0
        } else {
            path.split('.').count()
        };
        let target = relation.target;
        let mut ctx = PlanContext::new(self.schema, self.settings, target, 0, depth);
        let root = ctx.root_alias().to_string();

        let options = collect(
            &mut ctx,
            "",
            normalize_select_options(
                self.schema,
                target,
                &spec.options,
                self.settings.max_depth.saturating_sub(depth),
                self.settings,
            ),
        )?;

        let correlation = correlate(&mut ctx, relation)?;
        compile_fields(&mut ctx, target, &spec.fields, &root, "")?;

        let mut conditions =
            vec![Expr::Slot(correlation.clone()).in_list(keys.iter().cloned().map(param).collect())];
        if let Some(filter) = &spec.filter {
            conditions.extend(compile_filter(&mut ctx, target, filter, &root, "")?);
        }
        let mut order = match &options {
            Some(options) => {
                if let Some(term) = &options.search {
                    conditions.extend(search_condition(&mut ctx, target, &root, term)?);
                }
                order_by(&mut ctx, target, &root, &options.orderby)?
            }
            None => Vec::new(),
        };
        let pk = ctx.register_column(&root, self.schema.entity(target).primary_key())?;
        order.push(OrderByExpr::asc(Expr::Slot(pk)));

        let order = ctx.finish(conditions, order)?;
        let partition = ctx.exposure(&correlation)?;
        let (base, aliases, shape) = ctx.into_output();
        let options =
            options.ok_or_else(|| QueryError::invalid_argument("invalid select options"))?;

        let count = count_query(base.clone());
        let numbered = match self.settings.row_numbering {
            RowNumbering::Window => window_numbering(base, partition, order),
            RowNumbering::SessionVariables => session_numbering(base, partition, order),
        };
        let list = page_query(numbered, options.skip, options.limit);

        let list = list.to_statement(&MySql);
        let count = count.to_statement(&MySql);
        debug!(
            relation = relation.name,
            sql = %list.sql,
            params = list.params.len(),
            "compiler.relation"
        );

        Ok(RelationPlan {
            list,
            count,
            aliases,
            shape,
            options,
        })
    }
}

/// `SELECT __c.__fk, COUNT(*) AS total ... GROUP BY __c.__fk`
fn count_query(base: Query) -> Query {
    let mut count = Query::new().from(FromSource::subquery(base, "__c"));
    count.add_select(table_col("__c", CORRELATION), CORRELATION);
    count.add_select(count_star(), TOTAL);
    count.group_by = vec![table_col("__c", CORRELATION)];
    count
}

/// Number rows per parent with `ROW_NUMBER() OVER (PARTITION BY ... ORDER BY ...)`.
fn window_numbering(mut base: Query, partition: Expr, order: Vec<OrderByExpr>) -> Query {
    base.add_select(window(row_number(), vec![partition], order), ROW_NUMBER);
    base
}

/// Number rows per parent with user variables over a derived table ordered
/// by parent key, then by the requested order.
fn session_numbering(mut base: Query, partition: Expr, order: Vec<OrderByExpr>) -> Query {
    let mut ordering = vec![OrderByExpr::asc(partition)];
    ordering.extend(order);
    base.order_by = ordering;
    base.limit_offset = Some(LimitOffset {
        limit: Some(MYSQL_MAX_ROWS),
        offset: None,
    });

    let ordered = "__ordered";
    let key = format!("`{}`.`{}`", ordered, CORRELATION);
    let mut numbered = Query::new().from(FromSource::subquery(base, ordered));
    numbered.select.push(table_star(ordered).into());
    numbered.add_select(
        raw_sql(&format!("@__rn := IF(@__grp = {}, @__rn + 1, 1)", key)),
        ROW_NUMBER,
    );
    numbered.add_select(raw_sql(&format!("@__grp := {}", key)), "__grp");

    let vars = Query::new().select(vec![raw_sql("@__rn := 0"), raw_sql("@__grp := NULL")]);
    numbered.add_join(JoinType::Cross, FromSource::subquery(vars, "__vars"), None);
    numbered
}

/// Keep row numbers in `(skip, skip + limit]`, parents grouped together.
fn page_query(numbered: Query, skip: u64, limit: u64) -> Query {
    let rn = || table_col(PAGE, ROW_NUMBER);
    Query::new()
        .select_star()
        .from(FromSource::subquery(numbered, PAGE))
        .filter(rn().gt(bound(skip)).and(rn().lte(bound(skip.saturating_add(limit)))))
        .order_by(vec![
            OrderByExpr::asc(table_col(PAGE, CORRELATION)),
            OrderByExpr::asc(rn()),
        ])
}

//! Filter, search and order-by compilation.
//!
//! Every column a condition touches is referenced through an [`Expr::Slot`]
//! holding its raw `alias.column` key. Slots are resolved once the plan is
//! complete, so a condition compiled before a wrap still points at the
//! right column afterwards.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use super::context::{join_path, PlanContext};
use super::fields::{compile_aggregate, compile_custom, join_to_one};
use crate::error::{CompileResult, FieldErrors, QueryError};
use crate::normalize::{alias_collision, OrderTerm};
use crate::request::{Comparison, Condition, DateShorthand, Filter};
use crate::schema::EntityId;
use crate::sql::{
    and_all, cast, func, lit_int, lit_str, or_all, param, postfix, raw_sql, BinaryOperator, Expr,
    ExprExt, MySql, OrderByExpr, SqlDialect,
};

static DATE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());

static DATETIME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}(:\d{2}(\.\d+)?)?(Z|[+-]\d{2}:?\d{2})?$").unwrap()
});

/// Compile `filter` relative to the entity at `alias`/`path`.
///
/// Unresolvable paths are recorded in the plan's error map and contribute
/// no condition. `None` means the filter constrains nothing.
pub(crate) fn compile_filter<'s>(
    ctx: &mut PlanContext<'s>,
    entity: EntityId,
    filter: &Filter,
    alias: &str,
    path: &str,
) -> CompileResult<Option<Expr>> {
    let all = |ctx: &mut PlanContext<'s>, nodes: &[Filter]| -> CompileResult<Vec<Expr>> {
        let mut out = Vec::with_capacity(nodes.len());
        for node in nodes {
            if let Some(expr) = compile_filter(ctx, entity, node, alias, path)? {
                out.push(expr);
            }
        }
        Ok(out)
    };

    Ok(match filter {
        Filter::And(nodes) => and_all(all(ctx, nodes)?),
        Filter::Or(nodes) => or_all(all(ctx, nodes)?),
        Filter::Nor(nodes) => or_all(all(ctx, nodes)?).map(ExprExt::not),
        Filter::Not(inner) => compile_filter(ctx, entity, inner, alias, path)?.map(ExprExt::not),
        Filter::Raw(sql) => Some(Expr::Paren(Box::new(raw_sql(sql)))),
        Filter::Field { path: key, condition } => {
            compile_leaf(ctx, entity, alias, path, key, condition)?
        }
    })
}

fn compile_leaf<'s>(
    ctx: &mut PlanContext<'s>,
    entity: EntityId,
    alias: &str,
    path: &str,
    key: &str,
    condition: &Condition,
) -> CompileResult<Option<Expr>> {
    let full = join_path(path, key);

    let Condition::Aggregate(aggregate) = condition else {
        return match resolve_path(ctx, entity, alias, path, key)? {
            Some(raw) => condition_expr(Expr::Slot(raw), condition),
            None => Ok(None),
        };
    };

    let (hops, last) = match key.rsplit_once('.') {
        Some((hops, last)) => (Some(hops), last),
        None => (None, key),
    };
    let Some((owner, owner_alias, owner_path)) = walk_to_one(ctx, entity, alias, path, hops, &full)?
    else {
        return Ok(None);
    };
    let schema = ctx.schema;
    let relation = match schema.relationship(owner, last) {
        Some(relation) if relation.is_to_many() => relation,
        Some(_) => {
            ctx.errors
                .insert(full, "aggregate requires a to-many relationship");
            return Ok(None);
        }
        None => {
            ctx.errors.insert(full, FieldErrors::MISSING_FIELD);
            return Ok(None);
        }
    };
    let Some(as_name) = aggregate.alias.as_deref() else {
        return Err(QueryError::RequiredAliasMissing { field: full });
    };
    if schema.entity(owner).declares(as_name) {
        ctx.errors.insert(full, alias_collision(as_name));
        return Ok(None);
    }

    let raw = compile_aggregate(
        ctx,
        &owner_alias,
        &owner_path,
        relation,
        &aggregate.func,
        as_name,
        aggregate.filter.as_deref(),
        false,
    )?;
    match aggregate.condition.as_deref() {
        Some(condition) => condition_expr(Expr::Slot(raw), condition),
        None => Ok(None),
    }
}

/// Follow to-one hops, joining each on first use. Returns the entity, alias
/// and path reached, or `None` after recording an error under `full`.
fn walk_to_one<'s>(
    ctx: &mut PlanContext<'s>,
    entity: EntityId,
    alias: &str,
    path: &str,
    hops: Option<&str>,
    full: &str,
) -> CompileResult<Option<(EntityId, String, String)>> {
    let schema = ctx.schema;
    let mut current = entity;
    let mut current_alias = alias.to_string();
    let mut current_path = path.to_string();

    for hop in hops.into_iter().flat_map(|h| h.split('.')) {
        match schema.relationship(current, hop) {
            Some(relation) if !relation.is_to_many() => {
                let next_path = join_path(&current_path, hop);
                if !ctx.check_depth(&next_path) {
                    return Ok(None);
                }
                current_alias = join_to_one(ctx, &current_alias, &current_path, relation)?;
                current = relation.target;
                current_path = next_path;
            }
            Some(_) => {
                ctx.errors
                    .insert(full, "to-many relationships cannot be traversed");
                return Ok(None);
            }
            None => {
                ctx.errors.insert(full, FieldErrors::MISSING_FIELD);
                return Ok(None);
            }
        }
    }

    Ok(Some((current, current_alias, current_path)))
}

/// Raw key of the column, custom field or aggregate alias at `key`.
pub(crate) fn resolve_path<'s>(
    ctx: &mut PlanContext<'s>,
    entity: EntityId,
    alias: &str,
    path: &str,
    key: &str,
) -> CompileResult<Option<String>> {
    let full = join_path(path, key);
    let (hops, last) = match key.rsplit_once('.') {
        Some((hops, last)) => (Some(hops), last),
        None => (None, key),
    };
    let Some((owner, owner_alias, _)) = walk_to_one(ctx, entity, alias, path, hops, &full)? else {
        return Ok(None);
    };

    let raw = format!("{}.{}", owner_alias, last);
    if ctx.is_synthetic(&raw) {
        return Ok(Some(raw));
    }
    let schema = ctx.schema;
    let ent = schema.entity(owner);
    if ent.has_column(last) {
        return ctx.register_column(&owner_alias, last).map(Some);
    }
    if ent.custom(last).is_some() {
        return compile_custom(ctx, owner, &owner_alias, last).map(Some);
    }
    ctx.errors.insert(full, FieldErrors::MISSING_FIELD);
    Ok(None)
}

// =============================================================================
// Conditions
// =============================================================================

fn condition_expr(column: Expr, condition: &Condition) -> CompileResult<Option<Expr>> {
    Ok(match condition {
        Condition::Equals(Value::Null) => Some(column.is_null()),
        Condition::Equals(value) => Some(typed(column, BinaryOperator::Eq, value)),
        Condition::In(values) => Some(column.in_list(params(values))),
        Condition::Ops(comparisons) => {
            let mut parts = Vec::with_capacity(comparisons.len());
            for comparison in comparisons {
                parts.push(comparison_expr(column.clone(), comparison)?);
            }
            and_all(parts)
        }
        Condition::Aggregate(_) => {
            return Err(QueryError::invalid_argument(
                "aggregate filters cannot be nested inside $where",
            ))
        }
    })
}

fn comparison_expr(column: Expr, comparison: &Comparison) -> CompileResult<Expr> {
    Ok(match comparison {
        Comparison::Gt(v) => typed(column, BinaryOperator::Gt, v),
        Comparison::Gte(v) => typed(column, BinaryOperator::Gte, v),
        Comparison::Lt(v) => typed(column, BinaryOperator::Lt, v),
        Comparison::Lte(v) => typed(column, BinaryOperator::Lte, v),
        Comparison::E(Value::Null) => column.is_null(),
        Comparison::E(v) => typed(column, BinaryOperator::Eq, v),
        Comparison::Ne(Value::Null) => column.is_not_null(),
        Comparison::Ne(v) => typed(column, BinaryOperator::Ne, v),
        Comparison::Like(v) => column.like(param(v.clone())),
        Comparison::NotLike(v) => column.not_like(param(v.clone())),
        Comparison::In(values) => column.in_list(params(values)),
        Comparison::Nin(values) => column.not_in_list(params(values)),
        Comparison::Raw(sql) => postfix(column, sql),
        Comparison::Not(inner) => {
            let mut parts = Vec::with_capacity(inner.len());
            for comparison in inner {
                parts.push(comparison_expr(column.clone(), comparison)?);
            }
            and_all(parts).unwrap_or(Expr::from(true)).not()
        }
        Comparison::Date { shorthand, on } => {
            let condition = date_condition(column, *shorthand);
            if *on {
                condition
            } else {
                condition.not()
            }
        }
    })
}

fn params(values: &[Value]) -> Vec<Expr> {
    values.iter().cloned().map(param).collect()
}

/// `column op ?`, casting both sides when the value is an ISO date or datetime.
fn typed(column: Expr, op: BinaryOperator, value: &Value) -> Expr {
    let cast_to = match value {
        Value::String(s) if DATE_PATTERN.is_match(s) => Some(MySql.date_type()),
        Value::String(s) if DATETIME_PATTERN.is_match(s) => Some(MySql.datetime_type()),
        _ => None,
    };
    match cast_to {
        Some(data_type) => cast(column, data_type).binary(op, cast(param(value.clone()), data_type)),
        None => column.binary(op, param(value.clone())),
    }
}

fn date_condition(column: Expr, shorthand: DateShorthand) -> Expr {
    let today = || func("CURDATE", Vec::new());
    let yearweek = |e: Expr| func("YEARWEEK", vec![e, lit_int(1)]);
    let month = |e: Expr| func("DATE_FORMAT", vec![e, lit_str("%Y-%m")]);
    let year = |e: Expr| func("YEAR", vec![e]);

    match shorthand {
        DateShorthand::CurrentWeek => yearweek(column).eq(yearweek(today())),
        DateShorthand::LastWeek => {
            yearweek(column).eq(yearweek(raw_sql("CURDATE() - INTERVAL 1 WEEK")))
        }
        DateShorthand::CurrentMonth => month(column).eq(month(today())),
        DateShorthand::LastMonth => month(column).eq(month(raw_sql("CURDATE() - INTERVAL 1 MONTH"))),
        DateShorthand::CurrentYear => year(column).eq(year(today())),
        DateShorthand::LastYear => year(column).eq(year(today()).sub(lit_int(1))),
    }
}

// =============================================================================
// Search and ordering
// =============================================================================

fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// OR of `LIKE %term%` over the entity's searchable keys.
pub(crate) fn search_condition(
    ctx: &mut PlanContext<'_>,
    entity: EntityId,
    alias: &str,
    term: &str,
) -> CompileResult<Option<Expr>> {
    let pattern = format!("%{}%", escape_like(term));
    let mut parts = Vec::new();
    let schema = ctx.schema;
    for key in schema.entity(entity).searchable_keys() {
        let raw = ctx.register_column(alias, key)?;
        parts.push(Expr::Slot(raw).like(param(pattern.clone())));
    }
    Ok(or_all(parts))
}

pub(crate) fn order_by(
    ctx: &mut PlanContext<'_>,
    entity: EntityId,
    alias: &str,
    terms: &[OrderTerm],
) -> CompileResult<Vec<OrderByExpr>> {
    let mut order = Vec::with_capacity(terms.len());
    for term in terms {
        if let Some(raw) = resolve_path(ctx, entity, alias, "", &term.path)? {
            order.push(OrderByExpr::with_dir(Expr::Slot(raw), term.dir));
        }
    }
    Ok(order)
}

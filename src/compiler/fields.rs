//! Field compilation: columns, to-one joins, custom fields and relation
//! aggregates.

use std::collections::HashMap;

use super::context::{join_path, PlanContext, Priority, CORRELATION};
use super::filter::compile_filter;
use crate::error::{CompileResult, FieldErrors, QueryError};
use crate::normalize::{normalize_customs, normalize_fields, normalize_relationships, RelationPart};
use crate::request::{AggregateFn, Filter, Projection};
use crate::schema::{CustomField, EntityId, Fragment, RelationRef, Relationship, TARGET_ALIAS};
use crate::sql::{
    avg, coalesce, count_star, lit_int, sum, table_col, Expr, ExprExt, FromSource, JoinType,
    MySql, Query, SqlDialect, TableRef,
};

/// Output name of the aggregated value in a relation aggregate subquery.
const AGGREGATE_VALUE: &str = "__value";

/// Move `InvalidQueryData` into the plan's error map under `prefix`.
pub(crate) fn collect<T>(
    ctx: &mut PlanContext<'_>,
    prefix: &str,
    result: CompileResult<T>,
) -> CompileResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(QueryError::InvalidQueryData(errors)) => {
            ctx.errors.extend_prefixed(prefix, errors);
            Ok(None)
        }
        Err(other) => Err(other),
    }
}

/// Compile the projection of `entity` reached at `path` through `alias`.
pub(crate) fn compile_fields<'s>(
    ctx: &mut PlanContext<'s>,
    entity: EntityId,
    projection: &Projection,
    alias: &str,
    path: &str,
) -> CompileResult<()> {
    let schema = ctx.schema;
    let columns = collect(ctx, path, normalize_fields(schema, entity, projection))?;
    let relations = collect(
        ctx,
        path,
        normalize_relationships(schema, entity, projection, None),
    )?;
    let (Some(columns), Some(relations)) = (columns, relations) else {
        return Ok(());
    };

    for column in &columns {
        let raw = ctx.register_column(alias, column)?;
        let out = ctx.output_of(&raw).unwrap_or_default().to_string();
        ctx.add_output(out, path, column);
    }

    for request in relations {
        let child_path = join_path(path, &request.name);
        match request.part {
            RelationPart::Load(_) if request.relation.is_to_many() => {}
            RelationPart::Load(spec) => {
                if !ctx.check_depth(&child_path) {
                    continue;
                }
                let target = request.relation.target;
                let child_alias = join_to_one(ctx, alias, path, request.relation)?;
                compile_fields(ctx, target, &spec.fields, &child_alias, &child_path)?;

                let pk = schema.entity(target).primary_key();
                ctx.add_nullable(&child_path, format!("{}${}", child_alias, pk));

                if let Some(filter) = &spec.filter {
                    if let Some(condition) =
                        compile_filter(ctx, target, filter, &child_alias, &child_path)?
                    {
                        ctx.conditions.push(condition);
                    }
                }
            }
            RelationPart::Aggregate(spec) => {
                let Some(as_name) = spec.alias.as_deref() else {
                    return Err(QueryError::RequiredAliasMissing { field: child_path });
                };
                compile_aggregate(
                    ctx,
                    alias,
                    path,
                    request.relation,
                    &spec.func,
                    as_name,
                    spec.filter.as_ref(),
                    true,
                )?;
            }
        }
    }

    for name in normalize_customs(schema.entity(entity), projection) {
        compile_custom(ctx, entity, alias, &name)?;
        ctx.add_output(format!("{}${}", alias, name), path, &name);
    }

    Ok(())
}

// =============================================================================
// To-one joins
// =============================================================================

/// Alias of the to-one relation below `parent_path`, joining it on first use.
pub(crate) fn join_to_one<'s>(
    ctx: &mut PlanContext<'s>,
    parent_alias: &str,
    parent_path: &str,
    relation: RelationRef<'s>,
) -> CompileResult<String> {
    let path = join_path(parent_path, relation.name);
    if let Some(alias) = ctx.aliases.alias_for(&path) {
        return Ok(alias.to_string());
    }

    let schema = ctx.schema;
    let source = schema.entity(relation.source);
    let target = schema.entity(relation.target);
    let alias = ctx.allocate(&path, relation.target);
    let local = relation.relationship.local_key(source.primary_key());

    match relation.relationship {
        Relationship::BelongsTo { owner_key, .. } => {
            let local_raw = ctx.register_column(parent_alias, local)?;
            let owner = owner_key.as_deref().unwrap_or(target.primary_key()).to_string();
            let table = TableRef::new(target.table_name()).with_alias(&alias);
            let alias = alias.clone();
            ctx.defer(
                Priority::Joins,
                move |ctx| {
                    let on = table_col(&alias, &owner).eq(ctx.exposure(&local_raw)?);
                    ctx.query.add_join(JoinType::Left, table, Some(on));
                    Ok(())
                },
            );
        }
        Relationship::HasOne { foreign_key, .. } => {
            let local_raw = ctx.register_column(parent_alias, local)?;
            let table = TableRef::new(target.table_name()).with_alias(&alias);
            let alias = alias.clone();
            ctx.defer(
                Priority::Joins,
                move |ctx| {
                    let on = table_col(&alias, foreign_key).eq(ctx.exposure(&local_raw)?);
                    ctx.query.add_join(JoinType::Left, table, Some(on));
                    Ok(())
                },
            );
        }
        Relationship::HasOneThrough { chain } => {
            let local_raw = ctx.register_column(parent_alias, local)?;
            let alias = alias.clone();
            let label = format!("through/{}", path);
            ctx.defer(
                Priority::Joins,
                move |ctx| {
                    let mut previous = ctx.exposure(&local_raw)?;
                    for (i, link) in chain.iter().enumerate() {
                        let id = ctx.schema.lookup(&link.entity)?;
                        let link_alias = if i + 1 == chain.len() {
                            alias.clone()
                        } else {
                            ctx.allocate_internal(&label, id)
                        };
                        let table = TableRef::new(ctx.schema.entity(id).table_name())
                            .with_alias(&link_alias);
                        let on = table_col(&link_alias, &link.key).eq(previous);
                        ctx.query.add_join(JoinType::Left, table, Some(on));
                        if let Some(next) = chain.get(i + 1) {
                            previous = table_col(&link_alias, &next.parent_key);
                        } else {
                            break;
                        }
                    }
                    Ok(())
                },
            );
        }
        Relationship::HasOneCustom { joins } => {
            register_own_keys(ctx, parent_alias, joins)?;
            let own = parent_alias.to_string();
            let alias = alias.clone();
            let label = format!("join/{}", path);
            ctx.defer(
                Priority::Joins,
                move |ctx| {
                    let mut scope = FragmentScope::new(&alias, &own, &label);
                    let sql = render_fragments(ctx, joins, &mut scope)?;
                    ctx.query.add_raw_join(sql);
                    Ok(())
                },
            );
        }
        Relationship::HasMany { .. }
        | Relationship::HasManyCustom { .. }
        | Relationship::HasManyThrough { .. } => {
            return Err(QueryError::invalid_argument(format!(
                "'{}' is a to-many relationship and cannot be joined",
                path
            )));
        }
    }

    Ok(alias)
}

// =============================================================================
// Fragments
// =============================================================================

/// Alias bindings while rendering one descriptor.
pub(crate) struct FragmentScope<'a> {
    /// Alias `$target` resolves to.
    target: &'a str,
    /// Alias [`Fragment::OwnKey`] resolves against.
    own: &'a str,
    label: &'a str,
    /// descriptor alias -> generated alias
    pub(crate) locals: HashMap<String, String>,
}

impl<'a> FragmentScope<'a> {
    pub(crate) fn new(target: &'a str, own: &'a str, label: &'a str) -> Self {
        Self {
            target,
            own,
            label,
            locals: HashMap::new(),
        }
    }

    pub(crate) fn resolve_alias(&self, alias: &str) -> CompileResult<String> {
        if alias == TARGET_ALIAS {
            return Ok(self.target.to_string());
        }
        self.locals.get(alias).cloned().ok_or_else(|| {
            QueryError::invalid_argument(format!("fragment alias '{}' is not declared", alias))
        })
    }
}

fn register_own_keys(ctx: &mut PlanContext<'_>, alias: &str, fragments: &[Fragment]) -> CompileResult<()> {
    for fragment in fragments {
        if let Fragment::OwnKey(key) = fragment {
            ctx.register_column(alias, key)?;
        }
    }
    Ok(())
}

/// Render fragments to trusted SQL text.
///
/// Own keys resolve through the exposure map, so they stay correct after
/// the builder was wrapped.
pub(crate) fn render_fragments(
    ctx: &mut PlanContext<'_>,
    fragments: &[Fragment],
    scope: &mut FragmentScope<'_>,
) -> CompileResult<String> {
    let mut sql = String::new();
    for fragment in fragments {
        match fragment {
            Fragment::Sql(text) => sql.push_str(text),
            Fragment::Entity { entity, alias } => {
                let id = ctx.schema.lookup(entity)?;
                let generated = if alias == TARGET_ALIAS {
                    scope.target.to_string()
                } else if let Some(existing) = scope.locals.get(alias) {
                    existing.clone()
                } else {
                    let generated = ctx.allocate_internal(scope.label, id);
                    scope.locals.insert(alias.clone(), generated.clone());
                    generated
                };
                sql.push_str(&format!(
                    "{} AS {}",
                    MySql.quote_identifier(ctx.schema.entity(id).table_name()),
                    MySql.quote_identifier(&generated)
                ));
            }
            Fragment::Key { alias, key } => {
                let resolved = scope.resolve_alias(alias)?;
                sql.push_str(&format!(
                    "{}.{}",
                    MySql.quote_identifier(&resolved),
                    MySql.quote_identifier(key)
                ));
            }
            Fragment::OwnKey(key) => {
                let raw = format!("{}.{}", scope.own, key);
                if !ctx.is_registered(&raw) {
                    ctx.register_column(scope.own, key)?;
                }
                let text = ctx.exposure(&raw)?.to_trusted_sql().ok_or_else(|| {
                    QueryError::invalid_argument(format!("'{}' cannot be inlined", raw))
                })?;
                sql.push_str(&text);
            }
        }
    }
    Ok(sql)
}

// =============================================================================
// Custom fields
// =============================================================================

/// Schedule custom field `name` of the entity at `alias`. Returns its raw key.
pub(crate) fn compile_custom<'s>(
    ctx: &mut PlanContext<'s>,
    entity: EntityId,
    alias: &str,
    name: &str,
) -> CompileResult<String> {
    let raw = format!("{}.{}", alias, name);
    if !ctx.mark_custom(&raw) {
        return Ok(raw);
    }
    let schema = ctx.schema;
    let Some(custom) = schema.entity(entity).custom(name) else {
        return Err(QueryError::invalid_field(name, FieldErrors::MISSING_FIELD));
    };
    for key in custom.own_keys() {
        ctx.register_column(alias, key)?;
    }

    let alias = alias.to_string();
    let name = name.to_string();
    let key = raw.clone();
    ctx.defer(
        Priority::Deferred,
        move |ctx| apply_custom(ctx, custom, &alias, &name, key),
    );
    Ok(raw)
}

fn apply_custom(
    ctx: &mut PlanContext<'_>,
    custom: &CustomField,
    alias: &str,
    name: &str,
    raw: String,
) -> CompileResult<()> {
    if custom.aggregate {
        ctx.wrap(true);
    } else {
        ctx.ensure_ungrouped();
    }

    let label = format!("custom/{}", name);
    let mut scope = FragmentScope::new(alias, alias, &label);
    for join in &custom.joins {
        let id = ctx.schema.lookup(&join.entity)?;
        let generated = ctx.allocate_internal(&label, id);
        scope.locals.insert(join.alias.clone(), generated.clone());
        let on = render_fragments(ctx, &join.on, &mut scope)?;
        let table = TableRef::new(ctx.schema.entity(id).table_name()).with_alias(&generated);
        ctx.query.add_join(JoinType::Left, table, Some(Expr::Raw(on)));
    }
    if !custom.join_raw.is_empty() {
        let sql = render_fragments(ctx, &custom.join_raw, &mut scope)?;
        ctx.query.add_raw_join(sql);
    }

    let expression = render_fragments(ctx, &custom.expression, &mut scope)?;
    ctx.register(
        raw,
        format!("{}${}", alias, name),
        Expr::Paren(Box::new(Expr::Raw(expression))),
    )
}

// =============================================================================
// Relation aggregates
// =============================================================================

/// Correlate a batch-load or aggregate plan with its parent.
///
/// Selects the parent key value under [`CORRELATION`] and returns that raw
/// key.
pub(crate) fn correlate<'s>(ctx: &mut PlanContext<'s>, relation: RelationRef<'s>) -> CompileResult<String> {
    let root = ctx.root_alias().to_string();
    let expr = match relation.relationship {
        Relationship::HasMany { foreign_key, .. } | Relationship::HasOne { foreign_key, .. } => {
            table_col(&root, foreign_key)
        }
        Relationship::HasManyCustom {
            joins, correlation, ..
        } => {
            let label = format!("relation/{}", relation.name);
            let mut scope = FragmentScope::new(&root, &root, &label);
            let sql = render_fragments(ctx, joins, &mut scope)?;
            ctx.query.add_raw_join(sql);
            table_col(&scope.resolve_alias(&correlation.alias)?, &correlation.key)
        }
        Relationship::HasManyThrough { chain } | Relationship::HasOneThrough { chain } => {
            let label = format!("through/{}", relation.name);
            let mut current = root.clone();
            for i in (1..chain.len()).rev() {
                let link = &chain[i];
                let previous = &chain[i - 1];
                let id = ctx.schema.lookup(&previous.entity)?;
                let alias = ctx.allocate_internal(&label, id);
                let table = TableRef::new(ctx.schema.entity(id).table_name()).with_alias(&alias);
                let on = table_col(&alias, &link.parent_key).eq(table_col(&current, &link.key));
                ctx.query.add_join(JoinType::Inner, table, Some(on));
                current = alias;
            }
            let first = chain.first().ok_or_else(|| {
                QueryError::invalid_argument(format!("'{}' has an empty chain", relation.name))
            })?;
            table_col(&current, &first.key)
        }
        Relationship::BelongsTo { .. } | Relationship::HasOneCustom { .. } => {
            return Err(QueryError::invalid_argument(format!(
                "relationship '{}' cannot be loaded by parent key",
                relation.name
            )));
        }
    };
    ctx.register(CORRELATION.to_string(), CORRELATION.to_string(), expr)?;
    Ok(CORRELATION.to_string())
}

/// Join a pre-aggregated subquery over a to-many relation and expose the
/// value as `parent_alias$as_name`. Returns the raw key `parent_alias.as_name`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn compile_aggregate<'s>(
    ctx: &mut PlanContext<'s>,
    parent_alias: &str,
    parent_path: &str,
    relation: RelationRef<'s>,
    func: &AggregateFn,
    as_name: &str,
    filter: Option<&Filter>,
    output: bool,
) -> CompileResult<String> {
    let raw = format!("{}.{}", parent_alias, as_name);
    let out = format!("{}${}", parent_alias, as_name);
    let rel_path = join_path(parent_path, relation.name);
    let source = format!("{}|{:?}|{:?}", relation.name, func, filter);
    match ctx.synthetic_source(&raw) {
        Some(existing) if existing == source => {
            if output {
                ctx.add_output(out, parent_path, as_name);
            }
            return Ok(raw);
        }
        Some(_) => {
            ctx.errors.insert(
                rel_path,
                format!("'{}' is already the name of a different aggregate", as_name),
            );
            return Ok(raw);
        }
        None => {}
    }
    if !ctx.check_depth(&rel_path) {
        return Ok(raw);
    }

    let schema = ctx.schema;
    let local = relation
        .relationship
        .local_key(schema.entity(relation.source).primary_key());
    let local_raw = ctx.register_column(parent_alias, local)?;

    let mut child = ctx.child(relation.target, &rel_path);
    let child_root = child.root_alias().to_string();
    correlate(&mut child, relation)?;

    let value_column = match func {
        AggregateFn::Count => None,
        AggregateFn::Sum(field) | AggregateFn::Avg(field) => {
            if !schema.entity(relation.target).has_column(field) {
                ctx.errors
                    .insert(join_path(&rel_path, field), FieldErrors::MISSING_FIELD);
                return Ok(raw);
            }
            let value_raw = child.register_column(&child_root, field)?;
            child.output_of(&value_raw).map(str::to_string)
        }
    };

    let mut conditions = Vec::new();
    if let Some(filter) = filter {
        if let Some(condition) = compile_filter(&mut child, relation.target, filter, &child_root, "")? {
            conditions.push(condition);
        }
    }
    let nested = std::mem::take(&mut child.errors);
    if !nested.is_empty() {
        ctx.errors.extend_prefixed(&rel_path, nested);
        return Ok(raw);
    }
    child.finish(conditions, Vec::new())?;
    ctx.absorb(&child);
    let (inner, _, _) = child.into_output();

    let label = format!("aggregate/{}", as_name);
    let grouped_alias = ctx.allocate_internal(&label, relation.target);
    let value = match (func, value_column) {
        (AggregateFn::Sum(_), Some(column)) => sum(table_col(&grouped_alias, &column)),
        (AggregateFn::Avg(_), Some(column)) => avg(table_col(&grouped_alias, &column)),
        _ => count_star(),
    };
    let mut grouped = Query::new().from(FromSource::subquery(inner, &grouped_alias));
    grouped.add_select(table_col(&grouped_alias, CORRELATION), CORRELATION);
    grouped.add_select(value, AGGREGATE_VALUE);
    grouped.group_by = vec![table_col(&grouped_alias, CORRELATION)];

    let join_alias = ctx.allocate_internal(&label, relation.target);
    let is_count = matches!(func, AggregateFn::Count);
    ctx.mark_synthetic(&raw, source);
    if output {
        ctx.add_output(out.clone(), parent_path, as_name);
    }

    let key = raw.clone();
    ctx.defer(
        Priority::Deferred,
        move |ctx| {
            ctx.ensure_ungrouped();
            let parent = ctx.exposure(&local_raw)?;
            let on = table_col(&join_alias, CORRELATION).eq(parent);
            ctx.query
                .add_join(JoinType::Left, FromSource::subquery(grouped, &join_alias), Some(on));
            let value = table_col(&join_alias, AGGREGATE_VALUE);
            let value = if is_count {
                coalesce(vec![value, lit_int(0)])
            } else {
                value
            };
            ctx.register(key, out, value)
        },
    );
    Ok(raw)
}

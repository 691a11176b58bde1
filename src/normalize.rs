//! Request validation against an entity's declared capabilities.
//!
//! Every function here is pure: it reads the schema and the request and
//! either returns the classified keys or an `InvalidQueryData` carrying
//! every offending path found in one pass.

use std::collections::HashSet;
use std::fmt;

use indexmap::IndexSet;

use crate::config::CompilerSettings;
use crate::error::{CompileResult, FieldErrors, QueryError};
use crate::request::{AggregateFn, AggregateSpec, FieldSpec, Projection, RelationSpec, SelectOptions, ALL, DEFAULT};
use crate::schema::{Entity, EntityId, RelationRef, Schema};
use crate::sql::SortDir;

// =============================================================================
// Fields
// =============================================================================

/// An empty projection, or one that only excludes, means `{$default: 1}`.
fn effective(projection: &Projection) -> Projection {
    if projection.has_requests() {
        return projection.clone();
    }
    let mut defaulted = Projection::defaults();
    for (key, spec) in projection.iter() {
        defaulted.insert(key, spec.clone());
    }
    defaulted
}

fn excluded(projection: &Projection) -> HashSet<&str> {
    projection
        .iter()
        .filter(|(_, spec)| matches!(spec, FieldSpec::Exclude))
        .map(|(key, _)| key)
        .collect()
}

/// Stored columns to select for `projection`, primary key first.
///
/// Sentinels expand to declared key sets, virtuals to the columns they
/// (transitively) require, and relationships to the local key they join on.
pub fn normalize_fields(
    schema: &Schema,
    entity: EntityId,
    projection: &Projection,
) -> CompileResult<Vec<String>> {
    let ent = schema.entity(entity);
    let projection = effective(projection);
    let excluded = excluded(&projection);
    let mut fields = IndexSet::new();
    let mut errors = FieldErrors::new();

    for (key, spec) in projection.iter() {
        if !spec.is_requested() {
            continue;
        }
        match key {
            ALL => {
                for column in ent.available_keys() {
                    if !excluded.contains(column.as_str()) {
                        fields.insert(column.clone());
                    }
                }
                for name in ent.virtuals.keys() {
                    if !excluded.contains(name.as_str()) {
                        expand_key(schema, entity, name, &mut fields, &mut HashSet::new());
                    }
                }
            }
            DEFAULT => {
                for column in ent.default_keys() {
                    if !excluded.contains(column.as_str()) {
                        fields.insert(column.clone());
                    }
                }
            }
            _ => {
                if !expand_key(schema, entity, key, &mut fields, &mut HashSet::new()) {
                    errors.insert(key, FieldErrors::UNKNOWN_FIELD);
                }
            }
        }
    }
    errors.into_result()?;

    let pk = ent.primary_key();
    let mut out = Vec::with_capacity(fields.len() + 1);
    out.push(pk.to_string());
    out.extend(fields.into_iter().filter(|f| f != pk));
    Ok(out)
}

/// Adds the columns behind `key`. Returns false when `key` is not declared.
fn expand_key(
    schema: &Schema,
    id: EntityId,
    key: &str,
    fields: &mut IndexSet<String>,
    visiting: &mut HashSet<String>,
) -> bool {
    let entity = schema.entity(id);
    if entity.has_column(key) {
        fields.insert(key.to_string());
        return true;
    }
    if let Some(field) = entity.virtual_field(key) {
        if visiting.insert(key.to_string()) {
            for required in &field.requires {
                expand_key(schema, id, required, fields, visiting);
            }
        }
        return true;
    }
    if entity.custom(key).is_some() {
        return true;
    }
    if let Some(relation) = schema.relationship(id, key) {
        fields.insert(relation.relationship.local_key(entity.primary_key()).to_string());
        return true;
    }
    false
}

// =============================================================================
// Relationships
// =============================================================================

/// Which relationship entries to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationSelector {
    ToOne,
    ToMany,
    Aggregate,
}

/// What the request wants from one relationship.
#[derive(Debug, Clone, PartialEq)]
pub enum RelationPart {
    Load(RelationSpec),
    Aggregate(AggregateSpec),
}

/// One requested relationship with its resolved edge.
#[derive(Debug, Clone)]
pub struct RelationRequest<'s> {
    pub name: String,
    pub relation: RelationRef<'s>,
    pub part: RelationPart,
}

impl RelationRequest<'_> {
    fn selector(&self) -> RelationSelector {
        match (&self.part, self.relation.is_to_many()) {
            (RelationPart::Aggregate(_), _) => RelationSelector::Aggregate,
            (RelationPart::Load(_), true) => RelationSelector::ToMany,
            (RelationPart::Load(_), false) => RelationSelector::ToOne,
        }
    }
}

/// Relationship entries of `projection`, optionally restricted by kind.
///
/// Nested `$fields` are validated recursively; their errors are reported
/// under dotted paths (`posts.tilte`).
pub fn normalize_relationships<'s>(
    schema: &'s Schema,
    entity: EntityId,
    projection: &Projection,
    selector: Option<RelationSelector>,
) -> CompileResult<Vec<RelationRequest<'s>>> {
    let ent = schema.entity(entity);
    let mut errors = FieldErrors::new();
    let mut requests = Vec::new();

    for (key, spec) in projection.iter() {
        if key == ALL || key == DEFAULT || !spec.is_requested() {
            continue;
        }
        let Some(relation) = schema.relationship(entity, key) else {
            match spec {
                FieldSpec::Relation(_) | FieldSpec::Aggregate(_) if ent.declares(key) => {
                    errors.insert(key, "not a relationship");
                }
                FieldSpec::Relation(_) | FieldSpec::Aggregate(_) => {
                    errors.insert(key, FieldErrors::UNKNOWN_FIELD);
                }
                _ => {}
            }
            continue;
        };

        let part = match spec {
            FieldSpec::Include => RelationPart::Load(RelationSpec::default()),
            FieldSpec::Relation(spec) => {
                if let Err(err) = normalize_fields(schema, relation.target, &spec.fields) {
                    nest_errors(&mut errors, key, err)?;
                }
                if let Err(err) =
                    normalize_relationships(schema, relation.target, &spec.fields, None)
                {
                    nest_errors(&mut errors, key, err)?;
                }
                RelationPart::Load(spec.clone())
            }
            FieldSpec::Aggregate(spec) => {
                if !relation.is_to_many() {
                    errors.insert(key, "aggregate requires a to-many relationship");
                    continue;
                }
                let Some(as_name) = spec.alias.as_deref() else {
                    return Err(QueryError::RequiredAliasMissing { field: key.to_string() });
                };
                if ent.declares(as_name) {
                    errors.insert(key, alias_collision(as_name));
                    continue;
                }
                if let AggregateFn::Sum(field) | AggregateFn::Avg(field) = &spec.func {
                    if !schema.entity(relation.target).has_column(field) {
                        errors.insert(format!("{}.{}", key, field), FieldErrors::MISSING_FIELD);
                    }
                }
                RelationPart::Aggregate(spec.clone())
            }
            FieldSpec::Exclude => continue,
        };

        let request = RelationRequest {
            name: key.to_string(),
            relation,
            part,
        };
        if selector.map_or(true, |s| s == request.selector()) {
            requests.push(request);
        }
    }

    errors.into_result()?;
    Ok(requests)
}

/// Message for an aggregate `$as` that shadows a declared field.
pub(crate) fn alias_collision(as_name: &str) -> String {
    format!("'{}' is already a field of this entity", as_name)
}

fn nest_errors(errors: &mut FieldErrors, prefix: &str, err: QueryError) -> CompileResult<()> {
    match err {
        QueryError::InvalidQueryData(nested) => {
            errors.extend_prefixed(prefix, nested);
            Ok(())
        }
        other => Err(other),
    }
}

// =============================================================================
// Customs and virtuals
// =============================================================================

fn wants_all(projection: &Projection) -> bool {
    matches!(projection.get(ALL), Some(spec) if spec.is_requested())
}

fn requested(projection: &Projection, key: &str) -> bool {
    matches!(projection.get(key), Some(spec) if spec.is_requested())
}

/// Custom fields requested, in declaration order.
pub fn normalize_customs(entity: &Entity, projection: &Projection) -> Vec<String> {
    let all = wants_all(projection);
    let excluded = excluded(projection);
    entity
        .customs
        .keys()
        .filter(|name| {
            requested(projection, name) || (all && !excluded.contains(name.as_str()))
        })
        .cloned()
        .collect()
}

/// Virtual fields to evaluate, in declaration order.
///
/// Includes virtuals that a requested virtual depends on.
pub fn normalize_virtuals(entity: &Entity, projection: &Projection) -> Vec<String> {
    let all = wants_all(projection);
    let excluded = excluded(projection);
    let mut wanted: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&str> = entity
        .virtuals
        .keys()
        .filter(|name| {
            requested(projection, name) || (all && !excluded.contains(name.as_str()))
        })
        .map(String::as_str)
        .collect();

    while let Some(name) = stack.pop() {
        if !wanted.insert(name) {
            continue;
        }
        if let Some(field) = entity.virtual_field(name) {
            stack.extend(
                field
                    .requires
                    .iter()
                    .map(String::as_str)
                    .filter(|r| entity.virtuals.contains_key(*r)),
            );
        }
    }

    entity
        .virtuals
        .keys()
        .filter(|name| wanted.contains(name.as_str()))
        .cloned()
        .collect()
}

// =============================================================================
// Select options
// =============================================================================

/// One `orderby` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderTerm {
    pub path: String,
    pub dir: SortDir,
}

impl OrderTerm {
    /// `-path` sorts descending, `+path` or `path` ascending.
    pub fn parse(term: &str) -> Self {
        let term = term.trim();
        match term.strip_prefix('-') {
            Some(path) => Self {
                path: path.to_string(),
                dir: SortDir::Desc,
            },
            None => Self {
                path: term.trim_start_matches('+').to_string(),
                dir: SortDir::Asc,
            },
        }
    }
}

impl fmt::Display for OrderTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.dir {
            SortDir::Asc => write!(f, "{}", self.path),
            SortDir::Desc => write!(f, "-{}", self.path),
        }
    }
}

/// Options with every default applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOptions {
    pub skip: u64,
    pub limit: u64,
    pub orderby: Vec<OrderTerm>,
    pub search: Option<String>,
}

impl ResolvedOptions {
    pub fn orderby_terms(&self) -> Vec<String> {
        self.orderby.iter().map(ToString::to_string).collect()
    }
}

/// Fill options from the entity, then the settings, and validate order-by.
///
/// Order-by paths may walk at most `depth` to-one relationships; the last
/// segment must be a column or a custom field.
pub fn normalize_select_options(
    schema: &Schema,
    entity: EntityId,
    options: &SelectOptions,
    depth: usize,
    settings: &CompilerSettings,
) -> CompileResult<ResolvedOptions> {
    let defaults = &schema.entity(entity).default_options;

    let skip = options.skip.or(defaults.skip).unwrap_or(0);
    let limit = options
        .limit
        .or(defaults.limit)
        .unwrap_or(settings.default_limit)
        .min(settings.max_limit);
    let terms = options.orderby.as_ref().unwrap_or(&defaults.orderby);

    let mut errors = FieldErrors::new();
    let mut orderby = Vec::with_capacity(terms.len());
    for term in terms.iter().filter(|t| !t.trim().is_empty()) {
        let term = OrderTerm::parse(term);
        if let Err(reason) = check_order_path(schema, entity, &term.path, depth) {
            errors.insert(term.path.clone(), reason);
            continue;
        }
        orderby.push(term);
    }
    errors.into_result()?;

    Ok(ResolvedOptions {
        skip,
        limit,
        orderby,
        search: options.search.clone(),
    })
}

fn check_order_path(
    schema: &Schema,
    entity: EntityId,
    path: &str,
    depth: usize,
) -> Result<(), String> {
    let mut current = entity;
    let segments: Vec<&str> = path.split('.').collect();
    let Some((last, hops)) = segments.split_last() else {
        return Err(FieldErrors::MISSING_FIELD.to_string());
    };
    if hops.len() > depth {
        return Err(format!("relationship depth exceeds {}", depth));
    }

    for hop in hops {
        match schema.relationship(current, hop) {
            Some(relation) if !relation.is_to_many() => current = relation.target,
            _ => return Err(FieldErrors::MISSING_FIELD.to_string()),
        }
    }

    let ent = schema.entity(current);
    if ent.has_column(last) || ent.custom(last).is_some() {
        Ok(())
    } else {
        Err(FieldErrors::MISSING_FIELD.to_string())
    }
}

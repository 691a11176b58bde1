//! Relationship population.
//!
//! The top-level select joins every to-one relation it was asked for. What
//! remains after it ran is filled in here, batch by batch:
//!
//! - to-many relations get one COUNT and one paginated list query per
//!   relation for the whole parent batch, executed concurrently;
//! - to-one children already present on the rows are walked so their own
//!   nested relations and virtuals get the same treatment.
//!
//! A relation's results are merged into the parents only after its whole
//! chain (nested populate, virtuals, `after_load`, visibility) succeeded.

mod virtuals;

pub use virtuals::populate_virtuals;

use std::collections::HashMap;

use futures::future::BoxFuture;
use futures::FutureExt;
use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

use crate::backend::Backend;
use crate::compiler::{Compiler, CORRELATION, TOTAL};
use crate::error::{QueryError, QueryResult};
use crate::hooks::{Page, Params, SelectContext};
use crate::normalize::{normalize_customs, normalize_fields, normalize_relationships, normalize_virtuals, RelationPart};
use crate::request::{Projection, RelationSpec, Request};
use crate::schema::{EntityId, RelationRef};

/// Batch loader for one request.
pub struct Population<'a, B: Backend + ?Sized> {
    compiler: Compiler<'a>,
    backend: &'a B,
    params: &'a Params,
}

impl<'a, B: Backend + ?Sized> Population<'a, B> {
    pub fn new(compiler: Compiler<'a>, backend: &'a B, params: &'a Params) -> Self {
        Self {
            compiler,
            backend,
            params,
        }
    }

    /// Fill every relation `projection` requests on `rows` of `entity`.
    ///
    /// `rows` are the hydrated objects of one batch, reached at `path`
    /// (empty for the request root). Virtuals and visibility of `entity`
    /// itself are left to the caller.
    pub fn populate<'r>(
        &'r self,
        entity: EntityId,
        projection: &'r Projection,
        rows: &'r mut [Value],
        path: &'r str,
    ) -> BoxFuture<'r, QueryResult<()>> {
        async move {
            if rows.is_empty() {
                return Ok(());
            }
            let schema = self.compiler.schema();
            for request in normalize_relationships(schema, entity, projection, None)? {
                let RelationPart::Load(spec) = &request.part else {
                    continue;
                };
                let child_path = child_path(path, &request.name);
                if request.relation.is_to_many() {
                    self.load_many(request.relation, spec, rows, &child_path).await?;
                } else {
                    self.walk_one(request.relation, spec, rows, &child_path).await?;
                }
            }
            Ok(())
        }
        .boxed()
    }

    /// Recurse into to-one children the select already joined.
    ///
    /// Works on copies so the parents keep their children when a nested
    /// load fails.
    async fn walk_one(
        &self,
        relation: RelationRef<'a>,
        spec: &RelationSpec,
        rows: &mut [Value],
        path: &str,
    ) -> QueryResult<()> {
        let mut slots = Vec::new();
        let mut children = Vec::new();
        for (index, row) in rows.iter().enumerate() {
            if let Some(child) = row.get(relation.name).filter(|c| c.is_object()) {
                children.push(child.clone());
                slots.push(index);
            }
        }
        if children.is_empty() {
            return Ok(());
        }

        self.populate(relation.target, &spec.fields, &mut children, path).await?;
        self.finish_rows(relation.target, &spec.fields, &mut children).await?;

        for (index, child) in slots.into_iter().zip(children) {
            if let Some(object) = rows[index].as_object_mut() {
                object.insert(relation.name.to_string(), child);
            }
        }
        Ok(())
    }

    /// Load one to-many relation for the whole batch.
    async fn load_many(
        &self,
        relation: RelationRef<'a>,
        spec: &RelationSpec,
        rows: &mut [Value],
        path: &str,
    ) -> QueryResult<()> {
        let schema = self.compiler.schema();
        let max_depth = self.compiler.settings().max_depth;
        if path.split('.').count() > max_depth {
            return Err(QueryError::invalid_field(
                path,
                format!("relationship depth exceeds {}", max_depth),
            ));
        }

        let source = schema.entity(relation.source);
        let target = schema.entity(relation.target);
        let local_key = relation.relationship.local_key(source.primary_key());

        let mut keys: IndexMap<String, Value> = IndexMap::new();
        for row in rows.iter() {
            if let Some(value) = row.get(local_key).filter(|v| !v.is_null()) {
                keys.entry(key_string(value)).or_insert_with(|| value.clone());
            }
        }
        let values: Vec<Value> = keys.values().cloned().collect();
        let plan = self.compiler.compile_relation(relation, spec, &values, path)?;

        let (count_rows, list_rows) = if values.is_empty() {
            (Vec::new(), Vec::new())
        } else {
            futures::try_join!(
                self.backend.execute(&plan.count),
                self.backend.execute(&plan.list)
            )?
        };
        debug!(
            relation = relation.name,
            path,
            parents = keys.len(),
            rows = list_rows.len(),
            "populate.relation"
        );

        let totals: HashMap<String, u64> = count_rows
            .iter()
            .filter_map(|row| {
                let key = row.get(CORRELATION)?;
                Some((key_string(key), row.get(TOTAL).map_or(0, count_of)))
            })
            .collect();

        let mut owners = Vec::with_capacity(list_rows.len());
        let mut batch = Vec::with_capacity(list_rows.len());
        for row in &list_rows {
            let Some(key) = row.get(CORRELATION) else {
                continue;
            };
            owners.push(key_string(key));
            batch.push(plan.shape.hydrate(row));
        }

        self.populate(relation.target, &spec.fields, &mut batch, path).await?;
        populate_virtuals(target, &spec.fields, &mut batch, self.params).await?;

        let mut grouped: HashMap<String, Vec<Value>> = HashMap::new();
        for (owner, child) in owners.into_iter().zip(batch) {
            grouped.entry(owner).or_default().push(child);
        }

        let request = Request {
            fields: spec.fields.clone(),
            filter: spec.filter.clone(),
            options: spec.options.clone(),
        };
        let ctx = SelectContext {
            entity: &target.name,
            path,
            request: &request,
            params: self.params,
        };
        let visible = self.visible_fields(relation.target, &spec.fields)?;
        let orderby = plan.options.orderby_terms();

        let mut pages: HashMap<String, Value> = HashMap::with_capacity(keys.len());
        for key in keys.keys() {
            let mut page = Page {
                limit: Some(plan.options.limit),
                skip: plan.options.skip,
                orderby: orderby.clone(),
                total: totals.get(key).copied().unwrap_or(0),
                data: grouped.remove(key).unwrap_or_default(),
            };
            if let Some(hooks) = &target.hooks {
                hooks.after_load(&mut page, &ctx).await?;
            }
            if let Some(visibility) = &target.visibility {
                visibility.hide_fields(&visible, &mut page.data, self.params);
            }
            pages.insert(key.clone(), page.into_value());
        }

        let empty = Page::empty(Some(plan.options.limit), plan.options.skip, orderby).into_value();
        for row in rows.iter_mut() {
            let page = row
                .get(local_key)
                .and_then(|value| pages.get(&key_string(value)))
                .unwrap_or(&empty)
                .clone();
            if let Some(object) = row.as_object_mut() {
                object.insert(relation.name.to_string(), page);
            }
        }
        Ok(())
    }

    /// Virtuals, then visibility, on a child batch.
    async fn finish_rows(
        &self,
        entity: EntityId,
        projection: &Projection,
        rows: &mut [Value],
    ) -> QueryResult<()> {
        let ent = self.compiler.schema().entity(entity);
        populate_virtuals(ent, projection, rows, self.params).await?;
        if let Some(visibility) = &ent.visibility {
            let visible = self.visible_fields(entity, projection)?;
            visibility.hide_fields(&visible, rows, self.params);
        }
        Ok(())
    }

    fn visible_fields(&self, entity: EntityId, projection: &Projection) -> QueryResult<Vec<String>> {
        requested_fields(self.compiler, entity, projection)
    }
}

/// Every key a projection makes visible on `entity`: columns, customs,
/// virtuals and relations.
pub fn requested_fields(
    compiler: Compiler<'_>,
    entity: EntityId,
    projection: &Projection,
) -> QueryResult<Vec<String>> {
    let schema = compiler.schema();
    let ent = schema.entity(entity);
    let mut fields = normalize_fields(schema, entity, projection)?;
    fields.extend(normalize_customs(ent, projection));
    fields.extend(normalize_virtuals(ent, projection));
    fields.extend(
        normalize_relationships(schema, entity, projection, None)?
            .into_iter()
            .map(|request| request.name),
    );
    Ok(fields)
}

fn child_path(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", path, name)
    }
}

/// Grouping key for a correlation value; drivers may return keys as
/// numbers or strings.
fn key_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub(crate) fn count_of(value: &Value) -> u64 {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
        .unwrap_or(0)
}

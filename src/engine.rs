//! Query engine facade.
//!
//! Ties the pieces together for one entity select:
//!
//! ```text
//! before_select ─► compile ─► SELECT (+ COUNT) ─► hydrate ─► after_select
//!                                                              │
//!        visibility ◄─ virtuals ◄─ populate (to-many batches) ◄┘
//! ```

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::backend::Backend;
use crate::compiler::{CompiledSelect, Compiler, TOTAL};
use crate::config::CompilerSettings;
use crate::error::{CompileResult, QueryResult};
use crate::hooks::{Page, Params, SelectContext};
use crate::normalize::ResolvedOptions;
use crate::populate::{count_of, populate_virtuals, requested_fields, Population};
use crate::request::Request;
use crate::schema::{Entity, EntityId, Schema};

/// Runs requests against one schema and one backend.
pub struct QueryEngine<B> {
    schema: Arc<Schema>,
    settings: CompilerSettings,
    backend: B,
}

struct Selected {
    data: Vec<Value>,
    total: Option<u64>,
    options: ResolvedOptions,
}

impl<B: Backend> QueryEngine<B> {
    pub fn new(schema: Arc<Schema>, backend: B) -> Self {
        Self {
            schema,
            settings: CompilerSettings::default(),
            backend,
        }
    }

    pub fn with_settings(mut self, settings: CompilerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn settings(&self) -> &CompilerSettings {
        &self.settings
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn compiler(&self) -> Compiler<'_> {
        Compiler::new(&self.schema, &self.settings)
    }

    /// Compile without executing anything.
    pub fn compile(&self, entity: &str, request: &Request) -> CompileResult<CompiledSelect> {
        let id = self.schema.lookup(entity)?;
        self.compiler().compile(id, request)
    }

    /// One page of `entity` with its unpaginated total.
    pub async fn find(&self, entity: &str, request: &Request, params: &Params) -> QueryResult<Page> {
        let selected = self.select(entity, request, params, true).await?;
        Ok(Page {
            limit: Some(selected.options.limit),
            skip: selected.options.skip,
            orderby: selected.options.orderby_terms(),
            total: selected.total.unwrap_or(0),
            data: selected.data,
        })
    }

    /// Rows of `entity` without running the COUNT statement.
    pub async fn find_all(
        &self,
        entity: &str,
        request: &Request,
        params: &Params,
    ) -> QueryResult<Vec<Value>> {
        Ok(self.select(entity, request, params, false).await?.data)
    }

    /// First matching row, if any.
    pub async fn find_one(
        &self,
        entity: &str,
        request: &Request,
        params: &Params,
    ) -> QueryResult<Option<Value>> {
        let mut request = request.clone();
        request.options.limit = Some(1);
        request.options.skip = None;
        let data = self.find_all(entity, &request, params).await?;
        Ok(data.into_iter().next())
    }

    /// Number of rows matching the request's filter and search.
    pub async fn count(&self, entity: &str, request: &Request, params: &Params) -> QueryResult<u64> {
        let (id, ent) = self.entity(entity)?;
        self.before_select(ent, request, params).await?;

        let compiled = self.compiler().compile(id, request)?;
        let rows = self.backend.execute(&compiled.count).await?;
        let total = total_of(&rows);
        debug!(entity, total, "engine.count");
        Ok(total)
    }

    fn entity(&self, name: &str) -> QueryResult<(EntityId, &Entity)> {
        let id = self.schema.lookup(name)?;
        Ok((id, self.schema.entity(id)))
    }

    async fn before_select(&self, ent: &Entity, request: &Request, params: &Params) -> QueryResult<()> {
        let Some(hooks) = &ent.hooks else {
            return Ok(());
        };
        let ctx = SelectContext {
            entity: &ent.name,
            path: "",
            request,
            params,
        };
        hooks.before_select(&ctx).await.inspect_err(|err| {
            warn!(entity = %ent.name, error = %err, "engine.rejected");
        })
    }

    async fn select(
        &self,
        entity: &str,
        request: &Request,
        params: &Params,
        with_count: bool,
    ) -> QueryResult<Selected> {
        let (id, ent) = self.entity(entity)?;
        self.before_select(ent, request, params).await?;

        let compiler = self.compiler();
        let compiled = compiler.compile(id, request)?;
        let (rows, total) = if with_count {
            let (rows, counted) = futures::try_join!(
                self.backend.execute(&compiled.select),
                self.backend.execute(&compiled.count)
            )?;
            (rows, Some(total_of(&counted)))
        } else {
            (self.backend.execute(&compiled.select).await?, None)
        };

        let mut data = compiled.hydrate(&rows);
        if let Some(hooks) = &ent.hooks {
            let ctx = SelectContext {
                entity: &ent.name,
                path: "",
                request,
                params,
            };
            hooks.after_select(&mut data, &ctx).await?;
        }

        Population::new(compiler, &self.backend, params)
            .populate(id, &request.fields, &mut data, "")
            .await?;
        populate_virtuals(ent, &request.fields, &mut data, params).await?;
        if let Some(visibility) = &ent.visibility {
            let fields = requested_fields(compiler, id, &request.fields)?;
            visibility.hide_fields(&fields, &mut data, params);
        }

        debug!(entity, rows = data.len(), total, "engine.select");
        Ok(Selected {
            data,
            total,
            options: compiled.options,
        })
    }
}

fn total_of(rows: &[crate::backend::Row]) -> u64 {
    rows.first()
        .and_then(|row| row.get(TOTAL))
        .map_or(0, count_of)
}

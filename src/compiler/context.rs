//! Plan state threaded through one compile.
//!
//! A [`PlanContext`] owns the builder being assembled, the alias table and
//! two buckets of deferred tasks. Priority 0 holds joins; priority 1 holds
//! work that needs the complete join tree (custom expressions, relation
//! aggregates), which may wrap the builder in a derived table. Columns are
//! referenced through raw `alias.column` keys and an exposure map, so a
//! reference taken before a wrap still resolves after it.

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::IndexMap;
use tracing::trace;

use super::hydrate::{OutputColumn, RowShape};
use crate::config::CompilerSettings;
use crate::error::{CompileResult, FieldErrors, QueryError};
use crate::schema::{EntityId, Schema};
use crate::sql::{and_all, table_col, Expr, FromSource, OrderByExpr, Query, TableRef};

/// Deferred unit of work over the plan.
pub(crate) type Task<'s> = Box<dyn FnOnce(&mut PlanContext<'s>) -> CompileResult<()> + 's>;

/// Task buckets. Every join task runs before the next deferred task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Priority {
    Joins = 0,
    Deferred = 1,
}

/// Output name of the correlation column in batch-load queries.
pub const CORRELATION: &str = "__fk";

/// Paths starting with this marker never map back to a logical field.
pub const INTERNAL_PREFIX: char = '#';

/// `a.b` from a prefix path and a key.
pub(crate) fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}

fn depth_of(path: &str) -> usize {
    if path.is_empty() {
        0
    } else {
        path.split('.').count()
    }
}

// =============================================================================
// Alias table
// =============================================================================

/// One occurrence of an entity in the compiled statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasEntry {
    pub alias: String,
    /// Logical path from the root; empty for the root, `#`-prefixed for internal aliases.
    pub path: String,
    pub entity: EntityId,
}

impl AliasEntry {
    pub fn is_internal(&self) -> bool {
        self.path.starts_with(INTERNAL_PREFIX)
    }
}

/// Ordered alias entries with unique paths and unique aliases.
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    entries: Vec<AliasEntry>,
    by_path: HashMap<String, usize>,
    by_alias: HashMap<String, usize>,
}

impl AliasTable {
    pub fn entries(&self) -> &[AliasEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn alias_for(&self, path: &str) -> Option<&str> {
        self.by_path
            .get(path)
            .map(|&i| self.entries[i].alias.as_str())
    }

    pub fn entry(&self, alias: &str) -> Option<&AliasEntry> {
        self.by_alias.get(alias).map(|&i| &self.entries[i])
    }

    /// Map a raw `alias.column` reference back to its logical path.
    ///
    /// Returns `None` for internal aliases and unknown aliases.
    pub fn logical_path(&self, raw: &str) -> Option<String> {
        let (alias, column) = raw.split_once('.')?;
        let entry = self.entry(alias)?;
        if entry.is_internal() {
            return None;
        }
        Some(join_path(&entry.path, column))
    }

    fn insert(&mut self, entry: AliasEntry) {
        let index = self.entries.len();
        self.by_path.insert(entry.path.clone(), index);
        self.by_alias.insert(entry.alias.clone(), index);
        self.entries.push(entry);
    }
}

// =============================================================================
// Plan context
// =============================================================================

pub(crate) struct PlanContext<'s> {
    pub(crate) schema: &'s Schema,
    pub(crate) settings: &'s CompilerSettings,
    pub(crate) query: Query,
    pub(crate) aliases: AliasTable,
    pub(crate) errors: FieldErrors,
    root_entity: EntityId,
    root_alias: String,
    counter: usize,
    /// Relationship levels above this plan's root.
    base_depth: usize,
    /// raw `alias.column` -> output alias, in select-list order
    columns: IndexMap<String, String>,
    /// raw -> expression that reaches the column in the current builder
    exposure: HashMap<String, Expr>,
    used: HashSet<String>,
    outputs: Vec<OutputColumn>,
    /// (to-one path, output column of its primary key)
    nullable: Vec<(String, String)>,
    /// raws produced by aggregates, addressable by their `$as` name, with
    /// the relation, function and filter that produced them
    synthetic: HashMap<String, String>,
    customs: HashSet<String>,
    /// Conditions contributed while compiling fields (to-one `$filter`).
    pub(crate) conditions: Vec<Expr>,
    tasks: [VecDeque<Task<'s>>; 2],
    grouped: bool,
}

impl<'s> PlanContext<'s> {
    pub(crate) fn new(
        schema: &'s Schema,
        settings: &'s CompilerSettings,
        entity: EntityId,
        counter: usize,
        base_depth: usize,
    ) -> Self {
        let mut ctx = Self {
            schema,
            settings,
            query: Query::new(),
            aliases: AliasTable::default(),
            errors: FieldErrors::new(),
            root_entity: entity,
            root_alias: String::new(),
            counter,
            base_depth,
            columns: IndexMap::new(),
            exposure: HashMap::new(),
            used: HashSet::new(),
            outputs: Vec::new(),
            nullable: Vec::new(),
            synthetic: HashMap::new(),
            customs: HashSet::new(),
            conditions: Vec::new(),
            tasks: [VecDeque::new(), VecDeque::new()],
            grouped: false,
        };
        let alias = ctx.allocate("", entity);
        ctx.query = Query::new().from(TableRef::new(schema.entity(entity).table_name()).with_alias(&alias));
        ctx.root_alias = alias;
        ctx
    }

    /// A plan for a subquery. Aliases continue this plan's numbering.
    pub(crate) fn child(&self, entity: EntityId, path: &str) -> PlanContext<'s> {
        PlanContext::new(
            self.schema,
            self.settings,
            entity,
            self.counter,
            self.base_depth + depth_of(path),
        )
    }

    /// Continue numbering after a child plan finished.
    pub(crate) fn absorb(&mut self, child: &PlanContext<'s>) {
        self.counter = self.counter.max(child.counter);
    }

    pub(crate) fn root_alias(&self) -> &str {
        &self.root_alias
    }

    fn next_alias(&mut self) -> String {
        let alias = format!("t{}", self.counter);
        self.counter += 1;
        alias
    }

    /// Allocate an alias for a logical path.
    pub(crate) fn allocate(&mut self, path: &str, entity: EntityId) -> String {
        let alias = self.next_alias();
        trace!(alias = %alias, path = %path, "compiler.alias");
        self.aliases.insert(AliasEntry {
            alias: alias.clone(),
            path: path.to_string(),
            entity,
        });
        alias
    }

    /// Allocate an alias that never maps back to a logical field.
    pub(crate) fn allocate_internal(&mut self, label: &str, entity: EntityId) -> String {
        let alias = self.next_alias();
        let path = format!("{}{}/{}", INTERNAL_PREFIX, label, alias);
        trace!(alias = %alias, path = %path, "compiler.alias");
        self.aliases.insert(AliasEntry {
            alias: alias.clone(),
            path,
            entity,
        });
        alias
    }

    /// Whether `path` is within the configured nesting limit. Records an
    /// error when it is not.
    pub(crate) fn check_depth(&mut self, path: &str) -> bool {
        let max = self.settings.max_depth;
        if self.base_depth + depth_of(path) > max {
            self.errors
                .insert(path, format!("relationship depth exceeds {}", max));
            return false;
        }
        true
    }

    // =========================================================================
    // Columns
    // =========================================================================

    /// Select `alias.column` once and return its raw key.
    ///
    /// Only valid while the builder has not been wrapped, which holds for
    /// everything registered before the deferred tasks run.
    pub(crate) fn register_column(&mut self, alias: &str, column: &str) -> CompileResult<String> {
        let raw = format!("{}.{}", alias, column);
        if self.columns.contains_key(&raw) {
            return Ok(raw);
        }
        self.register(raw.clone(), format!("{}${}", alias, column), table_col(alias, column))?;
        Ok(raw)
    }

    /// Add `expr AS out` to the select list under `raw`.
    pub(crate) fn register(&mut self, raw: String, out: String, expr: Expr) -> CompileResult<()> {
        if !self.used.insert(out.clone()) {
            return Err(QueryError::DuplicateColumnAlias(out));
        }
        self.query.add_select(expr.clone(), &out);
        self.exposure.insert(raw.clone(), expr);
        self.columns.insert(raw, out);
        Ok(())
    }

    pub(crate) fn is_registered(&self, raw: &str) -> bool {
        self.columns.contains_key(raw)
    }

    /// Output alias a raw key is selected under.
    pub(crate) fn output_of(&self, raw: &str) -> Option<&str> {
        self.columns.get(raw).map(String::as_str)
    }

    /// Current SQL reference for a registered raw key.
    pub(crate) fn exposure(&self, raw: &str) -> CompileResult<Expr> {
        self.exposure.get(raw).cloned().ok_or_else(|| {
            QueryError::invalid_argument(format!("column '{}' is not registered", raw))
        })
    }

    /// Record a requested output column.
    pub(crate) fn add_output(&mut self, column: String, path: &str, field: &str) {
        if self.outputs.iter().any(|o| o.column == column) {
            return;
        }
        self.outputs.push(OutputColumn {
            column,
            path: path.to_string(),
            field: field.to_string(),
        });
    }

    pub(crate) fn add_nullable(&mut self, path: &str, pk_column: String) {
        self.nullable.push((path.to_string(), pk_column));
    }

    pub(crate) fn is_synthetic(&self, raw: &str) -> bool {
        self.synthetic.contains_key(raw)
    }

    /// What produced the aggregate behind `raw`, if anything did.
    pub(crate) fn synthetic_source(&self, raw: &str) -> Option<&str> {
        self.synthetic.get(raw).map(String::as_str)
    }

    pub(crate) fn mark_synthetic(&mut self, raw: &str, source: String) {
        self.synthetic.insert(raw.to_string(), source);
    }

    /// Returns false when the custom field was already scheduled.
    pub(crate) fn mark_custom(&mut self, raw: &str) -> bool {
        self.customs.insert(raw.to_string())
    }

    // =========================================================================
    // Tasks and wrapping
    // =========================================================================

    pub(crate) fn defer<F>(&mut self, priority: Priority, task: F)
    where
        F: FnOnce(&mut PlanContext<'s>) -> CompileResult<()> + 's,
    {
        self.tasks[priority as usize].push_back(Box::new(task));
    }

    /// Drain the join bucket before each deferred task.
    pub(crate) fn run_tasks(&mut self) -> CompileResult<()> {
        loop {
            while let Some(task) = self.tasks[Priority::Joins as usize].pop_front() {
                task(self)?;
            }
            match self.tasks[Priority::Deferred as usize].pop_front() {
                Some(task) => {
                    trace!(remaining = self.tasks[1].len(), "compiler.task");
                    task(self)?
                }
                None => return Ok(()),
            }
        }
    }

    /// Turn the builder into `SELECT w.* FROM (builder) AS w`, optionally
    /// grouped by every wrapped column.
    pub(crate) fn wrap(&mut self, group: bool) {
        let alias = self.allocate_internal("wrap", self.root_entity);
        let inner = std::mem::take(&mut self.query);
        let mut outer = Query::new().from(FromSource::subquery(inner, &alias));

        for (raw, out) in &self.columns {
            let reference = table_col(&alias, out);
            outer.add_select(reference.clone(), out);
            self.exposure.insert(raw.clone(), reference);
        }
        if group {
            outer.group_by = self
                .columns
                .values()
                .map(|out| table_col(&alias, out))
                .collect();
        }

        trace!(alias = %alias, group, "compiler.wrap");
        self.query = outer;
        self.grouped = group;
    }

    pub(crate) fn ensure_ungrouped(&mut self) {
        if self.grouped {
            self.wrap(false);
        }
    }

    /// Replace every slot with its current exposure.
    pub(crate) fn resolve(&self, expr: &mut Expr) -> CompileResult<()> {
        let exposure = &self.exposure;
        expr.resolve_slots(&mut |raw| exposure.get(raw).cloned())
            .map_err(|raw| {
                QueryError::invalid_argument(format!("unresolved column reference '{}'", raw))
            })
    }

    /// Run every task, then attach WHERE. Returns `order` with slots resolved.
    ///
    /// Errors collected while compiling fields and filters abort here, before
    /// any task runs.
    pub(crate) fn finish(
        &mut self,
        conditions: Vec<Expr>,
        mut order: Vec<OrderByExpr>,
    ) -> CompileResult<Vec<OrderByExpr>> {
        std::mem::take(&mut self.errors).into_result()?;
        self.run_tasks()?;
        if self.grouped {
            self.wrap(false);
        }

        let mut all = std::mem::take(&mut self.conditions);
        all.extend(conditions);
        if let Some(mut condition) = and_all(all) {
            self.resolve(&mut condition)?;
            self.query.add_filter(condition);
        }
        for term in &mut order {
            self.resolve(&mut term.expr)?;
        }
        Ok(order)
    }

    pub(crate) fn into_output(self) -> (Query, AliasTable, RowShape) {
        (
            self.query,
            self.aliases,
            RowShape::new(self.outputs, self.nullable),
        )
    }
}

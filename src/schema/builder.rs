//! Schema construction.
//!
//! Construction happens in two phases:
//! - Phase 1: create one node per entity and validate its own keys
//! - Phase 2: create relationship edges once every target exists

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;
use petgraph::graph::DiGraph;

use super::entity::{CustomField, DefaultOptions, Entity, VirtualField};
use super::relationship::{fragment_entities, Relationship};
use super::{RelationshipEdge, Schema, SchemaError, SchemaResult};
use crate::hooks::{FieldVisibility, SelectHooks};

/// Declarative description of one entity, consumed by [`SchemaBuilder`].
#[must_use = "builders have no effect until used"]
pub struct EntityDef {
    name: String,
    table: String,
    primary_key: String,
    available: Vec<String>,
    defaults: Option<Vec<String>>,
    searchable: Vec<String>,
    relations: Vec<(String, String, Relationship)>,
    virtuals: IndexMap<String, VirtualField>,
    customs: IndexMap<String, CustomField>,
    default_options: DefaultOptions,
    hooks: Option<Arc<dyn SelectHooks>>,
    visibility: Option<Arc<dyn FieldVisibility>>,
}

fn owned(keys: &[&str]) -> Vec<String> {
    keys.iter().map(|k| k.to_string()).collect()
}

impl EntityDef {
    /// New entity whose table shares its name and whose primary key is `id`.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            table: name.into(),
            primary_key: "id".into(),
            available: Vec::new(),
            defaults: None,
            searchable: Vec::new(),
            relations: Vec::new(),
            virtuals: IndexMap::new(),
            customs: IndexMap::new(),
            default_options: DefaultOptions::default(),
            hooks: None,
            visibility: None,
        }
    }

    pub fn table(mut self, table: &str) -> Self {
        self.table = table.into();
        self
    }

    pub fn primary_key(mut self, key: &str) -> Self {
        self.primary_key = key.into();
        self
    }

    /// Stored columns that may be requested.
    pub fn columns(mut self, keys: &[&str]) -> Self {
        self.available = owned(keys);
        self
    }

    /// Columns returned when the request names none. Defaults to every column.
    pub fn defaults(mut self, keys: &[&str]) -> Self {
        self.defaults = Some(owned(keys));
        self
    }

    pub fn searchable(mut self, keys: &[&str]) -> Self {
        self.searchable = owned(keys);
        self
    }

    pub fn belongs_to(self, name: &str, target: &str, foreign_key: &str) -> Self {
        self.relation(
            name,
            target,
            Relationship::BelongsTo {
                foreign_key: foreign_key.into(),
                owner_key: None,
            },
        )
    }

    pub fn has_one(self, name: &str, target: &str, foreign_key: &str) -> Self {
        self.relation(
            name,
            target,
            Relationship::HasOne {
                foreign_key: foreign_key.into(),
                local_key: None,
            },
        )
    }

    pub fn has_many(self, name: &str, target: &str, foreign_key: &str) -> Self {
        self.relation(
            name,
            target,
            Relationship::HasMany {
                foreign_key: foreign_key.into(),
                local_key: None,
            },
        )
    }

    pub fn relation(mut self, name: &str, target: &str, relationship: Relationship) -> Self {
        self.relations
            .push((name.into(), target.into(), relationship));
        self
    }

    pub fn virtual_field(mut self, name: &str, field: VirtualField) -> Self {
        self.virtuals.insert(name.into(), field);
        self
    }

    pub fn custom(mut self, name: &str, field: CustomField) -> Self {
        self.customs.insert(name.into(), field);
        self
    }

    pub fn default_options(mut self, options: DefaultOptions) -> Self {
        self.default_options = options;
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn SelectHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn visibility(mut self, visibility: Arc<dyn FieldVisibility>) -> Self {
        self.visibility = Some(visibility);
        self
    }
}

/// Collects entity definitions and builds a validated [`Schema`].
#[derive(Default)]
#[must_use = "builders have no effect until used"]
pub struct SchemaBuilder {
    entities: Vec<EntityDef>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity(mut self, def: EntityDef) -> Self {
        self.entities.push(def);
        self
    }

    pub fn add_entity(&mut self, def: EntityDef) {
        self.entities.push(def);
    }

    pub fn build(self) -> SchemaResult<Schema> {
        let mut graph = DiGraph::new();
        let mut entity_index = HashMap::new();
        let mut pending = Vec::new();

        // Phase 1: Create all nodes
        for def in self.entities {
            if entity_index.contains_key(&def.name) {
                return Err(SchemaError::DuplicateEntity(def.name));
            }
            validate_keys(&def)?;

            let mut available = def.available;
            if !available.contains(&def.primary_key) {
                available.insert(0, def.primary_key.clone());
            }
            let default_keys = def.defaults.unwrap_or_else(|| available.clone());

            let entity = Entity {
                name: def.name.clone(),
                table: def.table,
                primary_key: def.primary_key,
                available_keys: available,
                default_keys,
                searchable_keys: def.searchable,
                virtuals: def.virtuals,
                customs: def.customs,
                default_options: def.default_options,
                hooks: def.hooks,
                visibility: def.visibility,
                relations: IndexMap::new(),
            };
            let id = graph.add_node(entity);
            entity_index.insert(def.name, id);
            pending.push((id, def.relations));
        }

        let lookup = |name: &str| {
            entity_index
                .get(name)
                .copied()
                .ok_or_else(|| SchemaError::EntityNotFound(name.to_string()))
        };

        // Phase 2: Create relationship edges
        for (id, relations) in pending {
            for (name, target, relationship) in relations {
                let target_id = lookup(&target)?;
                for referenced in relationship.referenced_entities() {
                    lookup(referenced)?;
                }
                check_relationship(&graph[id], &name, &target, &relationship)?;

                let edge = graph.add_edge(
                    id,
                    target_id,
                    RelationshipEdge {
                        name: name.clone(),
                        relationship,
                    },
                );
                graph[id].relations.insert(name, edge);
            }

            let entity: &Entity = &graph[id];
            for custom in entity.customs.values() {
                let names = custom
                    .joins
                    .iter()
                    .map(|j| j.entity.as_str())
                    .chain(fragment_entities(&custom.join_raw))
                    .chain(fragment_entities(&custom.expression));
                for referenced in names {
                    lookup(referenced)?;
                }
            }
        }

        Ok(Schema::from_parts(graph, entity_index))
    }
}

fn invalid_key(entity: &str, key: &str, reason: &str) -> SchemaError {
    SchemaError::InvalidKey {
        entity: entity.into(),
        key: key.into(),
        reason: reason.into(),
    }
}

fn validate_keys(def: &EntityDef) -> SchemaResult<()> {
    let columns: HashSet<&str> = def
        .available
        .iter()
        .map(String::as_str)
        .chain(std::iter::once(def.primary_key.as_str()))
        .collect();

    let mut seen: HashSet<&str> = columns.clone();
    let extra = def
        .virtuals
        .keys()
        .chain(def.customs.keys())
        .chain(def.relations.iter().map(|(name, _, _)| name));
    for name in extra {
        if !seen.insert(name.as_str()) {
            return Err(SchemaError::DuplicateField {
                entity: def.name.clone(),
                field: name.clone(),
            });
        }
    }

    for key in def.defaults.iter().flatten().chain(&def.searchable) {
        if !columns.contains(key.as_str()) {
            return Err(invalid_key(&def.name, key, "not an available column"));
        }
    }

    for (name, field) in &def.virtuals {
        for required in &field.requires {
            if !columns.contains(required.as_str()) && !def.virtuals.contains_key(required) {
                return Err(invalid_key(
                    &def.name,
                    required,
                    &format!("required by virtual '{}' but not declared", name),
                ));
            }
        }
    }

    Ok(())
}

fn check_relationship(
    source: &Entity,
    name: &str,
    target: &str,
    relationship: &Relationship,
) -> SchemaResult<()> {
    let local = relationship.local_key(&source.primary_key);
    if !source.has_column(local) {
        return Err(invalid_key(
            &source.name,
            local,
            &format!("relationship '{}' needs it as a column", name),
        ));
    }

    match relationship {
        Relationship::HasOneThrough { chain } | Relationship::HasManyThrough { chain } => {
            match chain.last() {
                None => Err(invalid_key(&source.name, name, "through chain is empty")),
                Some(last) if last.entity != target => Err(invalid_key(
                    &source.name,
                    name,
                    "last link of a through chain must be the target",
                )),
                Some(_) => Ok(()),
            }
        }
        Relationship::HasOneCustom { joins } | Relationship::HasManyCustom { joins, .. }
            if joins.is_empty() =>
        {
            Err(invalid_key(&source.name, name, "custom relationship has no joins"))
        }
        _ => Ok(()),
    }
}

//! Entity registry.
//!
//! Entities live in a `petgraph` arena and are referenced by [`EntityId`]
//! handles; relationships are edges. Mutual references (A belongs to B,
//! B has many A) are just two edges, so nothing here owns anything cyclic.

mod builder;
pub mod config;
mod entity;
mod relationship;

pub use builder::{EntityDef, SchemaBuilder};
pub use config::SchemaConfig;
pub use entity::{
    CustomField, DefaultOptions, Entity, VirtualField, VirtualFn, VirtualValue,
};
pub use relationship::{
    parse_template, Correlation, CustomJoin, Fragment, Link, RelationKind, Relationship,
    TARGET_ALIAS,
};

use std::collections::HashMap;

use petgraph::graph::{DiGraph, NodeIndex};

/// Handle to an entity in a [`Schema`].
pub type EntityId = NodeIndex;

/// Errors raised while registering or loading a schema.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Duplicate entity name: {0}")]
    DuplicateEntity(String),

    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    #[error("Duplicate field '{field}' on entity '{entity}'")]
    DuplicateField { entity: String, field: String },

    #[error("Invalid key '{key}' on entity '{entity}': {reason}")]
    InvalidKey {
        entity: String,
        key: String,
        reason: String,
    },

    #[error("Invalid fragment: {0}")]
    InvalidFragment(String),

    #[error("Failed to read schema file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse schema file: {0}")]
    ParseError(#[from] toml::de::Error),
}

pub type SchemaResult<T> = Result<T, SchemaError>;

/// Edge payload: a named relationship.
#[derive(Debug, Clone)]
pub struct RelationshipEdge {
    pub name: String,
    pub relationship: Relationship,
}

/// A relationship as seen from its source entity.
#[derive(Debug, Clone, Copy)]
pub struct RelationRef<'a> {
    pub name: &'a str,
    pub relationship: &'a Relationship,
    pub source: EntityId,
    pub target: EntityId,
}

impl RelationRef<'_> {
    pub fn kind(&self) -> RelationKind {
        self.relationship.kind()
    }

    pub fn is_to_many(&self) -> bool {
        self.relationship.is_to_many()
    }
}

/// The entity graph.
#[derive(Debug, Default)]
pub struct Schema {
    graph: DiGraph<Entity, RelationshipEdge>,

    /// Index: entity name -> NodeIndex
    entity_index: HashMap<String, EntityId>,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::new()
    }

    pub fn entity(&self, id: EntityId) -> &Entity {
        &self.graph[id]
    }

    pub fn entity_id(&self, name: &str) -> Option<EntityId> {
        self.entity_index.get(name).copied()
    }

    /// Look up an entity by name.
    pub fn lookup(&self, name: &str) -> SchemaResult<EntityId> {
        self.entity_id(name)
            .ok_or_else(|| SchemaError::EntityNotFound(name.to_string()))
    }

    pub fn entity_by_name(&self, name: &str) -> Option<&Entity> {
        self.entity_id(name).map(|id| &self.graph[id])
    }

    pub fn entities(&self) -> impl Iterator<Item = (EntityId, &Entity)> {
        self.graph
            .node_indices()
            .map(move |id| (id, &self.graph[id]))
    }

    pub fn relationship(&self, id: EntityId, name: &str) -> Option<RelationRef<'_>> {
        let edge = *self.graph[id].relations.get(name)?;
        let (source, target) = self.graph.edge_endpoints(edge)?;
        let payload = &self.graph[edge];
        Some(RelationRef {
            name: &payload.name,
            relationship: &payload.relationship,
            source,
            target,
        })
    }

    /// Relationships of `id` in declaration order.
    pub fn relationships(&self, id: EntityId) -> Vec<RelationRef<'_>> {
        self.graph[id]
            .relations
            .keys()
            .filter_map(|name| self.relationship(id, name))
            .collect()
    }

    pub(crate) fn from_parts(
        graph: DiGraph<Entity, RelationshipEdge>,
        entity_index: HashMap<String, EntityId>,
    ) -> Self {
        Self {
            graph,
            entity_index,
        }
    }
}

//! Declarative schema files.
//!
//! Everything except virtual transforms and hooks can be described in TOML:
//!
//! ```toml
//! [entities.users]
//! columns = ["id", "name", "email"]
//! defaults = ["id", "name"]
//! searchable = ["name", "email"]
//!
//! [entities.users.relationships.posts]
//! type = "has_many"
//! target = "posts"
//! foreign_key = "author_id"
//!
//! [entities.users.customs.post_count]
//! aggregate = true
//! joins = [{ entity = "posts", alias = "p", on = "{p.author_id} = {id}" }]
//! field = "COUNT({p.id})"
//! ```
//!
//! Fragment templates use `{@entity alias}`, `{alias.key}` and `{key}`
//! placeholders (see [`parse_template`]).

use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use serde::Deserialize;

use super::builder::{EntityDef, SchemaBuilder};
use super::entity::{CustomField, DefaultOptions};
use super::relationship::{parse_template, Correlation, CustomJoin, Link, Relationship};
use super::{Schema, SchemaResult};

/// Root of a schema file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    pub entities: IndexMap<String, EntityConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EntityConfig {
    /// Table name; defaults to the entity name.
    pub table: Option<String>,
    pub primary_key: Option<String>,
    pub columns: Vec<String>,
    pub defaults: Option<Vec<String>>,
    pub searchable: Vec<String>,
    pub options: DefaultOptions,
    pub relationships: IndexMap<String, RelationshipConfig>,
    pub customs: IndexMap<String, CustomFieldConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelationshipConfig {
    BelongsTo {
        target: String,
        foreign_key: String,
        owner_key: Option<String>,
    },
    HasOne {
        target: String,
        foreign_key: String,
        local_key: Option<String>,
    },
    HasMany {
        target: String,
        foreign_key: String,
        local_key: Option<String>,
    },
    HasOneCustom {
        target: String,
        joins: String,
    },
    HasManyCustom {
        target: String,
        joins: String,
        /// `alias.key` of the column holding the parent key.
        correlation: String,
        local_key: Option<String>,
    },
    HasOneThrough {
        through: Vec<LinkConfig>,
    },
    HasManyThrough {
        through: Vec<LinkConfig>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkConfig {
    pub entity: String,
    pub parent_key: String,
    pub key: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CustomFieldConfig {
    pub joins: Vec<CustomJoinConfig>,
    pub join_raw: Option<String>,
    pub field: String,
    pub aggregate: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CustomJoinConfig {
    pub entity: String,
    pub alias: String,
    pub on: String,
}

impl SchemaConfig {
    /// Load a schema file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> SchemaResult<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_str(&content)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> SchemaResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Convert into builder definitions.
    pub fn into_builder(self) -> SchemaResult<SchemaBuilder> {
        let mut builder = SchemaBuilder::new();
        for (name, config) in self.entities {
            builder.add_entity(config.into_def(&name)?);
        }
        Ok(builder)
    }

    pub fn build(self) -> SchemaResult<Schema> {
        self.into_builder()?.build()
    }
}

fn refs(keys: &[String]) -> Vec<&str> {
    keys.iter().map(String::as_str).collect()
}

impl EntityConfig {
    fn into_def(self, name: &str) -> SchemaResult<EntityDef> {
        let mut def = EntityDef::new(name)
            .columns(&refs(&self.columns))
            .searchable(&refs(&self.searchable))
            .default_options(self.options);
        if let Some(table) = &self.table {
            def = def.table(table);
        }
        if let Some(pk) = &self.primary_key {
            def = def.primary_key(pk);
        }
        if let Some(defaults) = &self.defaults {
            def = def.defaults(&refs(defaults));
        }

        for (rel_name, rel) in self.relationships {
            let (target, relationship) = rel.into_relationship()?;
            def = def.relation(&rel_name, &target, relationship);
        }

        for (field_name, custom) in self.customs {
            def = def.custom(&field_name, custom.into_field()?);
        }

        Ok(def)
    }
}

fn links(through: Vec<LinkConfig>) -> Vec<Link> {
    through
        .into_iter()
        .map(|l| Link {
            entity: l.entity,
            parent_key: l.parent_key,
            key: l.key,
        })
        .collect()
}

impl RelationshipConfig {
    fn into_relationship(self) -> SchemaResult<(String, Relationship)> {
        Ok(match self {
            RelationshipConfig::BelongsTo {
                target,
                foreign_key,
                owner_key,
            } => (
                target,
                Relationship::BelongsTo {
                    foreign_key,
                    owner_key,
                },
            ),
            RelationshipConfig::HasOne {
                target,
                foreign_key,
                local_key,
            } => (
                target,
                Relationship::HasOne {
                    foreign_key,
                    local_key,
                },
            ),
            RelationshipConfig::HasMany {
                target,
                foreign_key,
                local_key,
            } => (
                target,
                Relationship::HasMany {
                    foreign_key,
                    local_key,
                },
            ),
            RelationshipConfig::HasOneCustom { target, joins } => (
                target,
                Relationship::HasOneCustom {
                    joins: parse_template(&joins)?,
                },
            ),
            RelationshipConfig::HasManyCustom {
                target,
                joins,
                correlation,
                local_key,
            } => (
                target,
                Relationship::HasManyCustom {
                    joins: parse_template(&joins)?,
                    correlation: Correlation::parse(&correlation)?,
                    local_key,
                },
            ),
            RelationshipConfig::HasOneThrough { through } => {
                let chain = links(through);
                let target = chain.last().map(|l| l.entity.clone()).unwrap_or_default();
                (target, Relationship::HasOneThrough { chain })
            }
            RelationshipConfig::HasManyThrough { through } => {
                let chain = links(through);
                let target = chain.last().map(|l| l.entity.clone()).unwrap_or_default();
                (target, Relationship::HasManyThrough { chain })
            }
        })
    }
}

impl CustomFieldConfig {
    fn into_field(self) -> SchemaResult<CustomField> {
        let mut field = CustomField::expression(parse_template(&self.field)?);
        for join in self.joins {
            field = field.with_join(CustomJoin::new(
                &join.entity,
                &join.alias,
                parse_template(&join.on)?,
            ));
        }
        if let Some(raw) = &self.join_raw {
            field = field.with_join_raw(parse_template(raw)?);
        }
        if self.aggregate {
            field = field.aggregating();
        }
        Ok(field)
    }
}

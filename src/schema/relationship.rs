//! Relationship kinds and join fragment descriptors.

use std::sync::LazyLock;

use regex::Regex;

use super::SchemaError;

/// Alias name that always refers to the related entity's alias.
pub const TARGET_ALIAS: &str = "$target";

/// How two entities are joined. One variant per join strategy.
#[derive(Debug, Clone, PartialEq)]
pub enum Relationship {
    /// `target.owner_key (default pk) = local.foreign_key`
    BelongsTo {
        foreign_key: String,
        owner_key: Option<String>,
    },
    /// `target.foreign_key = local.local_key (default pk)`
    HasOne {
        foreign_key: String,
        local_key: Option<String>,
    },
    /// Same join as `HasOne`, many rows per parent.
    HasMany {
        foreign_key: String,
        local_key: Option<String>,
    },
    /// Full join clauses written as fragments.
    HasOneCustom { joins: Vec<Fragment> },
    /// Fragments joined from the target; `correlation` names the column
    /// holding the parent key value.
    HasManyCustom {
        joins: Vec<Fragment>,
        correlation: Correlation,
        local_key: Option<String>,
    },
    /// Chain of intermediate joins; the last link is the target.
    HasOneThrough { chain: Vec<Link> },
    HasManyThrough { chain: Vec<Link> },
}

/// Cardinality as seen from the parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    ToOne,
    ToMany,
}

impl Relationship {
    pub fn kind(&self) -> RelationKind {
        match self {
            Relationship::BelongsTo { .. }
            | Relationship::HasOne { .. }
            | Relationship::HasOneCustom { .. }
            | Relationship::HasOneThrough { .. } => RelationKind::ToOne,
            Relationship::HasMany { .. }
            | Relationship::HasManyCustom { .. }
            | Relationship::HasManyThrough { .. } => RelationKind::ToMany,
        }
    }

    pub fn is_to_many(&self) -> bool {
        self.kind() == RelationKind::ToMany
    }

    /// Column on the parent that must be selected for this relation to be
    /// joined or populated.
    pub fn local_key<'a>(&'a self, primary_key: &'a str) -> &'a str {
        match self {
            Relationship::BelongsTo { foreign_key, .. } => foreign_key,
            Relationship::HasOne { local_key, .. }
            | Relationship::HasMany { local_key, .. }
            | Relationship::HasManyCustom { local_key, .. } => {
                local_key.as_deref().unwrap_or(primary_key)
            }
            Relationship::HasOneThrough { chain } | Relationship::HasManyThrough { chain } => chain
                .first()
                .map(|link| link.parent_key.as_str())
                .unwrap_or(primary_key),
            Relationship::HasOneCustom { .. } => primary_key,
        }
    }

    /// Every entity name the relationship mentions besides its target.
    pub(crate) fn referenced_entities(&self) -> Vec<&str> {
        match self {
            Relationship::HasOneCustom { joins } | Relationship::HasManyCustom { joins, .. } => {
                fragment_entities(joins)
            }
            Relationship::HasOneThrough { chain } | Relationship::HasManyThrough { chain } => {
                chain.iter().map(|link| link.entity.as_str()).collect()
            }
            _ => Vec::new(),
        }
    }
}

/// One hop in a through relationship: `entity.key = previous.parent_key`.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub entity: String,
    pub parent_key: String,
    pub key: String,
}

impl Link {
    pub fn new(entity: &str, parent_key: &str, key: &str) -> Self {
        Self {
            entity: entity.into(),
            parent_key: parent_key.into(),
            key: key.into(),
        }
    }
}

/// Column carrying the parent key in a custom to-many join.
#[derive(Debug, Clone, PartialEq)]
pub struct Correlation {
    pub alias: String,
    pub key: String,
}

impl Correlation {
    pub fn new(alias: &str, key: &str) -> Self {
        Self {
            alias: alias.into(),
            key: key.into(),
        }
    }

    /// Parse `alias.key`.
    pub fn parse(text: &str) -> Result<Self, SchemaError> {
        match text.split_once('.') {
            Some((alias, key)) if !alias.is_empty() && !key.is_empty() => {
                Ok(Self::new(alias, key))
            }
            _ => Err(SchemaError::InvalidFragment(format!(
                "correlation must be alias.key, got '{}'",
                text
            ))),
        }
    }
}

/// A piece of a join or expression descriptor.
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    /// Trusted SQL text.
    Sql(String),
    /// `` `table` AS `generated` `` for a descriptor-local alias.
    Entity { entity: String, alias: String },
    /// Column on a descriptor-local alias (or `$target`).
    Key { alias: String, key: String },
    /// Column on the alias the descriptor is resolved from.
    OwnKey(String),
}

/// `LEFT JOIN entity AS alias ON <on>` declared by a custom field.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomJoin {
    pub entity: String,
    pub alias: String,
    pub on: Vec<Fragment>,
}

impl CustomJoin {
    pub fn new(entity: &str, alias: &str, on: Vec<Fragment>) -> Self {
        Self {
            entity: entity.into(),
            alias: alias.into(),
            on,
        }
    }
}

/// Pattern for `{@entity alias}`, `{alias.key}` and `{key}` placeholders
static PLACEHOLDER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\{(?:@(?P<entity>[A-Za-z_]\w*)\s+(?P<as>\$?[A-Za-z_]\w*)|(?P<alias>\$?[A-Za-z_]\w*)\.(?P<key>[A-Za-z_]\w*)|(?P<own>[A-Za-z_]\w*))\}",
    )
    .unwrap()
});

impl Fragment {
    pub fn sql(text: &str) -> Self {
        Fragment::Sql(text.into())
    }

    pub fn entity(entity: &str, alias: &str) -> Self {
        Fragment::Entity {
            entity: entity.into(),
            alias: alias.into(),
        }
    }

    pub fn key(alias: &str, key: &str) -> Self {
        Fragment::Key {
            alias: alias.into(),
            key: key.into(),
        }
    }

    pub fn own(key: &str) -> Self {
        Fragment::OwnKey(key.into())
    }
}

/// Parse a fragment template.
///
/// Placeholders inside braces:
/// - `{@entity alias}` becomes [`Fragment::Entity`]
/// - `{alias.key}` becomes [`Fragment::Key`] (`$target` allowed as alias)
/// - `{key}` becomes [`Fragment::OwnKey`]
///
/// Everything else is kept as trusted SQL. An unmatched `{` is an error.
pub fn parse_template(template: &str) -> Result<Vec<Fragment>, SchemaError> {
    let mut fragments = Vec::new();
    let mut last = 0;

    for caps in PLACEHOLDER_PATTERN.captures_iter(template) {
        let Some(whole) = caps.get(0) else { continue };
        push_sql(&mut fragments, &template[last..whole.start()])?;
        last = whole.end();

        if let (Some(entity), Some(alias)) = (caps.name("entity"), caps.name("as")) {
            fragments.push(Fragment::entity(entity.as_str(), alias.as_str()));
        } else if let (Some(alias), Some(key)) = (caps.name("alias"), caps.name("key")) {
            fragments.push(Fragment::key(alias.as_str(), key.as_str()));
        } else if let Some(own) = caps.name("own") {
            fragments.push(Fragment::own(own.as_str()));
        }
    }
    push_sql(&mut fragments, &template[last..])?;

    Ok(fragments)
}

fn push_sql(fragments: &mut Vec<Fragment>, text: &str) -> Result<(), SchemaError> {
    if text.is_empty() {
        return Ok(());
    }
    if text.contains('{') || text.contains('}') {
        return Err(SchemaError::InvalidFragment(format!(
            "malformed placeholder in '{}'",
            text
        )));
    }
    fragments.push(Fragment::Sql(text.into()));
    Ok(())
}

pub(crate) fn fragment_entities(fragments: &[Fragment]) -> Vec<&str> {
    fragments
        .iter()
        .filter_map(|f| match f {
            Fragment::Entity { entity, .. } => Some(entity.as_str()),
            _ => None,
        })
        .collect()
}

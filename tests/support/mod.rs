//! Shared fixtures: a blog schema and a recording backend.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use relquery::backend::{Backend, BackendResult, Row};
use relquery::config::CompilerSettings;
use relquery::schema::{
    parse_template, Correlation, EntityDef, Link, Relationship, Schema, SchemaBuilder,
};
use relquery::sql::Statement;
use serde_json::Value;
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;

type Responder = dyn Fn(&Statement) -> BackendResult<Vec<Row>> + Send + Sync;

/// Backend answering from a closure and recording every statement.
pub struct RecordingBackend {
    responder: Box<Responder>,
    log: Mutex<Vec<Statement>>,
}

impl RecordingBackend {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&Statement) -> BackendResult<Vec<Row>> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn statements(&self) -> Vec<Statement> {
        self.log.lock().unwrap().clone()
    }

    /// Statements whose SQL contains `needle`.
    pub fn matching(&self, needle: &str) -> Vec<Statement> {
        self.statements()
            .into_iter()
            .filter(|s| s.sql.contains(needle))
            .collect()
    }
}

#[async_trait]
impl Backend for RecordingBackend {
    async fn execute(&self, statement: &Statement) -> BackendResult<Vec<Row>> {
        self.log.lock().unwrap().push(statement.clone());
        (self.responder)(statement)
    }
}

/// JSON array of objects into rows.
pub fn rows(value: Value) -> Vec<Row> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) => map,
                other => panic!("row must be an object, got {}", other),
            })
            .collect(),
        other => panic!("rows must be an array, got {}", other),
    }
}

/// users -< posts -< comments, posts >- users (author).
pub fn blog_builder() -> SchemaBuilder {
    SchemaBuilder::new()
        .entity(
            EntityDef::new("users")
                .columns(&["id", "name", "email", "age"])
                .defaults(&["id", "name"])
                .searchable(&["name", "email"])
                .has_many("posts", "posts", "author_id"),
        )
        .entity(
            EntityDef::new("posts")
                .columns(&["id", "title", "body", "author_id", "created", "published"])
                .defaults(&["id", "title"])
                .belongs_to("author", "users", "author_id")
                .has_many("comments", "comments", "post_id"),
        )
        .entity(
            EntityDef::new("comments")
                .columns(&["id", "post_id", "body", "approved", "score"])
                .defaults(&["id", "body"]),
        )
}

pub fn blog() -> Schema {
    blog_builder().build().unwrap()
}

pub fn blog_arc() -> Arc<Schema> {
    Arc::new(blog())
}

/// Users with one relationship of every join strategy besides the plain
/// foreign keys of [`blog`].
///
/// - `profile`: has one, `profiles.user_id`
/// - `team`: has one through `memberships`
/// - `avatar`: has one by custom join through `profiles`
/// - `groups`: has many through `memberships`
/// - `followers`: has many by custom join on `follows`, correlated on `follows.user_id`
pub fn social() -> Schema {
    let memberships = || {
        vec![
            Link::new("memberships", "id", "user_id"),
            Link::new("teams", "team_id", "id"),
        ]
    };
    SchemaBuilder::new()
        .entity(
            EntityDef::new("users")
                .columns(&["id", "name"])
                .has_one("profile", "profiles", "user_id")
                .relation(
                    "team",
                    "teams",
                    Relationship::HasOneThrough { chain: memberships() },
                )
                .relation(
                    "avatar",
                    "images",
                    Relationship::HasOneCustom {
                        joins: parse_template(
                            "LEFT JOIN {@profiles p} ON {p.user_id} = {id} \
                             LEFT JOIN {@images $target} ON {$target.id} = {p.image_id}",
                        )
                        .unwrap(),
                    },
                )
                .relation(
                    "groups",
                    "teams",
                    Relationship::HasManyThrough { chain: memberships() },
                )
                .relation(
                    "followers",
                    "users",
                    Relationship::HasManyCustom {
                        joins: parse_template("INNER JOIN {@follows f} ON {f.follower_id} = {$target.id}")
                            .unwrap(),
                        correlation: Correlation::new("f", "user_id"),
                        local_key: None,
                    },
                ),
        )
        .entity(EntityDef::new("profiles").columns(&["id", "user_id", "image_id", "bio"]))
        .entity(EntityDef::new("images").columns(&["id", "url"]))
        .entity(EntityDef::new("teams").columns(&["id", "label"]))
        .entity(EntityDef::new("memberships").columns(&["id", "user_id", "team_id"]))
        .entity(EntityDef::new("follows").columns(&["id", "user_id", "follower_id"]))
        .build()
        .unwrap()
}

pub fn settings() -> CompilerSettings {
    CompilerSettings::default()
}

/// Panics with the SQL when MySQL's grammar rejects it.
pub fn assert_valid_sql(sql: &str) {
    if let Err(e) = Parser::parse_sql(&MySqlDialect {}, sql) {
        panic!("invalid SQL: {}\n{}", e, sql);
    }
}

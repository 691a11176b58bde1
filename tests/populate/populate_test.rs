//! Batch population of to-many relations.

#[path = "../support/mod.rs"]
mod support;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use relquery::backend::{BackendError, BackendResult, Row};
use relquery::compiler::Compiler;
use relquery::config::CompilerSettings;
use relquery::error::QueryResult;
use relquery::hooks::{HiddenFields, Page, Params, SelectContext, SelectHooks};
use relquery::populate::Population;
use relquery::request::Projection;
use relquery::schema::{EntityDef, Schema, SchemaBuilder};
use relquery::sql::Statement;
use serde_json::{json, Value};
use support::{blog, rows, social, RecordingBackend};

/// Answers the posts-of-users batch: P1 has three posts, P2 one, P3 none.
fn users_posts() -> impl Fn(&Statement) -> BackendResult<Vec<Row>> + Send + Sync + 'static {
    |statement: &Statement| {
        let sql = &statement.sql;
        if sql.contains("`__c`") {
            Ok(rows(json!([
                {"__fk": 1, "total": 3},
                {"__fk": 2, "total": 1}
            ])))
        } else if sql.contains("`__page`") {
            Ok(rows(json!([
                {"t0$id": 10, "t0$title": "a", "__fk": 1, "__rn": 1},
                {"t0$id": 11, "t0$title": "b", "__fk": 1, "__rn": 2},
                {"t0$id": 20, "t0$title": "c", "__fk": 2, "__rn": 1}
            ])))
        } else {
            Ok(Vec::new())
        }
    }
}

fn users() -> Vec<Value> {
    vec![
        json!({"id": 1, "name": "ann"}),
        json!({"id": 2, "name": "bob"}),
        json!({"id": 3, "name": "cy"}),
    ]
}

fn posts_projection() -> Projection {
    Projection::from_value(&json!({
        "name": 1,
        "posts": {"$fields": {"title": 1}, "$options": {"limit": 2}}
    }))
    .unwrap()
}

async fn populate(
    schema: &Schema,
    settings: &CompilerSettings,
    backend: &RecordingBackend,
    entity: &str,
    projection: &Projection,
    data: &mut [Value],
) -> QueryResult<()> {
    let params = Params::new();
    let id = schema.lookup(entity).unwrap();
    let population = Population::new(Compiler::new(schema, settings), backend, &params);
    population.populate(id, projection, data, "").await?;
    Ok(())
}

#[tokio::test]
async fn test_pages_are_paginated_per_parent() {
    let schema = blog();
    let settings = CompilerSettings::default();
    let backend = RecordingBackend::new(users_posts());
    let mut data = users();

    populate(&schema, &settings, &backend, "users", &posts_projection(), &mut data)
        .await
        .unwrap();

    assert_eq!(
        data[0]["posts"],
        json!({
            "limit": 2,
            "skip": 0,
            "orderby": [],
            "total": 3,
            "data": [{"id": 10, "title": "a"}, {"id": 11, "title": "b"}]
        })
    );
    assert_eq!(data[1]["posts"]["total"], json!(1));
    assert_eq!(data[1]["posts"]["data"], json!([{"id": 20, "title": "c"}]));
    assert_eq!(data[2]["posts"]["total"], json!(0));
    assert_eq!(data[2]["posts"]["data"], json!([]));
    assert_eq!(data[0]["name"], json!("ann"));

    // one COUNT and one list query for the whole batch
    assert_eq!(backend.statements().len(), 2);
    let count = backend.matching("`__c`");
    let list = backend.matching("`__page`");
    assert_eq!(count.len(), 1);
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].params, vec![json!(1), json!(2), json!(3)]);
    assert!(list[0].sql.contains("`__page`.`__rn` > 0 AND `__page`.`__rn` <= 2"));
    assert!(count[0].sql.contains("GROUP BY `__c`.`__fk`"));
}

#[tokio::test]
async fn test_string_keys_match_numeric_parents() {
    let schema = blog();
    let settings = CompilerSettings::default();
    let backend = RecordingBackend::new(|statement: &Statement| {
        if statement.sql.contains("`__c`") {
            Ok(rows(json!([{"__fk": "1", "total": "1"}])))
        } else {
            Ok(rows(json!([{"t0$id": 10, "t0$title": "a", "__fk": "1", "__rn": 1}])))
        }
    });
    let mut data = vec![json!({"id": 1, "name": "ann"})];

    populate(&schema, &settings, &backend, "users", &posts_projection(), &mut data)
        .await
        .unwrap();
    assert_eq!(data[0]["posts"]["total"], json!(1));
    assert_eq!(data[0]["posts"]["data"], json!([{"id": 10, "title": "a"}]));
}

#[tokio::test]
async fn test_missing_keys_skip_the_backend() {
    let schema = blog();
    let settings = CompilerSettings::default();
    let backend = RecordingBackend::new(|_: &Statement| Err(BackendError::Connection("unused".into())));
    let mut data = vec![json!({"id": null, "name": "ghost"})];

    populate(&schema, &settings, &backend, "users", &posts_projection(), &mut data)
        .await
        .unwrap();
    assert!(backend.statements().is_empty());
    assert_eq!(
        data[0]["posts"],
        json!({"limit": 2, "skip": 0, "orderby": [], "total": 0, "data": []})
    );

    let mut empty: Vec<Value> = Vec::new();
    populate(&schema, &settings, &backend, "users", &posts_projection(), &mut empty)
        .await
        .unwrap();
    assert!(backend.statements().is_empty());
}

#[tokio::test]
async fn test_backend_errors_propagate() {
    let schema = blog();
    let settings = CompilerSettings::default();
    let backend = RecordingBackend::new(|statement: &Statement| {
        Err(BackendError::query("table is locked", statement))
    });
    let mut data = users();

    let err = populate(&schema, &settings, &backend, "users", &posts_projection(), &mut data)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "Backend");
    assert!(data[0].get("posts").is_none());
}

#[tokio::test]
async fn test_nested_relations_load_per_level() {
    let schema = blog();
    let settings = CompilerSettings::default();
    let backend = RecordingBackend::new(|statement: &Statement| {
        let sql = &statement.sql;
        let comments = sql.contains("FROM `comments`");
        if sql.contains("`__c`") {
            Ok(if comments {
                rows(json!([{"__fk": 10, "total": 1}]))
            } else {
                rows(json!([{"__fk": 1, "total": 1}]))
            })
        } else if comments {
            Ok(rows(json!([{"t0$id": 100, "t0$body": "nice", "__fk": 10, "__rn": 1}])))
        } else {
            Ok(rows(json!([{"t0$id": 10, "t0$title": "a", "__fk": 1, "__rn": 1}])))
        }
    });
    let projection = Projection::from_value(&json!({
        "posts": {"$fields": {"title": 1, "comments": {"$fields": {"body": 1}}}}
    }))
    .unwrap();
    let mut data = vec![json!({"id": 1})];

    populate(&schema, &settings, &backend, "users", &projection, &mut data)
        .await
        .unwrap();

    let post = &data[0]["posts"]["data"][0];
    assert_eq!(post["title"], json!("a"));
    assert_eq!(post["comments"]["total"], json!(1));
    assert_eq!(post["comments"]["data"], json!([{"id": 100, "body": "nice"}]));
    assert_eq!(backend.statements().len(), 4);
    assert_eq!(backend.matching("FROM `comments`").len(), 2);
}

#[tokio::test]
async fn test_depth_limit() {
    let schema = blog();
    let settings = CompilerSettings {
        max_depth: 1,
        ..Default::default()
    };
    let backend = RecordingBackend::new(|statement: &Statement| {
        if statement.sql.contains("`__c`") {
            Ok(rows(json!([{"__fk": 1, "total": 1}])))
        } else {
            Ok(rows(json!([{"t0$id": 10, "t0$title": "a", "__fk": 1, "__rn": 1}])))
        }
    });
    let projection = Projection::from_value(&json!({
        "posts": {"$fields": {"title": 1, "comments": 1}}
    }))
    .unwrap();
    let mut data = vec![json!({"id": 1})];

    let err = populate(&schema, &settings, &backend, "users", &projection, &mut data)
        .await
        .unwrap_err();
    assert!(err.field_errors().unwrap().contains("posts.comments"));
}

#[tokio::test]
async fn test_to_one_children_are_walked() {
    let schema = blog();
    let settings = CompilerSettings::default();
    let backend = RecordingBackend::new(users_posts());
    let projection = Projection::from_value(&json!({
        "title": 1,
        "author": {"$fields": {"name": 1, "posts": {"$fields": {"title": 1}, "$options": {"limit": 2}}}}
    }))
    .unwrap();
    let mut data = vec![
        json!({"id": 10, "title": "a", "author_id": 1, "author": {"id": 1, "name": "ann"}}),
        json!({"id": 30, "title": "z", "author_id": null, "author": null}),
    ];

    populate(&schema, &settings, &backend, "posts", &projection, &mut data)
        .await
        .unwrap();

    assert_eq!(data[0]["author"]["name"], json!("ann"));
    assert_eq!(data[0]["author"]["posts"]["total"], json!(3));
    assert_eq!(data[0]["author"]["posts"]["data"][1]["title"], json!("b"));
    assert_eq!(data[1]["author"], Value::Null);
    assert_eq!(backend.matching("`__page`")[0].params, vec![json!(1)]);
}

#[tokio::test]
async fn test_failed_nested_load_keeps_to_one_children() {
    let schema = blog();
    let settings = CompilerSettings::default();
    let backend = RecordingBackend::new(|statement: &Statement| {
        Err(BackendError::query("server has gone away", statement))
    });
    let projection = Projection::from_value(&json!({
        "title": 1,
        "author": {"$fields": {"name": 1, "posts": 1}}
    }))
    .unwrap();
    let original = json!({"id": 10, "title": "a", "author_id": 1, "author": {"id": 1, "name": "ann"}});
    let mut data = vec![original.clone()];

    let err = populate(&schema, &settings, &backend, "posts", &projection, &mut data)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "Backend");
    assert_eq!(data[0], original);
}

#[tokio::test]
async fn test_custom_correlation_batches() {
    let schema = social();
    let settings = CompilerSettings::default();
    let backend = RecordingBackend::new(|statement: &Statement| {
        if statement.sql.contains("`__c`") {
            Ok(rows(json!([{"__fk": 1, "total": 2}])))
        } else {
            Ok(rows(json!([
                {"__fk": 1, "t0$id": 5, "t0$name": "eve", "__rn": 1},
                {"__fk": 1, "t0$id": 6, "t0$name": "fay", "__rn": 2}
            ])))
        }
    });
    let projection = Projection::from_value(&json!({
        "name": 1,
        "followers": {"$fields": {"name": 1}}
    }))
    .unwrap();
    let mut data = vec![json!({"id": 1, "name": "ann"}), json!({"id": 2, "name": "bob"})];

    populate(&schema, &settings, &backend, "users", &projection, &mut data)
        .await
        .unwrap();

    assert_eq!(data[0]["followers"]["total"], json!(2));
    assert_eq!(
        data[0]["followers"]["data"],
        json!([{"id": 5, "name": "eve"}, {"id": 6, "name": "fay"}])
    );
    assert_eq!(data[1]["followers"]["total"], json!(0));
    assert_eq!(data[1]["followers"]["data"], json!([]));

    let list = backend.matching("`__page`");
    assert_eq!(list.len(), 1);
    assert!(list[0]
        .sql
        .contains("INNER JOIN `follows` AS `t1` ON `t1`.`follower_id` = `t0`.`id`"));
    assert!(list[0].sql.contains("`t1`.`user_id` AS `__fk`"));
    assert_eq!(list[0].params, vec![json!(1), json!(2)]);
}

#[tokio::test]
async fn test_through_relation_batches() {
    let schema = social();
    let settings = CompilerSettings::default();
    let backend = RecordingBackend::new(|statement: &Statement| {
        if statement.sql.contains("`__c`") {
            Ok(rows(json!([{"__fk": "2", "total": 1}])))
        } else {
            Ok(rows(json!([{"__fk": "2", "t0$id": 9, "t0$label": "core", "__rn": 1}])))
        }
    });
    let projection = Projection::from_value(&json!({
        "groups": {"$fields": {"label": 1}}
    }))
    .unwrap();
    let mut data = vec![json!({"id": 1}), json!({"id": 2})];

    populate(&schema, &settings, &backend, "users", &projection, &mut data)
        .await
        .unwrap();

    assert_eq!(data[0]["groups"]["total"], json!(0));
    assert_eq!(data[1]["groups"]["total"], json!(1));
    assert_eq!(data[1]["groups"]["data"], json!([{"id": 9, "label": "core"}]));
    assert_eq!(backend.matching("INNER JOIN `memberships`").len(), 2);
}

// =============================================================================
// Hooks and visibility
// =============================================================================

#[derive(Default)]
struct AfterLoad {
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl SelectHooks for AfterLoad {
    async fn after_load(&self, page: &mut Page, ctx: &SelectContext<'_>) -> QueryResult<()> {
        self.seen
            .lock()
            .unwrap()
            .push(format!("{}@{}:{}", ctx.entity, ctx.path, page.total));
        for row in page.data.iter_mut() {
            if let Some(object) = row.as_object_mut() {
                object.insert("loaded".into(), json!(true));
            }
        }
        Ok(())
    }
}

fn hooked_schema(hooks: Arc<AfterLoad>) -> Schema {
    SchemaBuilder::new()
        .entity(
            EntityDef::new("users")
                .columns(&["id", "name"])
                .has_many("posts", "posts", "author_id"),
        )
        .entity(
            EntityDef::new("posts")
                .columns(&["id", "title", "author_id"])
                .hooks(hooks)
                .visibility(Arc::new(HiddenFields::new(["title"]))),
        )
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_after_load_and_visibility_run_per_parent() {
    let hooks = Arc::new(AfterLoad::default());
    let schema = hooked_schema(hooks.clone());
    let settings = CompilerSettings::default();
    let backend = RecordingBackend::new(users_posts());
    let mut data = users();

    populate(&schema, &settings, &backend, "users", &posts_projection(), &mut data)
        .await
        .unwrap();

    assert_eq!(
        *hooks.seen.lock().unwrap(),
        vec!["posts@posts:3", "posts@posts:1", "posts@posts:0"]
    );
    assert_eq!(
        data[0]["posts"]["data"],
        json!([{"id": 10, "loaded": true}, {"id": 11, "loaded": true}])
    );
    assert_eq!(data[2]["posts"]["data"], json!([]));
}

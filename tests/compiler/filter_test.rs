//! Filter trees compiled into WHERE clauses.

#[path = "../support/mod.rs"]
mod support;

use relquery::compiler::{CompiledSelect, Compiler};
use relquery::error::QueryResult;
use relquery::request::Request;
use serde_json::{json, Value};
use support::{assert_valid_sql, blog, settings};

fn compile(entity: &str, filter: Value) -> QueryResult<CompiledSelect> {
    let schema = blog();
    let settings = settings();
    let id = schema.lookup(entity).unwrap();
    let request = Request::from_json(&json!({"filter": filter}))?;
    Compiler::new(&schema, &settings).compile(id, &request)
}

/// The outermost WHERE line of a compiled select.
fn where_of(compiled: &CompiledSelect) -> String {
    compiled
        .select
        .sql
        .lines()
        .filter_map(|line| line.strip_prefix("WHERE "))
        .last()
        .unwrap_or_default()
        .to_string()
}

#[test]
fn test_null_semantics() {
    assert_eq!(where_of(&compile("posts", json!({"title": null})).unwrap()), "`t0`.`title` IS NULL");
    assert_eq!(
        where_of(&compile("posts", json!({"title": {"$e": null}})).unwrap()),
        "`t0`.`title` IS NULL"
    );
    assert_eq!(
        where_of(&compile("posts", json!({"title": {"$ne": null}})).unwrap()),
        "`t0`.`title` IS NOT NULL"
    );

    let compiled = compile("posts", json!({"title": {"$ne": "x"}})).unwrap();
    assert_eq!(where_of(&compiled), "`t0`.`title` <> ?");
    assert_eq!(compiled.select.params, vec![json!("x")]);
}

#[test]
fn test_empty_lists() {
    assert_eq!(where_of(&compile("posts", json!({"id": {"$in": []}})).unwrap()), "FALSE");
    assert_eq!(where_of(&compile("posts", json!({"id": {"$nin": []}})).unwrap()), "TRUE");
}

#[test]
fn test_array_shorthand_is_in() {
    let compiled = compile("posts", json!({"id": [1, 2, 3]})).unwrap();
    assert_eq!(where_of(&compiled), "`t0`.`id` IN (?, ?, ?)");
    assert_eq!(compiled.select.params, vec![json!(1), json!(2), json!(3)]);
    assert_valid_sql(&compiled.select.sql);
}

#[test]
fn test_logical_operators() {
    let compiled = compile(
        "posts",
        json!({"$or": [{"title": "a"}, {"published": true}]}),
    )
    .unwrap();
    assert_eq!(where_of(&compiled), "`t0`.`title` = ? OR `t0`.`published` = ?");
    assert_eq!(compiled.select.params, vec![json!("a"), json!(true)]);

    let compiled = compile("posts", json!({"$not": {"title": "a"}})).unwrap();
    assert_eq!(where_of(&compiled), "NOT (`t0`.`title` = ?)");

    let compiled = compile("posts", json!({"$nor": [{"title": "a"}, {"title": "b"}]})).unwrap();
    assert_eq!(where_of(&compiled), "NOT (`t0`.`title` = ? OR `t0`.`title` = ?)");
    assert_valid_sql(&compiled.select.sql);
}

#[test]
fn test_implicit_and_keeps_key_order() {
    let compiled = compile("posts", json!({"title": {"$like": "%rust%"}, "published": true})).unwrap();
    assert_eq!(where_of(&compiled), "`t0`.`title` LIKE ? AND `t0`.`published` = ?");
    assert_eq!(compiled.select.params, vec![json!("%rust%"), json!(true)]);
}

#[test]
fn test_raw_sql() {
    let compiled = compile("users", json!({"$raw": "1 = 1"})).unwrap();
    assert_eq!(where_of(&compiled), "(1 = 1)");

    let compiled = compile("users", json!({"age": {"$raw": "> 2 * 3"}})).unwrap();
    assert_eq!(where_of(&compiled), "`t0`.`age` > 2 * 3");
    assert!(compiled.select.params.is_empty());
}

#[test]
fn test_date_values_are_cast() {
    let compiled = compile("posts", json!({"created": {"$gte": "2024-01-31"}})).unwrap();
    assert_eq!(
        where_of(&compiled),
        "CAST(`t0`.`created` AS DATE) >= CAST(? AS DATE)"
    );
    assert_eq!(compiled.select.params, vec![json!("2024-01-31")]);
    assert_valid_sql(&compiled.select.sql);
}

#[test]
fn test_date_shorthands() {
    let compiled = compile("posts", json!({"created": {"$currentyear": true}})).unwrap();
    assert_eq!(where_of(&compiled), "YEAR(`t0`.`created`) = YEAR(CURDATE())");
    assert!(compiled.select.params.is_empty());

    let compiled = compile("posts", json!({"created": {"$currentweek": false}})).unwrap();
    assert_eq!(
        where_of(&compiled),
        "NOT (YEARWEEK(`t0`.`created`, 1) = YEARWEEK(CURDATE(), 1))"
    );
}

#[test]
fn test_to_one_paths() {
    let compiled = compile("posts", json!({"author.name": "ann"})).unwrap();
    assert_eq!(where_of(&compiled), "`t1`.`name` = ?");
    assert!(compiled
        .select
        .sql
        .contains("LEFT JOIN `users` AS `t1` ON `t1`.`id` = `t0`.`author_id`"));
    assert_eq!(
        compiled.aliases.logical_path("t1.name").as_deref(),
        Some("author.name")
    );
    assert_eq!(compiled.aliases.alias_for("author"), Some("t1"));

    // nested object form addresses the same path
    let nested = compile("posts", json!({"author": {"name": "ann"}})).unwrap();
    assert_eq!(nested.select, compiled.select);
}

#[test]
fn test_unknown_paths_are_collected() {
    let err = compile(
        "posts",
        json!({"nope": 1, "author.nope": 2, "title": "ok", "posts.title": "x"}),
    )
    .unwrap_err();
    assert_eq!(err.kind(), "InvalidQueryData");
    let errors = err.field_errors().unwrap();
    assert!(errors.contains("nope"));
    assert!(errors.contains("author.nope"));
    assert!(errors.contains("posts.title"));
    assert!(!errors.contains("title"));
}

#[test]
fn test_to_many_paths_cannot_be_traversed() {
    let err = compile("users", json!({"posts.title": "x"})).unwrap_err();
    assert_eq!(
        err.field_errors().unwrap().get("posts.title"),
        Some("to-many relationships cannot be traversed")
    );
}

#[test]
fn test_aggregate_condition() {
    let compiled = compile(
        "users",
        json!({"posts": {
            "$count": 1,
            "$as": "post_count",
            "$filter": {"published": true},
            "$where": {"$gte": 2}
        }}),
    )
    .unwrap();

    let condition = where_of(&compiled);
    assert!(condition.starts_with("COALESCE("));
    assert!(condition.ends_with(", 0) >= ?"));
    assert_eq!(compiled.select.params, vec![json!(true), json!(2)]);
    assert!(compiled.select.sql.contains("LEFT JOIN (SELECT"));
    assert_valid_sql(&compiled.select.sql);
}

#[test]
fn test_aggregate_condition_requires_alias() {
    let err = compile("users", json!({"posts": {"$count": 1, "$where": {"$gt": 0}}})).unwrap_err();
    assert_eq!(err.kind(), "RequiredAliasMissing");
}

#[test]
fn test_malformed_filters() {
    assert_eq!(compile("users", json!({"$xor": []})).unwrap_err().kind(), "InvalidArgument");
    assert_eq!(
        compile("users", json!({"age": {"$gt": 1, "name": 2}})).unwrap_err().kind(),
        "InvalidArgument"
    );
}

fn compile_request(entity: &str, request: Value) -> QueryResult<CompiledSelect> {
    let schema = blog();
    let settings = settings();
    let id = schema.lookup(entity).unwrap();
    Compiler::new(&schema, &settings).compile(id, &Request::from_json(&request)?)
}

#[test]
fn test_aggregate_alias_shared_with_projection() {
    let compiled = compile_request(
        "posts",
        json!({
            "fields": {"title": 1, "comments": {"$count": 1, "$as": "n"}},
            "filter": {"comments": {"$count": 1, "$as": "n", "$where": {"$gt": 2}}}
        }),
    )
    .unwrap();

    let sql = &compiled.select.sql;
    assert_eq!(sql.matches("LEFT JOIN (SELECT").count(), 1);
    assert!(sql.contains("AS `t0$n`"));
    assert!(where_of(&compiled).ends_with(", 0) > ?"));
    assert_eq!(compiled.select.params, vec![json!(2)]);
    assert_valid_sql(sql);
}

#[test]
fn test_aggregate_alias_conflict() {
    let err = compile_request(
        "posts",
        json!({
            "fields": {"title": 1, "comments": {"$count": 1, "$as": "n"}},
            "filter": {"comments": {"$sum": "score", "$as": "n", "$where": {"$gt": 100}}}
        }),
    )
    .unwrap_err();
    assert_eq!(err.kind(), "InvalidQueryData");
    assert_eq!(
        err.field_errors().unwrap().get("comments"),
        Some("'n' is already the name of a different aggregate")
    );

    let err = compile(
        "posts",
        json!({"$and": [
            {"comments": {"$count": 1, "$as": "n", "$where": {"$gt": 1}}},
            {"comments": {"$count": 1, "$as": "n", "$filter": {"approved": true}, "$where": {"$gt": 1}}}
        ]}),
    )
    .unwrap_err();
    assert!(err.field_errors().unwrap().contains("comments"));
}

#[test]
fn test_aggregate_alias_cannot_shadow_a_field() {
    let err = compile(
        "users",
        json!({"posts": {"$count": 1, "$as": "email", "$where": {"$gt": 1}}}),
    )
    .unwrap_err();
    assert_eq!(err.kind(), "InvalidQueryData");
    assert_eq!(
        err.field_errors().unwrap().get("posts"),
        Some("'email' is already a field of this entity")
    );
}

//! Top-level select compilation through the public compiler API.

#[path = "../support/mod.rs"]
mod support;

use insta::assert_snapshot;
use relquery::compiler::Compiler;
use relquery::config::CompilerSettings;
use relquery::request::{Projection, RelationSpec, Request, SelectOptions};
use relquery::schema::{parse_template, CustomField, EntityDef, Schema};
use serde_json::json;
use support::{assert_valid_sql, blog, blog_builder, rows, settings, social};

fn compile(schema: &Schema, entity: &str, request: serde_json::Value) -> relquery::compiler::CompiledSelect {
    let settings = settings();
    let id = schema.lookup(entity).unwrap();
    let request = Request::from_json(&request).unwrap();
    Compiler::new(schema, &settings).compile(id, &request).unwrap()
}

#[test]
fn test_default_select() {
    let schema = blog();
    let compiled = compile(&schema, "users", json!({}));

    assert_snapshot!(compiled.select.sql, @r"
    SELECT
      `t0`.`id` AS `t0$id`,
      `t0`.`name` AS `t0$name`
    FROM `users` AS `t0`
    LIMIT 25
    ");
    assert!(compiled.select.params.is_empty());
    assert_valid_sql(&compiled.select.sql);
}

#[test]
fn test_empty_projection_means_defaults() {
    let schema = blog();
    let empty = compile(&schema, "users", json!({}));
    let defaulted = compile(&schema, "users", json!({"fields": {"$default": 1}}));
    assert_eq!(empty.select, defaulted.select);
}

#[test]
fn test_count_wraps_unpaginated_select() {
    let schema = blog();
    let compiled = compile(
        &schema,
        "users",
        json!({"filter": {"age": {"$gt": 30}}, "options": {"limit": 5, "orderby": ["-name"]}}),
    );

    let count = &compiled.count.sql;
    assert!(count.starts_with("SELECT\n  COUNT(*) AS `total`\nFROM (SELECT"));
    assert!(count.ends_with(") AS `__count`"));
    assert!(count.contains("WHERE `t0`.`age` > ?"));
    assert!(!count.contains("ORDER BY"));
    assert!(!count.contains("LIMIT"));
    assert_eq!(compiled.count.params, vec![json!(30)]);
    assert_valid_sql(count);
}

#[test]
fn test_filter_order_and_pagination() {
    let schema = blog();
    let compiled = compile(
        &schema,
        "users",
        json!({
            "fields": {"name": 1},
            "filter": {"age": {"$gt": 10}},
            "options": {"orderby": ["-name"], "limit": 5, "skip": 10}
        }),
    );

    let sql = &compiled.select.sql;
    assert!(sql.starts_with("SELECT\n  `t0`.`id` AS `t0$id`,\n  `t0`.`name` AS `t0$name`"));
    assert!(sql.contains("\nFROM `users` AS `t0`\nWHERE `t0`.`age` > ?\n"));
    assert!(sql.ends_with("\nORDER BY `t0`.`name` DESC\nLIMIT 5 OFFSET 10"));
    assert_eq!(compiled.select.params, vec![json!(10)]);
    assert_eq!(compiled.options.orderby_terms(), vec!["-name"]);
    assert_valid_sql(sql);
}

#[test]
fn test_limit_is_clamped() {
    let schema = blog();
    let compiled = compile(&schema, "users", json!({"options": {"limit": 100000}}));
    assert!(compiled.select.sql.ends_with("\nLIMIT 500"));
    assert_eq!(compiled.options.limit, 500);

    let settings = CompilerSettings {
        default_limit: 3,
        ..Default::default()
    };
    let users = schema.lookup("users").unwrap();
    let compiled = Compiler::new(&schema, &settings)
        .compile(users, &Request::default())
        .unwrap();
    assert!(compiled.select.sql.ends_with("\nLIMIT 3"));
}

#[test]
fn test_to_one_relation_is_joined() {
    let schema = blog();
    let compiled = compile(
        &schema,
        "posts",
        json!({"fields": {"title": 1, "author": {"$fields": {"name": 1}}}}),
    );

    let sql = &compiled.select.sql;
    assert!(sql.contains("`t0`.`author_id` AS `t0$author_id`"));
    assert!(sql.contains("`t1`.`id` AS `t1$id`"));
    assert!(sql.contains("`t1`.`name` AS `t1$name`"));
    assert!(sql.contains("\nLEFT JOIN `users` AS `t1` ON `t1`.`id` = `t0`.`author_id`"));
    assert_eq!(compiled.aliases.alias_for("author"), Some("t1"));
    assert_valid_sql(sql);

    let data = compiled.hydrate(&rows(json!([
        {"t0$id": 1, "t0$title": "a", "t0$author_id": 7, "t1$id": 7, "t1$name": "ann"},
        {"t0$id": 2, "t0$title": "b", "t0$author_id": null, "t1$id": null, "t1$name": null}
    ])));
    assert_eq!(
        data,
        vec![
            json!({"id": 1, "title": "a", "author_id": 7, "author": {"id": 7, "name": "ann"}}),
            json!({"id": 2, "title": "b", "author_id": null, "author": null}),
        ]
    );
}

#[test]
fn test_to_one_filter_joins_once() {
    let schema = blog();
    let compiled = compile(
        &schema,
        "posts",
        json!({
            "fields": {"title": 1, "author": {"$fields": {"name": 1}}},
            "filter": {"author.name": "ann"}
        }),
    );

    let sql = &compiled.select.sql;
    assert_eq!(sql.matches("LEFT JOIN").count(), 1);
    assert!(sql.contains("WHERE `t1`.`name` = ?"));
    assert_eq!(compiled.select.params, vec![json!("ann")]);
}

#[test]
fn test_to_many_relation_is_not_joined() {
    let schema = blog();
    let compiled = compile(&schema, "users", json!({"fields": {"name": 1, "posts": 1}}));
    assert!(!compiled.select.sql.contains("JOIN"));
    assert!(!compiled.select.sql.contains("`posts`"));
}

#[test]
fn test_relation_aggregate() {
    let schema = blog();
    let compiled = compile(
        &schema,
        "users",
        json!({"fields": {"name": 1, "posts": {"$count": 1, "$as": "post_count"}}}),
    );

    let sql = &compiled.select.sql;
    assert!(sql.contains("LEFT JOIN (SELECT"));
    assert!(sql.contains("COUNT(*) AS `__value`"));
    assert!(sql.contains("COALESCE("));
    assert!(sql.contains("AS `t0$post_count`"));
    assert!(sql.contains("`author_id`"));
    assert_valid_sql(sql);

    let data = compiled.hydrate(&rows(json!([
        {"t0$id": 1, "t0$name": "ann", "t0$post_count": 3}
    ])));
    assert_eq!(data, vec![json!({"id": 1, "name": "ann", "post_count": 3})]);
}

#[test]
fn test_aggregate_without_alias() {
    let schema = blog();
    let settings = settings();
    let users = schema.lookup("users").unwrap();
    let request = Request::from_json(&json!({"fields": {"posts": {"$count": 1}}})).unwrap();
    let err = Compiler::new(&schema, &settings)
        .compile(users, &request)
        .unwrap_err();
    assert_eq!(err.kind(), "RequiredAliasMissing");
}

#[test]
fn test_custom_field() {
    let schema = blog_builder()
        .entity(
            EntityDef::new("tags")
                .columns(&["id", "label"])
                .custom("shout", CustomField::expression(parse_template("UPPER({label})").unwrap())),
        )
        .build()
        .unwrap();
    let compiled = compile(&schema, "tags", json!({"fields": {"shout": 1}}));

    let sql = &compiled.select.sql;
    assert!(sql.contains("`t0`.`label` AS `t0$label`"));
    assert!(sql.contains("(UPPER(`t0`.`label`)) AS `t0$shout`"));
    assert_valid_sql(sql);

    let data = compiled.hydrate(&rows(json!([
        {"t0$id": 1, "t0$label": "rust", "t0$shout": "RUST"}
    ])));
    assert_eq!(data[0]["shout"], json!("RUST"));
    assert_eq!(data[0]["id"], json!(1));
}

#[test]
fn test_invalid_fields_are_collected() {
    let schema = blog();
    let settings = settings();
    let users = schema.lookup("users").unwrap();
    let request = Request::from_json(&json!({
        "fields": {"name": 1, "bogus": 1, "nope": 1},
        "options": {"orderby": ["missing"]}
    }))
    .unwrap();

    let err = Compiler::new(&schema, &settings)
        .compile(users, &request)
        .unwrap_err();
    assert_eq!(err.kind(), "InvalidQueryData");
    let errors = err.field_errors().unwrap();
    assert!(errors.contains("bogus"));
    assert!(errors.contains("nope"));
    assert!(errors.contains("missing"));
    assert!(!errors.contains("name"));
}

#[test]
fn test_nested_errors_use_dotted_paths() {
    let schema = blog();
    let settings = settings();
    let posts = schema.lookup("posts").unwrap();
    let request = Request::from_json(&json!({
        "fields": {"author": {"$fields": {"nickname": 1}}}
    }))
    .unwrap();

    let err = Compiler::new(&schema, &settings)
        .compile(posts, &request)
        .unwrap_err();
    assert!(err.field_errors().unwrap().contains("author.nickname"));
}

#[test]
fn test_search() {
    let schema = blog();
    let compiled = compile(&schema, "users", json!({"options": {"search": "an_n"}}));

    let sql = &compiled.select.sql;
    assert!(sql.contains("`t0`.`name` LIKE ?"));
    assert!(sql.contains("`t0`.`email` LIKE ?"));
    assert!(sql.contains(" OR "));
    assert_eq!(compiled.select.params, vec![json!("%an\\_n%"), json!("%an\\_n%")]);
}

#[test]
fn test_dsl_request_compiles() {
    let schema = blog();
    let settings = settings();
    let users = schema.lookup("users").unwrap();
    let request =
        Request::from_dsl(Some("name, limit(2)"), Some("and(name.like(Paul%),age.gt(10))")).unwrap();

    let compiled = Compiler::new(&schema, &settings)
        .compile(users, &request)
        .unwrap();
    let sql = &compiled.select.sql;
    assert!(sql.contains("`t0`.`name` LIKE ?"));
    assert!(sql.contains("`t0`.`age` > ?"));
    assert!(sql.ends_with("\nLIMIT 2"));
    assert_eq!(compiled.select.params, vec![json!("Paul%"), json!(10)]);
    assert_valid_sql(sql);
}

#[test]
fn test_request_builders_match_json() {
    let schema = blog();
    let settings = settings();
    let users = schema.lookup("users").unwrap();
    let built = Request::new(Projection::new().include("email"))
        .with_options(SelectOptions::new().limit(4).orderby(&["name"]));
    let parsed = Request::from_json(&json!({
        "fields": {"email": 1},
        "options": {"limit": 4, "orderby": ["name"]}
    }))
    .unwrap();

    let compiler = Compiler::new(&schema, &settings);
    assert_eq!(
        compiler.compile(users, &built).unwrap().select,
        compiler.compile(users, &parsed).unwrap().select
    );
}

#[test]
fn test_aggregate_alias_cannot_shadow_a_field() {
    let schema = blog();
    let settings = settings();
    let users = schema.lookup("users").unwrap();
    let request = Request::from_json(&json!({
        "fields": {"name": 1, "posts": {"$count": 1, "$as": "name"}}
    }))
    .unwrap();

    let err = Compiler::new(&schema, &settings)
        .compile(users, &request)
        .unwrap_err();
    assert_eq!(err.kind(), "InvalidQueryData");
    assert_eq!(
        err.field_errors().unwrap().get("posts"),
        Some("'name' is already a field of this entity")
    );
}

// =============================================================================
// Relationship kinds
// =============================================================================

#[test]
fn test_has_one_join() {
    let schema = social();
    let compiled = compile(
        &schema,
        "users",
        json!({"fields": {"name": 1, "profile": {"$fields": {"bio": 1}}}}),
    );

    assert_snapshot!(compiled.select.sql, @r"
    SELECT
      `t0`.`id` AS `t0$id`,
      `t0`.`name` AS `t0$name`,
      `t1`.`id` AS `t1$id`,
      `t1`.`bio` AS `t1$bio`
    FROM `users` AS `t0`
    LEFT JOIN `profiles` AS `t1` ON `t1`.`user_id` = `t0`.`id`
    LIMIT 25
    ");
    assert_valid_sql(&compiled.select.sql);

    let data = compiled.hydrate(&rows(json!([
        {"t0$id": 1, "t0$name": "ann", "t1$id": 4, "t1$bio": "hi"},
        {"t0$id": 2, "t0$name": "bob", "t1$id": null, "t1$bio": null}
    ])));
    assert_eq!(data[0]["profile"], json!({"id": 4, "bio": "hi"}));
    assert_eq!(data[1]["profile"], serde_json::Value::Null);
}

#[test]
fn test_has_one_through_join() {
    let schema = social();
    let compiled = compile(
        &schema,
        "users",
        json!({"fields": {"name": 1, "team": {"$fields": {"label": 1}}}}),
    );

    assert_snapshot!(compiled.select.sql, @r"
    SELECT
      `t0`.`id` AS `t0$id`,
      `t0`.`name` AS `t0$name`,
      `t1`.`id` AS `t1$id`,
      `t1`.`label` AS `t1$label`
    FROM `users` AS `t0`
    LEFT JOIN `memberships` AS `t2` ON `t2`.`user_id` = `t0`.`id`
    LEFT JOIN `teams` AS `t1` ON `t1`.`id` = `t2`.`team_id`
    LIMIT 25
    ");
    assert_valid_sql(&compiled.select.sql);
    assert_eq!(compiled.aliases.alias_for("team"), Some("t1"));
    assert!(compiled.aliases.entry("t2").unwrap().is_internal());
}

#[test]
fn test_has_one_custom_join() {
    let schema = social();
    let compiled = compile(
        &schema,
        "users",
        json!({"fields": {"name": 1, "avatar": {"$fields": {"url": 1}}}}),
    );

    assert_snapshot!(compiled.select.sql, @r"
    SELECT
      `t0`.`id` AS `t0$id`,
      `t0`.`name` AS `t0$name`,
      `t1`.`id` AS `t1$id`,
      `t1`.`url` AS `t1$url`
    FROM `users` AS `t0`
    LEFT JOIN `profiles` AS `t2` ON `t2`.`user_id` = `t0`.`id` LEFT JOIN `images` AS `t1` ON `t1`.`id` = `t2`.`image_id`
    LIMIT 25
    ");
    assert_valid_sql(&compiled.select.sql);
}

#[test]
fn test_has_one_custom_filter_reuses_join() {
    let schema = social();
    let compiled = compile(
        &schema,
        "users",
        json!({
            "fields": {"name": 1, "avatar": {"$fields": {"url": 1}}},
            "filter": {"avatar.url": {"$like": "%.png"}}
        }),
    );

    let sql = &compiled.select.sql;
    assert_eq!(sql.matches("`images` AS").count(), 1);
    assert!(sql.contains("WHERE `t1`.`url` LIKE ?"));
    assert_eq!(compiled.select.params, vec![json!("%.png")]);
    assert_valid_sql(sql);
}

fn relation_spec(fields: serde_json::Value) -> RelationSpec {
    RelationSpec {
        fields: Projection::from_value(&fields).unwrap(),
        ..Default::default()
    }
}

#[test]
fn test_has_many_through_plan() {
    let schema = social();
    let settings = settings();
    let users = schema.lookup("users").unwrap();
    let relation = schema.relationship(users, "groups").unwrap();
    let plan = Compiler::new(&schema, &settings)
        .compile_relation(relation, &relation_spec(json!({"label": 1})), &[json!(1), json!(2)], "groups")
        .unwrap();

    assert_snapshot!(plan.count.sql, @r"
    SELECT
      `__c`.`__fk` AS `__fk`,
      COUNT(*) AS `total`
    FROM (SELECT
      `t1`.`user_id` AS `__fk`,
      `t0`.`id` AS `t0$id`,
      `t0`.`label` AS `t0$label`
    FROM `teams` AS `t0`
    INNER JOIN `memberships` AS `t1` ON `t1`.`team_id` = `t0`.`id`
    WHERE `t1`.`user_id` IN (?, ?)) AS `__c`
    GROUP BY `__c`.`__fk`
    ");
    assert_eq!(plan.count.params, vec![json!(1), json!(2)]);
    assert_valid_sql(&plan.count.sql);

    assert!(plan.list.sql.contains(
        "ROW_NUMBER() OVER (PARTITION BY `t1`.`user_id` ORDER BY `t0`.`id` ASC) AS `__rn`"
    ));
    assert!(plan
        .list
        .sql
        .contains("INNER JOIN `memberships` AS `t1` ON `t1`.`team_id` = `t0`.`id`"));
    assert_eq!(plan.list.params, vec![json!(1), json!(2)]);
    assert_valid_sql(&plan.list.sql);
}

#[test]
fn test_has_many_custom_plan() {
    let schema = social();
    let settings = settings();
    let users = schema.lookup("users").unwrap();
    let relation = schema.relationship(users, "followers").unwrap();
    let plan = Compiler::new(&schema, &settings)
        .compile_relation(relation, &relation_spec(json!({"name": 1})), &[json!(7)], "followers")
        .unwrap();

    assert_snapshot!(plan.count.sql, @r"
    SELECT
      `__c`.`__fk` AS `__fk`,
      COUNT(*) AS `total`
    FROM (SELECT
      `t1`.`user_id` AS `__fk`,
      `t0`.`id` AS `t0$id`,
      `t0`.`name` AS `t0$name`
    FROM `users` AS `t0`
    INNER JOIN `follows` AS `t1` ON `t1`.`follower_id` = `t0`.`id`
    WHERE `t1`.`user_id` IN (?)) AS `__c`
    GROUP BY `__c`.`__fk`
    ");
    assert_valid_sql(&plan.count.sql);

    assert!(plan.list.sql.contains(
        "ROW_NUMBER() OVER (PARTITION BY `t1`.`user_id` ORDER BY `t0`.`id` ASC) AS `__rn`"
    ));
    assert_eq!(plan.list.params, vec![json!(7)]);
    assert_valid_sql(&plan.list.sql);
}

#[test]
fn test_aggregate_over_through_relation() {
    let schema = social();
    let compiled = compile(
        &schema,
        "users",
        json!({"fields": {"name": 1, "groups": {"$count": 1, "$as": "group_count"}}}),
    );

    let sql = &compiled.select.sql;
    assert!(sql.contains("INNER JOIN `memberships`"));
    assert!(sql.contains("COUNT(*) AS `__value`"));
    assert!(sql.contains("AS `t0$group_count`"));
    assert_valid_sql(sql);
}

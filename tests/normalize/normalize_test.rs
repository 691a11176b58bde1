//! Request normalization against the blog schema and a TOML-declared one.

#[path = "../support/mod.rs"]
mod support;

use relquery::config::CompilerSettings;
use relquery::normalize::{
    normalize_customs, normalize_fields, normalize_relationships, normalize_select_options,
    normalize_virtuals, RelationPart, RelationSelector,
};
use relquery::request::{Projection, SelectOptions};
use relquery::schema::{EntityDef, Schema, SchemaConfig, VirtualField};
use serde_json::{json, Value};
use support::{blog, blog_builder};

fn projection(value: Value) -> Projection {
    Projection::from_value(&value).unwrap()
}

fn fields(schema: &Schema, entity: &str, value: Value) -> Vec<String> {
    let id = schema.lookup(entity).unwrap();
    normalize_fields(schema, id, &projection(value)).unwrap()
}

const SHOP: &str = r#"
[entities.customers]
columns = ["id", "name", "tier"]
defaults = ["name"]

[entities.customers.options]
limit = 5
orderby = ["-tier", "name"]

[entities.customers.relationships.orders]
type = "has_many"
target = "orders"
foreign_key = "customer_id"

[entities.customers.customs.order_total]
aggregate = true
joins = [{ entity = "orders", alias = "o", on = "{o.customer_id} = {id}" }]
field = "SUM({o.amount})"

[entities.orders]
primary_key = "order_no"
columns = ["order_no", "customer_id", "amount"]
"#;

#[test]
fn test_defaults_and_all() {
    let schema = blog();
    assert_eq!(fields(&schema, "posts", json!({})), vec!["id", "title"]);
    assert_eq!(fields(&schema, "posts", json!({"$default": 1})), vec!["id", "title"]);
    assert_eq!(
        fields(&schema, "posts", json!({"$all": 1})),
        vec!["id", "title", "body", "author_id", "created", "published"]
    );
    assert_eq!(
        fields(&schema, "posts", json!({"$all": 1, "body": 0, "created": 0})),
        vec!["id", "title", "author_id", "published"]
    );
}

#[test]
fn test_only_excludes_means_defaults() {
    let schema = blog();
    assert_eq!(fields(&schema, "users", json!({"name": 0})), vec!["id"]);
    assert_eq!(fields(&schema, "users", json!({"email": 0})), vec!["id", "name"]);
}

#[test]
fn test_relations_add_their_local_key() {
    let schema = blog();
    assert_eq!(fields(&schema, "posts", json!({"author": 1})), vec!["id", "author_id"]);
    assert_eq!(fields(&schema, "posts", json!({"comments": 1})), vec!["id"]);
    assert_eq!(
        fields(&schema, "posts", json!({"title": 1, "author": {"$fields": {"email": 1}}})),
        vec!["id", "title", "author_id"]
    );
}

#[test]
fn test_primary_key_comes_first() {
    let schema = SchemaConfig::from_str(SHOP).unwrap().build().unwrap();
    assert_eq!(fields(&schema, "orders", json!({"amount": 1})), vec!["order_no", "amount"]);
    assert_eq!(fields(&schema, "customers", json!({})), vec!["id", "name"]);
}

#[test]
fn test_virtuals_expand_to_required_columns() {
    let schema = blog_builder()
        .entity(
            EntityDef::new("people")
                .columns(&["id", "first", "last", "nick"])
                .defaults(&["id"])
                .virtual_field(
                    "full",
                    VirtualField::new(&["first", "last"], |_, _| Value::Null.into()),
                )
                .virtual_field("badge", VirtualField::new(&["full", "nick"], |_, _| Value::Null.into())),
        )
        .build()
        .unwrap();

    assert_eq!(
        fields(&schema, "people", json!({"badge": 1})),
        vec!["id", "first", "last", "nick"]
    );
    let people = schema.entity_by_name("people").unwrap();
    assert_eq!(normalize_virtuals(people, &projection(json!({"badge": 1}))), vec!["full", "badge"]);
    assert_eq!(normalize_virtuals(people, &projection(json!({"full": 1}))), vec!["full"]);
    assert!(normalize_virtuals(people, &projection(json!({}))).is_empty());
    assert_eq!(
        normalize_virtuals(people, &projection(json!({"$all": 1}))),
        vec!["full", "badge"]
    );
}

#[test]
fn test_customs_follow_declaration_order() {
    let schema = SchemaConfig::from_str(SHOP).unwrap().build().unwrap();
    let customers = schema.entity_by_name("customers").unwrap();
    assert_eq!(
        normalize_customs(customers, &projection(json!({"order_total": 1}))),
        vec!["order_total"]
    );
    assert_eq!(
        normalize_customs(customers, &projection(json!({"$all": 1}))),
        vec!["order_total"]
    );
    assert!(normalize_customs(customers, &projection(json!({"$all": 1, "order_total": 0}))).is_empty());
    assert!(normalize_customs(customers, &projection(json!({}))).is_empty());
}

#[test]
fn test_unknown_keys_reported_together() {
    let schema = blog();
    let users = schema.lookup("users").unwrap();
    let err = normalize_fields(&schema, users, &projection(json!({"name": 1, "x": 1, "y": 1})))
        .unwrap_err();
    assert_eq!(err.kind(), "InvalidQueryData");
    assert_eq!(err.field_errors().unwrap().fields().collect::<Vec<_>>(), vec!["x", "y"]);
}

#[test]
fn test_relationship_selection() {
    let schema = blog();
    let posts = schema.lookup("posts").unwrap();
    let projection = projection(json!({
        "title": 1,
        "author": {"name": 1},
        "comments": {"$fields": {"body": 1}, "$options": {"limit": 3}},
        "reviews": {"$count": 1, "$as": "n"}
    }));

    let err = normalize_relationships(&schema, posts, &projection, None).unwrap_err();
    assert_eq!(err.field_errors().unwrap().get("reviews"), Some("unknown field"));

    let mut projection = projection;
    projection.insert("reviews", relquery::request::FieldSpec::Exclude);
    let all = normalize_relationships(&schema, posts, &projection, None).unwrap();
    assert_eq!(
        all.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(),
        vec!["author", "comments"]
    );

    let to_one = normalize_relationships(&schema, posts, &projection, Some(RelationSelector::ToOne))
        .unwrap();
    assert_eq!(to_one.len(), 1);
    assert!(!to_one[0].relation.is_to_many());

    let to_many =
        normalize_relationships(&schema, posts, &projection, Some(RelationSelector::ToMany)).unwrap();
    let RelationPart::Load(spec) = &to_many[0].part else {
        panic!("expected a load");
    };
    assert_eq!(spec.options.limit, Some(3));
}

#[test]
fn test_columns_are_not_relationships() {
    let schema = blog();
    let posts = schema.lookup("posts").unwrap();
    let err = normalize_relationships(&schema, posts, &projection(json!({"title": {"x": 1}})), None)
        .unwrap_err();
    assert_eq!(err.field_errors().unwrap().get("title"), Some("not a relationship"));
}

#[test]
fn test_entity_default_options() {
    let schema = SchemaConfig::from_str(SHOP).unwrap().build().unwrap();
    let customers = schema.lookup("customers").unwrap();
    let settings = CompilerSettings::default();

    let resolved =
        normalize_select_options(&schema, customers, &SelectOptions::new(), 8, &settings).unwrap();
    assert_eq!(resolved.limit, 5);
    assert_eq!(resolved.skip, 0);
    assert_eq!(resolved.orderby_terms(), vec!["-tier", "name"]);

    let resolved = normalize_select_options(
        &schema,
        customers,
        &SelectOptions::new().limit(7).orderby(&["+id"]),
        8,
        &settings,
    )
    .unwrap();
    assert_eq!(resolved.limit, 7);
    assert_eq!(resolved.orderby_terms(), vec!["id"]);
}

#[test]
fn test_order_by_through_to_one() {
    let schema = blog();
    let posts = schema.lookup("posts").unwrap();
    let settings = CompilerSettings::default();

    let options = SelectOptions::new().orderby(&["-author.name"]);
    let resolved = normalize_select_options(&schema, posts, &options, 8, &settings).unwrap();
    assert_eq!(resolved.orderby_terms(), vec!["-author.name"]);

    let options = SelectOptions::new().orderby(&["comments.body"]);
    let err = normalize_select_options(&schema, posts, &options, 8, &settings).unwrap_err();
    assert!(err.field_errors().unwrap().contains("comments.body"));
}

use cloudrow_model::{EntityDescriptor, Extracted, FieldTable, MappingError, Record};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

fn instance_descriptor() -> EntityDescriptor {
    EntityDescriptor::new("instance", &["instance_id"])
        .exclude(&["launch_time"])
        .with_db_id("id")
}

// ── Identity ─────────────────────────────────────────────────────

#[test]
fn single_field_identity() {
    let d = instance_descriptor();
    let r = Record::new().with("instance_id", "i-123").with("id", 4);
    assert_eq!(d.identity_of(&r), "i-123");
}

#[test]
fn composite_identity_joins_with_separator() {
    let d = EntityDescriptor::new("rule", &["group_id", "port", "ipv6"]);
    let r = Record::new()
        .with("group_id", "sg-1")
        .with("port", 443)
        .with("ipv6", true);
    assert_eq!(d.identity_of(&r), "sg-1|443|true");
}

#[test]
fn missing_identity_field_renders_empty() {
    let d = EntityDescriptor::new("rule", &["group_id", "port"]);
    let r = Record::new().with("port", 22);
    assert_eq!(d.identity_of(&r), "|22");
}

#[test]
fn separator_inside_composite_values_is_escaped() {
    let d = EntityDescriptor::new("route", &["table_id", "destination"]);
    let a = Record::new().with("table_id", "a|b").with("destination", "c");
    let b = Record::new().with("table_id", "a").with("destination", "b|c");
    assert_eq!(d.identity_of(&a), r"a\|b|c");
    assert_eq!(d.identity_of(&b), r"a|b\|c");
    assert_ne!(d.identity_of(&a), d.identity_of(&b));
}

#[test]
fn backslash_inside_composite_values_is_escaped() {
    let d = EntityDescriptor::new("route", &["table_id", "destination"]);
    let a = Record::new().with("table_id", r"a\").with("destination", "b");
    let b = Record::new().with("table_id", "a").with("destination", r"|b");
    assert_eq!(d.identity_of(&a), r"a\\|b");
    assert_ne!(d.identity_of(&a), d.identity_of(&b));
}

#[test]
fn single_field_identity_is_not_escaped() {
    let d = EntityDescriptor::new("parameter", &["name"]);
    let r = Record::new().with("name", "/app/a|b");
    assert_eq!(d.identity_of(&r), "/app/a|b");
}

#[test]
fn db_id_is_never_identity() {
    let d = instance_descriptor();
    let a = Record::new().with("instance_id", "i-1").with("id", 1);
    let b = Record::new().with("instance_id", "i-1").with("id", 99);
    assert_eq!(d.identity_of(&a), d.identity_of(&b));
}

// ── Structural equality ─────────────────────────────────────────

#[test]
fn equality_ignores_excluded_and_db_id() {
    let d = instance_descriptor();
    let a = Record::new()
        .with("instance_id", "i-1")
        .with("type", "t3.micro")
        .with("launch_time", "2024-01-01")
        .with("id", 1);
    let b = Record::new()
        .with("instance_id", "i-1")
        .with("type", "t3.micro")
        .with("launch_time", "2025-06-30");
    assert!(d.structurally_equal(&a, &b));
    assert!(!d.compares("launch_time"));
    assert!(!d.compares("id"));
    assert!(d.compares("type"));
}

#[test]
fn equality_detects_changed_field() {
    let d = instance_descriptor();
    let a = Record::new().with("instance_id", "i-1").with("type", "t3.micro");
    let b = Record::new().with("instance_id", "i-1").with("type", "t3.large");
    assert!(!d.structurally_equal(&a, &b));
}

#[test]
fn null_equals_absent() {
    let d = instance_descriptor();
    let a = Record::new().with("instance_id", "i-1").with("key_name", Value::Null);
    let b = Record::new().with("instance_id", "i-1");
    assert!(d.structurally_equal(&a, &b));
    assert!(d.structurally_equal(&b, &a));
}

#[test]
fn nested_values_compare_deeply() {
    let d = EntityDescriptor::new("policy", &["name"]);
    let a = Record::new()
        .with("name", "p")
        .with("document", json!({"Statement": [{"Effect": "Allow"}]}));
    let b = Record::new()
        .with("name", "p")
        .with("document", json!({"Statement": [{"Effect": "Deny"}]}));
    assert!(!d.structurally_equal(&a, &b));
}

// ── Printing ─────────────────────────────────────────────────────

#[test]
fn print_flattens_to_text() {
    let d = instance_descriptor();
    let r = Record::new()
        .with("instance_id", "i-1")
        .with("tags", json!({"env": "prod"}))
        .with("key_name", Value::Null);
    let printed = d.print(&r);
    assert_eq!(printed["instance_id"], "i-1");
    assert_eq!(printed["tags"], r#"{"env":"prod"}"#);
    assert_eq!(printed["key_name"], "");
}

#[test]
fn descriptor_deserializes_with_defaults() {
    let d: EntityDescriptor =
        serde_json::from_value(json!({"table": "vpc", "identity_fields": ["vpc_id"]})).unwrap();
    assert_eq!(d, EntityDescriptor::new("vpc", &["vpc_id"]));
}

// ── Field tables ─────────────────────────────────────────────────

struct RawBucket {
    name: Option<String>,
    region: String,
    versioning: Option<bool>,
}

fn bucket_fields() -> FieldTable<RawBucket> {
    FieldTable::new("bucket")
        .required("name", |b: &RawBucket| Extracted::from_option(b.name.clone()))
        .field("region", |b: &RawBucket| Extracted::Value(b.region.clone().into()))
        .field("versioning", |b: &RawBucket| Extracted::from_option(b.versioning))
}

#[test]
fn extract_omits_optional_fields() {
    let raw = RawBucket {
        name: Some("logs".into()),
        region: "us-east-1".into(),
        versioning: None,
    };
    let record = bucket_fields().extract(&raw).unwrap();
    assert_eq!(record.get_str("name"), Some("logs"));
    assert_eq!(record.get_str("region"), Some("us-east-1"));
    assert!(!record.contains("versioning"));
}

#[test]
fn extract_fails_on_missing_required_field() {
    let raw = RawBucket {
        name: None,
        region: "us-east-1".into(),
        versioning: Some(true),
    };
    let err = bucket_fields().extract(&raw).unwrap_err();
    assert_eq!(
        err,
        MappingError::MissingField {
            table: "bucket".into(),
            field: "name".into(),
        }
    );
}

#[test]
fn extract_all_stops_at_first_failure() {
    let raws = vec![
        RawBucket { name: Some("a".into()), region: "r".into(), versioning: None },
        RawBucket { name: None, region: "r".into(), versioning: None },
    ];
    assert!(bucket_fields().extract_all(&raws).is_err());
    assert_eq!(bucket_fields().extract_all(&raws[..1]).unwrap().len(), 1);
}

#[test]
fn field_names_in_declaration_order() {
    let table = bucket_fields();
    let names: Vec<&str> = table.field_names().collect();
    assert_eq!(names, vec!["name", "region", "versioning"]);
}

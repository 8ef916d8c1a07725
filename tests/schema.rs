use anyhow::Result;
use event_counter::testing::{EventBuilder, standard_schema, strict_schema};
use event_counter::{
    AggregationKey, EventValidator, FieldMap, RejectReason, Schema, ValidationError, parse_record,
};

fn fields(line: &str) -> FieldMap {
    parse_record(line).expect("test line parses")
}

fn rejection(schema: &Schema, record: &EventBuilder) -> ValidationError {
    schema
        .validate(&fields(&record.to_line()))
        .expect_err("record should be rejected")
}

#[test]
fn accepts_a_complete_record_and_derives_its_key() -> Result<()> {
    let schema = standard_schema()?;
    let record = EventBuilder::new("2018-01-30T10:11:12.000Z", "login")
        .field("premium", false)
        .field("source", "web");
    let key = schema.validate(&fields(&record.to_line()))?;
    assert_eq!(key, AggregationKey::parse("2018-01-30", "login")?);
    Ok(())
}

#[test]
fn missing_required_field_is_reported_by_name() -> Result<()> {
    let schema = standard_schema()?;
    let err = rejection(&schema, &EventBuilder::new("2018-01-30", "login").without("user_id"));
    assert_eq!(err.reason, RejectReason::MissingRequiredField);
    assert_eq!(err.field.as_deref(), Some("user_id"));
    Ok(())
}

#[test]
fn null_counts_as_present_with_the_wrong_type() -> Result<()> {
    let schema = standard_schema()?;
    let err = rejection(
        &schema,
        &EventBuilder::new("2018-01-30", "login").field("user_id", serde_json::Value::Null),
    );
    assert_eq!(err.reason, RejectReason::TypeMismatch);
    Ok(())
}

#[test]
fn type_mismatches_cover_every_declared_type() -> Result<()> {
    let schema = standard_schema()?;
    let base = EventBuilder::new("2018-01-30", "login");
    for (field, value) in [
        ("user_id", serde_json::json!("1")),
        ("user_id", serde_json::json!(1.5)),
        ("user_id", serde_json::json!(true)),
        ("premium", serde_json::json!(1)),
        ("source", serde_json::json!(["web"])),
        ("timestamp", serde_json::json!(20_180_130)),
        ("event", serde_json::json!(3)),
    ] {
        let err = rejection(&schema, &base.clone().field(field, value.clone()));
        assert_eq!(err.reason, RejectReason::TypeMismatch, "{field} = {value}");
        assert_eq!(err.field.as_deref(), Some(field));
    }
    Ok(())
}

#[test]
fn optional_fields_may_be_absent() -> Result<()> {
    let schema = standard_schema()?;
    let record = EventBuilder::new("2018-01-30", "view");
    assert!(schema.validate(&fields(&record.to_line())).is_ok());
    Ok(())
}

#[test]
fn enum_variants_match_case_insensitively() -> Result<()> {
    let schema = standard_schema()?;
    let key = schema.validate(&fields(&EventBuilder::new("2018-01-30", "LogIn").to_line()))?;
    assert_eq!(key.event_name, "LogIn");

    let err = rejection(&schema, &EventBuilder::new("2018-01-30", "signup"));
    assert_eq!(err.reason, RejectReason::UnknownEnumVariant);
    Ok(())
}

#[test]
fn invalid_dates_are_rejected() -> Result<()> {
    let schema = standard_schema()?;
    for ts in ["2018-02-30T00:00:00Z", "30/01/2018", "", "2018-1-30", "2018-01-30X"] {
        let err = rejection(&schema, &EventBuilder::new(ts, "login"));
        assert_eq!(err.reason, RejectReason::InvalidEventDate, "timestamp {ts:?}");
        assert_eq!(err.field.as_deref(), Some("timestamp"));
    }
    Ok(())
}

#[test]
fn undeclared_fields_are_ignored_unless_strict() -> Result<()> {
    let record = EventBuilder::new("2018-01-30", "login").field("client_version", "9.1");
    assert!(standard_schema()?.validate(&fields(&record.to_line())).is_ok());

    let err = rejection(&strict_schema()?, &record);
    assert_eq!(err.reason, RejectReason::UnknownField);
    assert_eq!(err.field.as_deref(), Some("client_version"));
    Ok(())
}

#[test]
fn loads_toml_and_json_schema_files() -> Result<()> {
    let toml = Schema::from_file("tests/data/test_schema.toml")?;
    assert_eq!(toml.fields().len(), 4);
    assert!(!toml.is_strict());

    let json = Schema::from_file("tests/data/test_schema.json")?;
    assert!(json.is_strict());
    assert_eq!(json.key_fields().date_field, "ts");
    let key = json.validate(&fields(r#"{"ts": "2020-05-01 12:00", "action": "ping"}"#))?;
    assert_eq!(key, AggregationKey::parse("2020-05-01", "ping")?);
    Ok(())
}

#[test]
fn shipped_schema_matches_the_fixture() -> Result<()> {
    assert_eq!(Schema::from_file("resources/schema.toml")?, standard_schema()?);
    Ok(())
}

#[test]
fn legacy_schema_table_name_is_accepted() -> Result<()> {
    let schema = Schema::from_toml_str(
        r#"
        [[schema]]
        name = "timestamp"
        type = "str"

        [[schema]]
        name = "event"
        type = "str"
        "#,
    )?;
    assert_eq!(schema.fields().len(), 2);
    Ok(())
}

#[test]
fn inconsistent_schemas_fail_to_compile() {
    const TS: &str = "[[fields]]\nname = \"timestamp\"\ntype = \"str\"\n";
    const EVENT: &str = "[[fields]]\nname = \"event\"\ntype = \"str\"\n";
    let cases = [
        ("wrong kind", format!("kind = \"Table\"\n{TS}{EVENT}")),
        ("unknown type", "[[fields]]\nname = \"timestamp\"\ntype = \"date\"".to_string()),
        (
            "enum without variants",
            format!("{TS}[[fields]]\nname = \"event\"\ntype = \"enum\""),
        ),
        ("variants on a string", format!("{TS}{EVENT}variants = [\"a\"]")),
        ("duplicate field", format!("{TS}{TS}{EVENT}")),
        ("missing key field", TS.to_string()),
        ("optional key field", format!("{TS}{EVENT}required = false")),
        (
            "non-string date field",
            format!("[[fields]]\nname = \"timestamp\"\ntype = \"int\"\n{EVENT}"),
        ),
    ];
    for (what, source) in &cases {
        assert!(Schema::from_toml_str(source).is_err(), "{what} should not compile");
    }
}

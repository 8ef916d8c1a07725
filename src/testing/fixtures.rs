//! Ready-made schemas and event logs for common test scenarios.

use crate::schema::Schema;
use anyhow::Result;

/// TOML source of the schema shipped in `resources/schema.toml`.
pub const STANDARD_SCHEMA_TOML: &str = r#"kind = "Schema"

[key]
date_field = "timestamp"
name_field = "event"

[[fields]]
name = "timestamp"
type = "str"

[[fields]]
name = "event"
type = "enum"
variants = ["login", "logout", "purchase", "view"]

[[fields]]
name = "user_id"
type = "int"

[[fields]]
name = "premium"
type = "bool"
required = false

[[fields]]
name = "source"
type = "str"
required = false
"#;

/// The standard schema: `timestamp` (str), `event` (enum of `login`,
/// `logout`, `purchase`, `view`) and `user_id` (int) are required;
/// `premium` (bool) and `source` (str) are optional.
///
/// # Errors
/// Never in practice; the source is a constant.
///
/// # Example
///
/// ```
/// use event_counter::testing::standard_schema;
///
/// let schema = standard_schema().unwrap();
/// assert_eq!(schema.fields().len(), 5);
/// ```
pub fn standard_schema() -> Result<Schema> {
    Schema::from_toml_str(STANDARD_SCHEMA_TOML)
}

/// The same schema with undeclared fields rejected.
///
/// # Errors
/// Never in practice; the source is a constant.
pub fn strict_schema() -> Result<Schema> {
    Schema::from_toml_str(&format!("strict = true\n{STANDARD_SCHEMA_TOML}"))
}

/// A small log mixing valid, invalid, malformed and blank lines.
///
/// Counting it with [`standard_schema`] yields [`SAMPLE_REPORT`], with one
/// rejection for each of `malformed`, `missing_required_field`,
/// `type_mismatch`, `unknown_enum_variant` and `invalid_event_date`.
pub const SAMPLE_EVENTS: &str = r#"{"timestamp": "2018-01-01T10:00:00Z", "event": "login", "user_id": 1}
{"timestamp": "2018-01-01T11:30:00Z", "event": "login", "user_id": 2, "premium": true}
{"timestamp": "2018-01-01T12:00:00Z", "event": "logout", "user_id": 1, "client": "ios"}

{"timestamp": "2018-01-02 08:00:00", "event": "VIEW", "user_id": 3, "source": "email"}
{"timestamp": "2018-01-02T09:00:00Z", "event": "view", "user_id": 4}
{"timestamp": "2017-12-31T23:59:59Z", "event": "purchase", "user_id": 5}
{"timestamp": "2018-01-01T10:00:00Z", "event": "login"
{"timestamp": "2018-01-01T10:00:00Z", "user_id": 6}
{"timestamp": "2018-01-01T10:00:00Z", "event": "login", "user_id": "six"}
{"timestamp": "2018-01-01T10:00:00Z", "event": "jump", "user_id": 7}
{"timestamp": "yesterday", "event": "login", "user_id": 8}
"#;

/// The report [`SAMPLE_EVENTS`] produces.
pub const SAMPLE_REPORT: &str = "2017-12-31 purchase,1
2018-01-01 login,2
2018-01-01 logout,1
2018-01-02 VIEW,1
2018-01-02 view,1
";

//! Declarative event schemas.
//!
//! A schema file lists the fields an event may carry, their types, whether
//! they are required, and which two fields form the aggregation key. It is
//! compiled once into a [`Schema`], which implements [`EventValidator`].
//!
//! ```toml
//! kind = "Schema"
//!
//! [key]
//! date_field = "timestamp"
//! name_field = "event"
//!
//! [[fields]]
//! name = "event"
//! type = "str"
//!
//! [[fields]]
//! name = "timestamp"
//! type = "str"
//!
//! [[fields]]
//! name = "environment"
//! type = "enum"
//! variants = ["production", "staging"]
//! required = false
//! ```
//!
//! Files ending in `.json` are read as JSON with the same shape; anything else
//! is read as TOML.

use crate::key::{AggregationKey, date_from_timestamp};
use crate::parser::{FieldMap, json_kind};
use crate::validation::{EventValidator, RejectReason, ValidationError};
use anyhow::{Context, Result, bail, ensure};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use std::path::Path;

/// Declared type of a field, as written in a schema file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    #[serde(alias = "string")]
    Str,
    #[serde(alias = "integer")]
    Int,
    #[serde(alias = "boolean")]
    Bool,
    Enum,
}

/// One field descriptor, as written in a schema file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FieldKind,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub variants: Option<Vec<String>>,
}

fn default_required() -> bool {
    true
}

/// Names of the two fields the aggregation key is derived from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyConfig {
    #[serde(default = "default_date_field")]
    pub date_field: String,
    #[serde(default = "default_name_field")]
    pub name_field: String,
}

fn default_date_field() -> String {
    "timestamp".to_string()
}

fn default_name_field() -> String {
    "event".to_string()
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            date_field: default_date_field(),
            name_field: default_name_field(),
        }
    }
}

/// The uncompiled, deserialized form of a schema file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaConfig {
    #[serde(default)]
    pub kind: Option<String>,
    /// Reject events carrying undeclared fields.
    #[serde(default)]
    pub strict: bool,
    #[serde(default)]
    pub key: KeyConfig,
    #[serde(alias = "schema")]
    pub fields: Vec<FieldConfig>,
}

impl SchemaConfig {
    /// Parse a TOML schema document.
    ///
    /// # Errors
    /// Returns an error if the document is not valid TOML or has the wrong shape.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).context("parse TOML schema")
    }

    /// Parse a JSON schema document.
    ///
    /// # Errors
    /// Returns an error if the document is not valid JSON or has the wrong shape.
    pub fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).context("parse JSON schema")
    }

    /// Compile the declarative config into validation rules.
    ///
    /// # Errors
    /// Returns an error for inconsistent declarations: enum fields without
    /// variants, variants on non-enum fields, duplicate names, or key fields
    /// that are undeclared, optional or of an unusable type.
    pub fn compile(self) -> Result<Schema> {
        if let Some(kind) = &self.kind {
            ensure!(kind == "Schema", "schema file must have kind `Schema`, got `{kind}`");
        }

        let mut seen = HashSet::new();
        let mut fields = Vec::with_capacity(self.fields.len());
        for field in self.fields {
            ensure!(
                seen.insert(field.name.clone()),
                "field `{}` is declared more than once",
                field.name
            );
            let ty = match (field.kind, field.variants) {
                (FieldKind::Enum, Some(variants)) if !variants.is_empty() => FieldType::Enum(
                    variants.iter().map(|v| v.to_lowercase()).collect(),
                ),
                (FieldKind::Enum, _) => bail!("enum field `{}` must list its variants", field.name),
                (_, Some(_)) => {
                    bail!("only enum fields can have variants (field `{}`)", field.name)
                }
                (FieldKind::Str, None) => FieldType::String,
                (FieldKind::Int, None) => FieldType::Integer,
                (FieldKind::Bool, None) => FieldType::Boolean,
            };
            fields.push(FieldSpec {
                name: field.name,
                ty,
                required: field.required,
            });
        }

        let schema = Schema {
            fields,
            key: self.key,
            strict: self.strict,
        };
        schema.check_key_fields()?;
        Ok(schema)
    }
}

/// Compiled type rule for one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    String,
    Integer,
    Boolean,
    /// Closed set of lowercased variants.
    Enum(BTreeSet<String>),
}

impl FieldType {
    /// Check a value against this type. Pure and total.
    ///
    /// # Errors
    /// Returns [`RejectReason::TypeMismatch`] or
    /// [`RejectReason::UnknownEnumVariant`] with a detail message.
    pub fn check(&self, value: &Value) -> Result<(), (RejectReason, String)> {
        let ok = match (self, value) {
            (Self::String, Value::String(_)) | (Self::Boolean, Value::Bool(_)) => true,
            (Self::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (Self::Enum(variants), Value::String(s)) => {
                if variants.contains(&s.to_lowercase()) {
                    true
                } else {
                    return Err((
                        RejectReason::UnknownEnumVariant,
                        format!("`{s}` is not one of {variants:?}"),
                    ));
                }
            }
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err((
                RejectReason::TypeMismatch,
                format!("expected {}, but got {}", self.name(), json_kind(value)),
            ))
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Enum(_) => "enum",
        }
    }
}

/// A compiled field rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub ty: FieldType,
    pub required: bool,
}

/// A compiled schema; validates events and extracts their aggregation key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    fields: Vec<FieldSpec>,
    key: KeyConfig,
    strict: bool,
}

impl Schema {
    /// Load and compile a schema file (TOML, or JSON for `.json` paths).
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or compiled.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read schema {}", path.display()))?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let config = if is_json {
            SchemaConfig::from_json_str(&text)
        } else {
            SchemaConfig::from_toml_str(&text)
        }
        .with_context(|| format!("load schema {}", path.display()))?;
        config
            .compile()
            .with_context(|| format!("compile schema {}", path.display()))
    }

    /// Compile a schema from a TOML string.
    ///
    /// # Errors
    /// Returns an error if the document cannot be parsed or compiled.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        SchemaConfig::from_toml_str(s)?.compile()
    }

    #[must_use]
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    #[must_use]
    pub fn key_fields(&self) -> &KeyConfig {
        &self.key
    }

    #[must_use]
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    fn check_key_fields(&self) -> Result<()> {
        let date = self
            .field(&self.key.date_field)
            .with_context(|| format!("date key field `{}` is not declared", self.key.date_field))?;
        ensure!(date.required, "date key field `{}` must be required", date.name);
        ensure!(
            date.ty == FieldType::String,
            "date key field `{}` must be a string",
            date.name
        );

        let name = self
            .field(&self.key.name_field)
            .with_context(|| format!("name key field `{}` is not declared", self.key.name_field))?;
        ensure!(name.required, "name key field `{}` must be required", name.name);
        ensure!(
            matches!(name.ty, FieldType::String | FieldType::Enum(_)),
            "name key field `{}` must be a string or an enum",
            name.name
        );
        Ok(())
    }

    fn key_from(&self, fields: &FieldMap) -> Result<AggregationKey, ValidationError> {
        let date_field = &self.key.date_field;
        let raw_date = fields.get(date_field).and_then(Value::as_str).unwrap_or_default();
        let event_date = date_from_timestamp(raw_date).ok_or_else(|| {
            ValidationError::field(
                date_field.as_str(),
                RejectReason::InvalidEventDate,
                format!("`{raw_date}` does not start with a YYYY-MM-DD date"),
            )
        })?;
        let name_field = &self.key.name_field;
        let event_name = fields.get(name_field).and_then(Value::as_str).unwrap_or_default();
        // Report rows are newline-delimited.
        if event_name.contains(['\n', '\r']) {
            return Err(ValidationError::field(
                name_field.as_str(),
                RejectReason::InvalidEventName,
                format!("{event_name:?} contains a line break"),
            ));
        }
        Ok(AggregationKey::new(event_date, event_name))
    }
}

impl EventValidator for Schema {
    fn validate(&self, fields: &FieldMap) -> Result<AggregationKey, ValidationError> {
        for spec in &self.fields {
            let Some(value) = fields.get(&spec.name) else {
                if spec.required {
                    return Err(ValidationError::field(
                        spec.name.as_str(),
                        RejectReason::MissingRequiredField,
                        format!("missing required field {}", spec.name),
                    ));
                }
                continue;
            };
            spec.ty.check(value).map_err(|(reason, message)| {
                ValidationError::field(spec.name.as_str(), reason, message)
            })?;
        }

        if self.strict
            && let Some(extra) = fields.keys().find(|name| self.field(name).is_none())
        {
            return Err(ValidationError::field(
                extra.as_str(),
                RejectReason::UnknownField,
                format!("unknown field {extra}"),
            ));
        }

        // Key fields are required and type-checked above.
        self.key_from(fields)
    }
}

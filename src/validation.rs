//! Event validation interface and rejection bookkeeping.
//!
//! The pipeline only depends on the narrow [`EventValidator`] trait: given a
//! parsed [`FieldMap`] it either yields the [`AggregationKey`] the event counts
//! towards or a [`ValidationError`] explaining why it was rejected. The
//! schema-driven implementation lives in [`crate::schema`].
//!
//! Rejections are never fatal. They are tallied by reason in a
//! [`RejectionTally`], which also keeps a bounded sample of rejected records
//! for later inspection.
//!
//! # Example
//!
//! ```
//! use event_counter::validation::*;
//! use event_counter::{AggregationKey, FieldMap};
//!
//! struct OnlyLogins;
//!
//! impl EventValidator for OnlyLogins {
//!     fn validate(&self, fields: &FieldMap) -> Result<AggregationKey, ValidationError> {
//!         match fields.get("event").and_then(|v| v.as_str()) {
//!             Some("login") => Ok(AggregationKey::parse("2020-01-01", "login").unwrap()),
//!             _ => Err(ValidationError::field("event", RejectReason::UnknownEnumVariant, "not a login")),
//!         }
//!     }
//! }
//!
//! let mut tally = RejectionTally::new(10);
//! let fields: FieldMap = serde_json::from_str(r#"{"event":"logout"}"#).unwrap();
//! if let Err(e) = OnlyLogins.validate(&fields) {
//!     tally.record_invalid(1, &e);
//! }
//! assert_eq!(tally.total(), 1);
//! ```

use crate::key::AggregationKey;
use crate::parser::{FieldMap, ParseError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::Path;

/// Narrow interface the map stage consumes to turn a record into a key.
pub trait EventValidator {
    /// Validate `fields` and derive the aggregation key.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] describing the first rule the record broke.
    fn validate(&self, fields: &FieldMap) -> Result<AggregationKey, ValidationError>;
}

/// Why a record was excluded from the counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// The line was not a JSON object.
    Malformed,
    MissingRequiredField,
    TypeMismatch,
    UnknownEnumVariant,
    /// The date key field does not start with a valid calendar date.
    InvalidEventDate,
    /// The name key field contains a line break.
    InvalidEventName,
    /// Undeclared field in a strict schema.
    UnknownField,
}

impl RejectReason {
    /// Stable snake_case code used in logs, metrics and summaries.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::MissingRequiredField => "missing_required_field",
            Self::TypeMismatch => "type_mismatch",
            Self::UnknownEnumVariant => "unknown_enum_variant",
            Self::InvalidEventDate => "invalid_event_date",
            Self::InvalidEventName => "invalid_event_name",
            Self::UnknownField => "unknown_field",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A schema mismatch for a single record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    /// The offending field, when the failure is tied to one.
    pub field: Option<String>,
    pub reason: RejectReason,
    /// Human-readable detail.
    pub message: String,
}

impl ValidationError {
    pub fn new<M: Into<String>>(reason: RejectReason, message: M) -> Self {
        Self {
            field: None,
            reason,
            message: message.into(),
        }
    }

    pub fn field<S: Into<String>, M: Into<String>>(
        field: S,
        reason: RejectReason,
        message: M,
    ) -> Self {
        Self {
            field: Some(field.into()),
            reason,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref field) = self.field {
            write!(f, "[{}] {}", field, self.message)?;
        } else {
            write!(f, "{}", self.message)?;
        }
        write!(f, " (code: {})", self.reason)
    }
}

impl std::error::Error for ValidationError {}

/// A rejected record kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedRecord {
    /// 1-based line number across all inputs.
    pub line: u64,
    pub reason: RejectReason,
    pub field: Option<String>,
    pub message: String,
}

/// Counts of rejected records by reason, plus a bounded sample of them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RejectionTally {
    by_reason: BTreeMap<RejectReason, u64>,
    samples: Vec<RejectedRecord>,
    #[serde(skip)]
    max_samples: usize,
}

impl RejectionTally {
    /// Create an empty tally keeping at most `max_samples` example records.
    #[must_use]
    pub fn new(max_samples: usize) -> Self {
        Self {
            by_reason: BTreeMap::new(),
            samples: Vec::new(),
            max_samples,
        }
    }

    /// Record a line that failed to parse.
    pub fn record_malformed(&mut self, line: u64, error: &ParseError) {
        self.record(line, RejectReason::Malformed, None, &error.message);
    }

    /// Record a line that parsed but failed validation.
    pub fn record_invalid(&mut self, line: u64, error: &ValidationError) {
        self.record(line, error.reason, error.field.clone(), &error.message);
    }

    fn record(&mut self, line: u64, reason: RejectReason, field: Option<String>, message: &str) {
        *self.by_reason.entry(reason).or_default() += 1;
        if self.samples.len() < self.max_samples {
            self.samples.push(RejectedRecord {
                line,
                reason,
                field,
                message: message.to_string(),
            });
        }
    }

    /// Number of rejections for one reason.
    #[must_use]
    pub fn count(&self, reason: RejectReason) -> u64 {
        self.by_reason.get(&reason).copied().unwrap_or(0)
    }

    /// Total number of rejected records.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.by_reason.values().sum()
    }

    /// Non-zero counts, ordered by reason.
    pub fn by_reason(&self) -> impl Iterator<Item = (RejectReason, u64)> + '_ {
        self.by_reason.iter().map(|(r, n)| (*r, *n))
    }

    /// The retained example records, in input order.
    #[must_use]
    pub fn samples(&self) -> &[RejectedRecord] {
        &self.samples
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_reason.is_empty()
    }

    /// Export the tally to pretty-printed JSON.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Write the tally to a file in JSON format.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let json = self.to_json().map_err(io::Error::other)?;
        std::fs::write(path, json)
    }
}

impl fmt::Display for RejectionTally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} rejected", self.total())?;
        for (i, (reason, n)) in self.by_reason().enumerate() {
            let sep = if i == 0 { " (" } else { ", " };
            write!(f, "{sep}{reason}: {n}")?;
        }
        if !self.is_empty() {
            write!(f, ")")?;
        }
        Ok(())
    }
}

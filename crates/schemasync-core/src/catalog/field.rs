//! Field descriptions.

use super::access::{AccessRule, FieldAccess};
use super::types::FieldType;
use super::FieldId;
use serde::{Deserialize, Serialize};

/// Default value of a column.
///
/// A value supplied at write time always wins over the default; this is the
/// database's own DEFAULT behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DefaultValue {
    /// Boolean literal.
    Bool(bool),
    /// Integer literal.
    Integer(i64),
    /// Floating point literal.
    Float(f64),
    /// String literal.
    Text(String),
    /// Current timestamp at insert time.
    Now,
    /// Random UUID at insert time.
    RandomUuid,
    /// Trusted SQL expression, inserted verbatim.
    Expression(String),
}

/// Type-specific value constraints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldConstraints {
    /// Smallest accepted value (numeric types).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Largest accepted value (numeric types).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Minimum length in characters (text types).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u32>,
    /// Maximum length in characters (text types).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    /// Accepted values (selection types).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_values: Vec<String>,
    /// Total significant digits (decimal).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u8>,
    /// Digits after the decimal point (decimal).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<u8>,
    /// POSIX regular expression the value must match (text types).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

impl FieldConstraints {
    /// Check if no constraint is set.
    pub fn is_empty(&self) -> bool {
        self == &FieldConstraints::default()
    }
}

/// Description of a single field (column).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescription {
    /// Stable identifier. Survives renames.
    pub id: FieldId,
    /// Column name.
    pub name: String,
    /// Semantic type.
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Whether the column is NOT NULL.
    #[serde(default)]
    pub required: bool,
    /// Whether values are unique.
    #[serde(default)]
    pub unique: bool,
    /// Whether the column gets its own index.
    #[serde(default)]
    pub indexed: bool,
    /// Column default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultValue>,
    /// Whether the column holds sensitive data.
    #[serde(default)]
    pub sensitive: bool,
    /// Type-specific constraints.
    #[serde(default, skip_serializing_if = "FieldConstraints::is_empty")]
    pub constraints: FieldConstraints,
    /// Column-level access overrides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<FieldAccess>,
}

impl FieldDescription {
    /// Create a new optional field.
    pub fn new(id: FieldId, name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            id,
            name: name.into(),
            field_type,
            required: false,
            unique: false,
            indexed: false,
            default: None,
            sensitive: false,
            constraints: FieldConstraints::default(),
            access: None,
        }
    }

    /// Make the field required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Make the field unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Index the field.
    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    /// Mark the field as sensitive.
    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    /// Set the default value.
    pub fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    /// Set the numeric lower bound.
    pub fn with_min(mut self, min: f64) -> Self {
        self.constraints.min = Some(min);
        self
    }

    /// Set the numeric upper bound.
    pub fn with_max(mut self, max: f64) -> Self {
        self.constraints.max = Some(max);
        self
    }

    /// Set the maximum text length.
    pub fn with_max_length(mut self, max_length: u32) -> Self {
        self.constraints.max_length = Some(max_length);
        self
    }

    /// Set the accepted values of a selection field.
    pub fn with_allowed_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.constraints.allowed_values = values.into_iter().map(Into::into).collect();
        self
    }

    /// Set decimal precision and scale.
    pub fn with_precision(mut self, precision: u8, scale: u8) -> Self {
        self.constraints.precision = Some(precision);
        self.constraints.scale = Some(scale);
        self
    }

    /// Set the pattern text values must match.
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.constraints.pattern = Some(pattern.into());
        self
    }

    /// Restrict who may read the column.
    pub fn with_read_rule(mut self, rule: AccessRule) -> Self {
        self.access.get_or_insert_with(FieldAccess::default).read = Some(rule);
        self
    }

    /// Restrict who may write the column.
    pub fn with_write_rule(mut self, rule: AccessRule) -> Self {
        self.access.get_or_insert_with(FieldAccess::default).write = Some(rule);
        self
    }

    /// Column-level read override, if any.
    pub fn read_rule(&self) -> Option<&AccessRule> {
        self.access.as_ref().and_then(|a| a.read.as_ref())
    }

    /// Column-level write override, if any.
    pub fn write_rule(&self) -> Option<&AccessRule> {
        self.access.as_ref().and_then(|a| a.write.as_ref())
    }
}

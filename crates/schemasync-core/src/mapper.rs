//! Field-type mapping.
//!
//! Turns a [`FieldDescription`] into the column type, constraints and
//! default clause of a PostgreSQL column. The mapping is total over the
//! supported types and never drops a declared constraint: an attribute that
//! does not apply to the field's type is an error.

use crate::catalog::{DefaultValue, FieldDescription, FieldType, ReferentialAction};
use crate::error::{Error, Result};
use crate::sql::{number, quote_ident, quote_literal};

/// PostgreSQL column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    /// SMALLINT.
    SmallInt,
    /// INTEGER.
    Integer,
    /// BIGINT.
    BigInt,
    /// NUMERIC, optionally with (precision, scale).
    Numeric(Option<(u8, u8)>),
    /// REAL.
    Real,
    /// DOUBLE PRECISION.
    Double,
    /// TEXT.
    Text,
    /// TEXT[].
    TextArray,
    /// BOOLEAN.
    Boolean,
    /// DATE.
    Date,
    /// TIME.
    Time,
    /// TIMESTAMPTZ.
    Timestamptz,
    /// TIMESTAMP.
    Timestamp,
    /// INTERVAL.
    Interval,
    /// UUID.
    Uuid,
    /// JSONB.
    Jsonb,
    /// BYTEA.
    Bytea,
    /// INET.
    Inet,
}

impl ColumnType {
    /// Check if the type is an integer type.
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            ColumnType::SmallInt | ColumnType::Integer | ColumnType::BigInt
        )
    }

    /// Check if the type holds numbers.
    pub fn is_number(&self) -> bool {
        self.is_integer()
            || matches!(
                self,
                ColumnType::Numeric(_) | ColumnType::Real | ColumnType::Double
            )
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnType::SmallInt => write!(f, "SMALLINT"),
            ColumnType::Integer => write!(f, "INTEGER"),
            ColumnType::BigInt => write!(f, "BIGINT"),
            ColumnType::Numeric(None) => write!(f, "NUMERIC"),
            ColumnType::Numeric(Some((p, s))) => write!(f, "NUMERIC({}, {})", p, s),
            ColumnType::Real => write!(f, "REAL"),
            ColumnType::Double => write!(f, "DOUBLE PRECISION"),
            ColumnType::Text => write!(f, "TEXT"),
            ColumnType::TextArray => write!(f, "TEXT[]"),
            ColumnType::Boolean => write!(f, "BOOLEAN"),
            ColumnType::Date => write!(f, "DATE"),
            ColumnType::Time => write!(f, "TIME"),
            ColumnType::Timestamptz => write!(f, "TIMESTAMPTZ"),
            ColumnType::Timestamp => write!(f, "TIMESTAMP"),
            ColumnType::Interval => write!(f, "INTERVAL"),
            ColumnType::Uuid => write!(f, "UUID"),
            ColumnType::Jsonb => write!(f, "JSONB"),
            ColumnType::Bytea => write!(f, "BYTEA"),
            ColumnType::Inet => write!(f, "INET"),
        }
    }
}

/// How the database fills in a column by itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Generation {
    /// `GENERATED BY DEFAULT AS IDENTITY`.
    Identity,
    /// `GENERATED ALWAYS AS (expr) STORED`.
    Stored(String),
}

/// What a CHECK constraint enforces. Part of the constraint name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CheckKind {
    /// Numeric bounds.
    Range,
    /// Allowed values.
    Values,
    /// Built-in format of the semantic type.
    Format,
    /// Text length.
    Length,
    /// User-supplied pattern.
    Pattern,
}

impl CheckKind {
    /// Lowercase name used in constraint names.
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckKind::Range => "range",
            CheckKind::Values => "values",
            CheckKind::Format => "format",
            CheckKind::Length => "length",
            CheckKind::Pattern => "pattern",
        }
    }
}

/// Constraint on a single column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnConstraint {
    /// NOT NULL.
    NotNull,
    /// UNIQUE.
    Unique,
    /// CHECK over the column's value.
    Check {
        /// What is checked.
        kind: CheckKind,
        /// Boolean SQL expression.
        expression: String,
    },
    /// FOREIGN KEY.
    ForeignKey {
        /// Referenced table.
        table: String,
        /// Referenced column.
        column: String,
        /// Action on delete.
        on_delete: ReferentialAction,
    },
}

/// Everything the DDL generator needs to render a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    /// Column name.
    pub name: String,
    /// Column type.
    pub column_type: ColumnType,
    /// Column constraints, NOT NULL first.
    pub constraints: Vec<ColumnConstraint>,
    /// Rendered DEFAULT expression.
    pub default: Option<String>,
    /// Database-side generation.
    pub generated: Option<Generation>,
}

impl ColumnSpec {
    /// Check if the column is NOT NULL.
    pub fn is_required(&self) -> bool {
        self.constraints.contains(&ColumnConstraint::NotNull)
    }

    /// Check if the column is UNIQUE.
    pub fn is_unique(&self) -> bool {
        self.constraints.contains(&ColumnConstraint::Unique)
    }

    /// CHECK constraints of the column.
    pub fn checks(&self) -> impl Iterator<Item = (CheckKind, &str)> {
        self.constraints.iter().filter_map(|c| match c {
            ColumnConstraint::Check { kind, expression } => Some((*kind, expression.as_str())),
            _ => None,
        })
    }

    /// Foreign key of the column, if any.
    pub fn foreign_key(&self) -> Option<&ColumnConstraint> {
        self.constraints
            .iter()
            .find(|c| matches!(c, ColumnConstraint::ForeignKey { .. }))
    }

    /// Inline column definition: name, type, generation, default, NOT NULL.
    ///
    /// UNIQUE, CHECK and FOREIGN KEY are rendered as named table constraints
    /// by the DDL generator.
    pub fn definition(&self) -> String {
        let mut sql = format!("{} {}", quote_ident(&self.name), self.column_type);
        match &self.generated {
            Some(Generation::Identity) => sql.push_str(" GENERATED BY DEFAULT AS IDENTITY"),
            Some(Generation::Stored(expr)) => {
                sql.push_str(&format!(" GENERATED ALWAYS AS ({}) STORED", expr))
            }
            None => {}
        }
        if let Some(default) = &self.default {
            sql.push_str(&format!(" DEFAULT {}", default));
        }
        if self.is_required() {
            sql.push_str(" NOT NULL");
        }
        sql
    }
}

const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";
const URL_PATTERN: &str = r"^https?://[^\s]+$";
const PHONE_PATTERN: &str = r"^\+?[0-9 ().-]{4,}$";
const SLUG_PATTERN: &str = r"^[a-z0-9]+(-[a-z0-9]+)*$";
const COLOR_PATTERN: &str = r"^#[0-9A-Fa-f]{6}$";

/// Maps semantic field types to PostgreSQL columns.
pub struct FieldTypeMapper;

impl FieldTypeMapper {
    /// Map a field of `table` to its column specification.
    pub fn map(table: &str, field: &FieldDescription) -> Result<ColumnSpec> {
        let (column_type, generated) = Self::column_type(table, field)?;
        let column = quote_ident(&field.name);
        let mut constraints = Vec::new();

        if field.required {
            constraints.push(ColumnConstraint::NotNull);
        }
        if field.unique {
            constraints.push(ColumnConstraint::Unique);
        }

        let checks = Self::checks(table, field, &column, column_type)?;
        constraints.extend(
            checks
                .into_iter()
                .map(|(kind, expression)| ColumnConstraint::Check { kind, expression }),
        );

        if let FieldType::Reference {
            table: target,
            column: target_column,
            on_delete,
            ..
        } = &field.field_type
        {
            if *on_delete == ReferentialAction::SetNull && field.required {
                return Err(Error::invalid(
                    table,
                    format!("required field {} cannot use ON DELETE SET NULL", field.name),
                ));
            }
            constraints.push(ColumnConstraint::ForeignKey {
                table: target.clone(),
                column: target_column.clone(),
                on_delete: *on_delete,
            });
        }

        let default = match &field.default {
            Some(value) => {
                if generated.is_some() {
                    return Err(Error::InvalidDefault {
                        table: table.to_string(),
                        field: field.name.clone(),
                        reason: "generated columns cannot have a default".into(),
                    });
                }
                Some(Self::render_default(table, field, column_type, value)?)
            }
            None => None,
        };

        Ok(ColumnSpec {
            name: field.name.clone(),
            column_type,
            constraints,
            default,
            generated,
        })
    }

    fn column_type(
        table: &str,
        field: &FieldDescription,
    ) -> Result<(ColumnType, Option<Generation>)> {
        let unsupported = |type_name: String| Error::UnsupportedFieldType {
            table: table.to_string(),
            field: field.name.clone(),
            type_name,
        };

        match &field.field_type {
            FieldType::Reference { key_type, .. } => match Self::plain_type(field, key_type) {
                Some(ty) if ty.is_integer() || matches!(ty, ColumnType::Text | ColumnType::Uuid) => {
                    Ok((ty, None))
                }
                _ => Err(unsupported(format!("reference({})", key_type.name()))),
            },
            FieldType::Computed {
                expression,
                returns,
            } => {
                if returns.is_generated() || matches!(**returns, FieldType::Reference { .. }) {
                    return Err(unsupported(format!("computed({})", returns.name())));
                }
                let ty = Self::plain_type(field, returns)
                    .ok_or_else(|| unsupported(format!("computed({})", returns.name())))?;
                Ok((ty, Some(Generation::Stored(expression.clone()))))
            }
            FieldType::Serial => Ok((ColumnType::Integer, Some(Generation::Identity))),
            FieldType::BigSerial => Ok((ColumnType::BigInt, Some(Generation::Identity))),
            other => {
                let ty = Self::plain_type(field, other)
                    .ok_or_else(|| unsupported(other.name().to_string()))?;
                if let ColumnType::Numeric(Some((p, s))) = ty {
                    if p == 0 || s > p {
                        return Err(Error::invalid(
                            table,
                            format!("field {} has invalid precision ({}, {})", field.name, p, s),
                        ));
                    }
                }
                Ok((ty, None))
            }
        }
    }

    /// Column type of a type that needs no generation, if it has one.
    fn plain_type(field: &FieldDescription, field_type: &FieldType) -> Option<ColumnType> {
        let c = &field.constraints;
        let declared = c.precision.map(|p| (p, c.scale.unwrap_or(0)));
        let ty = match field_type {
            FieldType::Text
            | FieldType::LongText
            | FieldType::RichText
            | FieldType::Email
            | FieldType::Url
            | FieldType::Phone
            | FieldType::Slug
            | FieldType::Color
            | FieldType::Password
            | FieldType::Select
            | FieldType::File
            | FieldType::Image => ColumnType::Text,
            FieldType::SmallInteger | FieldType::Rating => ColumnType::SmallInt,
            FieldType::Integer | FieldType::Serial => ColumnType::Integer,
            FieldType::BigInteger | FieldType::BigSerial => ColumnType::BigInt,
            FieldType::Decimal => ColumnType::Numeric(declared),
            FieldType::Currency => ColumnType::Numeric(declared.or(Some((19, 4)))),
            FieldType::Percent => ColumnType::Numeric(declared.or(Some((5, 2)))),
            FieldType::Real => ColumnType::Real,
            FieldType::Double => ColumnType::Double,
            FieldType::Uuid => ColumnType::Uuid,
            FieldType::Date => ColumnType::Date,
            FieldType::Time => ColumnType::Time,
            FieldType::DateTime => ColumnType::Timestamptz,
            FieldType::LocalDateTime => ColumnType::Timestamp,
            FieldType::Duration => ColumnType::Interval,
            FieldType::Boolean => ColumnType::Boolean,
            FieldType::MultiSelect | FieldType::Tags => ColumnType::TextArray,
            FieldType::Json => ColumnType::Jsonb,
            FieldType::Binary => ColumnType::Bytea,
            FieldType::IpAddress => ColumnType::Inet,
            FieldType::Reference { .. } | FieldType::Computed { .. } | FieldType::Unrecognized => {
                return None
            }
        };
        Some(ty)
    }

    /// The type whose value rules apply: the computed result or the key type.
    fn value_type(field_type: &FieldType) -> &FieldType {
        match field_type {
            FieldType::Computed { returns, .. } => returns,
            FieldType::Reference { key_type, .. } => key_type,
            other => other,
        }
    }

    fn checks(
        table: &str,
        field: &FieldDescription,
        column: &str,
        column_type: ColumnType,
    ) -> Result<Vec<(CheckKind, String)>> {
        let c = &field.constraints;
        let value_type = Self::value_type(&field.field_type);
        let misplaced = |what: &str| {
            Error::invalid(
                table,
                format!(
                    "field {} of type {} cannot carry {}",
                    field.name,
                    field.field_type.name(),
                    what
                ),
            )
        };
        let mut checks = Vec::new();

        // Numeric bounds, with the implicit bounds of percent and rating.
        let (min, max) = match value_type {
            FieldType::Percent => (c.min.or(Some(0.0)), c.max.or(Some(100.0))),
            FieldType::Rating => (c.min.or(Some(0.0)), c.max.or(Some(5.0))),
            _ => (c.min, c.max),
        };
        let range = match (min, max) {
            (Some(lo), Some(hi)) => Some(format!(
                "{} BETWEEN {} AND {}",
                column,
                number(lo),
                number(hi)
            )),
            (Some(lo), None) => Some(format!("{} >= {}", column, number(lo))),
            (None, Some(hi)) => Some(format!("{} <= {}", column, number(hi))),
            (None, None) => None,
        };
        if let Some(expr) = range {
            if !value_type.is_numeric() {
                return Err(misplaced("min/max bounds"));
            }
            checks.push((CheckKind::Range, expr));
        }

        if c.precision.is_some() || c.scale.is_some() {
            let takes_precision = matches!(
                value_type,
                FieldType::Decimal | FieldType::Currency | FieldType::Percent
            );
            if !takes_precision || c.precision.is_none() {
                return Err(misplaced("precision/scale"));
            }
        }

        match value_type {
            FieldType::Select => {
                if c.allowed_values.is_empty() {
                    return Err(Error::invalid(
                        table,
                        format!("select field {} has no allowed values", field.name),
                    ));
                }
                checks.push((
                    CheckKind::Values,
                    format!("{} IN ({})", column, Self::literal_list(&c.allowed_values)),
                ));
            }
            FieldType::MultiSelect => {
                if c.allowed_values.is_empty() {
                    return Err(Error::invalid(
                        table,
                        format!("multi-select field {} has no allowed values", field.name),
                    ));
                }
                checks.push((
                    CheckKind::Values,
                    format!(
                        "{} <@ ARRAY[{}]::TEXT[]",
                        column,
                        Self::literal_list(&c.allowed_values)
                    ),
                ));
            }
            _ if !c.allowed_values.is_empty() => {
                if column_type != ColumnType::Text {
                    return Err(misplaced("allowed values"));
                }
                checks.push((
                    CheckKind::Values,
                    format!("{} IN ({})", column, Self::literal_list(&c.allowed_values)),
                ));
            }
            _ => {}
        }

        let format = match value_type {
            FieldType::Email => Some(("~*", EMAIL_PATTERN)),
            FieldType::Url => Some(("~*", URL_PATTERN)),
            FieldType::Phone => Some(("~", PHONE_PATTERN)),
            FieldType::Slug => Some(("~", SLUG_PATTERN)),
            FieldType::Color => Some(("~", COLOR_PATTERN)),
            _ => None,
        };
        if let Some((op, pattern)) = format {
            checks.push((
                CheckKind::Format,
                format!("{} {} {}", column, op, quote_literal(pattern)),
            ));
        }

        let length = format!("char_length({})", column);
        let limits = match (c.min_length, c.max_length) {
            (Some(lo), Some(hi)) => Some(format!("{} BETWEEN {} AND {}", length, lo, hi)),
            (Some(lo), None) => Some(format!("{} >= {}", length, lo)),
            (None, Some(hi)) => Some(format!("{} <= {}", length, hi)),
            (None, None) => None,
        };
        if let Some(expr) = limits {
            if !value_type.is_textual() {
                return Err(misplaced("length limits"));
            }
            checks.push((CheckKind::Length, expr));
        }

        if let Some(pattern) = &c.pattern {
            if !value_type.is_textual() {
                return Err(misplaced("a pattern"));
            }
            checks.push((
                CheckKind::Pattern,
                format!("{} ~ {}", column, quote_literal(pattern)),
            ));
        }

        Ok(checks)
    }

    fn literal_list(values: &[String]) -> String {
        values
            .iter()
            .map(|v| quote_literal(v))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn render_default(
        table: &str,
        field: &FieldDescription,
        column_type: ColumnType,
        value: &DefaultValue,
    ) -> Result<String> {
        let invalid = |reason: &str| Error::InvalidDefault {
            table: table.to_string(),
            field: field.name.clone(),
            reason: format!("{} for a {} column", reason, column_type),
        };

        match value {
            DefaultValue::Bool(b) => match column_type {
                ColumnType::Boolean => Ok(if *b { "TRUE" } else { "FALSE" }.to_string()),
                _ => Err(invalid("boolean default")),
            },
            DefaultValue::Integer(i) if column_type.is_number() => Ok(i.to_string()),
            DefaultValue::Integer(_) => Err(invalid("integer default")),
            DefaultValue::Float(x) => {
                let takes_float = matches!(
                    column_type,
                    ColumnType::Numeric(_) | ColumnType::Real | ColumnType::Double
                );
                if !takes_float || !x.is_finite() {
                    return Err(invalid("floating point default"));
                }
                Ok(number(*x))
            }
            DefaultValue::Text(s) => {
                if column_type.is_number()
                    || matches!(
                        column_type,
                        ColumnType::Boolean | ColumnType::TextArray | ColumnType::Bytea
                    )
                {
                    return Err(invalid("text default"));
                }
                let allowed = &field.constraints.allowed_values;
                if !allowed.is_empty() && !allowed.contains(s) {
                    return Err(Error::InvalidDefault {
                        table: table.to_string(),
                        field: field.name.clone(),
                        reason: format!("{:?} is not one of the allowed values", s),
                    });
                }
                Ok(quote_literal(s))
            }
            DefaultValue::Now => match column_type {
                ColumnType::Timestamptz => Ok("CURRENT_TIMESTAMP".into()),
                ColumnType::Timestamp => Ok("LOCALTIMESTAMP".into()),
                ColumnType::Date => Ok("CURRENT_DATE".into()),
                ColumnType::Time => Ok("LOCALTIME".into()),
                _ => Err(invalid("current time default")),
            },
            DefaultValue::RandomUuid => match column_type {
                ColumnType::Uuid => Ok("gen_random_uuid()".into()),
                _ => Err(invalid("random uuid default")),
            },
            DefaultValue::Expression(expr) => Ok(expr.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(field: FieldDescription) -> ColumnSpec {
        FieldTypeMapper::map("t", &field).unwrap()
    }

    #[test]
    fn test_required_unique_text() {
        let spec = map(FieldDescription::new(1, "email", FieldType::Text).required().unique());
        assert_eq!(spec.column_type, ColumnType::Text);
        assert!(spec.is_required());
        assert!(spec.is_unique());
        assert_eq!(spec.definition(), "\"email\" TEXT NOT NULL");
    }

    #[test]
    fn test_boolean_default() {
        let spec = map(
            FieldDescription::new(3, "active", FieldType::Boolean)
                .with_default(DefaultValue::Bool(true)),
        );
        assert_eq!(spec.definition(), "\"active\" BOOLEAN DEFAULT TRUE");
    }

    #[test]
    fn test_numeric_bounds() {
        let spec = map(
            FieldDescription::new(1, "amount", FieldType::Decimal)
                .with_min(0.0)
                .with_max(1000.0),
        );
        let checks: Vec<_> = spec.checks().collect();
        assert_eq!(
            checks,
            vec![(CheckKind::Range, "\"amount\" BETWEEN 0 AND 1000")]
        );
    }

    #[test]
    fn test_one_sided_bound() {
        let spec = map(FieldDescription::new(1, "qty", FieldType::Integer).with_min(1.0));
        assert_eq!(spec.checks().next(), Some((CheckKind::Range, "\"qty\" >= 1")));
    }

    #[test]
    fn test_implicit_rating_bounds() {
        let spec = map(FieldDescription::new(1, "stars", FieldType::Rating));
        assert_eq!(spec.column_type, ColumnType::SmallInt);
        assert_eq!(
            spec.checks().next(),
            Some((CheckKind::Range, "\"stars\" BETWEEN 0 AND 5"))
        );
    }

    #[test]
    fn test_select_values() {
        let spec = map(
            FieldDescription::new(1, "status", FieldType::Select)
                .with_allowed_values(["draft", "o'clock"]),
        );
        assert_eq!(
            spec.checks().next(),
            Some((CheckKind::Values, "\"status\" IN ('draft', 'o''clock')"))
        );
    }

    #[test]
    fn test_select_without_values_is_rejected() {
        let field = FieldDescription::new(1, "status", FieldType::Select);
        assert!(FieldTypeMapper::map("t", &field).is_err());
    }

    #[test]
    fn test_multi_select_uses_array_containment() {
        let spec = map(
            FieldDescription::new(1, "channels", FieldType::MultiSelect)
                .with_allowed_values(["email", "sms"]),
        );
        assert_eq!(spec.column_type, ColumnType::TextArray);
        assert_eq!(
            spec.checks().next().map(|(_, e)| e),
            Some("\"channels\" <@ ARRAY['email', 'sms']::TEXT[]")
        );
    }

    #[test]
    fn test_email_format_and_length() {
        let spec = map(FieldDescription::new(1, "email", FieldType::Email).with_max_length(320));
        let kinds: Vec<_> = spec.checks().map(|(k, _)| k).collect();
        assert_eq!(kinds, vec![CheckKind::Format, CheckKind::Length]);
    }

    #[test]
    fn test_currency_precision() {
        let spec = map(FieldDescription::new(1, "price", FieldType::Currency));
        assert_eq!(spec.column_type.to_string(), "NUMERIC(19, 4)");

        let spec = map(FieldDescription::new(1, "ratio", FieldType::Decimal).with_precision(6, 3));
        assert_eq!(spec.column_type.to_string(), "NUMERIC(6, 3)");
    }

    #[test]
    fn test_serial_is_identity() {
        let spec = map(FieldDescription::new(1, "seq", FieldType::BigSerial).required());
        assert_eq!(
            spec.definition(),
            "\"seq\" BIGINT GENERATED BY DEFAULT AS IDENTITY NOT NULL"
        );
    }

    #[test]
    fn test_computed_column() {
        let spec = map(FieldDescription::new(
            1,
            "total",
            FieldType::computed("price * quantity", FieldType::Decimal),
        ));
        assert_eq!(
            spec.definition(),
            "\"total\" NUMERIC GENERATED ALWAYS AS (price * quantity) STORED"
        );
    }

    #[test]
    fn test_reference_column() {
        let spec = map(FieldDescription::new(
            1,
            "author_id",
            FieldType::reference("users", "id", FieldType::BigInteger),
        ));
        assert_eq!(spec.column_type, ColumnType::BigInt);
        match spec.foreign_key() {
            Some(ColumnConstraint::ForeignKey { table, column, .. }) => {
                assert_eq!(table, "users");
                assert_eq!(column, "id");
            }
            _ => panic!("Expected ForeignKey"),
        }
    }

    #[test]
    fn test_unrecognized_type_fails() {
        let field = FieldDescription::new(1, "blob", FieldType::Unrecognized);
        match FieldTypeMapper::map("t", &field) {
            Err(Error::UnsupportedFieldType { type_name, .. }) => {
                assert_eq!(type_name, "unrecognized")
            }
            other => panic!("Expected UnsupportedFieldType, got {:?}", other),
        }
    }

    #[test]
    fn test_nested_computed_fails() {
        let inner = FieldType::computed("a", FieldType::Integer);
        let field = FieldDescription::new(1, "x", FieldType::computed("b", inner));
        assert!(matches!(
            FieldTypeMapper::map("t", &field),
            Err(Error::UnsupportedFieldType { .. })
        ));
    }

    #[test]
    fn test_misplaced_constraints_are_not_dropped() {
        let field = FieldDescription::new(1, "flag", FieldType::Boolean).with_max(3.0);
        assert!(FieldTypeMapper::map("t", &field).is_err());

        let field = FieldDescription::new(1, "qty", FieldType::Integer).with_max_length(3);
        assert!(FieldTypeMapper::map("t", &field).is_err());
    }

    #[test]
    fn test_default_type_mismatch() {
        let field = FieldDescription::new(1, "qty", FieldType::Integer)
            .with_default(DefaultValue::Text("many".into()));
        assert!(matches!(
            FieldTypeMapper::map("t", &field),
            Err(Error::InvalidDefault { .. })
        ));
    }

    #[test]
    fn test_default_must_be_allowed_value() {
        let field = FieldDescription::new(1, "status", FieldType::Select)
            .with_allowed_values(["draft", "live"])
            .with_default(DefaultValue::Text("archived".into()));
        assert!(FieldTypeMapper::map("t", &field).is_err());
    }

    #[test]
    fn test_now_default() {
        let spec = map(
            FieldDescription::new(1, "seen_at", FieldType::DateTime)
                .with_default(DefaultValue::Now),
        );
        assert_eq!(spec.default.as_deref(), Some("CURRENT_TIMESTAMP"));
    }
}

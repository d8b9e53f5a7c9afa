//! Semantic field types.

use serde::{Deserialize, Serialize};

/// Action taken on referencing rows when the referenced row is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferentialAction {
    /// Reject the delete if referencing rows exist (checked at end of statement).
    #[default]
    NoAction,
    /// Reject the delete immediately.
    Restrict,
    /// Delete referencing rows.
    Cascade,
    /// Set the referencing column to NULL.
    SetNull,
    /// Set the referencing column to its default.
    SetDefault,
}

impl ReferentialAction {
    /// SQL keyword for this action.
    pub fn as_sql(&self) -> &'static str {
        match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
        }
    }
}

/// Semantic type of a field.
///
/// The type decides the column type and any format or range checks the
/// column carries. Types the loader could not recognize deserialize to
/// [`FieldType::Unrecognized`] and are rejected by the mapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldType {
    // Text
    /// Free-form text.
    Text,
    /// Long free-form text.
    LongText,
    /// Formatted text (HTML or markdown).
    RichText,
    /// Email address.
    Email,
    /// HTTP(S) URL.
    Url,
    /// Phone number.
    Phone,
    /// Lowercase URL slug.
    Slug,
    /// Hex color, `#rrggbb`.
    Color,
    /// Password hash.
    Password,

    // Numeric
    /// 16-bit integer.
    SmallInteger,
    /// 32-bit integer.
    Integer,
    /// 64-bit integer.
    BigInteger,
    /// Arbitrary precision decimal.
    Decimal,
    /// Single precision float.
    Real,
    /// Double precision float.
    Double,
    /// Monetary amount.
    Currency,
    /// Percentage, 0 to 100 unless bounded otherwise.
    Percent,
    /// Star rating, 0 to 5 unless bounded otherwise.
    Rating,

    // Identity
    /// Auto-incrementing 32-bit integer.
    Serial,
    /// Auto-incrementing 64-bit integer.
    BigSerial,
    /// UUID.
    Uuid,

    // Temporal
    /// Calendar date.
    Date,
    /// Time of day.
    Time,
    /// Timestamp with time zone.
    DateTime,
    /// Timestamp without time zone.
    LocalDateTime,
    /// Time interval.
    Duration,

    /// Boolean flag.
    Boolean,

    // Selection
    /// One value out of the field's allowed values.
    Select,
    /// Any subset of the field's allowed values.
    MultiSelect,
    /// Free-form list of labels.
    Tags,

    // Structured
    /// JSON document.
    Json,
    /// Raw bytes.
    Binary,
    /// IPv4 or IPv6 address.
    IpAddress,
    /// Stored file key or URL.
    File,
    /// Stored image key or URL.
    Image,

    /// Reference to a row of another table.
    Reference {
        /// Referenced table name.
        table: String,
        /// Referenced column name.
        column: String,
        /// Type of the referenced key column.
        key_type: Box<FieldType>,
        /// Action on delete of the referenced row.
        #[serde(default)]
        on_delete: ReferentialAction,
    },

    /// Column computed from other columns of the same row.
    Computed {
        /// SQL expression over the row's columns.
        expression: String,
        /// Type of the computed value.
        returns: Box<FieldType>,
    },

    /// A type name the loader did not recognize.
    #[serde(other)]
    Unrecognized,
}

impl FieldType {
    /// Stable lowercase name of the type.
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::LongText => "long_text",
            FieldType::RichText => "rich_text",
            FieldType::Email => "email",
            FieldType::Url => "url",
            FieldType::Phone => "phone",
            FieldType::Slug => "slug",
            FieldType::Color => "color",
            FieldType::Password => "password",
            FieldType::SmallInteger => "small_integer",
            FieldType::Integer => "integer",
            FieldType::BigInteger => "big_integer",
            FieldType::Decimal => "decimal",
            FieldType::Real => "real",
            FieldType::Double => "double",
            FieldType::Currency => "currency",
            FieldType::Percent => "percent",
            FieldType::Rating => "rating",
            FieldType::Serial => "serial",
            FieldType::BigSerial => "big_serial",
            FieldType::Uuid => "uuid",
            FieldType::Date => "date",
            FieldType::Time => "time",
            FieldType::DateTime => "date_time",
            FieldType::LocalDateTime => "local_date_time",
            FieldType::Duration => "duration",
            FieldType::Boolean => "boolean",
            FieldType::Select => "select",
            FieldType::MultiSelect => "multi_select",
            FieldType::Tags => "tags",
            FieldType::Json => "json",
            FieldType::Binary => "binary",
            FieldType::IpAddress => "ip_address",
            FieldType::File => "file",
            FieldType::Image => "image",
            FieldType::Reference { .. } => "reference",
            FieldType::Computed { .. } => "computed",
            FieldType::Unrecognized => "unrecognized",
        }
    }

    /// Check if this type stores numbers (bounds apply to the value).
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            FieldType::SmallInteger
                | FieldType::Integer
                | FieldType::BigInteger
                | FieldType::Decimal
                | FieldType::Real
                | FieldType::Double
                | FieldType::Currency
                | FieldType::Percent
                | FieldType::Rating
                | FieldType::Serial
                | FieldType::BigSerial
        )
    }

    /// Check if this type stores a single string (length limits apply).
    pub fn is_textual(&self) -> bool {
        matches!(
            self,
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
                | FieldType::Image
        )
    }

    /// Check if the database fills the value in (identity or generated).
    pub fn is_generated(&self) -> bool {
        matches!(
            self,
            FieldType::Serial | FieldType::BigSerial | FieldType::Computed { .. }
        )
    }

    /// Create a reference type.
    pub fn reference(
        table: impl Into<String>,
        column: impl Into<String>,
        key_type: FieldType,
    ) -> Self {
        FieldType::Reference {
            table: table.into(),
            column: column.into(),
            key_type: Box::new(key_type),
            on_delete: ReferentialAction::NoAction,
        }
    }

    /// Set the delete action of a reference type. Other types are returned
    /// unchanged.
    pub fn with_on_delete(mut self, action: ReferentialAction) -> Self {
        if let FieldType::Reference { on_delete, .. } = &mut self {
            *on_delete = action;
        }
        self
    }

    /// Create a computed type.
    pub fn computed(expression: impl Into<String>, returns: FieldType) -> Self {
        FieldType::Computed {
            expression: expression.into(),
            returns: Box::new(returns),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_families() {
        assert!(FieldType::Currency.is_numeric());
        assert!(!FieldType::Currency.is_textual());
        assert!(FieldType::Email.is_textual());
        assert!(FieldType::Serial.is_generated());
        assert!(!FieldType::Tags.is_textual());
    }

    #[test]
    fn test_unknown_kind_deserializes_to_unrecognized() {
        let ty: FieldType = serde_json::from_str(r#"{"kind": "hologram"}"#).unwrap();
        assert_eq!(ty, FieldType::Unrecognized);
    }

    #[test]
    fn test_reference_serde() {
        let json = r#"{"kind": "reference", "table": "users", "column": "id",
                       "key_type": {"kind": "big_integer"}, "on_delete": "cascade"}"#;
        let ty: FieldType = serde_json::from_str(json).unwrap();
        match ty {
            FieldType::Reference {
                table,
                key_type,
                on_delete,
                ..
            } => {
                assert_eq!(table, "users");
                assert_eq!(*key_type, FieldType::BigInteger);
                assert_eq!(on_delete, ReferentialAction::Cascade);
            }
            _ => panic!("Expected Reference"),
        }
    }
}

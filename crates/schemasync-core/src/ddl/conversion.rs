//! Column type conversion policy.
//!
//! Every supported `(from, to)` pair of column types maps to a rule:
//!
//! | Kind | Clause | Data probe |
//! |------|--------|------------|
//! | **Widening** | plain `TYPE` | none |
//! | **Rewrite** | `TYPE ... USING expr` | none, every value converts |
//! | **Narrowing** | `TYPE ... USING expr` | rows that would not convert |
//!
//! Pairs without a rule are rejected; nothing falls back to a best-effort
//! cast.

use crate::mapper::ColumnType;

const INTEGER_PATTERN: &str = r"^[+-]?[0-9]+$";
const DECIMAL_PATTERN: &str = r"^[+-]?([0-9]+\.?[0-9]*|\.[0-9]+)([eE][+-]?[0-9]+)?$";
const DATE_PATTERN: &str = r"^[0-9]{4}-[0-9]{2}-[0-9]{2}$";
const TIME_PATTERN: &str = r"^[0-9]{2}:[0-9]{2}(:[0-9]{2}(\.[0-9]+)?)?$";
const TIMESTAMP_PATTERN: &str =
    r"^[0-9]{4}-[0-9]{2}-[0-9]{2}([ T][0-9]{2}:[0-9]{2}(:[0-9]{2}(\.[0-9]+)?)?)?(Z|[+-][0-9]{2}(:?[0-9]{2})?)?$";
const UUID_PATTERN: &str = r"^[0-9A-Fa-f]{8}-?[0-9A-Fa-f]{4}-?[0-9A-Fa-f]{4}-?[0-9A-Fa-f]{4}-?[0-9A-Fa-f]{12}$";
const BOOLEAN_WORDS: &str = "'true', 'false', 't', 'f', 'yes', 'no', 'y', 'n', 'on', 'off', '1', '0'";

/// How a conversion treats existing data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConversionKind {
    /// Every value fits the new type unchanged.
    Widening,
    /// Every value converts, but only through an explicit expression.
    Rewrite,
    /// Some values may not convert; existing rows are probed first.
    Narrowing,
}

impl std::fmt::Display for ConversionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConversionKind::Widening => write!(f, "widening"),
            ConversionKind::Rewrite => write!(f, "rewrite"),
            ConversionKind::Narrowing => write!(f, "narrowing"),
        }
    }
}

/// Rule for converting a column between two types.
///
/// Templates use `{col}` for the quoted column and `{ty}` for the target type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRule {
    /// Kind of conversion.
    pub kind: ConversionKind,
    using: Option<String>,
    violation: Option<String>,
    reason: &'static str,
}

impl ConversionRule {
    fn widening() -> Self {
        Self {
            kind: ConversionKind::Widening,
            using: None,
            violation: None,
            reason: "",
        }
    }

    fn rewrite(using: impl Into<String>) -> Self {
        Self {
            kind: ConversionKind::Rewrite,
            using: Some(using.into()),
            violation: None,
            reason: "",
        }
    }

    fn narrowing(
        using: impl Into<String>,
        violation: impl Into<String>,
        reason: &'static str,
    ) -> Self {
        Self {
            kind: ConversionKind::Narrowing,
            using: Some(using.into()),
            violation: Some(violation.into()),
            reason,
        }
    }

    /// The `USING` expression for `column`, if the conversion needs one.
    pub fn using_clause(&self, column: &str, to: ColumnType) -> Option<String> {
        self.using.as_ref().map(|t| render(t, column, to))
    }

    /// Predicate matching non-null rows of `column` that cannot convert.
    pub fn violation(&self, column: &str, to: ColumnType) -> Option<String> {
        self.violation
            .as_ref()
            .map(|t| format!("{} IS NOT NULL AND ({})", column, render(t, column, to)))
    }

    /// What the data must satisfy, for error messages.
    pub fn requirement(&self) -> &'static str {
        self.reason
    }
}

fn render(template: &str, column: &str, to: ColumnType) -> String {
    template
        .replace("{col}", column)
        .replace("{ty}", &to.to_string())
}

/// Inclusive value range of an integer column type.
fn integer_range(ty: ColumnType) -> Option<(i64, i64)> {
    match ty {
        ColumnType::SmallInt => Some((i16::MIN as i64, i16::MAX as i64)),
        ColumnType::Integer => Some((i32::MIN as i64, i32::MAX as i64)),
        ColumnType::BigInt => Some((i64::MIN, i64::MAX)),
        _ => None,
    }
}

/// Decimal digits an integer type can hold.
fn integer_digits(ty: ColumnType) -> u8 {
    match ty {
        ColumnType::SmallInt => 5,
        ColumnType::Integer => 10,
        _ => 19,
    }
}

/// Predicate matching values that overflow `NUMERIC(p, s)`.
fn numeric_overflow(precision: u8, scale: u8) -> String {
    format!(
        "{{col}} <> round({{col}}, {scale}) OR abs({{col}}) >= 1e{}",
        precision.saturating_sub(scale)
    )
}

/// Decides how columns convert between types.
pub struct ConversionPolicy;

impl ConversionPolicy {
    /// Rule for converting `from` to `to`, or `None` if unsupported.
    ///
    /// Identical types need no conversion and return `None` as well; callers
    /// compare types first.
    pub fn rule(from: ColumnType, to: ColumnType) -> Option<ConversionRule> {
        use ColumnType::*;

        if from == to {
            return None;
        }

        let rule = match (from, to) {
            // Integers
            (a, b) if a.is_integer() && b.is_integer() => {
                if integer_digits(a) < integer_digits(b) {
                    ConversionRule::widening()
                } else {
                    let (lo, hi) = integer_range(b)?;
                    ConversionRule::narrowing(
                        "{col}::{ty}",
                        format!("{{col}} NOT BETWEEN {} AND {}", lo, hi),
                        "values must fit the smaller integer type",
                    )
                }
            }
            (a, Numeric(None)) if a.is_integer() => ConversionRule::widening(),
            (a, Numeric(Some((p, s)))) if a.is_integer() => {
                if integer_digits(a) <= p.saturating_sub(s) {
                    ConversionRule::widening()
                } else {
                    ConversionRule::narrowing(
                        "{col}::{ty}",
                        numeric_overflow(p, s),
                        "values must fit the declared precision",
                    )
                }
            }
            (SmallInt, Real) | (SmallInt | Integer, Double) => ConversionRule::widening(),
            (Integer | BigInt, Real) => ConversionRule::narrowing(
                "{col}::{ty}",
                "abs({col}) > 16777216",
                "values must be exactly representable as REAL",
            ),
            (BigInt, Double) => ConversionRule::narrowing(
                "{col}::{ty}",
                "abs({col}) > 9007199254740992",
                "values must be exactly representable as DOUBLE PRECISION",
            ),
            (a, Boolean) if a.is_integer() => ConversionRule::narrowing(
                "{col} <> 0",
                "{col} NOT IN (0, 1)",
                "values must be 0 or 1",
            ),

            // Decimals and floats
            (Real, Double) => ConversionRule::widening(),
            (Double, Real) => ConversionRule::narrowing(
                "{col}::{ty}",
                "abs({col}) > 3.4e38",
                "values must fit REAL",
            ),
            (Numeric(_), Numeric(None)) | (Numeric(_), Real | Double) => ConversionRule::widening(),
            (Numeric(Some((p1, s1))), Numeric(Some((p2, s2))))
                if s2 >= s1 && p2.saturating_sub(s2) >= p1.saturating_sub(s1) =>
            {
                ConversionRule::widening()
            }
            (Numeric(_), Numeric(Some((p, s)))) => ConversionRule::narrowing(
                "{col}::{ty}",
                numeric_overflow(p, s),
                "values must fit the declared precision",
            ),
            (Real | Double, Numeric(spec)) => {
                let mut violation = "{col}::TEXT IN ('NaN', 'Infinity', '-Infinity')".to_string();
                if let Some((p, s)) = spec {
                    violation = format!(
                        "CASE WHEN {} THEN TRUE ELSE {} END",
                        violation,
                        numeric_overflow(p, s)
                    );
                }
                ConversionRule::narrowing(
                    "{col}::{ty}",
                    violation,
                    "values must be finite and fit the declared precision",
                )
            }
            (Numeric(_) | Real | Double, b) if b.is_integer() => {
                let (lo, hi) = integer_range(b)?;
                ConversionRule::narrowing(
                    "{col}::{ty}",
                    format!(
                        "{{col}} <> trunc({{col}}) OR {{col}} NOT BETWEEN {} AND {}",
                        lo, hi
                    ),
                    "values must be whole numbers within the integer range",
                )
            }

            // Anything reads as text
            (TextArray, Text) => ConversionRule::rewrite("array_to_string({col}, ',')"),
            (_, Text) => ConversionRule::widening(),

            // Text parses into other types
            (Text, b) if b.is_integer() => {
                let (lo, hi) = integer_range(b)?;
                ConversionRule::narrowing(
                    "trim({col})::{ty}",
                    format!(
                        "CASE WHEN trim({{col}}) ~ '{}' THEN trim({{col}})::NUMERIC NOT BETWEEN {} AND {} ELSE TRUE END",
                        INTEGER_PATTERN, lo, hi
                    ),
                    "values must be integers within range",
                )
            }
            (Text, Numeric(Some((p, s)))) => ConversionRule::narrowing(
                "trim({col})::{ty}",
                format!(
                    "CASE WHEN trim({{col}}) ~ '{}' THEN {} ELSE TRUE END",
                    DECIMAL_PATTERN,
                    numeric_overflow(p, s).replace("{col}", "trim({col})::NUMERIC")
                ),
                "values must be numbers that fit the declared precision",
            ),
            (Text, Numeric(None) | Real | Double) => ConversionRule::narrowing(
                "trim({col})::{ty}",
                format!("trim({{col}}) !~ '{}'", DECIMAL_PATTERN),
                "values must be numbers",
            ),
            (Text, Boolean) => ConversionRule::narrowing(
                "trim({col})::{ty}",
                format!("lower(trim({{col}})) NOT IN ({})", BOOLEAN_WORDS),
                "values must be boolean words",
            ),
            (Text, Date) => ConversionRule::narrowing(
                "trim({col})::{ty}",
                format!("trim({{col}}) !~ '{}'", DATE_PATTERN),
                "values must be ISO dates",
            ),
            (Text, Time) => ConversionRule::narrowing(
                "trim({col})::{ty}",
                format!("trim({{col}}) !~ '{}'", TIME_PATTERN),
                "values must be ISO times",
            ),
            (Text, Timestamptz | Timestamp) => ConversionRule::narrowing(
                "trim({col})::{ty}",
                format!("trim({{col}}) !~ '{}'", TIMESTAMP_PATTERN),
                "values must be ISO timestamps",
            ),
            (Text, Uuid) => ConversionRule::narrowing(
                "trim({col})::{ty}",
                format!("trim({{col}}) !~ '{}'", UUID_PATTERN),
                "values must be UUIDs",
            ),
            (Text, TextArray) => {
                ConversionRule::rewrite("CASE WHEN {col} IS NULL THEN NULL ELSE ARRAY[{col}] END")
            }

            (Boolean, b) if b.is_integer() => {
                ConversionRule::rewrite("CASE WHEN {col} IS NULL THEN NULL WHEN {col} THEN 1 ELSE 0 END")
            }

            // Temporal
            (Date, Timestamptz | Timestamp) => ConversionRule::widening(),
            (Timestamp, Timestamptz) | (Timestamptz, Timestamp) => ConversionRule::widening(),
            (Timestamptz | Timestamp, Date) => ConversionRule::narrowing(
                "{col}::{ty}",
                "{col} <> date_trunc('day', {col})",
                "values must fall on midnight",
            ),

            _ => return None,
        };

        Some(rule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_widening() {
        let rule = ConversionPolicy::rule(ColumnType::Integer, ColumnType::BigInt).unwrap();
        assert_eq!(rule.kind, ConversionKind::Widening);
        assert!(rule.using_clause("\"n\"", ColumnType::BigInt).is_none());

        let rule = ConversionPolicy::rule(ColumnType::Integer, ColumnType::Numeric(None)).unwrap();
        assert_eq!(rule.kind, ConversionKind::Widening);
    }

    #[test]
    fn test_integer_narrowing_checks_range() {
        let rule = ConversionPolicy::rule(ColumnType::BigInt, ColumnType::SmallInt).unwrap();
        assert_eq!(rule.kind, ConversionKind::Narrowing);
        assert_eq!(
            rule.violation("\"n\"", ColumnType::SmallInt).unwrap(),
            "\"n\" IS NOT NULL AND (\"n\" NOT BETWEEN -32768 AND 32767)"
        );
    }

    #[test]
    fn test_text_to_integer_uses_using_and_probe() {
        let rule = ConversionPolicy::rule(ColumnType::Text, ColumnType::Integer).unwrap();
        assert_eq!(rule.kind, ConversionKind::Narrowing);
        assert_eq!(
            rule.using_clause("\"age\"", ColumnType::Integer).unwrap(),
            "trim(\"age\")::INTEGER"
        );
        let violation = rule.violation("\"age\"", ColumnType::Integer).unwrap();
        assert!(violation.starts_with("\"age\" IS NOT NULL AND (CASE WHEN trim(\"age\") ~"));
    }

    #[test]
    fn test_numeric_precision() {
        let narrow = ConversionPolicy::rule(
            ColumnType::Numeric(Some((10, 2))),
            ColumnType::Numeric(Some((5, 2))),
        )
        .unwrap();
        assert_eq!(narrow.kind, ConversionKind::Narrowing);
        assert_eq!(
            narrow.violation("\"x\"", ColumnType::Numeric(Some((5, 2)))).unwrap(),
            "\"x\" IS NOT NULL AND (\"x\" <> round(\"x\", 2) OR abs(\"x\") >= 1e3)"
        );

        let wide = ConversionPolicy::rule(
            ColumnType::Numeric(Some((5, 2))),
            ColumnType::Numeric(Some((10, 4))),
        )
        .unwrap();
        assert_eq!(wide.kind, ConversionKind::Widening);
    }

    #[test]
    fn test_anything_to_text_is_widening() {
        for from in [ColumnType::Uuid, ColumnType::Jsonb, ColumnType::Boolean] {
            let rule = ConversionPolicy::rule(from, ColumnType::Text).unwrap();
            assert_eq!(rule.kind, ConversionKind::Widening);
        }
    }

    #[test]
    fn test_boolean_to_integer_is_rewrite() {
        let rule = ConversionPolicy::rule(ColumnType::Boolean, ColumnType::Integer).unwrap();
        assert_eq!(rule.kind, ConversionKind::Rewrite);
        assert!(rule.violation("\"b\"", ColumnType::Integer).is_none());
    }

    #[test]
    fn test_unmapped_pairs_are_unsupported() {
        assert!(ConversionPolicy::rule(ColumnType::Uuid, ColumnType::Integer).is_none());
        assert!(ConversionPolicy::rule(ColumnType::Text, ColumnType::Jsonb).is_none());
        assert!(ConversionPolicy::rule(ColumnType::Boolean, ColumnType::Date).is_none());
        assert!(ConversionPolicy::rule(ColumnType::Text, ColumnType::Text).is_none());
    }
}

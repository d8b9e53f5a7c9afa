//! SQL quoting and naming helpers.

use sha2::{Digest, Sha256};

/// Longest identifier PostgreSQL keeps without truncation, in bytes.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Quote an identifier: `users` becomes `"users"`.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal: `it's` becomes `'it''s'`.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Render a finite number as a SQL numeric literal.
///
/// Whole numbers render without a fractional part (`1000`, not `1000.0`).
pub fn number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Join parts into a database object name that fits the identifier limit.
///
/// Over-long names keep a readable prefix followed by eight hex digits of
/// the full name's SHA-256, so distinct long names stay distinct.
pub fn object_name(parts: &[&str]) -> String {
    let name = parts.join("_");
    if name.len() <= MAX_IDENTIFIER_LEN {
        return name;
    }

    let suffix = hex::encode(&Sha256::digest(name.as_bytes())[..4]);
    let mut cut = MAX_IDENTIFIER_LEN - suffix.len() - 1;
    while !name.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}_{}", &name[..cut], suffix)
}

/// Quote and comma-join a list of identifiers.
pub fn ident_list<I, S>(names: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .map(|n| quote_ident(n.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal("it's"), "'it''s'");
    }

    #[test]
    fn test_number() {
        assert_eq!(number(0.0), "0");
        assert_eq!(number(1000.0), "1000");
        assert_eq!(number(-1.0), "-1");
        assert_eq!(number(0.25), "0.25");
    }

    #[test]
    fn test_object_name_truncation() {
        assert_eq!(object_name(&["users", "email", "key"]), "users_email_key");

        let long = "a".repeat(80);
        let name = object_name(&[&long, "key"]);
        assert_eq!(name.len(), MAX_IDENTIFIER_LEN);
        assert_ne!(name, object_name(&[&long, "idx"]));
    }

    #[test]
    fn test_ident_list() {
        assert_eq!(ident_list(["a", "b"]), "\"a\", \"b\"");
    }
}

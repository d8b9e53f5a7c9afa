//! Error types for schema synchronization.

use std::time::Duration;
use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while generating or applying a schema migration.
#[derive(Debug, Error)]
pub enum Error {
    /// The field's semantic type has no column mapping.
    #[error("unsupported field type for {table}.{field}: {type_name}")]
    UnsupportedFieldType {
        /// Table the field belongs to.
        table: String,
        /// Field name.
        field: String,
        /// Name of the rejected type.
        type_name: String,
    },

    /// No conversion policy exists between the two column types.
    #[error("unsupported type conversion for {table}.{field}: {from} -> {to}")]
    UnsupportedTypeConversion {
        /// Table the field belongs to.
        table: String,
        /// Field name.
        field: String,
        /// Current column type.
        from: String,
        /// Requested column type.
        to: String,
    },

    /// Existing rows would not survive the requested change.
    #[error("{rows} existing row(s) in {table}.{field} are incompatible: {reason}")]
    IncompatibleExistingData {
        /// Table holding the rows.
        table: String,
        /// Column that was probed.
        field: String,
        /// What the change requires of the data.
        reason: String,
        /// Number of offending rows.
        rows: u64,
    },

    /// The table description is internally inconsistent.
    #[error("invalid description for table {table}: {reason}")]
    InvalidDescription {
        /// Table name.
        table: String,
        /// What is wrong.
        reason: String,
    },

    /// A default value cannot be rendered for the field's type.
    #[error("invalid default for {table}.{field}: {reason}")]
    InvalidDefault {
        /// Table the field belongs to.
        table: String,
        /// Field name.
        field: String,
        /// What is wrong.
        reason: String,
    },

    /// A field-level access rule cannot be expressed as column privileges.
    #[error("field rule on {table}.{field} cannot be expressed as column grants: {rule}")]
    UnsupportedFieldRule {
        /// Table the field belongs to.
        table: String,
        /// Field name.
        field: String,
        /// Kind of the rejected rule.
        rule: String,
    },

    /// The role registry rejected a role name.
    #[error("role {role} referenced by table {table} was rejected: {reason}")]
    UnknownRole {
        /// Rejected role.
        role: String,
        /// Table whose rules reference it.
        table: String,
        /// Registry explanation.
        reason: String,
    },

    /// A statement in the batch failed; the transaction was rolled back.
    #[error("statement {index} failed: {message}")]
    StatementFailed {
        /// Zero-based position in the batch.
        index: usize,
        /// The failing statement.
        statement: String,
        /// Database error message.
        message: String,
    },

    /// Database driver error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Non-driver storage failure.
    #[error("backend error: {0}")]
    Backend(String),

    /// The migration lock could not be acquired in time.
    #[error("timed out after {waited:?} waiting for migration lock {key}")]
    LockTimeout {
        /// Advisory lock key.
        key: i64,
        /// Time spent waiting.
        waited: Duration,
    },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether the error comes from the pure generation phase.
    ///
    /// Generation errors are deterministic: retrying with the same
    /// description fails the same way.
    pub fn is_generation_error(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedFieldType { .. }
                | Error::UnsupportedTypeConversion { .. }
                | Error::IncompatibleExistingData { .. }
                | Error::InvalidDescription { .. }
                | Error::InvalidDefault { .. }
                | Error::UnsupportedFieldRule { .. }
                | Error::UnknownRole { .. }
        )
    }

    /// Whether the failure may be transient and the run is safe to retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::StatementFailed { .. }
                | Error::Database(_)
                | Error::Backend(_)
                | Error::LockTimeout { .. }
        )
    }

    pub(crate) fn invalid(table: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidDescription {
            table: table.into(),
            reason: reason.into(),
        }
    }
}

//! Declarative table descriptions.
//!
//! These types are built by the configuration loader on every start and
//! only live in memory. Fields and tables carry stable identifiers so that
//! renames can be told apart from drop-and-add.

pub mod access;
pub mod field;
pub mod table;
pub mod types;

/// Stable table identifier.
pub type TableId = u32;

/// Stable field identifier, unique within its table.
pub type FieldId = u32;

pub use access::{AccessRule, CrudAction, FieldAccess, TableAccess};
pub use field::{DefaultValue, FieldConstraints, FieldDescription};
pub use table::{
    PrimaryKey, TableDescription, CREATED_AT_COLUMN, SURROGATE_KEY_COLUMN, UPDATED_AT_COLUMN,
};
pub use types::{FieldType, ReferentialAction};

//! Table descriptions.

use super::access::{AccessRule, CrudAction, TableAccess};
use super::field::FieldDescription;
use super::{FieldId, TableId};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Column added for tables with a surrogate primary key.
pub const SURROGATE_KEY_COLUMN: &str = "id";

/// Housekeeping column holding the insert time.
pub const CREATED_AT_COLUMN: &str = "created_at";

/// Housekeeping column holding the last update time.
pub const UPDATED_AT_COLUMN: &str = "updated_at";

/// Primary key of a table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "fields", rename_all = "snake_case")]
pub enum PrimaryKey {
    /// A generated `id BIGINT` identity column.
    #[default]
    Surrogate,
    /// One or more declared fields, in key order.
    Fields(Vec<FieldId>),
}

/// Description of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescription {
    /// Stable identifier. Survives renames.
    pub id: TableId,
    /// Table name.
    pub name: String,
    /// Fields in column order.
    pub fields: Vec<FieldDescription>,
    /// Primary key.
    #[serde(default)]
    pub primary_key: PrimaryKey,
    /// Table-level access rules.
    #[serde(default)]
    pub access: TableAccess,
    /// Whether to add `created_at` / `updated_at` columns.
    #[serde(default = "default_timestamps")]
    pub timestamps: bool,
}

fn default_timestamps() -> bool {
    true
}

impl TableDescription {
    /// Create a new table with a surrogate key and housekeeping timestamps.
    pub fn new(id: TableId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            fields: Vec::new(),
            primary_key: PrimaryKey::Surrogate,
            access: TableAccess::default(),
            timestamps: true,
        }
    }

    /// Add a field.
    pub fn with_field(mut self, field: FieldDescription) -> Self {
        self.fields.push(field);
        self
    }

    /// Set the primary key.
    pub fn with_primary_key(mut self, primary_key: PrimaryKey) -> Self {
        self.primary_key = primary_key;
        self
    }

    /// Set the rule for a CRUD action.
    pub fn with_rule(mut self, action: CrudAction, rule: AccessRule) -> Self {
        self.access.set(action, rule);
        self
    }

    /// Drop the housekeeping timestamp columns.
    pub fn without_timestamps(mut self) -> Self {
        self.timestamps = false;
        self
    }

    /// Get a field by id.
    pub fn field(&self, id: FieldId) -> Option<&FieldDescription> {
        self.fields.iter().find(|f| f.id == id)
    }

    /// Get a field by name.
    pub fn field_by_name(&self, name: &str) -> Option<&FieldDescription> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Fields carrying a column-level read or write override.
    pub fn restricted_fields(&self) -> impl Iterator<Item = &FieldDescription> {
        self.fields
            .iter()
            .filter(|f| f.access.as_ref().is_some_and(|a| !a.is_empty()))
    }

    /// Names of every column the table has, housekeeping included.
    pub fn column_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.fields.len() + 3);
        if self.primary_key == PrimaryKey::Surrogate {
            names.push(SURROGATE_KEY_COLUMN.to_string());
        }
        names.extend(self.fields.iter().map(|f| f.name.clone()));
        if self.timestamps {
            names.push(CREATED_AT_COLUMN.to_string());
            names.push(UPDATED_AT_COLUMN.to_string());
        }
        names
    }

    /// Check the description for internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::invalid(&self.name, "table name is empty"));
        }

        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        for field in &self.fields {
            if field.name.trim().is_empty() {
                return Err(Error::invalid(
                    &self.name,
                    format!("field {} has an empty name", field.id),
                ));
            }
            if !ids.insert(field.id) {
                return Err(Error::invalid(
                    &self.name,
                    format!("duplicate field id {}", field.id),
                ));
            }
            if !names.insert(field.name.as_str()) {
                return Err(Error::invalid(
                    &self.name,
                    format!("duplicate field name {}", field.name),
                ));
            }
            self.validate_bounds(field)?;
        }

        let mut reserved = Vec::new();
        if self.primary_key == PrimaryKey::Surrogate {
            reserved.push(SURROGATE_KEY_COLUMN);
        }
        if self.timestamps {
            reserved.extend([CREATED_AT_COLUMN, UPDATED_AT_COLUMN]);
        }
        if let Some(clash) = reserved.iter().find(|name| names.contains(*name)) {
            return Err(Error::invalid(
                &self.name,
                format!("field name {} is reserved for a housekeeping column", clash),
            ));
        }

        if let PrimaryKey::Fields(key) = &self.primary_key {
            if key.is_empty() {
                return Err(Error::invalid(&self.name, "primary key has no fields"));
            }
            if let Some(missing) = key.iter().find(|id| !ids.contains(*id)) {
                return Err(Error::invalid(
                    &self.name,
                    format!("primary key references unknown field {}", missing),
                ));
            }
        }

        let field_rules = self
            .fields
            .iter()
            .flat_map(|f| f.read_rule().into_iter().chain(f.write_rule()));
        for rule in self.access.rules().map(|(_, r)| r).chain(field_rules) {
            match rule {
                AccessRule::Roles { roles } if roles.is_empty() => {
                    return Err(Error::invalid(&self.name, "role rule with no roles"));
                }
                AccessRule::Owner { field } if !ids.contains(field) => {
                    return Err(Error::invalid(
                        &self.name,
                        format!("owner rule references unknown field {}", field),
                    ));
                }
                _ => {}
            }
        }

        Ok(())
    }

    fn validate_bounds(&self, field: &FieldDescription) -> Result<()> {
        let c = &field.constraints;
        for bound in [c.min, c.max].into_iter().flatten() {
            if !bound.is_finite() {
                return Err(Error::invalid(
                    &self.name,
                    format!("field {} has a non-finite bound", field.name),
                ));
            }
        }
        if let (Some(min), Some(max)) = (c.min, c.max) {
            if min > max {
                return Err(Error::invalid(
                    &self.name,
                    format!("field {} has min {} above max {}", field.name, min, max),
                ));
            }
        }
        if let (Some(min), Some(max)) = (c.min_length, c.max_length) {
            if min > max {
                return Err(Error::invalid(
                    &self.name,
                    format!("field {} has min_length above max_length", field.name),
                ));
            }
        }
        Ok(())
    }

    /// Copy with every order-insensitive list sorted.
    ///
    /// Fields are ordered by id and allowed values are sorted and
    /// deduplicated. Primary key order is significant and kept.
    pub fn canonicalized(&self) -> TableDescription {
        let mut table = self.clone();
        table.fields.sort_by_key(|f| f.id);
        for field in &mut table.fields {
            let values = &mut field.constraints.allowed_values;
            values.sort();
            values.dedup();
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FieldType;

    fn users_table() -> TableDescription {
        TableDescription::new(1, "users")
            .with_field(FieldDescription::new(1, "email", FieldType::Email).required().unique())
            .with_field(FieldDescription::new(2, "name", FieldType::Text).required())
            .with_rule(CrudAction::Read, AccessRule::Authenticated)
    }

    #[test]
    fn test_valid_table() {
        assert!(users_table().validate().is_ok());
        assert_eq!(
            users_table().column_names(),
            vec!["id", "email", "name", "created_at", "updated_at"]
        );
    }

    #[test]
    fn test_duplicate_field_id_rejected() {
        let table = users_table().with_field(FieldDescription::new(2, "nickname", FieldType::Text));
        let err = table.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate field id 2"));
    }

    #[test]
    fn test_reserved_name_rejected() {
        let table = users_table().with_field(FieldDescription::new(9, "created_at", FieldType::DateTime));
        assert!(table.validate().is_err());

        let table = users_table()
            .without_timestamps()
            .with_field(FieldDescription::new(9, "created_at", FieldType::DateTime));
        assert!(table.validate().is_ok());
    }

    #[test]
    fn test_primary_key_must_exist() {
        let table = users_table().with_primary_key(PrimaryKey::Fields(vec![1, 5]));
        assert!(table.validate().is_err());

        let table = users_table().with_primary_key(PrimaryKey::Fields(vec![1]));
        assert!(table.validate().is_ok());
        assert_eq!(table.column_names()[0], "email");
    }

    #[test]
    fn test_owner_rule_must_reference_field() {
        let table = users_table().with_rule(CrudAction::Update, AccessRule::owner(42));
        assert!(table.validate().is_err());
    }

    #[test]
    fn test_empty_role_set_rejected() {
        let table = users_table().with_rule(CrudAction::Delete, AccessRule::roles(Vec::<String>::new()));
        assert!(table.validate().is_err());
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let table = users_table().with_field(
            FieldDescription::new(3, "amount", FieldType::Decimal)
                .with_min(10.0)
                .with_max(1.0),
        );
        assert!(table.validate().is_err());
    }

    #[test]
    fn test_canonicalized_sorts_fields_and_values() {
        let table = TableDescription::new(1, "tasks")
            .with_field(
                FieldDescription::new(5, "status", FieldType::Select)
                    .with_allowed_values(["open", "done", "open"]),
            )
            .with_field(FieldDescription::new(2, "title", FieldType::Text));

        let canonical = table.canonicalized();
        assert_eq!(canonical.fields[0].id, 2);
        assert_eq!(canonical.fields[1].constraints.allowed_values, vec!["done", "open"]);
    }
}

//! ALTER path: evolve a table from its previous description.
//!
//! A diff comes back in phases. Teardown drops constraints and indexes that
//! are gone or changed, under the previous table name. Renames of the
//! table, its constraints and its indexes are resolved together with every
//! other table of the batch. The structure phase then runs against the
//! current table name:
//!
//! 1. column drops
//! 2. column renames
//! 3. column adds
//! 4. per-column alterations (type, identity, NOT NULL, default, comment)
//! 5. new or changed constraints
//! 6. index creates, housekeeping trigger

use super::conversion::ConversionPolicy;
use super::create::{
    create_index, sensitivity_comment, surrogate_key_definition, timestamp_definitions,
    touch_trigger,
};
use super::{
    column_specs, index_name, named_constraints, rename_statements, trigger_name, ConstraintKey,
    DataCheck, DdlGenerator, Rename, RenameKind, TableDdl,
};
use crate::catalog::{
    FieldDescription, FieldId, PrimaryKey, TableDescription, CREATED_AT_COLUMN,
    SURROGATE_KEY_COLUMN, UPDATED_AT_COLUMN,
};
use crate::error::{Error, Result};
use crate::mapper::{ColumnSpec, FieldTypeMapper, Generation};
use crate::sql::quote_ident;
use std::collections::{BTreeMap, BTreeSet};

impl DdlGenerator {
    /// Statements evolving `previous` into `current`, split by phase.
    pub fn diff(previous: &TableDescription, current: &TableDescription) -> Result<TableDdl> {
        current.validate()?;
        TableDiff::new(previous, current)?.render()
    }
}

struct TableDiff<'a> {
    previous: &'a TableDescription,
    current: &'a TableDescription,
    old_specs: BTreeMap<FieldId, ColumnSpec>,
    new_specs: BTreeMap<FieldId, ColumnSpec>,
    /// `ALTER TABLE "<current name>"`.
    alter: String,
    ddl: TableDdl,
}

impl<'a> TableDiff<'a> {
    fn new(previous: &'a TableDescription, current: &'a TableDescription) -> Result<Self> {
        Ok(Self {
            previous,
            current,
            old_specs: column_specs(previous)?,
            new_specs: column_specs(current)?,
            alter: format!("ALTER TABLE {}", quote_ident(&current.name)),
            ddl: TableDdl::default(),
        })
    }

    fn push(&mut self, statement: String) {
        self.ddl.structure.push(statement);
    }

    fn render(mut self) -> Result<TableDdl> {
        let (prev, cur) = (self.previous, self.current);

        if prev.name != cur.name {
            self.ddl
                .renames
                .push(Rename::new(RenameKind::Table, &prev.name, &cur.name));
        }

        let old_constraints = named_constraints(prev, &self.old_specs);
        let new_constraints = named_constraints(cur, &self.new_specs);

        for (key, old) in &old_constraints {
            match new_constraints.get(key) {
                Some(new) if new.definition == old.definition => {
                    if new.name != old.name {
                        self.ddl.renames.push(Rename::new(
                            RenameKind::Constraint(cur.name.clone()),
                            &old.name,
                            &new.name,
                        ));
                    }
                }
                _ => self.ddl.teardown.push(format!(
                    "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {}",
                    quote_ident(&prev.name),
                    quote_ident(&old.name)
                )),
            }
        }
        for field in prev.fields.iter().filter(|f| f.indexed) {
            let old_index = index_name(&prev.name, &field.name);
            match cur.field(field.id).filter(|f| f.indexed) {
                Some(new) => {
                    let new_index = index_name(&cur.name, &new.name);
                    if new_index != old_index {
                        self.ddl
                            .renames
                            .push(Rename::new(RenameKind::Index, old_index, new_index));
                    }
                }
                None => self
                    .ddl
                    .teardown
                    .push(format!("DROP INDEX IF EXISTS {}", quote_ident(&old_index))),
            }
        }

        // Drops first so a rename may take a dropped column's name.
        self.drop_columns();
        let column_renames: Vec<Rename> = prev
            .fields
            .iter()
            .filter_map(|field| {
                let new = cur.field(field.id)?;
                (new.name != field.name).then(|| {
                    Rename::new(RenameKind::Column(cur.name.clone()), &field.name, &new.name)
                })
            })
            .collect();
        self.ddl.structure.extend(rename_statements(&column_renames));
        self.add_columns();

        for field in &cur.fields {
            if let Some(old) = prev.field(field.id) {
                self.alter_column(old, field)?;
            }
        }

        self.add_constraints(&old_constraints, &new_constraints)?;
        self.indexes_and_triggers();

        Ok(self.ddl)
    }

    fn drop_columns(&mut self) {
        let (prev, cur) = (self.previous, self.current);

        let mut dropped: Vec<&str> = prev
            .fields
            .iter()
            .filter(|f| cur.field(f.id).is_none())
            .map(|f| f.name.as_str())
            .collect();
        if prev.primary_key == PrimaryKey::Surrogate && cur.primary_key != PrimaryKey::Surrogate {
            dropped.push(SURROGATE_KEY_COLUMN);
        }
        if prev.timestamps && !cur.timestamps {
            self.push(format!(
                "DROP TRIGGER IF EXISTS {} ON {}",
                quote_ident(&trigger_name(&prev.name)),
                quote_ident(&cur.name)
            ));
            dropped.extend([CREATED_AT_COLUMN, UPDATED_AT_COLUMN]);
        }

        for column in dropped {
            self.push(format!(
                "{} DROP COLUMN IF EXISTS {}",
                self.alter,
                quote_ident(column)
            ));
        }
    }

    fn add_columns(&mut self) {
        let (prev, cur) = (self.previous, self.current);

        let mut added = Vec::new();
        if cur.primary_key == PrimaryKey::Surrogate && prev.primary_key != PrimaryKey::Surrogate {
            added.push(surrogate_key_definition());
        }
        for field in cur.fields.iter().filter(|f| prev.field(f.id).is_none()) {
            let Some(spec) = self.new_specs.get(&field.id) else {
                continue;
            };
            if spec.is_required() && spec.default.is_none() && spec.generated.is_none() {
                self.ddl.data_checks.push(DataCheck::any_rows(
                    &prev.name,
                    &field.name,
                    "the table must be empty to add a required column without a default",
                ));
            }
            added.push(spec.definition());
        }
        if cur.timestamps && !prev.timestamps {
            added.extend(timestamp_definitions());
        }

        for definition in added {
            self.push(format!("{} ADD COLUMN IF NOT EXISTS {}", self.alter, definition));
        }
        for field in cur
            .fields
            .iter()
            .filter(|f| f.sensitive && prev.field(f.id).is_none())
        {
            self.push(sensitivity_comment(&cur.name, field));
        }
    }

    fn alter_column(&mut self, old: &FieldDescription, new: &FieldDescription) -> Result<()> {
        let (Some(old_spec), Some(new_spec)) =
            (self.old_specs.get(&old.id), self.new_specs.get(&new.id))
        else {
            return Ok(());
        };
        let (old_spec, new_spec) = (old_spec.clone(), new_spec.clone());
        let previous = self.previous;
        let table = &previous.name;
        let column = quote_ident(&new.name);

        // Stored expressions cannot be altered in place; the values are
        // derived, so dropping and re-adding loses nothing.
        let old_expr = match &old_spec.generated {
            Some(Generation::Stored(e)) => Some(e),
            _ => None,
        };
        let new_expr = match &new_spec.generated {
            Some(Generation::Stored(e)) => Some(e),
            _ => None,
        };
        match (old_expr, new_expr) {
            (Some(a), Some(b)) if a != b || old_spec.column_type != new_spec.column_type => {
                self.push(format!("{} DROP COLUMN IF EXISTS {}", self.alter, column));
                self.push(format!(
                    "{} ADD COLUMN IF NOT EXISTS {}",
                    self.alter,
                    new_spec.definition()
                ));
                return Ok(());
            }
            (Some(_), Some(_)) => {}
            (Some(_), None) => {
                self.push(format!("{} ALTER COLUMN {} DROP EXPRESSION IF EXISTS", self.alter, column));
            }
            (None, Some(_)) => {
                return Err(Error::UnsupportedTypeConversion {
                    table: self.current.name.clone(),
                    field: new.name.clone(),
                    from: old_spec.column_type.to_string(),
                    to: format!("computed {}", new_spec.column_type),
                });
            }
            (None, None) => {}
        }

        let type_changed = old_spec.column_type != new_spec.column_type;
        if type_changed {
            let rule = ConversionPolicy::rule(old_spec.column_type, new_spec.column_type)
                .ok_or_else(|| Error::UnsupportedTypeConversion {
                    table: self.current.name.clone(),
                    field: new.name.clone(),
                    from: old_spec.column_type.to_string(),
                    to: new_spec.column_type.to_string(),
                })?;

            let old_column = quote_ident(&old.name);
            if let Some(predicate) = rule.violation(&old_column, new_spec.column_type) {
                self.ddl.data_checks.push(DataCheck::rows_matching(
                    table,
                    &old.name,
                    rule.requirement(),
                    &predicate,
                ));
            }

            if old_spec.default.is_some() {
                self.push(format!("{} ALTER COLUMN {} DROP DEFAULT", self.alter, column));
            }
            let mut statement = format!(
                "{} ALTER COLUMN {} TYPE {}",
                self.alter, column, new_spec.column_type
            );
            if let Some(using) = rule.using_clause(&column, new_spec.column_type) {
                statement.push_str(&format!(" USING {}", using));
            }
            self.push(statement);
        }

        match (&old_spec.generated, &new_spec.generated) {
            (Some(Generation::Identity), None) => {
                self.push(format!("{} ALTER COLUMN {} DROP IDENTITY IF EXISTS", self.alter, column));
            }
            (None, Some(Generation::Identity)) => {
                self.push(format!(
                    "{} ALTER COLUMN {} ADD GENERATED BY DEFAULT AS IDENTITY",
                    self.alter, column
                ));
            }
            _ => {}
        }

        match (old_spec.is_required(), new_spec.is_required()) {
            (false, true) => {
                let old_column = quote_ident(&old.name);
                self.ddl.data_checks.push(DataCheck::rows_matching(
                    table,
                    &old.name,
                    "values must not be null",
                    &format!("{} IS NULL", old_column),
                ));
                self.push(format!("{} ALTER COLUMN {} SET NOT NULL", self.alter, column));
            }
            (true, false) => {
                self.push(format!("{} ALTER COLUMN {} DROP NOT NULL", self.alter, column));
            }
            _ => {}
        }

        let default_dropped_for_type = type_changed && old_spec.default.is_some();
        if new_spec.default != old_spec.default || default_dropped_for_type {
            match &new_spec.default {
                Some(default) => self.push(format!(
                    "{} ALTER COLUMN {} SET DEFAULT {}",
                    self.alter, column, default
                )),
                None if !default_dropped_for_type => {
                    self.push(format!("{} ALTER COLUMN {} DROP DEFAULT", self.alter, column))
                }
                None => {}
            }
        }

        if old.sensitive != new.sensitive {
            self.push(sensitivity_comment(&self.current.name, new));
        }

        Ok(())
    }

    fn add_constraints(
        &mut self,
        old_constraints: &BTreeMap<ConstraintKey, super::NamedConstraint>,
        new_constraints: &BTreeMap<ConstraintKey, super::NamedConstraint>,
    ) -> Result<()> {
        let (prev, cur) = (self.previous, self.current);
        let retyped: BTreeSet<FieldId> = self
            .new_specs
            .iter()
            .filter(|(id, spec)| {
                self.old_specs
                    .get(id)
                    .is_some_and(|old| old.column_type != spec.column_type)
            })
            .map(|(id, _)| *id)
            .collect();

        for (key, constraint) in new_constraints {
            if old_constraints
                .get(key)
                .is_some_and(|old| old.definition == constraint.definition)
            {
                continue;
            }

            // Probe existing rows of surviving, same-typed columns.
            let surviving = match key {
                ConstraintKey::Unique(id) | ConstraintKey::Check(id, _) => prev
                    .field(*id)
                    .filter(|_| !retyped.contains(id))
                    .zip(cur.field(*id)),
                _ => None,
            };
            if let Some((old_field, new_field)) = surviving {
                match key {
                    ConstraintKey::Unique(_) => {
                        self.ddl
                            .data_checks
                            .push(DataCheck::duplicates(&prev.name, &old_field.name));
                    }
                    ConstraintKey::Check(_, kind) => {
                        // Render the new check against the old column name.
                        let check_field = FieldDescription {
                            name: old_field.name.clone(),
                            ..new_field.clone()
                        };
                        let spec = FieldTypeMapper::map(&prev.name, &check_field)?;
                        let expression = spec
                            .checks()
                            .find(|(k, _)| k == kind)
                            .map(|(_, e)| e.to_string());
                        if let Some(expression) = expression {
                            self.ddl.data_checks.push(DataCheck::rows_matching(
                                &prev.name,
                                &old_field.name,
                                format!("values must satisfy the new {} check", kind.as_str()),
                                &format!("NOT ({})", expression),
                            ));
                        }
                    }
                    _ => {}
                }
            }

            let statements = constraint.add_statements(&cur.name);
            match key {
                ConstraintKey::ForeignKey(_) => self.ddl.references.extend(statements),
                _ => self.ddl.structure.extend(statements),
            }
        }
        Ok(())
    }

    fn indexes_and_triggers(&mut self) {
        let (prev, cur) = (self.previous, self.current);

        for field in cur.fields.iter().filter(|f| f.indexed) {
            if !prev.field(field.id).is_some_and(|f| f.indexed) {
                self.push(create_index(&cur.name, &field.name));
            }
        }

        if cur.timestamps {
            if prev.timestamps && prev.name != cur.name {
                self.push(format!(
                    "DROP TRIGGER IF EXISTS {} ON {}",
                    quote_ident(&trigger_name(&prev.name)),
                    quote_ident(&cur.name)
                ));
            }
            if !prev.timestamps || prev.name != cur.name {
                self.ddl.structure.extend(touch_trigger(&cur.name));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{DefaultValue, FieldType};

    fn articles(title: &str) -> TableDescription {
        TableDescription::new(7, "articles")
            .with_field(FieldDescription::new(1, "slug", FieldType::Slug).required().unique())
            .with_field(FieldDescription::new(2, "body", FieldType::LongText))
            .with_field(FieldDescription::new(3, title, FieldType::Text).required())
    }

    #[test]
    fn test_identical_tables_produce_nothing() {
        let ddl = DdlGenerator::diff(&articles("title"), &articles("title")).unwrap();
        assert!(ddl.is_empty());
        assert!(ddl.data_checks.is_empty());
    }

    #[test]
    fn test_rename_is_not_drop_and_add() {
        let statements =
            DdlGenerator::generate_diff(&articles("title"), &articles("name")).unwrap();
        assert_eq!(
            statements,
            vec!["ALTER TABLE \"articles\" RENAME COLUMN \"title\" TO \"name\"".to_string()]
        );
    }

    #[test]
    fn test_rename_into_dropped_column_name() {
        let prev = articles("title").with_field(FieldDescription::new(4, "name", FieldType::Text));
        let cur = articles("name");

        let statements = DdlGenerator::generate_diff(&prev, &cur).unwrap();
        assert_eq!(
            statements,
            vec![
                "ALTER TABLE \"articles\" DROP COLUMN IF EXISTS \"name\"".to_string(),
                "ALTER TABLE \"articles\" RENAME COLUMN \"title\" TO \"name\"".to_string(),
            ]
        );
    }

    #[test]
    fn test_swapped_column_names() {
        let table = |first: &str, second: &str| {
            TableDescription::new(8, "t")
                .with_field(FieldDescription::new(1, first, FieldType::Text))
                .with_field(FieldDescription::new(2, second, FieldType::Text))
        };

        let statements = DdlGenerator::generate_diff(&table("a", "b"), &table("b", "a")).unwrap();
        assert_eq!(
            statements,
            vec![
                "ALTER TABLE \"t\" RENAME COLUMN \"a\" TO \"schemasync_tmp_a\"".to_string(),
                "ALTER TABLE \"t\" RENAME COLUMN \"b\" TO \"schemasync_tmp_b\"".to_string(),
                "ALTER TABLE \"t\" RENAME COLUMN \"schemasync_tmp_a\" TO \"b\"".to_string(),
                "ALTER TABLE \"t\" RENAME COLUMN \"schemasync_tmp_b\" TO \"a\"".to_string(),
            ]
        );
    }

    #[test]
    fn test_add_and_drop_columns() {
        let prev = articles("title");
        let mut cur = articles("title");
        cur.fields.retain(|f| f.id != 2);
        cur.fields.push(
            FieldDescription::new(4, "views", FieldType::Integer)
                .required()
                .with_default(DefaultValue::Integer(0)),
        );

        let ddl = DdlGenerator::diff(&prev, &cur).unwrap();
        assert_eq!(
            ddl.structure,
            vec![
                "ALTER TABLE \"articles\" DROP COLUMN IF EXISTS \"body\"".to_string(),
                "ALTER TABLE \"articles\" ADD COLUMN IF NOT EXISTS \"views\" INTEGER DEFAULT 0 NOT NULL"
                    .to_string(),
            ]
        );
        assert!(ddl.data_checks.is_empty());
    }

    #[test]
    fn test_required_column_without_default_probes_rows() {
        let prev = articles("title");
        let cur = articles("title")
            .with_field(FieldDescription::new(4, "author", FieldType::Text).required());

        let ddl = DdlGenerator::diff(&prev, &cur).unwrap();
        assert_eq!(ddl.data_checks.len(), 1);
        assert_eq!(ddl.data_checks[0].query, "SELECT count(*) FROM \"articles\"");
    }

    #[test]
    fn test_widening_type_change() {
        let prev = articles("title")
            .with_field(FieldDescription::new(4, "views", FieldType::Integer));
        let cur = articles("title")
            .with_field(FieldDescription::new(4, "views", FieldType::BigInteger));

        let statements = DdlGenerator::generate_diff(&prev, &cur).unwrap();
        assert_eq!(
            statements,
            vec!["ALTER TABLE \"articles\" ALTER COLUMN \"views\" TYPE BIGINT".to_string()]
        );
    }

    #[test]
    fn test_narrowing_type_change_uses_using_and_probe() {
        let prev = articles("title").with_field(FieldDescription::new(4, "rank", FieldType::Text));
        let cur = articles("title")
            .with_field(FieldDescription::new(4, "position", FieldType::Integer));

        let ddl = DdlGenerator::diff(&prev, &cur).unwrap();
        assert_eq!(
            ddl.structure,
            vec![
                "ALTER TABLE \"articles\" RENAME COLUMN \"rank\" TO \"position\"".to_string(),
                "ALTER TABLE \"articles\" ALTER COLUMN \"position\" TYPE INTEGER USING trim(\"position\")::INTEGER"
                    .to_string(),
            ]
        );
        // The probe runs before the rename, so it uses the old name.
        assert_eq!(ddl.data_checks.len(), 1);
        assert_eq!(ddl.data_checks[0].column, "rank");
        assert!(ddl.data_checks[0].query.contains("WHERE \"rank\" IS NOT NULL"));
    }

    #[test]
    fn test_unsupported_conversion_is_an_error() {
        let prev = articles("title").with_field(FieldDescription::new(4, "ref", FieldType::Uuid));
        let cur = articles("title").with_field(FieldDescription::new(4, "ref", FieldType::Integer));

        match DdlGenerator::diff(&prev, &cur) {
            Err(Error::UnsupportedTypeConversion { from, to, .. }) => {
                assert_eq!(from, "UUID");
                assert_eq!(to, "INTEGER");
            }
            other => panic!("Expected UnsupportedTypeConversion, got {:?}", other),
        }
    }

    #[test]
    fn test_same_column_type_only_diffs_constraints() {
        let prev = articles("title").with_field(FieldDescription::new(4, "contact", FieldType::Text));
        let cur = articles("title").with_field(FieldDescription::new(4, "contact", FieldType::Email));

        let ddl = DdlGenerator::diff(&prev, &cur).unwrap();
        assert!(ddl.structure.iter().all(|s| !s.contains(" TYPE ")));
        assert!(ddl.structure.iter().any(|s| s.contains(
            "ADD CONSTRAINT \"articles_contact_format_check\""
        )));
        assert_eq!(ddl.data_checks.len(), 1);
        assert!(ddl.data_checks[0].query.contains("NOT (\"contact\" ~*"));
    }

    #[test]
    fn test_set_not_null_probes_nulls() {
        let prev = articles("title");
        let mut cur = articles("title");
        cur.fields[1].required = true;

        let ddl = DdlGenerator::diff(&prev, &cur).unwrap();
        assert_eq!(
            ddl.structure,
            vec!["ALTER TABLE \"articles\" ALTER COLUMN \"body\" SET NOT NULL".to_string()]
        );
        assert_eq!(
            ddl.data_checks[0].query,
            "SELECT count(*) FROM \"articles\" WHERE \"body\" IS NULL"
        );
    }

    #[test]
    fn test_new_unique_constraint_probes_duplicates() {
        let prev = articles("title");
        let mut cur = articles("title");
        cur.fields[2].unique = true;

        let ddl = DdlGenerator::diff(&prev, &cur).unwrap();
        assert_eq!(
            ddl.structure,
            vec![
                "ALTER TABLE \"articles\" DROP CONSTRAINT IF EXISTS \"articles_title_key\"".to_string(),
                "ALTER TABLE \"articles\" ADD CONSTRAINT \"articles_title_key\" UNIQUE (\"title\")"
                    .to_string(),
            ]
        );
        assert_eq!(ddl.data_checks[0].reason, "values must be unique");
    }

    #[test]
    fn test_table_rename_renames_index_and_trigger() {
        let prev = articles("title").with_field(FieldDescription::new(4, "tag", FieldType::Text).indexed());
        let mut cur = prev.clone();
        cur.name = "posts".into();

        let statements = DdlGenerator::generate_diff(&prev, &cur).unwrap();
        assert_eq!(statements[0], "ALTER TABLE \"articles\" RENAME TO \"posts\"");
        assert!(statements.contains(
            &"ALTER INDEX IF EXISTS \"articles_tag_idx\" RENAME TO \"posts_tag_idx\"".to_string()
        ));
        assert!(statements.contains(
            &"DROP TRIGGER IF EXISTS \"articles_touch_updated_at\" ON \"posts\"".to_string()
        ));
        // Constraint names follow the table name without being rebuilt.
        assert!(statements.contains(
            &"ALTER TABLE \"posts\" RENAME CONSTRAINT \"articles_slug_key\" TO \"posts_slug_key\""
                .to_string()
        ));
        assert!(statements.iter().all(|s| !s.contains("DROP CONSTRAINT")));
    }

    #[test]
    fn test_default_change() {
        let prev = articles("title");
        let mut cur = articles("title");
        cur.fields[1].default = Some(DefaultValue::Text(String::new()));

        let statements = DdlGenerator::generate_diff(&prev, &cur).unwrap();
        assert_eq!(
            statements,
            vec!["ALTER TABLE \"articles\" ALTER COLUMN \"body\" SET DEFAULT ''".to_string()]
        );
    }

    #[test]
    fn test_index_toggle() {
        let prev = articles("title");
        let mut cur = articles("title");
        cur.fields[1].indexed = true;

        let statements = DdlGenerator::generate_diff(&prev, &cur).unwrap();
        assert_eq!(
            statements,
            vec!["CREATE INDEX IF NOT EXISTS \"articles_body_idx\" ON \"articles\" (\"body\")".to_string()]
        );

        let statements = DdlGenerator::generate_diff(&cur, &prev).unwrap();
        assert_eq!(
            statements,
            vec!["DROP INDEX IF EXISTS \"articles_body_idx\"".to_string()]
        );
    }

    #[test]
    fn test_computed_expression_change_recreates_column() {
        let prev = articles("title").with_field(FieldDescription::new(
            4,
            "title_length",
            FieldType::computed("char_length(title)", FieldType::Integer),
        ));
        let cur = articles("title").with_field(FieldDescription::new(
            4,
            "title_length",
            FieldType::computed("octet_length(title)", FieldType::Integer),
        ));

        let statements = DdlGenerator::generate_diff(&prev, &cur).unwrap();
        assert_eq!(statements.len(), 2);
        assert!(statements[0].contains("DROP COLUMN IF EXISTS \"title_length\""));
        assert!(statements[1].contains("octet_length(title)"));
    }
}

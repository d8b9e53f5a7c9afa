//! Migration plan generation.
//!
//! Turns a previous and a current description into one ordered statement
//! batch:
//!
//! 1. shared prelude (trigger function)
//! 2. drops of tables that left the description
//! 3. drops of changed constraints and indexes
//! 4. table renames, then constraint and index renames
//! 5. per-table create or alter, tables matched by id
//! 6. foreign keys, once every table exists
//! 7. row-level security policies and column privileges
//!
//! Every rename runs before any table is created, so a new table may take
//! a name another table is leaving.

use crate::catalog::{TableDescription, TableId};
use crate::config::PolicyConfig;
use crate::ddl::{rename_statements, DataCheck, DdlGenerator, Rename};
use crate::error::{Error, Result};
use crate::policy::{PolicyCompiler, RoleRegistry};
use std::collections::{BTreeMap, HashSet};

/// A generated migration, not yet applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaPlan {
    /// Statements, in execution order.
    pub statements: Vec<String>,
    /// Probes that must find no offending rows before execution.
    pub data_checks: Vec<DataCheck>,
}

impl SchemaPlan {
    /// Generate the plan evolving `previous` into `current`.
    ///
    /// Without a previous description every table takes the create path,
    /// which is safe against an existing schema but cannot alter it.
    pub fn generate(
        previous: Option<&[TableDescription]>,
        current: &[TableDescription],
        policy: &PolicyConfig,
        registry: &dyn RoleRegistry,
    ) -> Result<Self> {
        validate_batch(current)?;

        let mut plan = SchemaPlan {
            statements: DdlGenerator::prelude(),
            data_checks: Vec::new(),
        };

        let previous: BTreeMap<TableId, &TableDescription> = previous
            .unwrap_or_default()
            .iter()
            .map(|t| (t.id, t))
            .collect();
        let current_ids: HashSet<TableId> = current.iter().map(|t| t.id).collect();

        for dropped in previous.values().filter(|t| !current_ids.contains(&t.id)) {
            plan.statements.extend(DdlGenerator::drop_table(dropped));
        }

        let mut teardown = Vec::new();
        let mut renames = Vec::new();
        let mut structure = Vec::new();
        let mut references = Vec::new();
        for table in current {
            let ddl = match previous.get(&table.id) {
                Some(prev) => DdlGenerator::diff(prev, table)?,
                None => DdlGenerator::create(table)?,
            };
            teardown.extend(ddl.teardown);
            renames.extend(ddl.renames);
            structure.extend(ddl.structure);
            references.extend(ddl.references);
            plan.data_checks.extend(ddl.data_checks);
        }
        plan.statements.extend(teardown);
        let (table_renames, object_renames): (Vec<&Rename>, Vec<&Rename>) =
            renames.iter().partition(|r| r.is_table());
        plan.statements.extend(rename_statements(table_renames));
        plan.statements.extend(rename_statements(object_renames));
        plan.statements.extend(structure);
        plan.statements.extend(references);

        let compiler = PolicyCompiler::new(policy, registry);
        for table in current {
            plan.statements.extend(compiler.compile(table)?.statements());
        }

        Ok(plan)
    }

    /// Number of statements.
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    /// Check if the plan has no statements.
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

fn validate_batch(tables: &[TableDescription]) -> Result<()> {
    let mut ids = HashSet::new();
    let mut names = HashSet::new();
    for table in tables {
        if !ids.insert(table.id) {
            return Err(Error::invalid(
                &table.name,
                format!("duplicate table id {}", table.id),
            ));
        }
        if !names.insert(table.name.as_str()) {
            return Err(Error::invalid(&table.name, "duplicate table name"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{AccessRule, CrudAction, FieldDescription, FieldType, ReferentialAction};
    use crate::policy::OpenRoleRegistry;

    fn users_table() -> TableDescription {
        TableDescription::new(1, "users")
            .with_field(FieldDescription::new(1, "email", FieldType::Email).required().unique())
            .with_rule(CrudAction::Read, AccessRule::Authenticated)
    }

    fn posts_table() -> TableDescription {
        TableDescription::new(2, "posts")
            .with_field(FieldDescription::new(1, "title", FieldType::Text).required())
            .with_field(FieldDescription::new(
                2,
                "author_id",
                FieldType::reference("users", "id", FieldType::BigInteger)
                    .with_on_delete(ReferentialAction::Cascade),
            ))
    }

    fn generate(previous: Option<&[TableDescription]>, current: &[TableDescription]) -> SchemaPlan {
        SchemaPlan::generate(previous, current, &PolicyConfig::default(), &OpenRoleRegistry).unwrap()
    }

    fn position(plan: &SchemaPlan, needle: &str) -> usize {
        plan.statements
            .iter()
            .position(|s| s.contains(needle))
            .unwrap_or_else(|| panic!("no statement containing {}", needle))
    }

    #[test]
    fn test_foreign_keys_follow_every_table() {
        // Posts is declared before the table it references.
        let plan = generate(None, &[posts_table(), users_table()]);

        let fk = position(&plan, "FOREIGN KEY");
        assert!(fk > position(&plan, "CREATE TABLE IF NOT EXISTS \"users\""));
        assert!(fk > position(&plan, "CREATE TABLE IF NOT EXISTS \"posts\""));
        assert!(fk < position(&plan, "ENABLE ROW LEVEL SECURITY"));
        assert!(plan.statements[0].contains("schemasync_touch_updated_at"));
    }

    #[test]
    fn test_dropped_table() {
        let previous = vec![users_table(), posts_table()];
        let plan = generate(Some(&previous), &[users_table()]);

        assert_eq!(
            plan.statements[1],
            "DROP TABLE IF EXISTS \"posts\" CASCADE"
        );
        assert!(!plan.statements.iter().any(|s| s.starts_with("CREATE TABLE")));
    }

    #[test]
    fn test_unchanged_tables_only_refresh_policies() {
        let tables = vec![users_table()];
        let plan = generate(Some(&tables), &tables);

        assert!(plan.data_checks.is_empty());
        assert!(plan
            .statements
            .iter()
            .skip(1)
            .all(|s| s.contains("POLICY") || s.contains("ROW LEVEL SECURITY")));
    }

    #[test]
    fn test_new_table_takes_renamed_tables_name() {
        let posts = |id, name: &str| {
            TableDescription::new(id, name)
                .with_field(FieldDescription::new(1, "title", FieldType::Text).required())
        };
        let previous = vec![posts(1, "posts")];
        // The new table is declared before the one leaving its name.
        let plan = generate(Some(&previous), &[posts(2, "posts"), posts(1, "archived_posts")]);

        let create = position(&plan, "CREATE TABLE IF NOT EXISTS \"posts\"");
        assert!(position(&plan, "ALTER TABLE \"posts\" RENAME TO \"archived_posts\"") < create);
        assert!(
            position(
                &plan,
                "ALTER TABLE \"archived_posts\" RENAME CONSTRAINT \"posts_pkey\" TO \"archived_posts_pkey\""
            ) < create
        );
    }

    #[test]
    fn test_swapped_table_names() {
        let table = |id, name: &str| {
            TableDescription::new(id, name)
                .with_field(FieldDescription::new(1, "label", FieldType::Text))
        };
        let previous = vec![table(1, "a"), table(2, "b")];
        let plan = generate(Some(&previous), &[table(1, "b"), table(2, "a")]);

        assert_eq!(
            plan.statements[1..5].to_vec(),
            vec![
                "ALTER TABLE \"a\" RENAME TO \"schemasync_tmp_a\"".to_string(),
                "ALTER TABLE \"b\" RENAME TO \"schemasync_tmp_b\"".to_string(),
                "ALTER TABLE \"schemasync_tmp_a\" RENAME TO \"b\"".to_string(),
                "ALTER TABLE \"schemasync_tmp_b\" RENAME TO \"a\"".to_string(),
            ]
        );
        assert!(plan.statements.contains(
            &"ALTER TABLE \"b\" RENAME CONSTRAINT \"schemasync_tmp_a_pkey\" TO \"b_pkey\"".to_string()
        ));
        assert!(!plan.statements.iter().any(|s| s.starts_with("CREATE TABLE")));
    }

    #[test]
    fn test_duplicate_table_ids_rejected() {
        let clash = TableDescription::new(1, "accounts");
        let err = SchemaPlan::generate(
            None,
            &[users_table(), clash],
            &PolicyConfig::default(),
            &OpenRoleRegistry,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidDescription { .. }));
    }
}

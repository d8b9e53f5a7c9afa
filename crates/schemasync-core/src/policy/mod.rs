//! Access rules to row-level security and column privileges.
//!
//! Table-level rules become one permissive policy per CRUD action; a missing
//! rule becomes a policy that admits nothing. Field-level rules become
//! column-scoped GRANT and REVOKE statements. Row visibility stays with the
//! table policy; column privileges only narrow what a visible row exposes.

mod compiler;
pub mod registry;

pub use compiler::PolicyCompiler;
pub use registry::{OpenRoleRegistry, RoleRegistry, StaticRoleRegistry};

use crate::catalog::CrudAction;
use crate::sql::{ident_list, quote_ident};

/// Row-level security policy for one action on one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePolicy {
    /// Table the policy is attached to.
    pub table: String,
    /// Policy name, unique within the table.
    pub name: String,
    /// Action the policy governs.
    pub action: CrudAction,
    /// Boolean SQL expression a row must satisfy.
    pub expression: String,
}

impl TablePolicy {
    /// Drop-then-create statements for the policy.
    pub fn statements(&self) -> [String; 2] {
        let name = quote_ident(&self.name);
        let table = quote_ident(&self.table);
        let clause = match self.action {
            CrudAction::Create => format!("WITH CHECK ({})", self.expression),
            CrudAction::Read | CrudAction::Delete => format!("USING ({})", self.expression),
            CrudAction::Update => format!(
                "USING ({}) WITH CHECK ({})",
                self.expression, self.expression
            ),
        };
        [
            format!("DROP POLICY IF EXISTS {} ON {}", name, table),
            format!(
                "CREATE POLICY {} ON {} AS PERMISSIVE FOR {} TO PUBLIC {}",
                name,
                table,
                self.action.command(),
                clause
            ),
        ]
    }
}

/// GRANT or REVOKE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantKind {
    /// GRANT ... TO.
    Grant,
    /// REVOKE ... FROM.
    Revoke,
}

/// A privilege statement, table-wide or column-scoped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnGrant {
    /// GRANT or REVOKE.
    pub kind: GrantKind,
    /// Privileges, e.g. `SELECT`.
    pub privileges: Vec<&'static str>,
    /// Table name.
    pub table: String,
    /// Columns the privileges are scoped to; `None` means table-wide.
    pub columns: Option<Vec<String>>,
    /// Database roles affected.
    pub roles: Vec<String>,
}

impl ColumnGrant {
    /// Render the statement.
    pub fn to_sql(&self) -> String {
        let privileges = match &self.columns {
            Some(columns) => {
                let list = ident_list(columns);
                self.privileges
                    .iter()
                    .map(|p| format!("{} ({})", p, list))
                    .collect::<Vec<_>>()
                    .join(", ")
            }
            None => self.privileges.join(", "),
        };
        let (verb, preposition) = match self.kind {
            GrantKind::Grant => ("GRANT", "TO"),
            GrantKind::Revoke => ("REVOKE", "FROM"),
        };
        format!(
            "{} {} ON {} {} {}",
            verb,
            privileges,
            quote_ident(&self.table),
            preposition,
            ident_list(&self.roles)
        )
    }
}

/// Everything the policy compiler produces for one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledPolicies {
    /// Statements enabling row-level security on the table.
    pub setup: Vec<String>,
    /// One policy per CRUD action.
    pub table_policies: Vec<TablePolicy>,
    /// Privilege statements, in execution order.
    pub column_grants: Vec<ColumnGrant>,
}

impl CompiledPolicies {
    /// All statements in execution order.
    pub fn statements(&self) -> Vec<String> {
        let mut statements = self.setup.clone();
        statements.extend(self.table_policies.iter().flat_map(|p| p.statements()));
        statements.extend(self.column_grants.iter().map(|g| g.to_sql()));
        statements
    }

    /// Policy for the given action.
    pub fn policy(&self, action: CrudAction) -> Option<&TablePolicy> {
        self.table_policies.iter().find(|p| p.action == action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_policy_checks_both_sides() {
        let policy = TablePolicy {
            table: "docs".into(),
            name: "schemasync_update".into(),
            action: CrudAction::Update,
            expression: "auth.uid() = \"owner_id\"".into(),
        };
        let [drop, create] = policy.statements();
        assert_eq!(drop, "DROP POLICY IF EXISTS \"schemasync_update\" ON \"docs\"");
        assert_eq!(
            create,
            "CREATE POLICY \"schemasync_update\" ON \"docs\" AS PERMISSIVE FOR UPDATE TO PUBLIC \
             USING (auth.uid() = \"owner_id\") WITH CHECK (auth.uid() = \"owner_id\")"
        );
    }

    #[test]
    fn test_column_grant_sql() {
        let grant = ColumnGrant {
            kind: GrantKind::Grant,
            privileges: vec!["INSERT", "UPDATE"],
            table: "staff".into(),
            columns: Some(vec!["name".into(), "title".into()]),
            roles: vec!["hr".into()],
        };
        assert_eq!(
            grant.to_sql(),
            "GRANT INSERT (\"name\", \"title\"), UPDATE (\"name\", \"title\") ON \"staff\" TO \"hr\""
        );

        let revoke = ColumnGrant {
            kind: GrantKind::Revoke,
            privileges: vec!["SELECT"],
            table: "staff".into(),
            columns: None,
            roles: vec!["hr".into(), "it".into()],
        };
        assert_eq!(revoke.to_sql(), "REVOKE SELECT ON \"staff\" FROM \"hr\", \"it\"");
    }
}
